use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tollgate_core::dom::{render_html, PageFixture};
use tollgate_core::events::ConsentEvent;
use tollgate_core::runtime::{FetchOutcome, Page, ScriptedDialogs};
use tollgate_core::ContentReconciler;
use tracing::{debug, info};

use crate::cli::FetchMode;
use crate::commands::common::Context;
use crate::error::CliError;

/// How the page clock and network behave while reconciling
#[derive(Debug, Clone, Copy)]
pub struct Simulation {
    pub fetch: FetchMode,
    pub elapse: Duration,
    pub realtime: bool,
}

#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    pub url: String,
    pub elapsed_ms: u64,
    pub availability: String,
    pub loaded_resources: usize,
    pub pending_fetches: Vec<String>,
    pub events: Vec<ConsentEvent>,
    pub html: String,
}

pub fn load_fixture(path: &Path) -> Result<PageFixture, CliError> {
    let fixture_error = |reason: String| CliError::Fixture {
        path: path.display().to_string(),
        reason,
    };
    let raw = std::fs::read_to_string(path).map_err(|error| fixture_error(error.to_string()))?;
    PageFixture::parse(&raw).map_err(|error| fixture_error(error.to_string()))
}

/// Open the fixture as a page with the stored consent applied and let
/// `simulation.elapse` pass.
pub async fn reconcile_fixture(
    context: &Context,
    fixture: &PageFixture,
    simulation: Simulation,
) -> Result<ReconcileReport, CliError> {
    let page = Page::from_fixture(fixture, Rc::new(ScriptedDialogs::answering(false)));
    let store = context.install_store(&page)?;
    store.initialize();
    ContentReconciler::install(&page, &context.config);

    let deadline = page.now() + simulation.elapse;
    loop {
        answer_fetches(&page, simulation.fetch);
        let now = page.now();
        if now >= deadline {
            break;
        }
        let next = page
            .next_timer_due()
            .map_or(deadline, |due| due.min(deadline))
            .max(now);
        let step = next - now;
        if simulation.realtime && !step.is_zero() {
            sleep(step).await;
        }
        page.advance(step);
    }

    let reconciler = page.restrictions();
    let report = ReconcileReport {
        url: page.url().to_string(),
        elapsed_ms: u64::try_from(page.now().as_millis()).unwrap_or(u64::MAX),
        availability: reconciler.as_ref().map_or_else(
            || "missing".to_string(),
            |reconciler| format!("{:?}", reconciler.availability()).to_lowercase(),
        ),
        loaded_resources: store.loaded_resources(),
        pending_fetches: page
            .pending_fetches()
            .into_iter()
            .map(|fetch| fetch.source)
            .collect(),
        events: page.events().take_history(),
        html: render_html(&page.document()),
    };
    info!(
        passes = reconciler.as_ref().map_or(0, ContentReconciler::pass_count),
        loaded = report.loaded_resources,
        "reconciled {}",
        report.url
    );
    if let Some(reconciler) = reconciler {
        reconciler.dispose();
    }
    Ok(report)
}

fn answer_fetches(page: &Page, mode: FetchMode) {
    let outcome = match mode {
        FetchMode::Load => FetchOutcome::Loaded,
        FetchMode::Error => FetchOutcome::Failed,
        FetchMode::Hang => return,
    };
    for fetch in page.pending_fetches() {
        debug!(source = %fetch.source, ?outcome, "answering fetch");
        page.complete_fetch(fetch.node, outcome);
    }
}

pub fn format_event_line(event: &ConsentEvent) -> String {
    match event {
        ConsentEvent::ScriptLoaded {
            source,
            success: true,
            ..
        } => format!("script {source}: loaded"),
        ConsentEvent::ScriptLoaded { source, error, .. } => format!(
            "script {source}: failed ({})",
            error.as_deref().unwrap_or("unknown error")
        ),
        ConsentEvent::RestrictionsUpdated {
            restricted,
            allowed,
        } => format!("restrictions: {restricted} restricted, {allowed} allowed"),
    }
}

pub async fn run_reconcile(
    context: &Context,
    fixture_path: &Path,
    simulation: Simulation,
    as_json: bool,
) -> Result<(), CliError> {
    let fixture = load_fixture(fixture_path)?;
    let report = reconcile_fixture(context, &fixture, simulation).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.html);
        println!();
        for event in &report.events {
            println!("{}", format_event_line(event));
        }
        for source in &report.pending_fetches {
            println!("script {source}: still pending");
        }
    }

    Ok(())
}
