use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tollgate_core::config::ConsentConfig;
use tollgate_core::dom::PageFixture;
use tollgate_core::events::ConsentEvent;
use tollgate_core::{Category, PartialPreferences, PreferenceRecord};

use crate::cli::{CompletionShell, FetchMode};
use crate::commands::common::{format_record_lines, record_view, resolve_config, Context};
use crate::commands::completions::render_completions;
use crate::commands::cookie::stored_cookie_line;
use crate::commands::has::category_granted;
use crate::commands::reconcile::{
    format_event_line, load_fixture, reconcile_fixture, Simulation,
};
use crate::commands::set::{apply_preferences, partial_from_flags};
use crate::error::CliError;

fn context(dir: &TempDir, secure: bool) -> Context {
    Context {
        data_dir: dir.path().join("profile"),
        config: ConsentConfig::default(),
        secure,
    }
}

fn simulation(fetch: FetchMode) -> Simulation {
    Simulation {
        fetch,
        elapse: Duration::from_secs(1),
        realtime: false,
    }
}

const TRACKED_PAGE: &str = r#"{ "body": [
    { "tag": "script", "attrs": { "data-consent": "analytics", "data-src": "https://stats.example/t.js", "data-timeout": "50" } },
    { "tag": "div", "attrs": { "data-consent-required": "analytics" }, "text": "Chart" }
] }"#;

#[test]
fn partial_from_flags_declines_unlisted_categories() {
    let partial = partial_from_flags(true, false, false);
    let record = PreferenceRecord::from_partial(&partial, chrono::Utc::now());
    assert!(record.analytics);
    assert!(!record.marketing);
    assert!(!record.functional);
    assert!(record.necessary);
}

#[test]
fn stored_decision_is_visible_to_later_commands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let context = context(&dir, false);

    let saved = apply_preferences(
        &context,
        &PartialPreferences::default().with(Category::Functional, true),
    )
    .expect("set should succeed");
    let loaded = context.open_storage(false).expect("storage").load();

    assert_eq!(loaded, saved);
    assert!(category_granted(&context, "functional").expect("known category"));
    assert!(!category_granted(&context, "Marketing").expect("known category"));
}

#[test]
fn has_rejects_unknown_categories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = category_granted(&context(&dir, false), "advertising");
    assert!(matches!(
        result,
        Err(CliError::Core(tollgate_core::Error::UnknownCategory(name))) if name == "advertising"
    ));
}

#[test]
fn record_lines_use_category_labels() {
    let lines = format_record_lines(&PreferenceRecord::default(), &ConsentConfig::default());
    assert_eq!(
        lines,
        vec![
            "necessary    granted".to_string(),
            "Functional   declined".to_string(),
            "Analytics    declined".to_string(),
            "Marketing    declined".to_string(),
            "Decided      no decision yet".to_string(),
        ]
    );
}

#[test]
fn record_view_reports_decision_state() {
    let undecided = record_view(&PreferenceRecord::default());
    assert!(!undecided.decided);
    assert_eq!(undecided.timestamp, None);

    let record = PreferenceRecord::from_partial(&PartialPreferences::accept_all(), chrono::Utc::now());
    let view = record_view(&record);
    assert!(view.decided);
    assert!(view.marketing);
    assert!(view.timestamp.is_some_and(|stamp| stamp.ends_with('Z')));
}

#[test]
fn cookie_line_carries_record_and_attributes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let context = context(&dir, true);
    apply_preferences(&context, &PartialPreferences::reject_all()).expect("set should succeed");

    let line = stored_cookie_line(&context).expect("cookie line");
    assert!(line.starts_with("cookie-consent=%7B%22necessary%22%3Atrue"));
    assert!(line.contains("; path=/; SameSite=Lax; Secure; Max-Age=7776000"));
}

#[test]
fn explicit_config_path_must_exist() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("consent.json");
    assert!(matches!(
        resolve_config(Some(&missing)),
        Err(CliError::Config(_))
    ));

    std::fs::write(&missing, r#"{ "debounce_ms": 250 }"#).expect("write config");
    let config = resolve_config(Some(&missing)).expect("config should load");
    assert_eq!(config.debounce_ms, 250);
}

#[test]
fn unreadable_fixture_names_the_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("page.json");
    std::fs::write(&path, "{ \"body\": [ { \"tag\": 3 } ] }").expect("write fixture");

    match load_fixture(&path) {
        Err(CliError::Fixture { path: reported, .. }) => {
            assert_eq!(Path::new(&reported), path.as_path());
        }
        other => panic!("expected fixture error, got {other:?}"),
    }
}

#[tokio::test]
async fn reconcile_without_decision_keeps_content_restricted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fixture = PageFixture::parse(TRACKED_PAGE).expect("fixture");

    let report = reconcile_fixture(&context(&dir, false), &fixture, simulation(FetchMode::Load))
        .await
        .expect("reconcile");

    assert_eq!(report.availability, "connected");
    assert_eq!(report.loaded_resources, 0);
    assert!(report.html.contains("consent-restricted"));
    assert_eq!(
        report.events,
        vec![ConsentEvent::RestrictionsUpdated {
            restricted: 1,
            allowed: 0,
        }]
    );
}

#[tokio::test]
async fn reconcile_after_consent_releases_scripts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let context = context(&dir, false);
    apply_preferences(&context, &PartialPreferences::accept_all()).expect("set should succeed");
    let fixture = PageFixture::parse(TRACKED_PAGE).expect("fixture");

    let report = reconcile_fixture(&context, &fixture, simulation(FetchMode::Load))
        .await
        .expect("reconcile");

    assert_eq!(report.loaded_resources, 1);
    assert!(report.pending_fetches.is_empty());
    assert!(!report.html.contains("consent-restricted"));
    let lines = report.events.iter().map(format_event_line).collect::<Vec<_>>();
    assert_eq!(
        lines,
        vec![
            "script https://stats.example/t.js: loaded".to_string(),
            "restrictions: 0 restricted, 1 allowed".to_string(),
        ]
    );
}

#[tokio::test]
async fn hanging_scripts_report_a_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let context = context(&dir, false);
    apply_preferences(&context, &PartialPreferences::accept_all()).expect("set should succeed");
    let fixture = PageFixture::parse(TRACKED_PAGE).expect("fixture");

    let report = reconcile_fixture(&context, &fixture, simulation(FetchMode::Hang))
        .await
        .expect("reconcile");

    assert_eq!(report.elapsed_ms, 1_000);
    assert_eq!(report.pending_fetches, vec!["https://stats.example/t.js".to_string()]);
    assert_eq!(
        format_event_line(&report.events[0]),
        "script https://stats.example/t.js: failed (Timeout)"
    );
}

#[test]
fn completions_use_binary_name() {
    let script = String::from_utf8(render_completions(CompletionShell::Bash)).expect("utf-8");
    assert!(script.contains("tollgate"));
}
