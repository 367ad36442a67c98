use std::env;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Serialize;
use tollgate_core::config::{load_config, ConsentConfig};
use tollgate_core::runtime::Page;
use tollgate_core::storage::PreferenceStorage;
use tollgate_core::store::{ConsentStore, PromptState};
use tollgate_core::util::iso_millis;
use tollgate_core::{Category, PreferenceRecord};

use crate::error::CliError;

/// Settings shared by every command
pub struct Context {
    pub data_dir: PathBuf,
    pub config: ConsentConfig,
    pub secure: bool,
}

impl Context {
    pub fn new(
        data_dir: Option<PathBuf>,
        config_path: Option<&Path>,
        secure: bool,
    ) -> Result<Self, CliError> {
        Ok(Self {
            data_dir: resolve_data_dir(data_dir),
            config: resolve_config(config_path)?,
            secure,
        })
    }

    /// Origin the stored preferences belong to
    pub const fn origin(&self) -> &'static str {
        if self.secure {
            "https://localhost/"
        } else {
            "http://localhost/"
        }
    }

    pub fn open_storage(&self, secure_origin: bool) -> Result<PreferenceStorage, CliError> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(PreferenceStorage::open_dir(
            &self.data_dir,
            &self.config,
            secure_origin,
        )?)
    }

    /// Install a file-backed store on `page`
    pub fn install_store(&self, page: &Page) -> Result<ConsentStore, CliError> {
        let storage = self.open_storage(self.secure || page.is_secure())?;
        Ok(ConsentStore::install(
            page,
            &self.config,
            storage,
            Rc::new(PromptState::new()),
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct RecordView {
    pub necessary: bool,
    pub functional: bool,
    pub analytics: bool,
    pub marketing: bool,
    pub decided: bool,
    pub timestamp: Option<String>,
    pub version: u32,
}

pub fn record_view(record: &PreferenceRecord) -> RecordView {
    RecordView {
        necessary: record.necessary,
        functional: record.functional,
        analytics: record.analytics,
        marketing: record.marketing,
        decided: record.is_decided(),
        timestamp: record.timestamp.map(iso_millis),
        version: record.version,
    }
}

pub fn format_record_lines(record: &PreferenceRecord, config: &ConsentConfig) -> Vec<String> {
    let mut lines = Category::ALL
        .iter()
        .map(|category| {
            let state = if record.allows(*category) {
                "granted"
            } else {
                "declined"
            };
            format!(
                "{:<12} {state}",
                config.category_label(category.as_str())
            )
        })
        .collect::<Vec<_>>();
    lines.push(match record.timestamp {
        Some(timestamp) => format!("{:<12} {}", "Decided", iso_millis(timestamp)),
        None => format!("{:<12} no decision yet", "Decided"),
    });
    lines
}

pub fn print_record(
    record: &PreferenceRecord,
    config: &ConsentConfig,
    as_json: bool,
) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(&record_view(record))?);
    } else {
        for line in format_record_lines(record, config) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| env::var_os("TOLLGATE_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tollgate")
}

/// Configuration from `--config`, `TOLLGATE_CONFIG` or the defaults.
///
/// A path given on the command line must exist.
pub fn resolve_config(cli_config: Option<&Path>) -> Result<ConsentConfig, CliError> {
    if let Some(path) = cli_config {
        if !path.exists() {
            return Err(CliError::Config(format!(
                "{} does not exist",
                path.display()
            )));
        }
        return Ok(load_config(path)?);
    }
    match env::var_os("TOLLGATE_CONFIG") {
        Some(path) => Ok(load_config(Path::new(&path))?),
        None => Ok(ConsentConfig::default()),
    }
}
