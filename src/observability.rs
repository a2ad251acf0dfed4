//! Logging setup for the extraction driver.
//!
//! Events carry a `component` and a dotted `event` name. By default only this
//! crate logs at `info`; dependencies are held at `warn`.

use std::env;
use std::path::Path;

use thiserror::Error;
use tracing::{info, info_span, Span};
use tracing_subscriber::EnvFilter;

use crate::extract::{ExtractionConfig, ExtractionPaths};

const CRATE_TARGET: &str = "casefeat";
const DEPENDENCY_LEVEL: &str = "warn";
const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Either a bare level applied to this crate, or a full `EnvFilter` directive.
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            format: LogFormat::Json,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive for this config. A bare level such as `debug`
    /// is scoped to this crate; anything naming a target is used verbatim.
    pub fn filter_directive(&self) -> String {
        let level = self.level.trim();
        if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("{DEPENDENCY_LEVEL},{CRATE_TARGET}={level}")
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `CASEFEAT_LOG_LEVEL`, `CASEFEAT_LOG_FORMAT` and `CASEFEAT_LOG_TARGET`.
/// Unparseable values keep the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Some(level) = non_empty_var("CASEFEAT_LOG_LEVEL") {
        config.level = level;
    }
    if let Some(format) = non_empty_var("CASEFEAT_LOG_FORMAT").and_then(|raw| parse_log_format(&raw)) {
        config.format = format;
    }
    if let Some(target) = non_empty_var("CASEFEAT_LOG_TARGET").and_then(|raw| parse_bool(&raw)) {
        config.include_target = target;
    }

    config
}

fn non_empty_var(key: &str) -> Option<String> {
    let raw = env::var(key).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_new(config.filter_directive()).unwrap_or_else(|_| {
        EnvFilter::new(format!("{DEPENDENCY_LEVEL},{CRATE_TARGET}={DEFAULT_LEVEL}"))
    })
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(config.include_target);

    match config.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.json().with_ansi(false).finish())?
        }
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

/// Span covering one extraction run; every event of the run is nested in it.
pub fn extraction_span(feature_dir: &Path, config: &ExtractionConfig) -> Span {
    info_span!(
        "extraction",
        feature_dir = %feature_dir.display(),
        output_mode = ?config.output_mode,
        failure_policy = ?config.failure_policy,
        cutoff_source = ?config.cutoff_source
    )
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "extract_features",
        event = "app.start",
        filter = %config.filter_directive(),
        log_format = ?config.format
    );
}

pub fn log_inputs_selected(paths: &ExtractionPaths, config: &ExtractionConfig) {
    info!(
        component = "extract_features",
        event = "inputs.selected",
        store_dir = %paths.store_dir.display(),
        feature_dir = %paths.feature_dir.display(),
        catalog_file = %paths.catalog_file.display(),
        case_day_file = %paths.case_day_file.display(),
        labeled_case_file = %paths.labeled_case_file.display(),
        threads = config.effective_threads(),
        flag_source_table = %config.flag_source_table
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" | "text" => Some(LogFormat::Pretty),
        _ => None,
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
