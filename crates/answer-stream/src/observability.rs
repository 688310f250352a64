//! Process-wide `tracing` setup for binaries embedding the client.
//!
//! Logs go to stderr by default so an answer printed on stdout stays clean.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const ENABLED_VAR: &str = "ANSWER_STREAM_OBSERVABILITY_ENABLED";
const LEVEL_VAR: &str = "ANSWER_STREAM_LOG_LEVEL";
const JSON_PATH_VAR: &str = "ANSWER_STREAM_JSON_LOG_PATH";

/// Where log records are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogOutput {
    /// Compact human-readable lines on stderr.
    Console,
    /// One JSON object per line, appended to this file.
    JsonFile(PathBuf),
}

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// Filter directive; `None` defers to `RUST_LOG`, then `info`.
    pub filter: Option<String>,
    pub output: LogOutput,
}

impl LogSettings {
    /// Reads `ANSWER_STREAM_OBSERVABILITY_ENABLED`, `ANSWER_STREAM_LOG_LEVEL`
    /// and `ANSWER_STREAM_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup(ENABLED_VAR)
            .and_then(|value| parse_bool(&value))
            .unwrap_or(true);
        let filter = lookup(LEVEL_VAR).filter(|level| !level.trim().is_empty());
        let output = lookup(JSON_PATH_VAR)
            .filter(|path| !path.trim().is_empty())
            .map_or(LogOutput::Console, |path| LogOutput::JsonFile(path.into()));
        Self {
            enabled,
            filter,
            output,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        self.filter
            .as_deref()
            .and_then(|directive| EnvFilter::try_new(directive).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Installs the global subscriber from [`LogSettings::from_env`].
///
/// Only the first call in a process has any effect. A subscriber installed
/// elsewhere first is left in place.
pub fn init_observability() {
    INIT.get_or_init(|| install(&LogSettings::from_env()));
}

fn install(settings: &LogSettings) {
    if !settings.enabled {
        return;
    }
    let registry = tracing_subscriber::registry().with(settings.env_filter());
    match &settings.output {
        LogOutput::Console => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = registry.with(layer).try_init();
        }
        LogOutput::JsonFile(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let _ = std::fs::create_dir_all(dir);
            let Some(file_name) = path.file_name() else {
                return;
            };
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_writer(tracing_appender::rolling::never(dir, file_name));
            let _ = registry.with(layer).try_init();
        }
    }
}
