use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_JSON_LOG_FILE: &str = "console-stream.logs.jsonl";

/// Logging setup resolved from the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// Filter directive overriding `RUST_LOG`.
    pub level: Option<String>,
    /// JSON-lines output file; stdout when unset.
    pub json_path: Option<PathBuf>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = ["CONSOLE_STREAM_OBSERVABILITY_ENABLED", "CONSOLE_STREAM_OBSERVABILITY"]
            .into_iter()
            .find_map(&lookup)
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        Self {
            enabled,
            level: lookup("CONSOLE_STREAM_LOG_LEVEL").filter(|v| !v.trim().is_empty()),
            json_path: lookup("CONSOLE_STREAM_JSON_LOG_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs the process-wide tracing subscriber, once.
///
/// Environment variables:
/// - `CONSOLE_STREAM_OBSERVABILITY_ENABLED` / `CONSOLE_STREAM_OBSERVABILITY`: enable flag (default on).
/// - `CONSOLE_STREAM_LOG_LEVEL`: filter override (`info`, `console_stream=debug`, ...).
/// - `CONSOLE_STREAM_JSON_LOG_PATH`: write JSON lines to this file instead of compact stdout output.
/// - `RUST_LOG`: fallback filter.
///
/// Chunks delivered without a render target are logged under the
/// `console_stream::sink` target at info level.
pub fn init_observability() {
    init_with(LogSettings::from_env());
}

/// Like [`init_observability`] with explicit settings. Later calls are no-ops.
pub fn init_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }

        let env_filter = settings.env_filter();
        match &settings.json_path {
            Some(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stdout);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_JSON_LOG_FILE)
        .to_string();
    (dir, file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn enabled_by_default_and_on_unparseable_flags() {
        assert!(settings(&[]).enabled);
        assert!(settings(&[("CONSOLE_STREAM_OBSERVABILITY", "maybe")]).enabled);
        assert!(!settings(&[("CONSOLE_STREAM_OBSERVABILITY_ENABLED", "off")]).enabled);
    }

    #[test]
    fn explicit_enable_flag_wins_over_short_form() {
        let s = settings(&[
            ("CONSOLE_STREAM_OBSERVABILITY_ENABLED", "yes"),
            ("CONSOLE_STREAM_OBSERVABILITY", "0"),
        ]);
        assert!(s.enabled);
    }

    #[test]
    fn blank_values_are_ignored() {
        let s = settings(&[
            ("CONSOLE_STREAM_LOG_LEVEL", " "),
            ("CONSOLE_STREAM_JSON_LOG_PATH", ""),
        ]);
        assert_eq!(s.level, None);
        assert_eq!(s.json_path, None);
    }

    #[test]
    fn log_path_splits_into_dir_and_file() {
        assert_eq!(
            split_log_path(Path::new("logs/console.jsonl")),
            (PathBuf::from("logs"), "console.jsonl".to_string())
        );
        assert_eq!(
            split_log_path(Path::new("console.jsonl")),
            (PathBuf::from("."), "console.jsonl".to_string())
        );
    }
}
