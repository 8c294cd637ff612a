use crate::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Output format of the global tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Human-readable, single line per event.
    Pretty,
}

/// Install the global tracing subscriber.
///
/// Events go to stderr. `RUST_LOG` takes precedence over `default_filter`.
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> ConductorResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.compact().try_init(),
    };

    installed.map_err(|e| ConductorError::Config(format!("Failed to install tracing: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parses_lowercase() {
        let format: LogFormat = serde_json::from_str("\"pretty\"").unwrap_or_default();
        assert_eq!(format, LogFormat::Pretty);
        assert_eq!(LogFormat::default(), LogFormat::Json);
    }

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init_tracing(LogFormat::Pretty, "warn");
        assert!(init_tracing(LogFormat::Json, "warn").is_err());
    }
}
