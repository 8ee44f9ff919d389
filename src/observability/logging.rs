//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name; anything but `json` is pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Log file; stderr when absent.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from settings.
    ///
    /// `RUST_LOG` takes precedence over the configured filter. `verbose`
    /// raises this crate to `debug` regardless of either.
    #[must_use]
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Self {
        let directive = std::env::var("RUST_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| settings.filter.clone());

        Self {
            format: LogFormat::parse(&settings.format),
            filter: build_filter(&directive, verbose),
            file: settings.file.clone(),
        }
    }
}

fn build_filter(directive: &str, verbose: bool) -> EnvFilter {
    let directive = if verbose {
        format!("{directive},dupwatch=debug")
    } else {
        directive.to_string()
    };

    EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        // Subscriber is not installed yet, so this cannot go through tracing.
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Invalid log filter '{directive}': {e}; falling back to 'info'");
        }
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("json", LogFormat::Json ; "json")]
    #[test_case("JSON ", LogFormat::Json ; "case and whitespace")]
    #[test_case("pretty", LogFormat::Pretty ; "pretty")]
    #[test_case("xml", LogFormat::Pretty ; "unknown")]
    fn test_parse_format(input: &str, expected: LogFormat) {
        assert_eq!(LogFormat::parse(input), expected);
    }

    #[test]
    fn test_verbose_adds_crate_directive() {
        let filter = build_filter("warn", true);
        assert!(filter.to_string().contains("dupwatch=debug"));
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let filter = build_filter("dupwatch=notalevel", false);
        assert_eq!(filter.to_string(), "info");
    }
}
