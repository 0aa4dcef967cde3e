//! Tracing/logging initialization.
//!
//! `RUST_LOG` selects the filter (default `info`); `GENFLOW_LOG_FORMAT`
//! selects `json` (default) or `text` output.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("GENFLOW_LOG_FORMAT").as_deref() {
            Ok("text") | Ok("compact") => LogFormat::Text,
            _ => LogFormat::Json,
        }
    }
}

/// Install the global subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_thread_names(true);

    let _ = match format {
        // Span fields carry job and correlation ids; keep them in the output.
        LogFormat::Json => builder.json().with_current_span(true).with_target(false).try_init(),
        LogFormat::Text => builder.compact().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init(LogFormat::Text);
        init(LogFormat::Json);
    }
}
