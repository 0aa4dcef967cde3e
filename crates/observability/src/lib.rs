//! Process-wide tracing setup shared by the genflow binaries.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize tracing with settings from the environment.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}
