//! Configuration for the correlation bridge and the generation pipeline.
//!
//! Values come from code (builders), from serde (config files), or from
//! `GENFLOW_*` environment variables via `from_env()`. Missing or malformed
//! variables fall back to the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use genflow_events::topic;

use crate::jobs::TransitionPolicy;

/// Correlation bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Wait granularity of the poll loop.
    pub poll_interval: Duration,
    /// Overall deadline for `request()` when no explicit timeout is given.
    pub timeout: Duration,
    /// Isolates correlation keys from unrelated cache traffic.
    pub key_prefix: String,
    pub request_topic: String,
    pub response_topic: String,
    /// Added to the request timeout to form the WAITING sentinel's TTL.
    pub sentinel_grace: Duration,
    /// How long a resolved value is retained for a slow poller.
    pub resolved_ttl: Duration,
    /// Resolver threads draining the response topic.
    pub listener_concurrency: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
            key_prefix: "genflow:correlation:".to_string(),
            request_topic: topic::STORE_INFO_REQUEST.to_string(),
            response_topic: topic::STORE_INFO_RESPONSE.to_string(),
            sentinel_grace: Duration::from_secs(5),
            resolved_ttl: Duration::from_secs(5),
            listener_concurrency: 4,
        }
    }
}

impl BridgeConfig {
    /// Read `GENFLOW_BRIDGE_POLL_INTERVAL_MS`, `GENFLOW_BRIDGE_TIMEOUT_MS`,
    /// `GENFLOW_BRIDGE_KEY_PREFIX` and `GENFLOW_BRIDGE_LISTENERS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_millis("GENFLOW_BRIDGE_POLL_INTERVAL_MS", defaults.poll_interval),
            timeout: env_millis("GENFLOW_BRIDGE_TIMEOUT_MS", defaults.timeout),
            key_prefix: std::env::var("GENFLOW_BRIDGE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            listener_concurrency: env_parse("GENFLOW_BRIDGE_LISTENERS", defaults.listener_concurrency),
            ..defaults
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_topics(mut self, request: impl Into<String>, response: impl Into<String>) -> Self {
        self.request_topic = request.into();
        self.response_topic = response.into();
        self
    }

    pub fn with_listener_concurrency(mut self, threads: usize) -> Self {
        self.listener_concurrency = threads.max(1);
        self
    }
}

/// Generation pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Period of the per-job status emitter.
    pub progress_interval: Duration,
    /// A job still active after this long is failed by its watchdog.
    pub job_deadline: Duration,
    pub status_topic: String,
    pub generation_topic: String,
    pub job_events_topic: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(1),
            job_deadline: Duration::from_secs(300),
            status_topic: topic::JOB_STATUS.to_string(),
            generation_topic: topic::GENERATION_REQUESTED.to_string(),
            job_events_topic: topic::JOB_EVENTS.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Read `GENFLOW_PROGRESS_INTERVAL_MS` and `GENFLOW_JOB_DEADLINE_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            progress_interval: env_millis("GENFLOW_PROGRESS_INTERVAL_MS", defaults.progress_interval),
            job_deadline: env_millis("GENFLOW_JOB_DEADLINE_MS", defaults.job_deadline),
            ..defaults
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline = deadline;
        self
    }
}

/// Job registry configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub policy: TransitionPolicy,
}

impl RegistryConfig {
    /// Read `GENFLOW_TRANSITION_POLICY` (`ignore` | `reject`).
    pub fn from_env() -> Self {
        let policy = match std::env::var("GENFLOW_TRANSITION_POLICY").as_deref() {
            Ok("reject") => TransitionPolicy::Reject,
            Ok("ignore") | Err(_) => TransitionPolicy::Ignore,
            Ok(other) => {
                warn!(value = other, "unknown GENFLOW_TRANSITION_POLICY; using ignore");
                TransitionPolicy::Ignore
            }
        };
        Self { policy }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "malformed configuration value; using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_millis(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_parse(name, default.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_defaults() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.timeout, Duration::from_secs(10));
        assert_eq!(cfg.key_prefix, "genflow:correlation:");
    }

    #[test]
    fn listener_concurrency_is_at_least_one() {
        let cfg = BridgeConfig::default().with_listener_concurrency(0);
        assert_eq!(cfg.listener_concurrency, 1);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let cfg: BridgeConfig = serde_json::from_value(serde_json::json!({
            "key_prefix": "test:"
        }))
        .unwrap();

        assert_eq!(cfg.key_prefix, "test:");
        assert_eq!(cfg.poll_interval, BridgeConfig::default().poll_interval);
    }
}
