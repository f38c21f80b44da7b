//! upgrader-core — configuration and small shared helpers.

pub mod config;

pub use config::{Config, ConfigError, ExecutorConfig, OrchestrationConfig, ServerConfig};

use chrono::{DateTime, SubsecRound, Utc};

/// Generate a fresh opaque identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC time truncated to microseconds, so values survive a JSON
/// round-trip unchanged.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }

    #[test]
    fn now_has_microsecond_precision() {
        let now = now_utc();
        assert_eq!(now.timestamp_subsec_nanos() % 1000, 0);
    }
}
