//! Logging Infrastructure
//!
//! The runtime emits `tracing` events: descriptor and instance creation at
//! `debug`, rollback after a failed allocation at `warn`, per-object
//! traversal at `trace`. This module installs a `tracing_subscriber` fmt
//! subscriber for embedders that have none of their own.
//!
//! The `CPSEG_LOG` environment variable takes an `EnvFilter` directive and
//! overrides the configured level:
//!
//! ```text
//! CPSEG_LOG=cpseg_runtime::shape=debug,cpseg_runtime::traverse=trace
//! ```

use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LogLevel};

/// Environment variable holding an `EnvFilter` directive.
pub const FILTER_ENV: &str = "CPSEG_LOG";

/// The filter directive for a configured level.
pub fn directive(level: LogLevel) -> &'static str {
    level.as_str()
}

/// Build the filter: `CPSEG_LOG` if set and valid, the configured level otherwise.
pub fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(directive(config.level)))
}

/// Install a global fmt subscriber.
///
/// Returns `false` if a global subscriber was already installed, which
/// leaves the existing one in place.
pub fn init(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_file(config.source_location)
        .with_line_number(config.source_location);
    let installed = if config.timestamps {
        builder.try_init()
    } else {
        builder.without_time().try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive() {
        assert_eq!(directive(LogLevel::Off), "off");
        assert_eq!(directive(LogLevel::Debug), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig {
            level: LogLevel::Warn,
            ..LogConfig::default()
        };
        init(&config);
        assert!(!init(&config));
    }
}
