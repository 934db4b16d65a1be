//! Runtime Configuration
//!
//! Configuration for segment metadata: memory budgets, specialization
//! behaviour and logging. Configuration can be set programmatically or
//! loaded from environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `CPSEG_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `CPSEG_METASPACE_WORDS` | Metadata word budget per class (0 = unlimited) | 0 |
//! | `CPSEG_MAX_HEAP_OBJECTS` | Heap object limit (0 = unlimited) | 0 |
//! | `CPSEG_SPECIALIZATION` | Default binding mode (specialized/unspecialized) | specialized |
//! | `CPSEG_PARENT_POLICY` | Accept unspecialized class segments as parents ("true"/"false") | false |
//! | `CPSEG_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//!
//! # Example
//!
//! ```rust,ignore
//! use cpseg_runtime::config::SegmentConfig;
//!
//! // Load from environment with defaults
//! let config = SegmentConfig::from_env();
//!
//! // Or use the builder pattern
//! let config = SegmentConfig::builder()
//!     .metaspace_words_per_class(64 * 1024)
//!     .parent_policy(ParentPolicy::AllowUnspecialized)
//!     .build()?;
//! ```

use std::env;

use thiserror::Error;

/// Log level for runtime logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// No logging.
    Off,
    /// Error messages only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational messages (default).
    #[default]
    Info,
    /// Debug messages.
    Debug,
    /// Trace-level messages.
    Trace,
}

impl LogLevel {
    /// Parse a log level from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// How a new binding is materialized by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpecializationMode {
    /// Every binding gets its own instance block.
    #[default]
    Specialized,
    /// Bindings share the shape's prototype block and own only a reference array.
    Unspecialized,
}

impl SpecializationMode {
    /// Parse a mode from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "specialized" | "on" | "true" | "1" => Some(SpecializationMode::Specialized),
            "unspecialized" | "off" | "false" | "0" => Some(SpecializationMode::Unspecialized),
            _ => None,
        }
    }

    /// Convert to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecializationMode::Specialized => "specialized",
            SpecializationMode::Unspecialized => "unspecialized",
        }
    }
}

/// Whether a specialized method-and-class instance may hang off an
/// unspecialized class segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParentPolicy {
    /// The class segment must own a reference array (default).
    #[default]
    RequireSpecialized,
    /// The class shape's prototype is accepted as a parent.
    AllowUnspecialized,
}

/// Memory configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Metadata word budget per declaring class.
    /// 0 means unlimited (default).
    pub metaspace_words_per_class: usize,

    /// Maximum number of live heap objects.
    /// 0 means unlimited (default).
    pub max_heap_objects: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            metaspace_words_per_class: 0, // Unlimited
            max_heap_objects: 0,          // Unlimited
        }
    }
}

/// Specialization configuration.
#[derive(Debug, Clone, Default)]
pub struct SpecializationConfig {
    /// Mode used by `SegmentHandle::bind`.
    /// Default: Specialized.
    pub default_mode: SpecializationMode,

    /// Parent rule for method-and-class instances.
    /// Default: RequireSpecialized.
    pub parent_policy: ParentPolicy,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level.
    /// Default: Info.
    pub level: LogLevel,

    /// Include timestamps in log output.
    /// Default: true.
    pub timestamps: bool,

    /// Include source location in log output.
    /// Default: false (only in debug builds).
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            timestamps: true,
            source_location: cfg!(debug_assertions),
        }
    }
}

/// Complete segment runtime configuration.
///
/// Use `SegmentConfig::default()` for sensible defaults, or
/// `SegmentConfig::from_env()` to load from environment variables.
#[derive(Debug, Clone, Default)]
pub struct SegmentConfig {
    /// Memory configuration.
    pub memory: MemoryConfig,

    /// Specialization configuration.
    pub specialization: SpecializationConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

/// Smallest non-zero per-class budget: one descriptor header plus one
/// instance header.
const MIN_METASPACE_WORDS: usize = crate::layout::INFO_HEADER_WORDS + crate::layout::SEGMENT_HEADER_WORDS;

impl SegmentConfig {
    /// Create a new builder for SegmentConfig.
    pub fn builder() -> SegmentConfigBuilder {
        SegmentConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables that are not set will use default values.
    /// Invalid values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Memory configuration
        if let Some(val) = parse_env_usize("CPSEG_METASPACE_WORDS") {
            if val == 0 || val >= MIN_METASPACE_WORDS {
                config.memory.metaspace_words_per_class = val;
            }
        }

        if let Some(val) = parse_env_usize("CPSEG_MAX_HEAP_OBJECTS") {
            config.memory.max_heap_objects = val;
        }

        // Specialization configuration
        if let Ok(val) = env::var("CPSEG_SPECIALIZATION") {
            if let Some(mode) = SpecializationMode::from_str(&val) {
                config.specialization.default_mode = mode;
            }
        }

        if let Some(allow) = parse_env_bool("CPSEG_PARENT_POLICY") {
            config.specialization.parent_policy = if allow {
                ParentPolicy::AllowUnspecialized
            } else {
                ParentPolicy::RequireSpecialized
            };
        }

        // Logging configuration
        if let Ok(val) = env::var("CPSEG_LOG_LEVEL") {
            if let Some(level) = LogLevel::from_str(&val) {
                config.log.level = level;
            }
        }

        config
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let words = self.memory.metaspace_words_per_class;
        if words != 0 && words < MIN_METASPACE_WORDS {
            return Err(ConfigError::InvalidValue {
                field: "memory.metaspace_words_per_class".into(),
                message: format!("must be 0 (unlimited) or at least {MIN_METASPACE_WORDS} words"),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },

    /// The global configuration was already installed.
    #[error("runtime configuration is already initialized")]
    AlreadyInitialized,
}

/// Builder for SegmentConfig.
#[derive(Debug, Clone, Default)]
pub struct SegmentConfigBuilder {
    config: SegmentConfig,
}

impl SegmentConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the metadata word budget per class (0 = unlimited).
    pub fn metaspace_words_per_class(mut self, words: usize) -> Self {
        self.config.memory.metaspace_words_per_class = words;
        self
    }

    /// Set the heap object limit (0 = unlimited).
    pub fn max_heap_objects(mut self, n: usize) -> Self {
        self.config.memory.max_heap_objects = n;
        self
    }

    /// Set the default binding mode.
    pub fn default_mode(mut self, mode: SpecializationMode) -> Self {
        self.config.specialization.default_mode = mode;
        self
    }

    /// Set the parent policy.
    pub fn parent_policy(mut self, policy: ParentPolicy) -> Self {
        self.config.specialization.parent_policy = policy;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Build the configuration.
    ///
    /// This validates the configuration and returns an error if invalid.
    pub fn build(self) -> Result<SegmentConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> SegmentConfig {
        self.config
    }
}

/// Parse an environment variable as usize.
fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parse an environment variable as bool.
fn parse_env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|s| match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SegmentConfig::default();
        assert_eq!(config.memory.metaspace_words_per_class, 0);
        assert_eq!(config.memory.max_heap_objects, 0);
        assert_eq!(config.specialization.default_mode, SpecializationMode::Specialized);
        assert_eq!(config.specialization.parent_policy, ParentPolicy::RequireSpecialized);
        assert_eq!(config.log.level, LogLevel::Info);
    }

    #[test]
    fn test_builder() {
        let config = SegmentConfig::builder()
            .metaspace_words_per_class(4096)
            .max_heap_objects(100)
            .default_mode(SpecializationMode::Unspecialized)
            .parent_policy(ParentPolicy::AllowUnspecialized)
            .log_level(LogLevel::Debug)
            .build()
            .unwrap();

        assert_eq!(config.memory.metaspace_words_per_class, 4096);
        assert_eq!(config.memory.max_heap_objects, 100);
        assert_eq!(config.specialization.default_mode, SpecializationMode::Unspecialized);
        assert_eq!(config.specialization.parent_policy, ParentPolicy::AllowUnspecialized);
        assert_eq!(config.log.level, LogLevel::Debug);
    }

    #[test]
    fn test_builder_validation() {
        let result = SegmentConfig::builder().metaspace_words_per_class(3).build();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let unchecked = SegmentConfig::builder().metaspace_words_per_class(3).build_unchecked();
        assert_eq!(unchecked.memory.metaspace_words_per_class, 3);
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("off"), Some(LogLevel::Off));
        assert_eq!(LogLevel::from_str("ERROR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_str("warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("INFO"), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_str("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("TRACE"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str("invalid"), None);
    }

    #[test]
    fn test_specialization_mode_from_str() {
        assert_eq!(SpecializationMode::from_str("Specialized"), Some(SpecializationMode::Specialized));
        assert_eq!(SpecializationMode::from_str("off"), Some(SpecializationMode::Unspecialized));
        assert_eq!(SpecializationMode::from_str("sometimes"), None);
        assert_eq!(SpecializationMode::Unspecialized.as_str(), "unspecialized");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "memory.max_heap_objects".into(),
            message: "must be positive".into(),
        };
        assert!(err.to_string().contains("memory.max_heap_objects"));
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_from_env() {
        env::set_var("CPSEG_METASPACE_WORDS", "2048");
        env::set_var("CPSEG_SPECIALIZATION", "unspecialized");
        env::set_var("CPSEG_PARENT_POLICY", "yes");
        env::set_var("CPSEG_MAX_HEAP_OBJECTS", "not-a-number");

        let config = SegmentConfig::from_env();
        assert_eq!(config.memory.metaspace_words_per_class, 2048);
        assert_eq!(config.memory.max_heap_objects, 0);
        assert_eq!(config.specialization.default_mode, SpecializationMode::Unspecialized);
        assert_eq!(config.specialization.parent_policy, ParentPolicy::AllowUnspecialized);

        env::remove_var("CPSEG_METASPACE_WORDS");
        env::remove_var("CPSEG_SPECIALIZATION");
        env::remove_var("CPSEG_PARENT_POLICY");
        env::remove_var("CPSEG_MAX_HEAP_OBJECTS");

        let config = SegmentConfig::from_env();
        assert_eq!(config.memory.metaspace_words_per_class, 0);
        assert_eq!(config.specialization.default_mode, SpecializationMode::Specialized);
    }
}
