//! # Configuration Management
//!
//! Centralized configuration for the object codec.
//!
//! This module provides the stream constants, the resource limits enforced by
//! the reader, the security gate policy inputs and logging settings.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - The default allocation budget (16 MB) bounds memory claimed by one
//!   top-level value no matter how the length prefixes are arranged
//! - The handle limit bounds the per-stream identity table; senders must
//!   issue a reset before reaching it
//! - The explicit exemption list is the preferred way to let field-only
//!   types bypass the capability check

use crate::error::{CodecError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Stream magic written in the header
pub const STREAM_MAGIC: u16 = 0xACED;

/// Current supported stream version
pub const STREAM_VERSION: u16 = 5;

/// First handle assigned in a stream
pub const BASE_HANDLE: u32 = 0x7E_0000;

/// Max bytes claimed by length prefixes within one top-level value (16 MB)
pub const DEFAULT_BUDGET_BYTES: u64 = 16 * 1024 * 1024;

/// Default handle table bound
pub const DEFAULT_MAX_HANDLES: usize = 1 << 16;

/// Default nesting bound for custom read and write routines
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Default bound on interfaces named by a proxy descriptor
pub const DEFAULT_MAX_PROXY_INTERFACES: usize = 64;

/// Default bound on superclass links in one descriptor chain
pub const DEFAULT_MAX_DESCRIPTOR_DEPTH: usize = 64;

/// Default bound on objects pending on the explicit decode stack
pub const DEFAULT_MAX_FRAMES: usize = 1_000_000;

/// Largest block data chunk the writer emits
pub const MAX_BLOCK_CHUNK: usize = 1024;

/// Main codec configuration that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CodecConfig {
    /// Resource limits enforced while decoding
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Security gate policy inputs
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CodecConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| CodecError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| CodecError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| CodecError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(budget) = std::env::var("OBJECT_WIRE_BUDGET_BYTES") {
            if let Ok(val) = budget.parse::<u64>() {
                config.limits.budget_bytes = val;
            }
        }

        if let Ok(handles) = std::env::var("OBJECT_WIRE_MAX_HANDLES") {
            if let Ok(val) = handles.parse::<usize>() {
                config.limits.max_handles = val;
            }
        }

        if let Ok(depth) = std::env::var("OBJECT_WIRE_MAX_DEPTH") {
            if let Ok(val) = depth.parse::<usize>() {
                config.limits.max_depth = val;
            }
        }

        if let Ok(flag) = std::env::var("OBJECT_WIRE_IMPLICIT_EXEMPTION") {
            if let Ok(val) = flag.parse::<bool>() {
                config.security.implicit_exemption = val;
            }
        }

        if let Ok(list) = std::env::var("OBJECT_WIRE_EXEMPT_TYPES") {
            config.security.exempt_types = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CodecError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| CodecError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.limits.validate());
        errors.extend(self.security.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CodecError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Resource limits enforced by the reader
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Bytes that length-prefixed arrays, strings and objects may claim per top-level value
    pub budget_bytes: u64,

    /// Maximum number of handles before a reset is required
    pub max_handles: usize,

    /// Maximum nesting of custom read and write routines
    pub max_depth: usize,

    /// Maximum interfaces in one proxy descriptor
    pub max_proxy_interfaces: usize,

    /// Maximum superclass links in one descriptor chain
    pub max_descriptor_depth: usize,

    /// Maximum objects pending on the explicit decode stack
    pub max_frames: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
            max_handles: DEFAULT_MAX_HANDLES,
            max_depth: DEFAULT_MAX_DEPTH,
            max_proxy_interfaces: DEFAULT_MAX_PROXY_INTERFACES,
            max_descriptor_depth: DEFAULT_MAX_DESCRIPTOR_DEPTH,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

impl LimitsConfig {
    /// Validate limits configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.budget_bytes == 0 {
            errors.push("Budget bytes must be greater than 0".to_string());
        } else if self.budget_bytes > 1024 * 1024 * 1024 {
            errors.push(format!(
                "Budget bytes too large: {} (maximum recommended: 1 GB)",
                self.budget_bytes
            ));
        }

        if self.max_handles < 16 {
            errors.push("Max handles too small (minimum: 16)".to_string());
        } else if self.max_handles > 1 << 24 {
            errors.push(format!(
                "Max handles too large: {} (maximum: 16,777,216)",
                self.max_handles
            ));
        }

        if self.max_depth == 0 {
            errors.push("Max depth must be greater than 0".to_string());
        } else if self.max_depth > 10_000 {
            errors.push(format!(
                "Max depth too large: {} (maximum: 10,000)",
                self.max_depth
            ));
        }

        if self.max_proxy_interfaces == 0 {
            errors.push("Max proxy interfaces must be greater than 0".to_string());
        } else if self.max_proxy_interfaces > 65_535 {
            errors.push("Max proxy interfaces too large (maximum: 65,535)".to_string());
        }

        if self.max_descriptor_depth == 0 {
            errors.push("Max descriptor depth must be greater than 0".to_string());
        }

        if self.max_frames == 0 {
            errors.push("Max frames must be greater than 0".to_string());
        }

        errors
    }
}

/// Security gate policy inputs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Let types whose whole hierarchy has no custom read routine and no
    /// reference fields pass without a grant
    pub implicit_exemption: bool,

    /// Type names that pass the gate without a grant
    #[serde(default)]
    pub exempt_types: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            implicit_exemption: true,
            exempt_types: Vec::new(),
        }
    }
}

impl SecurityConfig {
    /// Validate security configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.exempt_types.iter().any(|name| name.trim().is_empty()) {
            errors.push("Exempt type names cannot be empty".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("object-wire"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
