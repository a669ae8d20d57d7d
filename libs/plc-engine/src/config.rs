use serde::Deserialize;

use crate::diagnostics::LogLevel;
use crate::error::EngineError;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlcConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub interpreter: InterpreterConfig,
}

/// Isolation policy for concurrent calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// One long-lived runtime; overlapping calls are rejected, never queued.
    #[default]
    SerializedShared,
    /// A fresh runtime and diagnostics buffer per call.
    PerCallFresh,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub mode: SessionMode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DiagnosticsConfig {
    /// Lines below this level are dropped from the per-call buffer.
    #[serde(default = "default_level")]
    pub level: LogLevel,

    /// Total bytes a single call may accumulate.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    /// Longer lines are truncated.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            max_buffer_bytes: default_max_buffer_bytes(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_level() -> LogLevel {
    LogLevel::Log
}

fn default_max_buffer_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_max_line_bytes() -> usize {
    8 * 1024
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InterpreterConfig {
    /// Operation budget per evaluation. 0 = unlimited.
    #[serde(default)]
    pub max_operations: u64,

    /// Maximum script call nesting. 0 = interpreter default.
    #[serde(default)]
    pub max_call_levels: usize,

    /// Prepended to every synthesized callable name.
    #[serde(default)]
    pub function_prefix: Option<String>,
}

impl PlcConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }
}
