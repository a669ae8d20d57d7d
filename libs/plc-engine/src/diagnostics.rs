use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::config::DiagnosticsConfig;

/// Severity of a diagnostic line. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Log,
    Info,
    Notice,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Log => "LOG",
            LogLevel::Info => "INFO",
            LogLevel::Notice => "NOTICE",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

/// Where log text produced during a call goes.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, level: LogLevel, text: &str);

    /// Take everything accumulated so far, leaving the sink empty.
    fn drain(&self) -> String;
}

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    dropped: usize,
}

/// Bounded per-call text buffer. Every accepted line is mirrored to `tracing`.
#[derive(Debug)]
pub struct DiagnosticsBuffer {
    min_level: LogLevel,
    max_buffer_bytes: usize,
    max_line_bytes: usize,
    state: Mutex<BufferState>,
}

impl DiagnosticsBuffer {
    pub fn new(config: &DiagnosticsConfig) -> Self {
        Self {
            min_level: config.level,
            max_buffer_bytes: config.max_buffer_bytes,
            max_line_bytes: config.max_line_bytes,
            state: Mutex::new(BufferState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("diagnostics buffer lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl DiagnosticsSink for DiagnosticsBuffer {
    fn emit(&self, level: LogLevel, text: &str) {
        if level < self.min_level {
            return;
        }
        match level {
            LogLevel::Debug => tracing::debug!(target: "plc::guest", "{text}"),
            LogLevel::Log | LogLevel::Info | LogLevel::Notice => {
                tracing::info!(target: "plc::guest", level = level.as_str(), "{text}")
            }
            LogLevel::Warning => tracing::warn!(target: "plc::guest", "{text}"),
            LogLevel::Error | LogLevel::Fatal => {
                tracing::error!(target: "plc::guest", level = level.as_str(), "{text}")
            }
        }

        let text = truncate_at_char_boundary(text, self.max_line_bytes);
        let line = format!("{}: {text}\n", level.as_str());
        let mut state = self.state();
        if state.text.len() + line.len() > self.max_buffer_bytes {
            state.dropped += 1;
            return;
        }
        state.text.push_str(&line);
    }

    fn drain(&self) -> String {
        let mut state = self.state();
        let mut text = std::mem::take(&mut state.text);
        if state.dropped > 0 {
            text.push_str(&format!(
                "WARNING: {} diagnostic lines dropped, buffer full\n",
                state.dropped
            ));
            state.dropped = 0;
        }
        text
    }
}

fn truncate_at_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
