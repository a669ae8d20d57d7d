use plc_api::error::CallError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("call error: {0}")]
    Call(#[from] CallError),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Call` variant, context is added to the inner `CallError`.
    /// For `Config`, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Call(e) => EngineError::Call(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
        }
    }
}
