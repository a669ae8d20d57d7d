pub mod arena;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod interpreter;
pub mod native;
pub mod runtime;
