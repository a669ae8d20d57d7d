//! Process-global embedded interpreter.
//!
//! There is exactly one interpreter per process. It is started once and then
//! shared by every call, but only one call may touch it at a time: all access
//! goes through an [`InterpreterGuard`], which holds the exclusive-access token
//! and routes guest output to the diagnostics sink of the call holding it.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, TryLockError};

use plc_api::error::CallError;
use rhai::{AST, Dynamic, Engine, EvalAltResult, Scope};

use crate::config::InterpreterConfig;
use crate::diagnostics::{DiagnosticsSink, LogLevel};
use crate::native;

static INTERPRETER: OnceLock<Interpreter> = OnceLock::new();

/// Name of the array parameter holding every argument positionally.
pub const ARGS_PARAM: &str = "args";

type SinkSlot = Arc<Mutex<Option<Arc<dyn DiagnosticsSink>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("interpreter lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn emit(slot: &SinkSlot, level: LogLevel, text: &str) {
    match lock(slot).as_ref() {
        Some(sink) => sink.emit(level, text),
        None => tracing::debug!(target: "plc::guest", level = level.as_str(), "{text} (no call in flight)"),
    }
}

/// A parsed callable: function name plus the compiled script defining it.
#[derive(Debug, Clone)]
pub struct Callable {
    pub name: String,
    pub ast: Arc<AST>,
}

pub struct Interpreter {
    engine: Engine,
    config: InterpreterConfig,
    sink: SinkSlot,
    token: Mutex<()>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Start the process-global interpreter, or return the running one.
///
/// The first configuration wins; a later, different configuration is logged
/// and ignored.
pub fn start_interpreter(config: &InterpreterConfig) -> Result<&'static Interpreter, CallError> {
    if let Some(running) = INTERPRETER.get() {
        if running.config != *config {
            tracing::warn!(
                running = ?running.config,
                requested = ?config,
                "interpreter already started with a different configuration, keeping the first"
            );
        }
        return Ok(running);
    }

    let fresh = Interpreter::new(config.clone())?;
    let running = INTERPRETER.get_or_init(|| fresh);
    tracing::info!(config = ?running.config, "interpreter started");
    Ok(running)
}

impl Interpreter {
    fn new(config: InterpreterConfig) -> Result<Self, CallError> {
        let sink: SinkSlot = Arc::new(Mutex::new(None));
        let mut engine = Engine::new();

        if config.max_operations > 0 {
            engine.set_max_operations(config.max_operations);
        }
        if config.max_call_levels > 0 {
            engine.set_max_call_levels(config.max_call_levels);
        }

        let slot = sink.clone();
        engine.on_print(move |text| emit(&slot, LogLevel::Log, text));
        let slot = sink.clone();
        engine.on_debug(move |text, source, pos| {
            let text = match source {
                Some(source) => format!("{source} @ {pos:?} | {text}"),
                None => text.to_string(),
            };
            emit(&slot, LogLevel::Debug, &text)
        });

        register_guest_log(&mut engine, &sink);
        engine
            .register_fn("stop", |msg: Dynamic| -> Result<(), Box<EvalAltResult>> {
                Err(msg.to_string().into())
            })
            .register_fn("is_null", |value: Dynamic| value.is_unit());
        native::api::register(&mut engine);

        // Smoke-check the engine before anyone depends on it.
        match engine.eval::<rhai::INT>("1 + 1") {
            Ok(2) => {}
            Ok(other) => {
                return Err(CallError::fatal(format!("interpreter self-check returned {other}")));
            }
            Err(e) => return Err(CallError::fatal(format!("interpreter failed to start: {e}"))),
        }

        Ok(Self {
            engine,
            config,
            sink,
            token: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Take the exclusive-access token, waiting for it if needed, and route
    /// guest output to `sink` until the guard is dropped.
    pub fn acquire(&self, sink: Arc<dyn DiagnosticsSink>) -> InterpreterGuard<'_> {
        let token = lock(&self.token);
        *lock(&self.sink) = Some(sink);
        InterpreterGuard {
            interpreter: self,
            _token: token,
        }
    }

    /// Like [`acquire`](Self::acquire), but `None` if another call holds the token.
    pub fn try_acquire(&self, sink: Arc<dyn DiagnosticsSink>) -> Option<InterpreterGuard<'_>> {
        let token = match self.token.try_lock() {
            Ok(g) => g,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(poisoned)) => {
                tracing::warn!("interpreter token was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *lock(&self.sink) = Some(sink);
        Some(InterpreterGuard {
            interpreter: self,
            _token: token,
        })
    }
}

fn register_guest_log(engine: &mut Engine, sink: &SinkSlot) {
    let levels = [
        ("log_debug", LogLevel::Debug),
        ("log_info", LogLevel::Info),
        ("log_notice", LogLevel::Notice),
        ("log_warning", LogLevel::Warning),
    ];
    for (name, level) in levels {
        let slot = sink.clone();
        engine.register_fn(name, move |msg: Dynamic| emit(&slot, level, &msg.to_string()));
    }

    // Error-level logging also aborts the guest.
    for (name, level) in [("log_error", LogLevel::Error), ("log_fatal", LogLevel::Fatal)] {
        let slot = sink.clone();
        engine.register_fn(name, move |msg: Dynamic| -> Result<(), Box<EvalAltResult>> {
            let text = msg.to_string();
            emit(&slot, level, &text);
            Err(text.into())
        });
    }
}

/// Exclusive access to the interpreter for the duration of one call.
pub struct InterpreterGuard<'a> {
    interpreter: &'a Interpreter,
    _token: MutexGuard<'a, ()>,
}

impl InterpreterGuard<'_> {
    /// Compile `source` into a callable named `name`.
    ///
    /// The body is wrapped as `fn name(args, <params>) { body }`: `args` holds
    /// every argument positionally, each non-empty parameter name is bound to
    /// its argument.
    pub fn parse(&self, name: &str, params: &[&str], body: &str) -> Result<Callable, CallError> {
        let mut signature = vec![ARGS_PARAM];
        for param in params.iter().filter(|p| !p.is_empty()) {
            if signature.contains(param) {
                return Err(CallError::argument(format!(
                    "duplicate or reserved parameter name '{param}'"
                )));
            }
            signature.push(param);
        }

        let script = format!("fn {name}({}) {{\n{body}\n}}", signature.join(", "));
        let ast = self
            .interpreter
            .engine
            .compile(&script)
            .map_err(|e| CallError::parse(format!("cannot compile function '{name}': {e}")))?;
        if !ast.iter_functions().any(|f| f.name == name) {
            return Err(CallError::parse(format!("'{name}' is not a valid function name")));
        }
        Ok(Callable {
            name: name.to_string(),
            ast: Arc::new(ast),
        })
    }

    /// Evaluate a callable against arguments already converted to native values.
    pub fn apply(&self, callable: &Callable, args: Vec<Dynamic>) -> Result<Dynamic, CallError> {
        let mut scope = Scope::new();
        self.interpreter
            .engine
            .call_fn::<Dynamic>(&mut scope, &callable.ast, &callable.name, args)
            .map_err(|e| {
                CallError::evaluation(format!(
                    "error executing {}: {}",
                    callable.name,
                    guest_message(&e)
                ))
            })
    }
}

impl Drop for InterpreterGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.interpreter.sink) = None;
    }
}

/// Innermost guest-visible message: the thrown value for `throw`, `stop` and
/// error-level logging, otherwise the interpreter's own description.
fn guest_message(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => guest_message(inner),
        EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
        other => other.to_string(),
    }
}
