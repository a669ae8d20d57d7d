//! One call's lifecycle against the embedded interpreter.
//!
//! ```text
//! INIT ──prepare──▶ PREPARED ──execute──▶ EXECUTED ──get_results──▶ RESULTED
//!   ▲                                                                  │
//!   └──────────────────────────── cleanup (from any phase) ◀───────────┘
//! ```
//!
//! Every native value the call produces is protected in the runtime's
//! [`HandleArena`] and released by [`CallRuntime::cleanup`].

use std::sync::Arc;

use plc_api::error::CallError;
use plc_api::message::{CallRequest, CallResponse};
use plc_api::schema::ReturnType;
use plc_api::value::WireValue;
use rhai::Dynamic;

use crate::arena::{HandleArena, NativeHandle};
use crate::codec;
use crate::config::InterpreterConfig;
use crate::diagnostics::DiagnosticsBuffer;
use crate::interpreter::{Callable, Interpreter, InterpreterGuard, start_interpreter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Prepared,
    Executed,
    Resulted,
    Clean,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Prepared => "PREPARED",
            Phase::Executed => "EXECUTED",
            Phase::Resulted => "RESULTED",
            Phase::Clean => "CLEAN",
        }
    }
}

#[derive(Debug)]
pub struct CallRuntime {
    config: InterpreterConfig,
    interpreter: Option<&'static Interpreter>,
    diagnostics: Arc<DiagnosticsBuffer>,
    phase: Phase,
    arena: HandleArena,
    code: Option<NativeHandle>,
    arguments: Option<NativeHandle>,
    /// Parameter names bound after `args`, in argument order.
    named: Vec<NativeHandle>,
    result: Option<NativeHandle>,
    return_type: ReturnType,
    function_name: String,
    invocations: u32,
}

impl CallRuntime {
    pub fn new(config: InterpreterConfig, diagnostics: Arc<DiagnosticsBuffer>) -> Self {
        Self {
            config,
            interpreter: None,
            diagnostics,
            phase: Phase::Init,
            arena: HandleArena::new(),
            code: None,
            arguments: None,
            named: Vec::new(),
            result: None,
            return_type: ReturnType::default(),
            function_name: String::new(),
            invocations: 0,
        }
    }

    /// Bind to the process-global interpreter, starting it if needed.
    /// Idempotent.
    pub fn init(&mut self) -> Result<&'static Interpreter, CallError> {
        if let Some(interpreter) = self.interpreter {
            return Ok(interpreter);
        }
        let interpreter = start_interpreter(&self.config)?;
        self.interpreter = Some(interpreter);
        Ok(interpreter)
    }

    pub fn interpreter(&self) -> Result<&'static Interpreter, CallError> {
        self.interpreter
            .ok_or_else(|| CallError::fatal("call runtime used before init"))
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticsBuffer> {
        self.diagnostics.clone()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn invocations(&self) -> u32 {
        self.invocations
    }

    pub fn live_handles(&self) -> usize {
        self.arena.live()
    }

    fn expect_phase(&self, op: &str, allowed: &[Phase]) -> Result<(), CallError> {
        if allowed.contains(&self.phase) {
            return Ok(());
        }
        Err(CallError::fatal(format!(
            "{op} called in phase {}",
            self.phase.as_str()
        )))
    }

    /// Parse the procedure into a callable and convert every argument.
    pub fn prepare(&mut self, session: &InterpreterGuard<'_>, request: &CallRequest) -> Result<(), CallError> {
        self.expect_phase("prepare", &[Phase::Init, Phase::Clean])?;

        let name = format!(
            "{}{}",
            self.config.function_prefix.as_deref().unwrap_or_default(),
            request.proc.name
        );
        let params: Vec<&str> = request.args.iter().map(|a| a.name.as_str()).collect();
        let callable = session.parse(&name, &params, &request.proc.src)?;

        let mut positional = Vec::with_capacity(request.args.len());
        let mut named = Vec::new();
        for (i, arg) in request.args.iter().enumerate() {
            let value = arg
                .value
                .validate()
                .and_then(|()| codec::to_native(&arg.value))
                .map_err(|e| {
                    let label = match arg.name.as_str() {
                        "" => format!("argument {i}"),
                        name => format!("argument '{name}'"),
                    };
                    CallError::argument(format!("{label}: {}", e.message))
                })?;
            let handle = self.arena.protect(value.clone());
            if !arg.name.is_empty() {
                named.push(handle);
            }
            positional.push(value);
        }

        self.code = Some(self.arena.protect(Dynamic::from(callable)));
        self.arguments = Some(self.arena.protect(Dynamic::from_array(positional)));
        self.named = named;
        self.return_type = request.rettype.clone();
        self.function_name = name;
        self.phase = Phase::Prepared;
        tracing::debug!(
            function = %self.function_name,
            args = request.args.len(),
            rettype = %self.return_type.ty,
            "call prepared"
        );
        Ok(())
    }

    /// Evaluate the prepared callable. On failure no result is recorded.
    pub fn execute(&mut self, session: &InterpreterGuard<'_>) -> Result<(), CallError> {
        self.expect_phase("execute", &[Phase::Prepared])?;

        let callable = self
            .code
            .and_then(|h| self.arena.get(h))
            .and_then(|v| v.read_lock::<Callable>().map(|c| c.clone()))
            .ok_or_else(|| CallError::fatal("prepared call has no code handle"))?;
        let mut args = Vec::with_capacity(1 + self.named.len());
        args.push(
            self.arguments
                .and_then(|h| self.arena.get(h))
                .cloned()
                .ok_or_else(|| CallError::fatal("prepared call has no argument handle"))?,
        );
        for handle in &self.named {
            args.push(
                self.arena
                    .get(*handle)
                    .cloned()
                    .ok_or_else(|| CallError::fatal("argument handle released before execute"))?,
            );
        }

        self.invocations += 1;
        self.phase = Phase::Executed;
        let value = session.apply(&callable, args)?;
        self.result = Some(self.arena.protect(value));
        tracing::debug!(function = %self.function_name, "call executed");
        Ok(())
    }

    /// Convert the result to the declared return type.
    ///
    /// An unmaterializable return type is an `Unsupported` error and nothing is
    /// written. A scalar that cannot be converted is written as null and the
    /// mismatch is returned.
    pub fn get_results(&mut self, response: &mut CallResponse) -> Result<(), CallError> {
        self.expect_phase("get_results", &[Phase::Executed])?;
        self.return_type.validate()?;

        let value = self
            .result
            .and_then(|h| self.arena.get(h))
            .ok_or_else(|| CallError::evaluation(format!("{} produced no result", self.function_name)))?;

        self.phase = Phase::Resulted;
        match codec::to_wire(value, &self.return_type) {
            Ok(wire) => {
                response.results.push(wire);
                Ok(())
            }
            Err(e) => {
                let ty = self.return_type.ty;
                if ty.is_scalar() {
                    response.results.push(WireValue::null(ty));
                }
                Err(e.with_context(format!("result of {}", self.function_name)))
            }
        }
    }

    /// Release everything the call protected and return to CLEAN.
    /// Safe to call from any phase, any number of times.
    pub fn cleanup(&mut self) {
        let released = self.arena.drain();
        self.code = None;
        self.arguments = None;
        self.named.clear();
        self.result = None;
        self.return_type = ReturnType::default();
        if self.phase != Phase::Clean {
            tracing::debug!(
                function = %self.function_name,
                from = self.phase.as_str(),
                released,
                "call cleaned up"
            );
        }
        self.function_name.clear();
        self.invocations = 0;
        self.phase = Phase::Clean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticsConfig;
    use plc_api::error::ErrorKind;
    use plc_api::value::{Scalar, WireType};

    fn runtime() -> CallRuntime {
        let mut rt = CallRuntime::new(
            InterpreterConfig::default(),
            Arc::new(DiagnosticsBuffer::new(&DiagnosticsConfig::default())),
        );
        rt.init().unwrap();
        rt
    }

    #[test]
    fn full_lifecycle() {
        let mut rt = runtime();
        let session = rt.interpreter().unwrap().acquire(rt.diagnostics());
        let req = CallRequest::new("double", "b * 2")
            .arg("b", Scalar::Int(21))
            .returns(ReturnType::scalar(WireType::Int));

        rt.prepare(&session, &req).unwrap();
        assert_eq!(rt.phase(), Phase::Prepared);
        rt.execute(&session).unwrap();
        assert_eq!(rt.invocations(), 1);

        let mut resp = CallResponse::default();
        rt.get_results(&mut resp).unwrap();
        assert_eq!(resp.result(), Some(&WireValue::from(Scalar::Int(42))));
        assert_eq!(rt.phase(), Phase::Resulted);
        assert!(rt.live_handles() > 0);

        rt.cleanup();
        assert_eq!(rt.phase(), Phase::Clean);
        assert_eq!(rt.live_handles(), 0);
        rt.cleanup();
        assert_eq!(rt.phase(), Phase::Clean);
    }

    #[test]
    fn out_of_order_transitions_are_fatal() {
        let mut rt = runtime();
        let session = rt.interpreter().unwrap().acquire(rt.diagnostics());
        assert_eq!(rt.execute(&session).unwrap_err().kind, ErrorKind::Fatal);
        assert_eq!(rt.get_results(&mut CallResponse::default()).unwrap_err().kind, ErrorKind::Fatal);

        rt.prepare(&session, &CallRequest::new("f", "1")).unwrap();
        assert_eq!(
            rt.prepare(&session, &CallRequest::new("f", "1")).unwrap_err().kind,
            ErrorKind::Fatal
        );
    }

    #[test]
    fn unconvertible_scalar_result_is_null_plus_mismatch() {
        let mut rt = runtime();
        let session = rt.interpreter().unwrap().acquire(rt.diagnostics());
        let req = CallRequest::new("text", r#""abc""#).returns(ReturnType::scalar(WireType::Int));
        rt.prepare(&session, &req).unwrap();
        rt.execute(&session).unwrap();

        let mut resp = CallResponse::default();
        let err = rt.get_results(&mut resp).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
        assert_eq!(resp.result(), Some(&WireValue::null(WireType::Int)));
    }

    #[test]
    fn unmaterializable_return_type_is_unsupported() {
        let mut rt = runtime();
        let session = rt.interpreter().unwrap().acquire(rt.diagnostics());
        let req = CallRequest::new("f", "1").returns(ReturnType::setof(Vec::new()));
        rt.prepare(&session, &req).unwrap();
        rt.execute(&session).unwrap();

        let mut resp = CallResponse::default();
        assert_eq!(rt.get_results(&mut resp).unwrap_err().kind, ErrorKind::Unsupported);
        assert!(resp.results.is_empty());
    }

    #[test]
    fn failed_execute_records_no_result() {
        let mut rt = runtime();
        let session = rt.interpreter().unwrap().acquire(rt.diagnostics());
        rt.prepare(&session, &CallRequest::new("boom", r#"throw "no""#)).unwrap();
        let err = rt.execute(&session).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Evaluation);
        assert_eq!(err.message, "error executing boom: no");
        assert_eq!(rt.get_results(&mut CallResponse::default()).unwrap_err().kind, ErrorKind::Evaluation);
    }
}
