use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use plc_api::error::CallError;
use plc_api::message::{CallRequest, CallResponse};

use crate::config::{PlcConfig, SessionMode};
use crate::diagnostics::{DiagnosticsBuffer, DiagnosticsSink, LogLevel};
use crate::error::EngineError;
use crate::interpreter::InterpreterGuard;
use crate::runtime::CallRuntime;

/// Transport-owned cancellation flag, polled once per call right after
/// evaluation returns.
pub trait CancellationProbe: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl CancellationProbe for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

impl<T: CancellationProbe + ?Sized> CancellationProbe for Arc<T> {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancelled;

impl CancellationProbe for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Entry point for the transport: one [`dispatch`](Self::dispatch) per call.
pub struct SessionDispatcher {
    config: PlcConfig,
    /// Present only in serialized-shared mode.
    shared: Option<Mutex<CallRuntime>>,
    next_call: AtomicU64,
}

impl std::fmt::Debug for SessionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDispatcher")
            .field("mode", &self.config.session.mode)
            .field("calls", &self.next_call.load(Ordering::Relaxed))
            .finish()
    }
}

/// Runs `cleanup` however the call ends, including unwinding.
struct CleanupOnDrop<'a>(&'a mut CallRuntime);

impl Deref for CleanupOnDrop<'_> {
    type Target = CallRuntime;

    fn deref(&self) -> &CallRuntime {
        self.0
    }
}

impl DerefMut for CleanupOnDrop<'_> {
    fn deref_mut(&mut self) -> &mut CallRuntime {
        self.0
    }
}

impl Drop for CleanupOnDrop<'_> {
    fn drop(&mut self) {
        self.0.cleanup();
    }
}

impl SessionDispatcher {
    /// Start the interpreter and, in serialized-shared mode, the shared runtime.
    pub fn new(config: PlcConfig) -> Result<Self, EngineError> {
        let shared = match config.session.mode {
            SessionMode::SerializedShared => {
                let mut runtime = CallRuntime::new(
                    config.interpreter.clone(),
                    Arc::new(DiagnosticsBuffer::new(&config.diagnostics)),
                );
                runtime.init()?;
                Some(Mutex::new(runtime))
            }
            SessionMode::PerCallFresh => {
                crate::interpreter::start_interpreter(&config.interpreter)?;
                None
            }
        };
        tracing::info!(mode = ?config.session.mode, "session dispatcher ready");
        Ok(Self {
            config,
            shared,
            next_call: AtomicU64::new(1),
        })
    }

    pub fn mode(&self) -> SessionMode {
        self.config.session.mode
    }

    /// Run one call to completion.
    ///
    /// Guest-side failures come back as `Ok` with `exception` set. `Err` is
    /// reserved for transport-level outcomes: ResourceBusy, Cancelled,
    /// Unsupported and Fatal.
    pub fn dispatch(
        &self,
        request: &CallRequest,
        cancel: &dyn CancellationProbe,
    ) -> Result<CallResponse, CallError> {
        let call = self.next_call.fetch_add(1, Ordering::Relaxed);
        let span = tracing::info_span!(
            "call",
            call,
            mode = ?self.config.session.mode,
            function = %request.proc.name
        );
        let _enter = span.enter();

        match &self.shared {
            Some(shared) => {
                let mut runtime = match shared.try_lock() {
                    Ok(guard) => guard,
                    Err(TryLockError::WouldBlock) => {
                        tracing::warn!("shared session busy, rejecting call");
                        return Err(CallError::resource_busy(
                            "another call is in flight on the shared session",
                        ));
                    }
                    Err(TryLockError::Poisoned(poisoned)) => {
                        tracing::warn!("shared session lock was poisoned, recovering");
                        poisoned.into_inner()
                    }
                };
                let session = runtime
                    .interpreter()?
                    .try_acquire(runtime.diagnostics())
                    .ok_or_else(|| {
                        tracing::warn!("interpreter held by another call, rejecting");
                        CallError::resource_busy("the interpreter is running another call")
                    })?;
                run_call(&mut runtime, session, request, cancel)
            }
            None => {
                let mut runtime = CallRuntime::new(
                    self.config.interpreter.clone(),
                    Arc::new(DiagnosticsBuffer::new(&self.config.diagnostics)),
                );
                let session = runtime.init()?.acquire(runtime.diagnostics());
                run_call(&mut runtime, session, request, cancel)
            }
        }
    }
}

fn run_call(
    runtime: &mut CallRuntime,
    session: InterpreterGuard<'static>,
    request: &CallRequest,
    cancel: &dyn CancellationProbe,
) -> Result<CallResponse, CallError> {
    let diagnostics = runtime.diagnostics();

    let mut response = CallResponse::default();
    let outcome = {
        let mut call = CleanupOnDrop(runtime);
        call.prepare(&session, request).and_then(|()| {
            let executed = call.execute(&session);
            if cancel.is_cancelled() {
                return Err(CallError::cancelled(format!(
                    "call to {} cancelled by the transport",
                    request.proc.name
                )));
            }
            executed?;
            call.get_results(&mut response)
        })
    };
    drop(session);

    match outcome {
        Ok(()) => {
            response.logs = diagnostics.drain();
            tracing::debug!(results = response.results.len(), "call finished");
            Ok(response)
        }
        Err(e) if e.is_recoverable() => {
            diagnostics.emit(LogLevel::Error, &e.message);
            response.set_exception(&e);
            response.logs = diagnostics.drain();
            Ok(response)
        }
        Err(e) => {
            // Nobody receives these logs; they have already gone to tracing.
            let discarded = diagnostics.drain();
            tracing::warn!(error = %e, discarded_bytes = discarded.len(), "call failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plc_api::error::ErrorKind;
    use plc_api::schema::ReturnType;
    use plc_api::value::{Scalar, WireType, WireValue};
    use std::time::Duration;

    /// Other tests in this binary share the interpreter; wait them out.
    fn dispatch_when_free(
        dispatcher: &SessionDispatcher,
        req: &CallRequest,
        cancel: &dyn CancellationProbe,
    ) -> Result<CallResponse, CallError> {
        loop {
            match dispatcher.dispatch(req, cancel) {
                Err(e) if e.kind == ErrorKind::ResourceBusy => std::thread::sleep(Duration::from_millis(5)),
                other => return other,
            }
        }
    }

    #[test]
    fn cancellation_is_seen_after_execute() {
        let dispatcher = SessionDispatcher::new(PlcConfig::default()).unwrap();
        let cancel = AtomicBool::new(true);
        let req = CallRequest::new("slow", "1").returns(ReturnType::scalar(WireType::Int));
        let err = dispatch_when_free(&dispatcher, &req, &cancel).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);

        // The session was cleaned up and is usable again.
        let resp = dispatch_when_free(&dispatcher, &req, &NeverCancelled).unwrap();
        assert_eq!(resp.result(), Some(&WireValue::from(Scalar::Int(1))));
    }

    #[test]
    fn guest_error_is_an_exception_with_logs() {
        let dispatcher = SessionDispatcher::new(PlcConfig::default()).unwrap();
        let req = CallRequest::new("bad", r#"print("before"); throw "oops""#);
        let resp = dispatch_when_free(&dispatcher, &req, &NeverCancelled).unwrap();
        let exception = resp.exception.as_ref().unwrap();
        assert_eq!(exception.message, "evaluation error: error executing bad: oops");
        assert!(resp.logs.starts_with("LOG: before\n"), "{}", resp.logs);
        assert!(resp.logs.contains("ERROR: error executing bad: oops"), "{}", resp.logs);
    }

    #[test]
    fn shared_session_does_not_wait_for_the_interpreter() {
        let config = PlcConfig::default();
        let dispatcher = SessionDispatcher::new(config.clone()).unwrap();
        let interpreter = crate::interpreter::start_interpreter(&config.interpreter).unwrap();
        let held = interpreter.acquire(Arc::new(DiagnosticsBuffer::new(&config.diagnostics)));

        let req = CallRequest::new("test", "1").returns(ReturnType::scalar(WireType::Int));
        let err = dispatcher.dispatch(&req, &NeverCancelled).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceBusy);
        drop(held);

        let resp = dispatch_when_free(&dispatcher, &req, &NeverCancelled).unwrap();
        assert_eq!(resp.result(), Some(&WireValue::from(Scalar::Int(1))));
    }
}
