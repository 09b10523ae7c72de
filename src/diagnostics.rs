use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use rhai::{EvalAltResult, Position};
use tracing::error;

use crate::error::BridgeError;

/// A script or bridge failure flattened into something a host can log.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Diagnostic {
    pub message: String,
    pub traceback: Vec<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), traceback: Vec::new() }
    }

    pub fn from_eval(err: &EvalAltResult) -> Self {
        let mut traceback = Vec::new();
        let mut current = err;
        loop {
            match current {
                EvalAltResult::ErrorInFunctionCall(name, source, inner, pos) => {
                    traceback.push(frame(name, source, *pos));
                    current = inner;
                }
                EvalAltResult::ErrorRuntime(value, pos) => {
                    if !pos.is_none() {
                        traceback.push(format!("at {pos}"));
                    }
                    let message = match value.clone().into_immutable_string() {
                        Ok(text) => text.to_string(),
                        Err(_) => value.to_string(),
                    };
                    return Self { message, traceback };
                }
                other => {
                    let pos = other.position();
                    if !pos.is_none() {
                        traceback.push(format!("at {pos}"));
                    }
                    return Self { message: other.to_string(), traceback };
                }
            }
        }
    }

    pub fn from_bridge(err: &BridgeError) -> Self {
        Self::new(err.to_string())
    }

    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.traceback.push(frame.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for line in &self.traceback {
            write!(f, "\n    {line}")?;
        }
        Ok(())
    }
}

fn frame(name: &str, source: &str, pos: Position) -> String {
    match (source.is_empty(), pos.is_none()) {
        (true, true) => format!("in '{name}'"),
        (true, false) => format!("in '{name}' at {pos}"),
        (false, true) => format!("in '{name}' ({source})"),
        (false, false) => format!("in '{name}' ({source}) at {pos}"),
    }
}

/// Receives diagnostics and introspection dumps from the bridge.
pub trait DiagnosticsSink {
    fn report(&self, diagnostic: &Diagnostic);

    fn dump(&self, _text: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        error!(target: "script", traceback = ?diagnostic.traceback, "{}", diagnostic.message);
    }

    fn dump(&self, text: &str) {
        tracing::debug!(target: "script", "{text}");
    }
}

/// Buffers every report. Clones share the buffer.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    reports: Rc<RefCell<Vec<Diagnostic>>>,
    dumps: Rc<RefCell<Vec<String>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Diagnostic> {
        self.reports.borrow().clone()
    }

    pub fn dumps(&self) -> Vec<String> {
        self.dumps.borrow().clone()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        self.reports.borrow_mut().drain(..).collect()
    }
}

impl DiagnosticsSink for CollectingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        self.reports.borrow_mut().push(diagnostic.clone());
    }

    fn dump(&self, text: &str) {
        self.dumps.borrow_mut().push(text.to_string());
    }
}

/// Converts failures from either side of the bridge into diagnostics.
pub struct ExceptionBridge {
    sink: Box<dyn DiagnosticsSink>,
}

impl ExceptionBridge {
    pub fn new(sink: Box<dyn DiagnosticsSink>) -> Self {
        Self { sink }
    }

    pub fn handle_bridge_error(&self, err: &BridgeError) -> Diagnostic {
        self.handle_error(|| Diagnostic::from_bridge(err))
    }

    /// Builds and reports a diagnostic. A fault raised while doing so is swallowed.
    pub fn handle_error(&self, build: impl FnOnce() -> Diagnostic) -> Diagnostic {
        let diagnostic = match panic::catch_unwind(AssertUnwindSafe(build)) {
            Ok(diagnostic) => diagnostic,
            Err(payload) => Diagnostic::new(format!("error while building diagnostic: {}", panic_message(&*payload))),
        };
        self.report(&diagnostic);
        diagnostic
    }

    pub fn report(&self, diagnostic: &Diagnostic) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.sink.report(diagnostic))).is_err() {
            eprintln!("[script] diagnostics sink failed while reporting: {}", diagnostic.message);
        }
    }

    pub fn dump(&self, text: &str) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.sink.dump(text))).is_err() {
            eprintln!("[script] diagnostics sink failed while dumping");
        }
    }

    /// A panic escaping the runtime leaves its state undefined; report and abort.
    pub fn handle_panic(&self, payload: Box<dyn Any + Send>) -> ! {
        let message = panic_message(&*payload);
        error!(target: "script", "fatal panic in script runtime: {message}");
        self.report(&Diagnostic::new(format!("fatal panic in script runtime: {message}")));
        std::process::abort()
    }
}

/// Best-effort text for a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
