use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use rhai::{CallFnOptions, Dynamic, EvalAltResult, Scope};
use serde::Deserialize;
use tracing::debug;

use crate::compiler::{from_dynamic, to_dynamic};
use crate::diagnostics::Diagnostic;
use crate::error::BridgeError;
use crate::registry::ClassDefinition;
use crate::runtime::ScriptRuntime;
use crate::value::{Callable, CompositeRef, NativeHandle, Value};

/// Whether a dispatch whose callback raised an error reports itself as handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThrownErrorPolicy {
    #[default]
    NotHandled,
    Handled,
}

/// Identity used to detect re-entrant dispatch to the same target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GuardKey {
    Handle(NativeHandle),
    Class(usize),
    Sentinel(String),
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardKey::Handle(handle) => write!(f, "{handle}"),
            GuardKey::Class(index) => write!(f, "class#{index}"),
            GuardKey::Sentinel(name) => write!(f, "sentinel:{name}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct GuardSet {
    active: RefCell<HashSet<GuardKey>>,
}

impl GuardSet {
    pub fn contains(&self, key: &GuardKey) -> bool {
        self.active.borrow().contains(key)
    }

    pub fn len(&self) -> usize {
        self.active.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.borrow().is_empty()
    }

    /// Marks `key` active until the returned token drops.
    pub(crate) fn enter(&self, key: GuardKey) -> GuardToken<'_> {
        self.active.borrow_mut().insert(key.clone());
        GuardToken { set: self, key }
    }
}

pub(crate) struct GuardToken<'a> {
    set: &'a GuardSet,
    key: GuardKey,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.set.active.borrow_mut().remove(&self.key);
    }
}

/// The `self`/`this` pair visible to code running inside a dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallContext {
    /// `self`: the object instance, class table or plain table the callback runs against.
    pub object: Option<CompositeRef>,
    /// `this`: the native handle for object-scoped dispatch.
    pub handle: Option<NativeHandle>,
    pub class_index: Option<usize>,
}

#[derive(Debug, Default)]
pub(crate) struct ContextSlot(RefCell<CallContext>);

impl ContextSlot {
    pub(crate) fn current(&self) -> CallContext {
        self.0.borrow().clone()
    }

    /// Installs `context`; the previous binding comes back when the guard drops.
    pub(crate) fn bind(&self, context: CallContext) -> ContextBinding<'_> {
        let previous = self.0.replace(context);
        ContextBinding { slot: self, previous: Some(previous) }
    }
}

pub(crate) struct ContextBinding<'a> {
    slot: &'a ContextSlot,
    previous: Option<CallContext>,
}

impl Drop for ContextBinding<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.slot.0.replace(previous);
        }
    }
}

#[derive(Debug, Clone)]
pub enum TargetScope {
    Class(usize),
    Object { class: usize, handle: NativeHandle },
    Table(CompositeRef),
}

/// Where a callback is looked up and which guard key protects the call.
#[derive(Debug, Clone)]
pub struct DispatchTarget {
    scope: TargetScope,
    guard: GuardKey,
}

impl DispatchTarget {
    pub fn class(index: usize) -> Self {
        Self { scope: TargetScope::Class(index), guard: GuardKey::Class(index) }
    }

    pub fn object(class: usize, handle: NativeHandle) -> Self {
        Self { scope: TargetScope::Object { class, handle }, guard: GuardKey::Handle(handle) }
    }

    /// Anonymous form: dispatch against a bare table under a named sentinel.
    pub fn table(table: CompositeRef, sentinel: impl Into<String>) -> Self {
        Self { scope: TargetScope::Table(table), guard: GuardKey::Sentinel(sentinel.into()) }
    }

    pub fn scope(&self) -> &TargetScope {
        &self.scope
    }

    pub fn guard(&self) -> &GuardKey {
        &self.guard
    }

    pub fn handle(&self) -> Option<NativeHandle> {
        match self.scope {
            TargetScope::Object { handle, .. } => Some(handle),
            _ => None,
        }
    }

    fn class_index(&self) -> Option<usize> {
        match self.scope {
            TargetScope::Class(index) | TargetScope::Object { class: index, .. } => Some(index),
            TargetScope::Table(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub handled: bool,
    pub result: Value,
    pub error: Option<Diagnostic>,
}

impl DispatchOutcome {
    pub fn unhandled() -> Self {
        Self::default()
    }
}

enum CallFailure {
    Script(Box<EvalAltResult>),
    Native(BridgeError),
}

impl ScriptRuntime {
    /// Invokes `callback` on `target` if the target defines it and is not already mid-dispatch.
    pub fn dispatch(&self, target: &DispatchTarget, callback: &str, args: &[Value]) -> DispatchOutcome {
        let Some((callable, definition)) = self.resolve_callback(target, callback) else {
            return DispatchOutcome::unhandled();
        };
        let inner = self.inner();
        if inner.guards.contains(&target.guard) {
            debug!(target: "script", guard = %target.guard, callback, "re-entrant dispatch suppressed");
            return DispatchOutcome::unhandled();
        }
        let _guard = inner.guards.enter(target.guard.clone());

        let object = match (&target.scope, definition.as_deref()) {
            (TargetScope::Object { handle, .. }, Some(definition)) => inner.objects.get_or_create(definition, *handle),
            (TargetScope::Class(_), Some(definition)) => definition.template().clone(),
            (TargetScope::Table(table), _) => table.clone(),
            _ => return DispatchOutcome::unhandled(),
        };
        let _binding = inner.context.bind(CallContext {
            object: Some(object.clone()),
            handle: target.handle(),
            class_index: target.class_index(),
        });

        debug!(target: "script", guard = %target.guard, callback, "dispatching");
        let call = panic::catch_unwind(AssertUnwindSafe(|| self.invoke(&callable, &object, args)));
        match call {
            Ok(Ok(result)) => DispatchOutcome { handled: true, result, error: None },
            Ok(Err(failure)) => {
                let frame = format!("while dispatching '{callback}' to {}", target.guard);
                let diagnostic = inner.exceptions.handle_error(|| {
                    let diagnostic = match &failure {
                        CallFailure::Script(err) => Diagnostic::from_eval(err),
                        CallFailure::Native(err) => Diagnostic::from_bridge(err),
                    };
                    diagnostic.with_frame(frame)
                });
                let handled = inner.config.thrown_errors == ThrownErrorPolicy::Handled;
                DispatchOutcome { handled, result: Value::Nil, error: Some(diagnostic) }
            }
            Err(payload) => inner.exceptions.handle_panic(payload),
        }
    }

    /// Event form: lets script replace a native method. The caller returns early when this is true.
    pub fn dispatch_event(&self, target: &DispatchTarget, callback: &str, args: &[Value]) -> bool {
        self.dispatch(target, callback, args).handled
    }

    /// Callback form: lets script adjust a native result. `combine` only runs when script handled
    /// the call.
    pub fn dispatch_callback<T>(
        &self,
        target: &DispatchTarget,
        callback: &str,
        args: &[Value],
        native: T,
        combine: impl FnOnce(T, Value) -> T,
    ) -> T {
        let outcome = self.dispatch(target, callback, args);
        if outcome.handled {
            combine(native, outcome.result)
        } else {
            native
        }
    }

    fn resolve_callback(
        &self,
        target: &DispatchTarget,
        callback: &str,
    ) -> Option<(Callable, Option<Rc<ClassDefinition>>)> {
        match &target.scope {
            TargetScope::Class(index) | TargetScope::Object { class: index, .. } => {
                let definition = match self.inner().registry.definition(*index) {
                    Ok(definition) => definition,
                    Err(err) => {
                        debug!(target: "script", callback, "dispatch target unavailable: {err}");
                        return None;
                    }
                };
                let callable = definition.template().callable(callback)?;
                Some((callable, Some(definition)))
            }
            TargetScope::Table(table) => table.callable(callback).map(|callable| (callable, None)),
        }
    }

    fn invoke(&self, callable: &Callable, object: &CompositeRef, args: &[Value]) -> Result<Value, CallFailure> {
        match callable {
            Callable::Script(function) => {
                let mut this = Dynamic::from(object.clone());
                let mut scope = Scope::new();
                let options = CallFnOptions::new().eval_ast(false).rewind_scope(true).bind_this_ptr(&mut this);
                let call_args: Vec<Dynamic> = args.iter().map(to_dynamic).collect();
                self.inner()
                    .engine
                    .call_fn_with_options::<Dynamic>(options, &mut scope, function.ast(), function.name(), call_args)
                    .map(|result| from_dynamic(result, Some(function.ast())))
                    .map_err(CallFailure::Script)
            }
            Callable::Native(function) => function.call(self, args).map_err(CallFailure::Native),
        }
    }
}
