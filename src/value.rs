use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use rhai::AST;

use crate::error::{ArgumentTypeError, BridgeResult};
use crate::runtime::ScriptRuntime;

/// Opaque correlation key for a host object. The address is only ever compared, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle {
    addr: usize,
    generation: u32,
}

impl NativeHandle {
    pub fn from_ref<T: ?Sized>(value: &T) -> Self {
        Self { addr: value as *const T as *const () as usize, generation: 0 }
    }

    pub const fn from_raw(addr: usize) -> Self {
        Self { addr, generation: 0 }
    }

    /// Tags the handle so a reused address does not alias a stale instance.
    pub const fn with_generation(self, generation: u32) -> Self {
        Self { addr: self.addr, generation }
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn object_key(&self) -> String {
        format!("object@{:#x}#{}", self.addr, self.generation)
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_key())
    }
}

pub type NativeFn = dyn Fn(&ScriptRuntime, &[Value]) -> BridgeResult<Value>;

#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    arity: usize,
    func: Rc<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        arity: usize,
        func: impl Fn(&ScriptRuntime, &[Value]) -> BridgeResult<Value> + 'static,
    ) -> Self {
        let name: String = name.into();
        Self { name: Rc::from(name), arity, func: Rc::new(func) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn call(&self, runtime: &ScriptRuntime, args: &[Value]) -> BridgeResult<Value> {
        (self.func)(runtime, args)
    }
}

/// A function defined in a compiled class script.
#[derive(Clone)]
pub struct ScriptFunction {
    name: Rc<str>,
    arity: usize,
    ast: Rc<AST>,
}

impl ScriptFunction {
    pub fn new(name: &str, arity: usize, ast: Rc<AST>) -> Self {
        Self { name: Rc::from(name), arity, ast }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn ast(&self) -> &Rc<AST> {
        &self.ast
    }
}

/// Callables are shared between templates and their copies, never duplicated.
#[derive(Clone)]
pub enum Callable {
    Script(ScriptFunction),
    Native(NativeFunction),
}

impl Callable {
    pub fn native(
        name: impl Into<String>,
        arity: usize,
        func: impl Fn(&ScriptRuntime, &[Value]) -> BridgeResult<Value> + 'static,
    ) -> Self {
        Callable::Native(NativeFunction::new(name, arity, func))
    }

    pub fn name(&self) -> &str {
        match self {
            Callable::Script(func) => func.name(),
            Callable::Native(func) => func.name(),
        }
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Script(a), Callable::Script(b)) => Rc::ptr_eq(&a.ast, &b.ast) && a.name == b.name,
            (Callable::Native(a), Callable::Native(b)) => Rc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Script(func) => write!(f, "ScriptFunction({}/{})", func.name, func.arity),
            Callable::Native(func) => write!(f, "NativeFunction({}/{})", func.name, func.arity),
        }
    }
}

/// Metadata attached to a materialized object instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTag {
    pub type_identity: String,
    pub handle: NativeHandle,
    pub debug_name: String,
}

#[derive(Default)]
pub struct Composite {
    fields: BTreeMap<String, Value>,
    tag: Option<ObjectTag>,
}

impl Composite {
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }
}

/// Shared, interior-mutable handle to a composite. Clones alias the same storage.
#[derive(Clone, Default)]
pub struct CompositeRef(Rc<RefCell<Composite>>);

impl CompositeRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        let composite = Self::new();
        for (key, value) in fields {
            composite.set(key, value);
        }
        composite
    }

    /// Identity of the underlying storage, stable for the composite's lifetime.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &CompositeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn get(&self, key: &str) -> Value {
        self.0.borrow().fields.get(key).cloned().unwrap_or(Value::Nil)
    }

    /// Assigning `Nil` removes the field.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut inner = self.0.borrow_mut();
        if value.is_nil() {
            inner.fields.remove(&key);
        } else {
            inner.fields.insert(key, value);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.borrow().fields.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().fields.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().fields.is_empty()
    }

    pub fn tag(&self) -> Option<ObjectTag> {
        self.0.borrow().tag.clone()
    }

    pub fn set_tag(&self, tag: ObjectTag) {
        self.0.borrow_mut().tag = Some(tag);
    }

    pub fn callable(&self, key: &str) -> Option<Callable> {
        match self.0.borrow().fields.get(key) {
            Some(Value::Callable(callable)) => Some(callable.clone()),
            _ => None,
        }
    }

    pub(crate) fn borrow(&self) -> Ref<'_, Composite> {
        self.0.borrow()
    }

    pub(crate) fn replace_fields(&self, fields: BTreeMap<String, Value>) {
        self.0.borrow_mut().fields = fields;
    }
}

impl PartialEq for CompositeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for CompositeRef {}

// Composites may be cyclic, so Debug never recurses into fields.
impl fmt::Debug for CompositeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        match &inner.tag {
            Some(tag) => write!(f, "Composite({}, {} fields)", tag.debug_name, inner.fields.len()),
            None => write!(f, "Composite({:#x}, {} fields)", self.id(), inner.fields.len()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Callable(Callable),
    Composite(CompositeRef),
    Handle(NativeHandle),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => a.ptr_eq(b),
            (Value::Composite(a), Value::Composite(b)) => a == b,
            (Value::Handle(a), Value::Handle(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Callable(_) => "function",
            Value::Composite(_) => "composite",
            Value::Handle(_) => "handle",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeRef> {
        match self {
            Value::Composite(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<NativeHandle> {
        match self {
            Value::Handle(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn expect_bool(&self, function: &str, position: usize) -> Result<bool, ArgumentTypeError> {
        self.as_bool().ok_or_else(|| self.mismatch(function, position, "boolean"))
    }

    pub fn expect_number(&self, function: &str, position: usize) -> Result<f64, ArgumentTypeError> {
        self.as_number().ok_or_else(|| self.mismatch(function, position, "number"))
    }

    pub fn expect_str(&self, function: &str, position: usize) -> Result<&str, ArgumentTypeError> {
        self.as_str().ok_or_else(|| self.mismatch(function, position, "string"))
    }

    pub fn expect_composite(&self, function: &str, position: usize) -> Result<&CompositeRef, ArgumentTypeError> {
        self.as_composite().ok_or_else(|| self.mismatch(function, position, "composite"))
    }

    pub fn expect_handle(&self, function: &str, position: usize) -> Result<NativeHandle, ArgumentTypeError> {
        self.as_handle().ok_or_else(|| self.mismatch(function, position, "handle"))
    }

    fn mismatch(&self, function: &str, position: usize, expected: &'static str) -> ArgumentTypeError {
        ArgumentTypeError { function: function.to_string(), position, expected, received: self.type_name() }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<CompositeRef> for Value {
    fn from(value: CompositeRef) -> Self {
        Value::Composite(value)
    }
}

impl From<NativeHandle> for Value {
    fn from(value: NativeHandle) -> Self {
        Value::Handle(value)
    }
}

impl From<Callable> for Value {
    fn from(value: Callable) -> Self {
        Value::Callable(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigning_nil_removes_field() {
        let table = CompositeRef::from_fields([("hp", Value::from(10.0))]);
        assert!(table.contains("hp"));
        table.set("hp", Value::Nil);
        assert!(!table.contains("hp"));
        assert_eq!(table.get("hp"), Value::Nil);
    }

    #[test]
    fn mismatch_names_expected_and_received_types() {
        let err = Value::from(5.0).expect_str("report_error", 1).unwrap_err();
        assert_eq!(err.to_string(), "bad argument #1 to 'report_error' (expected a string value, got number)");
    }

    #[test]
    fn handles_compare_by_address_and_generation() {
        let object = 7u32;
        let handle = NativeHandle::from_ref(&object);
        assert_eq!(handle, NativeHandle::from_ref(&object));
        assert_ne!(handle, handle.with_generation(1));
        assert!(handle.object_key().starts_with("object@0x"));
    }

    #[test]
    fn composites_compare_by_identity() {
        let a = CompositeRef::new();
        let b = CompositeRef::new();
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }
}
