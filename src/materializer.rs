use std::cell::RefCell;
use std::collections::HashMap;

use tracing::debug;

use crate::copier::deep_copy;
use crate::registry::ClassDefinition;
use crate::value::{CompositeRef, NativeHandle, ObjectTag};

/// Per-handle object instances. An instance lives until it is released or the store is cleared.
#[derive(Default)]
pub struct ObjectStore {
    instances: RefCell<HashMap<NativeHandle, CompositeRef>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the instance for `handle`, copying it from the class template on first use.
    pub fn get_or_create(&self, class: &ClassDefinition, handle: NativeHandle) -> CompositeRef {
        if let Some(existing) = self.get(handle) {
            return existing;
        }
        let instance = deep_copy(class.template());
        let debug_name = handle.object_key();
        debug!(target: "script", object = %debug_name, class = %class.identity(), "materialized object");
        instance.set_tag(ObjectTag { type_identity: class.identity(), handle, debug_name });
        self.instances.borrow_mut().insert(handle, instance.clone());
        instance
    }

    pub fn get(&self, handle: NativeHandle) -> Option<CompositeRef> {
        self.instances.borrow().get(&handle).cloned()
    }

    pub fn release(&self, handle: NativeHandle) -> bool {
        self.instances.borrow_mut().remove(&handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.instances.borrow_mut().clear();
    }
}
