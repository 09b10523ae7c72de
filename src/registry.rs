use std::cell::RefCell;
use std::rc::Rc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::value::CompositeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Allow,
    Reject,
}

/// A loaded script class: the template every instance of it is copied from.
#[derive(Debug)]
pub struct ClassDefinition {
    name: String,
    source_path: String,
    template: CompositeRef,
    digest: blake3::Hash,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>, source_path: impl Into<String>, template: CompositeRef, source: &str) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            template,
            digest: blake3::hash(source.as_bytes()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn identity(&self) -> String {
        class_identity(&self.name, &self.source_path)
    }

    pub fn template(&self) -> &CompositeRef {
        &self.template
    }

    pub fn digest(&self) -> blake3::Hash {
        self.digest
    }
}

pub fn class_identity(name: &str, path: &str) -> String {
    format!("{name}:{path}")
}

/// Produces a class definition for a named script resource.
pub trait DefinitionBuilder {
    fn build(&self, path: &str, name: &str) -> BridgeResult<ClassDefinition>;
}

impl<F> DefinitionBuilder for F
where
    F: Fn(&str, &str) -> BridgeResult<ClassDefinition>,
{
    fn build(&self, path: &str, name: &str) -> BridgeResult<ClassDefinition> {
        self(path, name)
    }
}

/// Ordered set of loaded classes. Builders run without any borrow held, so a script evaluated
/// during a build may call back into the registry.
#[derive(Default)]
pub struct ClassRegistry {
    entries: RefCell<Vec<Rc<ClassDefinition>>>,
    duplicates: DuplicatePolicy,
}

impl ClassRegistry {
    pub fn new(duplicates: DuplicatePolicy) -> Self {
        Self { entries: RefCell::new(Vec::new()), duplicates }
    }

    pub fn register(&self, path: &str, name: &str, builder: &dyn DefinitionBuilder) -> BridgeResult<usize> {
        let identity = class_identity(name, path);
        if self.duplicates == DuplicatePolicy::Reject && self.position(&identity).is_some() {
            return Err(BridgeError::Duplicate { identity });
        }
        let definition = builder.build(path, name)?;
        let mut entries = self.entries.borrow_mut();
        entries.push(Rc::new(definition));
        let index = entries.len() - 1;
        info!(target: "script", index, class = %identity, "registered class");
        Ok(index)
    }

    pub fn count(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn identity_at(&self, index: usize) -> BridgeResult<String> {
        self.definition(index).map(|definition| definition.identity())
    }

    pub fn definition(&self, index: usize) -> BridgeResult<Rc<ClassDefinition>> {
        let entries = self.entries.borrow();
        entries.get(index).cloned().ok_or(BridgeError::Index { index, count: entries.len() })
    }

    /// First class registered under `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries.borrow().iter().position(|definition| definition.name() == name)
    }

    pub fn identities(&self) -> Vec<String> {
        self.entries.borrow().iter().map(|definition| definition.identity()).collect()
    }

    /// Rebuilds one entry in place. Other entries and already materialized objects are untouched.
    pub fn reload_one(&self, index: usize, builder: &dyn DefinitionBuilder) -> BridgeResult<()> {
        let current = self.definition(index)?;
        let fresh = builder.build(current.source_path(), current.name())?;
        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(index) {
            Some(slot) => *slot = Rc::new(fresh),
            None => return Err(BridgeError::Index { index, count: entries.len() }),
        }
        info!(target: "script", index, class = %current.identity(), "reloaded class");
        Ok(())
    }

    /// Reloads every entry, continuing past failures.
    pub fn reload_all(&self, builder: &dyn DefinitionBuilder) -> Result<(), Vec<BridgeError>> {
        let mut failures = Vec::new();
        for index in 0..self.count() {
            if let Err(err) = self.reload_one(index, builder) {
                warn!(target: "script", index, "reload failed: {err}");
                failures.push(err);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    fn position(&self, identity: &str) -> Option<usize> {
        self.entries.borrow().iter().position(|definition| definition.identity() == identity)
    }
}
