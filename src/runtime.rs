use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use rhai::Engine;
use tracing::{info, warn};

use crate::bridge::{CallContext, ContextSlot, GuardKey, GuardSet};
use crate::compiler::ScriptCompiler;
use crate::config::BridgeConfig;
use crate::diagnostics::{Diagnostic, DiagnosticsSink, ExceptionBridge, TracingSink};
use crate::error::{BridgeError, BridgeResult};
use crate::loader::{FsLoader, ScriptLoader};
use crate::materializer::ObjectStore;
use crate::natives::build_engine;
use crate::registry::{ClassDefinition, ClassRegistry};
use crate::value::{CompositeRef, NativeFunction, NativeHandle, Value};

pub(crate) struct RuntimeInner {
    pub(crate) config: BridgeConfig,
    pub(crate) engine: Engine,
    pub(crate) loader: Box<dyn ScriptLoader>,
    pub(crate) registry: ClassRegistry,
    pub(crate) objects: ObjectStore,
    pub(crate) guards: GuardSet,
    pub(crate) context: ContextSlot,
    pub(crate) exceptions: ExceptionBridge,
}

pub struct RuntimeBuilder {
    config: BridgeConfig,
    loader: Option<Box<dyn ScriptLoader>>,
    sink: Option<Box<dyn DiagnosticsSink>>,
    natives: Vec<NativeFunction>,
}

impl RuntimeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config, loader: None, sink: None, natives: Vec::new() }
    }

    pub fn loader(mut self, loader: impl ScriptLoader + 'static) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    pub fn sink(mut self, sink: impl DiagnosticsSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Exposes a host function to every class script under `name`.
    pub fn native(
        mut self,
        name: impl Into<String>,
        arity: usize,
        func: impl Fn(&ScriptRuntime, &[Value]) -> BridgeResult<Value> + 'static,
    ) -> Self {
        self.natives.push(NativeFunction::new(name, arity, func));
        self
    }

    pub fn build(self) -> ScriptRuntime {
        let RuntimeBuilder { config, loader, sink, natives } = self;
        let loader = loader.unwrap_or_else(|| Box::new(FsLoader::new(&config.script_root)));
        let sink = sink.unwrap_or_else(|| Box::new(TracingSink));
        let inner = Rc::new_cyclic(|weak| RuntimeInner {
            engine: build_engine(&config, weak.clone(), &natives),
            loader,
            registry: ClassRegistry::new(config.duplicates),
            objects: ObjectStore::new(),
            guards: GuardSet::default(),
            context: ContextSlot::default(),
            exceptions: ExceptionBridge::new(sink),
            config,
        });
        info!(target: "script", natives = natives.len(), "script runtime started");
        ScriptRuntime { inner }
    }
}

/// Handle to the single script runtime a host owns. Clones refer to the same runtime.
#[derive(Clone)]
pub struct ScriptRuntime {
    inner: Rc<RuntimeInner>,
}

impl ScriptRuntime {
    pub fn new(config: BridgeConfig) -> Self {
        RuntimeBuilder::new(config).build()
    }

    pub fn builder(config: BridgeConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub(crate) fn from_inner(inner: Rc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &RuntimeInner {
        &self.inner
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Registers every class listed in the config, continuing past failures.
    pub fn load_classes(&self) -> Result<usize, Vec<BridgeError>> {
        let mut failures = Vec::new();
        let mut loaded = 0;
        for entry in &self.inner.config.classes {
            match self.register_class(&entry.path, &entry.name) {
                Ok(_) => loaded += 1,
                Err(err) => failures.push(err),
            }
        }
        info!(target: "script", loaded, failed = failures.len(), "initial class load finished");
        if failures.is_empty() {
            Ok(loaded)
        } else {
            Err(failures)
        }
    }

    pub fn register_class(&self, path: &str, name: &str) -> BridgeResult<usize> {
        let compiler = ScriptCompiler::new(&self.inner.engine, self.inner.loader.as_ref());
        let result = self.inner.registry.register(path, name, &compiler);
        if let Err(err) = &result {
            self.inner.exceptions.handle_bridge_error(err);
        }
        result
    }

    pub fn class_count(&self) -> usize {
        self.inner.registry.count()
    }

    pub fn class_identity(&self, index: usize) -> BridgeResult<String> {
        self.inner.registry.identity_at(index)
    }

    pub fn class_identities(&self) -> Vec<String> {
        self.inner.registry.identities()
    }

    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.inner.registry.find(name)
    }

    pub fn class(&self, index: usize) -> BridgeResult<Rc<ClassDefinition>> {
        self.inner.registry.definition(index)
    }

    pub fn reload_class(&self, index: usize) -> BridgeResult<()> {
        let compiler = ScriptCompiler::new(&self.inner.engine, self.inner.loader.as_ref());
        let result = self.inner.registry.reload_one(index, &compiler);
        if let Err(err) = &result {
            self.inner.exceptions.handle_bridge_error(err);
        }
        result
    }

    pub fn reload_all(&self) -> Result<(), Vec<BridgeError>> {
        let compiler = ScriptCompiler::new(&self.inner.engine, self.inner.loader.as_ref());
        let result = self.inner.registry.reload_all(&compiler);
        if let Err(failures) = &result {
            for err in failures {
                self.inner.exceptions.handle_bridge_error(err);
            }
        }
        result
    }

    /// Reloads classes whose source file is among `changed` and whose content actually differs.
    /// Returns `(index, reloaded)` for every class the paths map to.
    pub fn reload_changed(&self, changed: &[PathBuf]) -> Vec<(usize, BridgeResult<bool>)> {
        let changed: Vec<PathBuf> =
            changed.iter().map(|path| fs::canonicalize(path).unwrap_or_else(|_| path.clone())).collect();
        let mut reports = Vec::new();
        for index in 0..self.class_count() {
            let Ok(definition) = self.class(index) else {
                continue;
            };
            let Some(resolved) = self.inner.loader.resolve(definition.source_path()) else {
                continue;
            };
            if !changed.contains(&resolved) {
                continue;
            }
            let outcome = self.reload_if_modified(index, &definition);
            if let Err(err) = &outcome {
                warn!(target: "script", index, "hot reload failed: {err}");
                self.inner.exceptions.handle_bridge_error(err);
            }
            reports.push((index, outcome));
        }
        reports
    }

    fn reload_if_modified(&self, index: usize, current: &ClassDefinition) -> BridgeResult<bool> {
        let source = self.inner.loader.load(current.source_path())?;
        if blake3::hash(source.as_bytes()) == current.digest() {
            return Ok(false);
        }
        let compiler = ScriptCompiler::new(&self.inner.engine, self.inner.loader.as_ref());
        let builder = |path: &str, name: &str| compiler.compile_source(path, name, &source);
        self.inner.registry.reload_one(index, &builder)?;
        Ok(true)
    }

    /// Instance for `handle`, created from class `class` on first use.
    pub fn materialize(&self, class: usize, handle: NativeHandle) -> BridgeResult<CompositeRef> {
        let definition = self.inner.registry.definition(class)?;
        Ok(self.inner.objects.get_or_create(&definition, handle))
    }

    pub fn object(&self, handle: NativeHandle) -> Option<CompositeRef> {
        self.inner.objects.get(handle)
    }

    /// Forgets the instance for `handle`; a later dispatch copies a fresh one.
    pub fn release_object(&self, handle: NativeHandle) -> bool {
        self.inner.objects.release(handle)
    }

    pub fn object_count(&self) -> usize {
        self.inner.objects.len()
    }

    pub fn context(&self) -> CallContext {
        self.inner.context.current()
    }

    pub fn is_active(&self, key: &GuardKey) -> bool {
        self.inner.guards.contains(key)
    }

    pub fn active_guard_count(&self) -> usize {
        self.inner.guards.len()
    }

    pub fn report(&self, diagnostic: &Diagnostic) {
        self.inner.exceptions.report(diagnostic);
    }

    /// Sends a one-line summary of a class template to the diagnostics sink.
    pub fn dump_class(&self, index: usize) -> BridgeResult<()> {
        let definition = self.class(index)?;
        let text = format!(
            "{} [{}] fields: {}",
            definition.identity(),
            definition.digest().to_hex(),
            definition.template().keys().join(", ")
        );
        self.inner.exceptions.dump(&text);
        Ok(())
    }

    /// Drops every object instance and class definition.
    pub fn shutdown(&self) {
        self.inner.objects.clear();
        self.inner.registry.clear();
        info!(target: "script", "script runtime shut down");
    }
}
