pub mod app;
pub mod bridge;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod copier;
pub mod diagnostics;
pub mod error;
pub mod loader;
pub mod materializer;
pub mod natives;
pub mod registry;
pub mod runtime;
pub mod value;
pub mod watch;

pub use app::run;
pub use bridge::{CallContext, DispatchOutcome, DispatchTarget, GuardKey, ThrownErrorPolicy};
pub use config::BridgeConfig;
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticsSink, TracingSink};
pub use error::{ArgumentTypeError, BridgeError, BridgeResult};
pub use loader::{FsLoader, MemoryLoader, ScriptLoader};
pub use registry::{ClassDefinition, DuplicatePolicy};
pub use runtime::{RuntimeBuilder, ScriptRuntime};
pub use value::{Callable, CompositeRef, NativeHandle, Value};
