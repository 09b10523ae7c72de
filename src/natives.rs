use std::any::TypeId;
use std::rc::Weak;

use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Position, INT};
use tracing::{debug, info};

use crate::compiler::{from_dynamic, to_dynamic};
use crate::config::BridgeConfig;
use crate::diagnostics::Diagnostic;
use crate::error::BridgeError;
use crate::runtime::{RuntimeInner, ScriptRuntime};
use crate::value::{Callable, CompositeRef, NativeFunction, NativeHandle, Value};

/// Functions every class script can call.
pub fn builtin_natives() -> Vec<NativeFunction> {
    vec![
        NativeFunction::new("script_name", 0, |runtime, _args| {
            let name = runtime
                .context()
                .class_index
                .and_then(|index| runtime.class(index).ok())
                .map(|class| class.source_path().to_string())
                .unwrap_or_default();
            Ok(Value::String(name))
        }),
        NativeFunction::new("native_handle", 0, |runtime, _args| {
            Ok(runtime.context().handle.map(Value::Handle).unwrap_or(Value::Nil))
        }),
        NativeFunction::new("report_error", 1, |runtime, args| {
            let message = match args.first() {
                Some(value) => value.expect_str("report_error", 1)?,
                None => "",
            };
            let mut diagnostic = Diagnostic::new(message);
            if let Some(identity) = runtime.context().class_index.and_then(|index| runtime.class_identity(index).ok()) {
                diagnostic = diagnostic.with_frame(format!("reported by {identity}"));
            }
            runtime.report(&diagnostic);
            Ok(Value::Nil)
        }),
    ]
}

pub(crate) fn build_engine(config: &BridgeConfig, runtime: Weak<RuntimeInner>, natives: &[NativeFunction]) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_call_levels(config.limits.max_call_levels);
    if config.limits.max_operations > 0 {
        engine.set_max_operations(config.limits.max_operations);
    }

    engine
        .register_type_with_name::<CompositeRef>("Composite")
        .register_indexer_get(|composite: &mut CompositeRef, key: ImmutableString| -> Dynamic {
            to_dynamic(&composite.get(key.as_str()))
        })
        .register_indexer_set(|composite: &mut CompositeRef, key: ImmutableString, value: Dynamic| {
            composite.set(key.as_str(), from_dynamic(value, None));
        })
        // Arrays cross as composites keyed "0", "1", ...
        .register_indexer_get(|composite: &mut CompositeRef, index: INT| -> Dynamic {
            to_dynamic(&composite.get(&index.to_string()))
        })
        .register_indexer_set(|composite: &mut CompositeRef, index: INT, value: Dynamic| {
            composite.set(index.to_string(), from_dynamic(value, None));
        })
        .register_fn("contains", |composite: &mut CompositeRef, key: ImmutableString| composite.contains(key.as_str()))
        .register_fn("keys", |composite: &mut CompositeRef| -> Array {
            composite.keys().into_iter().map(|key| Dynamic::from(ImmutableString::from(key))).collect()
        })
        .register_fn("len", |composite: &mut CompositeRef| composite.len() as INT)
        .register_fn("to_string", |composite: &mut CompositeRef| format!("{composite:?}"))
        .register_fn("to_debug", |composite: &mut CompositeRef| format!("{composite:?}"));
    engine
        .register_type_with_name::<NativeHandle>("NativeHandle")
        .register_fn("to_string", |handle: &mut NativeHandle| handle.to_string())
        .register_fn("to_debug", |handle: &mut NativeHandle| handle.to_string());
    engine.register_type_with_name::<Callable>("Callable");

    engine.on_print(|text| info!(target: "script", "{text}"));
    engine.on_debug(|text, source, pos| {
        debug!(target: "script", source = source.unwrap_or_default(), position = %pos, "{text}");
    });

    for native in builtin_natives().into_iter().chain(natives.iter().cloned()) {
        register_native(&mut engine, runtime.clone(), native);
    }
    engine
}

fn register_native(engine: &mut Engine, runtime: Weak<RuntimeInner>, native: NativeFunction) {
    let arg_types = vec![TypeId::of::<Dynamic>(); native.arity()];
    let name = native.name().to_string();
    engine.register_raw_fn(name, arg_types, move |_context, args| {
        let Some(inner) = runtime.upgrade() else {
            return Err(script_error(BridgeError::Shutdown.to_string()));
        };
        let runtime = ScriptRuntime::from_inner(inner);
        let values: Vec<Value> = args.iter().map(|arg| from_dynamic((**arg).clone(), None)).collect();
        match native.call(&runtime, &values) {
            Ok(value) => Ok(to_dynamic(&value)),
            Err(err) => {
                if let BridgeError::ArgumentType(mismatch) = &err {
                    if runtime.config().debug {
                        debug!(
                            target: "script",
                            function = %mismatch.function,
                            narg = mismatch.position,
                            expected = mismatch.expected,
                            "argcheck failed"
                        );
                    }
                }
                Err(script_error(err.to_string()))
            }
        }
    });
}

fn script_error(message: String) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(message), Position::NONE).into()
}
