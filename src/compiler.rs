use std::rc::Rc;

use rhai::{Array, Dynamic, Engine, FnPtr, ImmutableString, Map, AST, FLOAT, INT};
use tracing::warn;

use crate::error::{BridgeError, BridgeResult};
use crate::loader::ScriptLoader;
use crate::registry::{class_identity, ClassDefinition, DefinitionBuilder};
use crate::value::{Callable, CompositeRef, NativeHandle, ScriptFunction, Value};

/// Largest magnitude at which every integer is exactly representable as an `f64`.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Compiles class scripts into definitions.
///
/// A class script is evaluated once; if it evaluates to an object map the map becomes the class
/// template, and every function the script defines is added to the template as a callable field
/// (unless the map already holds a field of that name).
pub struct ScriptCompiler<'a> {
    engine: &'a Engine,
    loader: &'a dyn ScriptLoader,
}

impl<'a> ScriptCompiler<'a> {
    pub fn new(engine: &'a Engine, loader: &'a dyn ScriptLoader) -> Self {
        Self { engine, loader }
    }

    pub fn compile_source(&self, path: &str, name: &str, source: &str) -> BridgeResult<ClassDefinition> {
        let identity = class_identity(name, path);
        let compile_error = |message: String| BridgeError::Compile { identity: identity.clone(), message };

        let mut ast = self.engine.compile(source).map_err(|err| compile_error(err.to_string()))?;
        ast.set_source(path);
        let ast = Rc::new(ast);
        let evaluated = self.engine.eval_ast::<Dynamic>(&ast).map_err(|err| compile_error(err.to_string()))?;

        let template = match from_dynamic(evaluated, Some(&ast)) {
            Value::Composite(template) => template,
            Value::Nil => CompositeRef::new(),
            other => {
                return Err(compile_error(format!(
                    "class script must evaluate to an object map, got {}",
                    other.type_name()
                )))
            }
        };
        for function in ast.iter_functions() {
            let function_name = function.name.to_string();
            if template.contains(&function_name) {
                continue;
            }
            let callable = ScriptFunction::new(&function_name, function.params.len(), ast.clone());
            template.set(function_name, Value::Callable(Callable::Script(callable)));
        }
        Ok(ClassDefinition::new(name, path, template, source))
    }
}

impl DefinitionBuilder for ScriptCompiler<'_> {
    fn build(&self, path: &str, name: &str) -> BridgeResult<ClassDefinition> {
        let source = self.loader.load(path)?;
        self.compile_source(path, name, &source)
    }
}

pub fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Nil => Dynamic::UNIT,
        Value::Bool(flag) => Dynamic::from_bool(*flag),
        Value::Number(number) => number_to_dynamic(*number),
        Value::String(text) => Dynamic::from(ImmutableString::from(text.as_str())),
        Value::Callable(callable) => Dynamic::from(callable.clone()),
        Value::Composite(composite) => Dynamic::from(composite.clone()),
        Value::Handle(handle) => Dynamic::from(*handle),
    }
}

// Integral numbers cross as INT so script arithmetic and comparisons behave naturally.
fn number_to_dynamic(number: f64) -> Dynamic {
    if number.fract() == 0.0 && number.abs() <= MAX_EXACT_INT {
        Dynamic::from_int(number as INT)
    } else {
        Dynamic::from_float(number as FLOAT)
    }
}

/// Converts a script value into the bridge model. `ast` resolves function pointers to callables.
pub fn from_dynamic(value: Dynamic, ast: Option<&Rc<AST>>) -> Value {
    let value = value.flatten();
    if value.is_unit() {
        return Value::Nil;
    }
    if let Ok(flag) = value.as_bool() {
        return Value::Bool(flag);
    }
    if let Ok(number) = value.as_int() {
        return Value::Number(number as f64);
    }
    if let Ok(number) = value.as_float() {
        return Value::Number(number as f64);
    }
    if let Ok(ch) = value.as_char() {
        return Value::String(ch.to_string());
    }
    if value.is_string() {
        return match value.into_immutable_string() {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::Nil,
        };
    }
    if value.is::<CompositeRef>() {
        return Value::Composite(value.cast::<CompositeRef>());
    }
    if value.is::<Callable>() {
        return Value::Callable(value.cast::<Callable>());
    }
    if value.is::<NativeHandle>() {
        return Value::Handle(value.cast::<NativeHandle>());
    }
    if value.is_map() {
        let composite = CompositeRef::new();
        for (key, field) in value.cast::<Map>() {
            composite.set(key.to_string(), from_dynamic(field, ast));
        }
        return Value::Composite(composite);
    }
    if value.is_array() {
        let composite = CompositeRef::new();
        for (index, item) in value.cast::<Array>().into_iter().enumerate() {
            composite.set(index.to_string(), from_dynamic(item, ast));
        }
        return Value::Composite(composite);
    }
    if value.is::<FnPtr>() {
        let pointer = value.cast::<FnPtr>();
        return match ast {
            Some(ast) if pointer.curry().is_empty() => {
                let arity = ast
                    .iter_functions()
                    .find(|function| &*function.name == pointer.fn_name())
                    .map(|function| function.params.len())
                    .unwrap_or(0);
                Value::Callable(Callable::Script(ScriptFunction::new(pointer.fn_name(), arity, ast.clone())))
            }
            _ => {
                warn!(target: "script", "function pointer '{}' cannot cross the bridge", pointer.fn_name());
                Value::Nil
            }
        };
    }
    warn!(target: "script", "unsupported script value of type '{}' dropped", value.type_name());
    Value::Nil
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;

    #[test]
    fn map_fields_and_functions_form_the_template() {
        let engine = Engine::new();
        let loader = MemoryLoader::new().with_script(
            "grunt.rhai",
            r#"
                fn OnPing() { 42 }
                #{ hp: 10, name: "grunt", stats: #{ armor: 2.5 } }
            "#,
        );
        let compiler = ScriptCompiler::new(&engine, &loader);
        let definition = compiler.build("grunt.rhai", "Grunt").expect("class should compile");

        let template = definition.template();
        assert_eq!(definition.identity(), "Grunt:grunt.rhai");
        assert_eq!(template.get("hp"), Value::Number(10.0));
        assert_eq!(template.get("name"), Value::from("grunt"));
        let stats = template.get("stats");
        assert_eq!(stats.as_composite().expect("nested map").get("armor"), Value::Number(2.5));
        assert!(template.callable("OnPing").is_some());
    }

    #[test]
    fn malformed_script_is_a_compile_error() {
        let engine = Engine::new();
        let loader = MemoryLoader::new().with_script("broken.rhai", "fn OnPing( { 42 }");
        let err = ScriptCompiler::new(&engine, &loader).build("broken.rhai", "Broken").unwrap_err();
        assert!(matches!(err, BridgeError::Compile { ref identity, .. } if identity == "Broken:broken.rhai"));
    }

    #[test]
    fn scalar_result_is_rejected() {
        let engine = Engine::new();
        let loader = MemoryLoader::new().with_script("scalar.rhai", "40 + 2");
        let err = ScriptCompiler::new(&engine, &loader).build("scalar.rhai", "Scalar").unwrap_err();
        assert!(err.to_string().contains("must evaluate to an object map"));
    }

    #[test]
    fn integral_numbers_cross_as_integers() {
        assert!(to_dynamic(&Value::Number(3.0)).is_int());
        assert!(to_dynamic(&Value::Number(3.5)).is_float());
        assert_eq!(from_dynamic(Dynamic::from_int(42), None), Value::Number(42.0));
    }
}
