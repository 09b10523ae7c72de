use kestrel_bridge::{BridgeConfig, BridgeError, MemoryLoader, NativeHandle, ScriptRuntime, Value};

fn runtime() -> ScriptRuntime {
    let loader = MemoryLoader::new().with_script("grunt.rhai", "#{ hp: 10, stats: #{ armor: 2 } }");
    let runtime = ScriptRuntime::builder(BridgeConfig::default()).loader(loader).build();
    runtime.register_class("grunt.rhai", "Grunt").expect("grunt should compile");
    runtime
}

#[test]
fn same_handle_yields_the_same_instance() {
    let runtime = runtime();
    let handle = NativeHandle::from_raw(0x40);
    let first = runtime.materialize(0, handle).expect("materialize");
    let second = runtime.materialize(0, handle).expect("materialize again");
    assert!(first.ptr_eq(&second));
    assert_eq!(runtime.object_count(), 1);
    assert!(runtime.object(handle).expect("stored instance").ptr_eq(&first));
}

#[test]
fn distinct_handles_get_independent_copies() {
    let runtime = runtime();
    let a = runtime.materialize(0, NativeHandle::from_raw(0x40)).expect("a");
    let b = runtime.materialize(0, NativeHandle::from_raw(0x41)).expect("b");
    assert!(!a.ptr_eq(&b));

    let stats = a.get("stats");
    stats.as_composite().expect("nested stats").set("armor", Value::Number(9.0));
    let b_stats = b.get("stats");
    assert_eq!(b_stats.as_composite().expect("nested stats").get("armor"), Value::Number(2.0));
    let template = runtime.class(0).expect("class").template().clone();
    let template_stats = template.get("stats");
    assert_eq!(template_stats.as_composite().expect("nested stats").get("armor"), Value::Number(2.0));
}

#[test]
fn generations_keep_reused_addresses_apart() {
    let runtime = runtime();
    let old = NativeHandle::from_raw(0x40);
    let reused = old.with_generation(1);
    let a = runtime.materialize(0, old).expect("old");
    let b = runtime.materialize(0, reused).expect("reused");
    assert!(!a.ptr_eq(&b));
}

#[test]
fn instances_are_tagged_with_class_and_handle() {
    let runtime = runtime();
    let handle = NativeHandle::from_raw(0x40);
    let instance = runtime.materialize(0, handle).expect("materialize");
    let tag = instance.tag().expect("instance should be tagged");
    assert_eq!(tag.type_identity, "Grunt:grunt.rhai");
    assert_eq!(tag.handle, handle);
    assert_eq!(tag.debug_name, "object@0x40#0");
    assert!(runtime.class(0).expect("class").template().tag().is_none());
}

#[test]
fn released_instances_are_recreated_from_the_template() {
    let runtime = runtime();
    let handle = NativeHandle::from_raw(0x40);
    let first = runtime.materialize(0, handle).expect("materialize");
    first.set("hp", Value::Number(1.0));
    assert!(runtime.release_object(handle));
    assert!(!runtime.release_object(handle));
    assert!(runtime.object(handle).is_none());

    let second = runtime.materialize(0, handle).expect("materialize again");
    assert!(!first.ptr_eq(&second));
    assert_eq!(second.get("hp"), Value::Number(10.0));
}

#[test]
fn unknown_class_is_an_index_error() {
    let runtime = runtime();
    let err = runtime.materialize(3, NativeHandle::from_raw(0x40)).unwrap_err();
    assert!(matches!(err, BridgeError::Index { index: 3, count: 1 }));
    assert_eq!(runtime.object_count(), 0);
}
