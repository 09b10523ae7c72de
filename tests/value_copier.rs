use kestrel_bridge::copier::deep_copy;
use kestrel_bridge::{Callable, CompositeRef, Value};

#[test]
fn copies_are_independent_of_the_source() {
    let source = CompositeRef::from_fields([("hp", Value::Number(10.0)), ("name", Value::from("grunt"))]);
    let copy = deep_copy(&source);
    assert!(!copy.ptr_eq(&source));
    copy.set("hp", Value::Number(1.0));
    copy.set("name", Value::Nil);
    assert_eq!(source.get("hp"), Value::Number(10.0));
    assert_eq!(source.get("name"), Value::from("grunt"));
    assert!(!copy.contains("name"), "assigning nil removes the field");
}

#[test]
fn cycles_are_reproduced_in_the_copy() {
    let a = CompositeRef::new();
    let b = CompositeRef::new();
    a.set("peer", Value::Composite(b.clone()));
    b.set("peer", Value::Composite(a.clone()));
    a.set("me", Value::Composite(a.clone()));

    let copy_a = deep_copy(&a);
    let copy_b = copy_a.get("peer").as_composite().expect("peer").clone();
    assert!(!copy_b.ptr_eq(&b));
    assert!(copy_b.get("peer").as_composite().expect("back edge").ptr_eq(&copy_a));
    assert!(copy_a.get("me").as_composite().expect("self edge").ptr_eq(&copy_a));

    // Break the cycles so the test does not leak.
    a.set("peer", Value::Nil);
    a.set("me", Value::Nil);
    copy_a.set("peer", Value::Nil);
    copy_a.set("me", Value::Nil);
}

#[test]
fn shared_subgraphs_stay_shared() {
    let shared = CompositeRef::from_fields([("armor", Value::Number(2.0))]);
    let source = CompositeRef::new();
    source.set("left", Value::Composite(shared.clone()));
    source.set("right", Value::Composite(shared.clone()));

    let copy = deep_copy(&source);
    let left = copy.get("left").as_composite().expect("left").clone();
    let right = copy.get("right").as_composite().expect("right").clone();
    assert!(left.ptr_eq(&right), "both fields should point at one copied node");
    assert!(!left.ptr_eq(&shared));
}

#[test]
fn callables_are_shared_not_copied() {
    let ping = Callable::native("OnPing", 0, |_runtime, _args| Ok(Value::Nil));
    let source = CompositeRef::from_fields([("OnPing", Value::Callable(ping.clone()))]);
    let copy = deep_copy(&source);
    let copied = copy.callable("OnPing").expect("callable survives the copy");
    assert!(copied.ptr_eq(&ping));
}

#[test]
fn empty_composite_copies_to_empty() {
    let copy = deep_copy(&CompositeRef::new());
    assert!(copy.is_empty());
    assert!(copy.tag().is_none());
}
