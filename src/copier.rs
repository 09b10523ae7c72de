use std::collections::{BTreeMap, HashMap};

use crate::value::{CompositeRef, Value};

/// Structurally duplicates `source`. Shared and cyclic subgraphs are reproduced as shared and
/// cyclic subgraphs of the copy; callables and handles are referenced, not copied.
pub fn deep_copy(source: &CompositeRef) -> CompositeRef {
    let mut seen = HashMap::new();
    copy_composite(source, &mut seen)
}

fn copy_composite(source: &CompositeRef, seen: &mut HashMap<usize, CompositeRef>) -> CompositeRef {
    if let Some(existing) = seen.get(&source.id()) {
        return existing.clone();
    }
    // Register the destination before descending so back-references resolve to it.
    let destination = CompositeRef::new();
    seen.insert(source.id(), destination.clone());

    let mut fields = BTreeMap::new();
    {
        let inner = source.borrow();
        for (key, value) in inner.fields() {
            let copied = match value {
                Value::Composite(nested) => Value::Composite(copy_composite(nested, seen)),
                other => other.clone(),
            };
            fields.insert(key.clone(), copied);
        }
    }
    destination.replace_fields(fields);
    destination
}
