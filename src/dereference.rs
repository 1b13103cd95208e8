//! Fully inlined copies of a document.

use serde_json::{Map, Value};

use crate::magic::{MagicDocument, MagicOptions, Node};

/// Replace every resolvable local reference with a copy of its target.
///
/// A reference that would re-enter a value already being inlined stays as a
/// `$ref` node, as do dangling and external references. The pointer it keeps
/// is still valid in the output.
pub fn dereference(document: &Value) -> Value {
    let magic = MagicDocument::new(document, MagicOptions::new().with_show_internal(true));
    let mut stack = Vec::new();
    inline(magic.root(), &mut stack)
}

fn inline(node: Node<'_, '_>, stack: &mut Vec<*const Value>) -> Value {
    if node.is_ref() {
        return match node.clone().resolve() {
            Some(target) if !target.is_ref() && !stack.contains(&(target.raw() as *const Value)) => {
                inline(target, stack)
            }
            _ => node.raw().clone(),
        };
    }

    let id = node.raw() as *const Value;
    match node.raw() {
        Value::Object(map) => {
            stack.push(id);
            let mut out = Map::with_capacity(map.len());
            for key in map.keys() {
                if let Some(child) = node.get_unresolved(key) {
                    out.insert(key.clone(), inline(child, stack));
                }
            }
            stack.pop();
            Value::Object(out)
        }
        Value::Array(arr) => {
            stack.push(id);
            let out = (0..arr.len())
                .filter_map(|i| node.get_unresolved(&i.to_string()))
                .map(|child| inline(child, stack))
                .collect();
            stack.pop();
            Value::Array(out)
        }
        scalar => scalar.clone(),
    }
}
