//! Lazy, cycle-safe `$ref` resolution over a borrowed document.
//!
//! [`MagicDocument`] borrows the document, so its resolution cache holds
//! direct references to targets and can never see a mutation. To edit the
//! document, drop the view, mutate the [`Value`], and wrap it again.
//!
//! ```
//! use json_magic::wrap;
//! use serde_json::json;
//!
//! let document = json!({
//!     "a": { "$ref": "#/b" },
//!     "b": { "title": "B" }
//! });
//! let magic = wrap(&document);
//! let a = magic.root().get("a").unwrap();
//! assert_eq!(a.get("title").unwrap().raw(), "B");
//! ```

use std::cell::{OnceCell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

use crate::pointer::{child, get_value_by_path, parse_json_pointer, set_value_at_path, to_json_pointer};
use crate::schemas::{child_context, collect_schemas, context_at, schema_id, to_local_path, SchemaIndex};
use crate::types::{ref_pointer, INTERNAL_PREFIX, REF_VALUE_KEY};

/// Options for wrapping a document.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicOptions {
    /// Expose `__scalar_` prefixed keys.
    pub show_internal: bool,
}

impl MagicOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_show_internal(mut self, show_internal: bool) -> Self {
        self.show_internal = show_internal;
        self
    }
}

/// (enclosing `$id`, pointer)
type CacheKey = (Option<String>, String);

#[derive(Clone)]
struct Target<'v> {
    value: &'v Value,
    path: Vec<String>,
    context: Option<String>,
}

/// A reference-resolving view over a document.
pub struct MagicDocument<'v> {
    root: &'v Value,
    options: MagicOptions,
    schemas: OnceCell<SchemaIndex>,
    cache: RefCell<HashMap<CacheKey, Option<Target<'v>>>>,
}

/// Wrap a document with default options.
pub fn wrap(document: &Value) -> MagicDocument<'_> {
    MagicDocument::new(document, MagicOptions::default())
}

impl<'v> MagicDocument<'v> {
    /// Wrapping does no work up front; the `$id` index and every resolution
    /// are computed on first use.
    pub fn new(root: &'v Value, options: MagicOptions) -> Self {
        Self {
            root,
            options,
            schemas: OnceCell::new(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> Node<'_, 'v> {
        Node {
            doc: self,
            value: self.root,
            path: Vec::new(),
            context: schema_id(self.root).map(str::to_string),
        }
    }

    /// The underlying document.
    pub fn raw(&self) -> &'v Value {
        self.root
    }

    /// Walk `path` from the root, resolving references at every step.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<Node<'_, 'v>> {
        path.iter()
            .try_fold(self.root(), |node, segment| node.get(segment.as_ref()))
    }

    /// Number of memoized resolutions (hits and misses).
    pub fn cached_resolutions(&self) -> usize {
        self.cache.borrow().len()
    }

    fn schemas(&self) -> &SchemaIndex {
        self.schemas.get_or_init(|| collect_schemas(self.root))
    }

    fn resolve(&self, pointer: &str, context: Option<&str>) -> Option<Target<'v>> {
        let key = (context.map(str::to_string), pointer.to_string());
        if let Some(hit) = self.cache.borrow().get(&key) {
            return hit.clone();
        }

        let target = self.lookup(pointer, context);
        if target.is_none() {
            debug!(pointer, "unresolved reference");
        }
        self.cache.borrow_mut().insert(key, target.clone());
        target
    }

    fn lookup(&self, pointer: &str, context: Option<&str>) -> Option<Target<'v>> {
        let path = if pointer.starts_with("#/") {
            parse_json_pointer(pointer)
        } else {
            to_local_path(pointer, context, self.schemas())?
        };
        let value = get_value_by_path(self.root, &path)?;
        let context = context_at(self.root, &path);
        Some(Target {
            value,
            path,
            context,
        })
    }
}

impl fmt::Debug for MagicDocument<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MagicDocument")
            .field("options", &self.options)
            .field("cached_resolutions", &self.cached_resolutions())
            .finish()
    }
}

/// A position in a wrapped document.
///
/// Child access through [`Node::get`] follows references transparently.
/// A reference chain that loops back on itself stops at the first node
/// seen twice; walking further is the caller's concern.
#[derive(Clone)]
pub struct Node<'d, 'v> {
    doc: &'d MagicDocument<'v>,
    value: &'v Value,
    path: Vec<String>,
    context: Option<String>,
}

impl<'d, 'v> Node<'d, 'v> {
    /// The un-proxied value, for identity and structural comparisons.
    pub fn raw(&self) -> &'v Value {
        self.value
    }

    /// Location of this node in the document.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn pointer(&self) -> String {
        to_json_pointer(&self.path)
    }

    pub fn is_ref(&self) -> bool {
        ref_pointer(self.value).is_some()
    }

    /// True when both nodes view the same underlying value.
    pub fn same_node(&self, other: &Node<'_, '_>) -> bool {
        std::ptr::eq(self.value, other.value)
    }

    fn hidden(&self, key: &str) -> bool {
        !self.doc.options.show_internal && key.starts_with(INTERNAL_PREFIX)
    }

    /// Child at `key` without following a reference there.
    pub fn get_unresolved(&self, key: &str) -> Option<Self> {
        if self.hidden(key) {
            return None;
        }
        let value = child(self.value, key)?;
        let mut path = self.path.clone();
        path.push(key.to_string());
        Some(Node {
            doc: self.doc,
            value,
            path,
            context: child_context(self.context.as_deref(), value),
        })
    }

    /// Child at `key`, following references.
    ///
    /// Returns `None` when the key is missing or the reference dangles.
    /// `$ref-value` on a reference node yields its direct target.
    pub fn get(&self, key: &str) -> Option<Self> {
        if key == REF_VALUE_KEY && self.is_ref() {
            return self.ref_value();
        }
        self.get_unresolved(key)?.resolve()
    }

    /// Array element at `index`, following references.
    pub fn at(&self, index: usize) -> Option<Self> {
        self.get(&index.to_string())
    }

    /// Target of this reference node, one hop.
    pub fn ref_value(&self) -> Option<Self> {
        let pointer = ref_pointer(self.value)?;
        let target = self.doc.resolve(pointer, self.context.as_deref())?;
        Some(Node {
            doc: self.doc,
            value: target.value,
            path: target.path,
            context: target.context,
        })
    }

    /// Follow a reference chain to its end.
    pub fn resolve(self) -> Option<Self> {
        let mut current = self;
        let mut seen: HashSet<*const Value> = HashSet::new();
        while current.is_ref() {
            if !seen.insert(current.value as *const Value) {
                return Some(current);
            }
            current = current.ref_value()?;
        }
        Some(current)
    }

    pub fn has(&self, key: &str) -> bool {
        if key == REF_VALUE_KEY {
            return self.is_ref();
        }
        !self.hidden(key) && child(self.value, key).is_some()
    }

    /// Visible keys; reference nodes also list `$ref-value`.
    pub fn keys(&self) -> Vec<String> {
        match self.value {
            Value::Object(map) => {
                let mut keys: Vec<String> =
                    map.keys().filter(|k| !self.hidden(k)).cloned().collect();
                if self.is_ref() && !map.contains_key(REF_VALUE_KEY) {
                    keys.push(REF_VALUE_KEY.to_string());
                }
                keys
            }
            Value::Array(arr) => (0..arr.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        match self.value {
            Value::Object(map) => map.keys().filter(|k| !self.hidden(k)).count(),
            Value::Array(arr) => arr.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for Node<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl fmt::Debug for Node<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("pointer", &self.pointer())
            .field("value", self.value)
            .finish()
    }
}

/// Write `value` to the target of the reference at `ref_path`.
///
/// Missing parents of a dangling target are created. Returns `false` when
/// `ref_path` is not a reference, the reference points outside the document,
/// or it targets the document root.
pub fn set_ref_value<S: AsRef<str>>(root: &mut Value, ref_path: &[S], value: Value) -> bool {
    let Some(pointer) = get_value_by_path(root, ref_path).and_then(ref_pointer) else {
        return false;
    };
    let pointer = pointer.to_string();

    let target = if pointer.starts_with("#/") {
        parse_json_pointer(&pointer)
    } else {
        let context = context_at(root, ref_path);
        match to_local_path(&pointer, context.as_deref(), &collect_schemas(root)) {
            Some(path) => path,
            None => return false,
        }
    };

    let Some((_, parents)) = target.split_last() else {
        warn!(pointer = %pointer, "refusing to overwrite the document root");
        return false;
    };

    if get_value_by_path(root, parents).is_none() {
        warn!(pointer = %pointer, "writing through a dangling reference, creating parents");
    }

    set_value_at_path(root, &target, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrapping_is_lazy() {
        let document = json!({ "$id": "https://example.com/root", "a": { "$ref": "#/b" }, "b": 1 });
        let magic = wrap(&document);

        assert_eq!(magic.cached_resolutions(), 0);
        assert!(magic.schemas.get().is_none());

        magic.root().get("a");
        assert_eq!(magic.cached_resolutions(), 1);
        // plain pointers never build the $id index
        assert!(magic.schemas.get().is_none());
    }

    #[test]
    fn property_access_follows_refs() {
        let document = json!({
            "a": { "$ref": "#/b" },
            "b": { "c": { "$ref": "#/d" } },
            "d": "leaf"
        });
        let magic = wrap(&document);

        let c = magic.get_path(&["a", "c"]).unwrap();
        assert_eq!(c.raw(), "leaf");
        assert_eq!(c.path(), ["d"]);
    }

    #[test]
    fn resolution_is_memoized() {
        let document = json!({ "x": { "$ref": "#/y" }, "y": {} });
        let magic = wrap(&document);
        let root = magic.root();

        let first = root.get("x").unwrap();
        let second = root.get("x").unwrap();

        assert!(first.same_node(&second));
        assert_eq!(magic.cached_resolutions(), 1);
    }

    #[test]
    fn refs_to_same_target_compare_equal() {
        let document = json!({
            "a": { "$ref": "#/t" },
            "b": { "$ref": "#/t" },
            "t": { "type": "string" }
        });
        let magic = wrap(&document);
        let root = magic.root();

        assert_eq!(root.get("a").unwrap(), root.get("b").unwrap());
    }

    #[test]
    fn dangling_ref_is_absent() {
        let document = json!({ "a": { "$ref": "#/does/not/exist" } });
        let magic = wrap(&document);
        let root = magic.root();

        assert!(root.get("a").is_none());
        let a = root.get_unresolved("a").unwrap();
        assert!(a.get(REF_VALUE_KEY).is_none());
        assert!(a.get("anything").is_none());
    }

    #[test]
    fn two_node_cycle_terminates() {
        let document = json!({ "a": { "$ref": "#/b" }, "b": { "$ref": "#/a" } });
        let magic = wrap(&document);

        let mut node = magic.root().get("a").unwrap();
        assert!(node.is_ref());
        for _ in 0..1000 {
            node = node.ref_value().unwrap();
        }
        assert_eq!(node.path(), ["a"]);
        assert_eq!(magic.cached_resolutions(), 2);
    }

    #[test]
    fn self_reference_returns_same_node() {
        let document = json!({ "a": { "$ref": "#/a" } });
        let magic = wrap(&document);
        let root = magic.root();

        let a = root.get("a").unwrap();
        assert!(a.same_node(&root.get_unresolved("a").unwrap()));
    }

    #[test]
    fn ancestor_cycle_walks_in_bounded_space() {
        let document = json!({ "a": { "b": { "$ref": "#/a" } } });
        let magic = wrap(&document);

        let mut node = magic.root().get("a").unwrap();
        for _ in 0..1000 {
            node = node.get("b").unwrap();
        }
        assert_eq!(node.path(), ["a"]);
    }

    #[test]
    fn internal_keys_hidden_by_default() {
        let document = json!({ "__scalar_meta": 1, "title": "x" });

        let magic = wrap(&document);
        assert!(!magic.root().has("__scalar_meta"));
        assert!(magic.root().get("__scalar_meta").is_none());
        assert_eq!(magic.root().keys(), vec!["title"]);

        let magic = MagicDocument::new(&document, MagicOptions::new().with_show_internal(true));
        assert!(magic.root().has("__scalar_meta"));
        assert_eq!(magic.root().len(), 2);
    }

    #[test]
    fn ref_nodes_list_virtual_key() {
        let document = json!({ "a": { "$ref": "#/b" }, "b": {} });
        let magic = wrap(&document);
        let a = magic.root().get_unresolved("a").unwrap();

        assert_eq!(a.keys(), vec!["$ref", "$ref-value"]);
        assert!(a.has("$ref-value"));
        assert!(!magic.root().has("$ref-value"));
    }

    #[test]
    fn arrays_resolve_by_index() {
        let document = json!({ "items": [{ "$ref": "#/t" }], "t": 7 });
        let magic = wrap(&document);

        let items = magic.root().get("items").unwrap();
        assert_eq!(items.at(0).unwrap().raw(), 7);
        assert!(items.at(1).is_none());
        assert_eq!(items.keys(), vec!["0"]);
    }

    #[test]
    fn resolves_ids_and_anchors() {
        let document = json!({
            "$id": "https://example.com/root",
            "user": { "$ref": "https://example.com/defs#person" },
            "profile": { "$ref": "#main" },
            "defs": {
                "$id": "https://example.com/defs",
                "person": { "$anchor": "person", "type": "object" }
            },
            "main": { "$anchor": "main", "type": "string" }
        });
        let magic = wrap(&document);
        let root = magic.root();

        assert_eq!(root.get("user").unwrap().path(), ["defs", "person"]);
        assert_eq!(root.get("profile").unwrap().path(), ["main"]);
    }

    #[test]
    fn external_refs_stay_unresolved() {
        let document = json!({ "a": { "$ref": "https://example.com/other.json" } });
        let magic = wrap(&document);
        assert!(magic.root().get("a").is_none());
    }

    #[test]
    fn set_ref_value_writes_target() {
        let mut document = json!({ "a": { "$ref": "#/b" }, "b": { "c": 1 } });
        assert!(set_ref_value(&mut document, &["a"], json!({ "c": 2 })));
        assert_eq!(document["b"], json!({ "c": 2 }));
        assert_eq!(document["a"], json!({ "$ref": "#/b" }));
    }

    #[test]
    fn set_ref_value_creates_missing_parents() {
        let mut document = json!({ "a": { "$ref": "#/x/y" } });
        assert!(set_ref_value(&mut document, &["a"], json!(true)));
        assert_eq!(document["x"], json!({ "y": true }));
    }

    #[test]
    fn set_ref_value_refuses_root() {
        let mut document = json!({ "a": { "$ref": "#" } });
        assert!(!set_ref_value(&mut document, &["a"], json!(1)));
        assert!(!set_ref_value(&mut document, &["missing"], json!(1)));
        assert_eq!(document, json!({ "a": { "$ref": "#" } }));
    }
}
