//! Bundling external references into one self-contained document.
//!
//! External documents are loaded through [`ResolverPlugin`]s, hoisted under
//! `x-ext/<key>` (a short SHA-256 prefix of the source), and every reference
//! to them is rewritten to a local pointer. References that cannot be
//! resolved are left as they are and reported in the [`BundleReport`].

pub mod limiter;
pub mod plugins;
pub mod tree_shake;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::loader::is_local_ref;
use crate::pointer::{get_value_by_path, get_value_by_path_mut, parse_json_pointer, resolve_reference_path};
use crate::types::{ref_pointer, EXTERNAL_KEY, EXTERNAL_URLS_KEY, REF_KEY};

pub use limiter::Limiter;
#[cfg(feature = "remote")]
pub use plugins::ReqwestFetch;
pub use plugins::{Fetch, FetchUrls, HeaderRule, ReadFiles, ResolverPlugin};
pub use tree_shake::tree_shake;

/// Length of a hoisting key before collisions lengthen it.
const KEY_LENGTH: usize = 7;

/// Callbacks around each reference the bundler processes.
///
/// The reference node is passed mutably, so hooks can annotate it.
pub trait BundleHooks: Send + Sync {
    fn on_resolve_start(&self, _node: &mut Map<String, Value>) {}
    fn on_resolve_success(&self, _node: &mut Map<String, Value>) {}
    fn on_resolve_error(&self, _node: &mut Map<String, Value>) {}
}

/// Options for [`bundle`].
#[derive(Clone, Default)]
pub struct BundleOptions {
    /// Tried in order; the first that validates a source loads it.
    pub plugins: Vec<Arc<dyn ResolverPlugin>>,
    /// Drop hoisted definitions nothing references.
    pub tree_shake: bool,
    /// Emit `x-ext-urls` (hoisting key → source).
    pub url_map: bool,
    /// Maximum concurrent loads. `None` is unlimited.
    pub limit: Option<usize>,
    /// Leave references deeper than this many path segments untouched.
    pub depth: Option<usize>,
    /// Base for relative references in the root document.
    pub origin: Option<String>,
    pub hooks: Option<Arc<dyn BundleHooks>>,
}

impl BundleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, plugin: impl ResolverPlugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn with_tree_shake(mut self, tree_shake: bool) -> Self {
        self.tree_shake = tree_shake;
        self
    }

    pub fn with_url_map(mut self, url_map: bool) -> Self {
        self.url_map = url_map;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_hooks(mut self, hooks: impl BundleHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    fn plugin_for(&self, source: &str) -> Option<&Arc<dyn ResolverPlugin>> {
        self.plugins.iter().find(|plugin| plugin.validate(source))
    }
}

impl fmt::Debug for BundleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleOptions")
            .field("plugins", &self.plugins.len())
            .field("tree_shake", &self.tree_shake)
            .field("url_map", &self.url_map)
            .field("limit", &self.limit)
            .field("depth", &self.depth)
            .field("origin", &self.origin)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Aggregate outcome of a bundle call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BundleReport {
    /// False when any reference could not be resolved.
    pub success: bool,
    pub errors: Vec<String>,
}

/// Bundle `document` in place.
///
/// Failures are per reference: the node stays as it was, the error hook
/// fires, and the message lands in [`BundleReport::errors`].
pub async fn bundle(document: &mut Value, options: &BundleOptions) -> BundleReport {
    let base = options.origin.clone().unwrap_or_default();
    bundle_from(document, options, &base).await
}

/// Load `source` through the plugins, then bundle it.
///
/// Relative references resolve against `source` unless `origin` is set.
///
/// # Errors
///
/// Returns `LoadError::Unsupported` if no plugin accepts `source`, or the
/// plugin's error if loading fails.
pub async fn bundle_source(
    source: &str,
    options: &BundleOptions,
) -> Result<(Value, BundleReport), LoadError> {
    let plugin = options
        .plugin_for(source)
        .ok_or_else(|| LoadError::Unsupported {
            input: source.to_string(),
        })?;
    let mut document = plugin.exec(source).await?;

    let base = options.origin.clone().unwrap_or_else(|| source.to_string());
    let report = bundle_from(&mut document, options, &base).await;
    Ok((document, report))
}

async fn bundle_from(document: &mut Value, options: &BundleOptions, base: &str) -> BundleReport {
    let mut bundler = Bundler::new(options, document);

    let root_sites = bundler.scan(document, options.depth, true);
    let sources = root_sites
        .iter()
        .filter_map(|site| split_external(&site.reference, base))
        .map(|(source, _)| source)
        .collect();
    bundler.load_all(sources).await;
    bundler.hoist(document, &root_sites, base);

    if options.tree_shake {
        tree_shake(document);
    }

    let errors = bundler.errors;
    info!(
        documents = bundler.order.len(),
        errors = errors.len(),
        "bundle finished"
    );
    BundleReport {
        success: errors.is_empty(),
        errors,
    }
}

/// A reference node found while scanning.
#[derive(Debug, Clone)]
struct RefSite {
    path: Vec<String>,
    reference: String,
}

struct Loaded {
    document: Value,
    sites: Vec<RefSite>,
}

struct Bundler<'o> {
    options: &'o BundleOptions,
    limiter: Limiter,
    loaded: HashMap<String, Loaded>,
    failed: HashMap<String, String>,
    /// Sources in discovery order.
    order: Vec<String>,
    keys: HashMap<String, String>,
    owners: HashMap<String, String>,
    errors: Vec<String>,
}

impl<'o> Bundler<'o> {
    fn new(options: &'o BundleOptions, document: &Value) -> Self {
        let mut bundler = Self {
            options,
            limiter: Limiter::new(options.limit),
            loaded: HashMap::new(),
            failed: HashMap::new(),
            order: Vec::new(),
            keys: HashMap::new(),
            owners: HashMap::new(),
            errors: Vec::new(),
        };

        // Reuse keys from an earlier bundle of the same document
        if let Some(Value::Object(urls)) = document.get(EXTERNAL_URLS_KEY) {
            for (key, source) in urls {
                if let Some(source) = source.as_str() {
                    bundler.keys.insert(source.to_string(), key.clone());
                    bundler.owners.insert(key.clone(), source.to_string());
                }
            }
        }
        bundler
    }

    /// Find every reference node and fire the start hook on it.
    fn scan(&self, document: &mut Value, depth: Option<usize>, is_root: bool) -> Vec<RefSite> {
        let mut sites = Vec::new();
        collect_sites(document, &mut Vec::new(), depth, is_root, &mut sites);

        if let Some(hooks) = &self.options.hooks {
            for site in &sites {
                if let Some(Value::Object(node)) = get_value_by_path_mut(document, &site.path) {
                    hooks.on_resolve_start(node);
                }
            }
        }
        sites
    }

    async fn load(&self, source: &str) -> Result<Value, LoadError> {
        let plugin = self
            .options
            .plugin_for(source)
            .ok_or_else(|| LoadError::Unsupported {
                input: source.to_string(),
            })?;
        self.limiter.run(plugin.exec(source)).await
    }

    /// Load `pending` and everything they reference, each source once.
    async fn load_all(&mut self, mut pending: Vec<String>) {
        loop {
            let mut batch: Vec<String> = Vec::new();
            for source in pending.drain(..) {
                let known = self.loaded.contains_key(&source) || self.failed.contains_key(&source);
                if !known && !batch.contains(&source) {
                    batch.push(source);
                }
            }
            if batch.is_empty() {
                break;
            }

            debug!(count = batch.len(), "loading external documents");
            let results =
                futures::future::join_all(batch.iter().map(|source| self.load(source))).await;

            for (source, result) in batch.into_iter().zip(results) {
                match result {
                    Ok(mut document) => {
                        let sites = self.scan(&mut document, None, false);
                        pending.extend(
                            sites
                                .iter()
                                .filter_map(|site| split_external(&site.reference, &source))
                                .map(|(next, _)| next),
                        );
                        self.order.push(source.clone());
                        self.loaded.insert(source, Loaded { document, sites });
                    }
                    Err(err) => {
                        warn!(source = %source, error = %err, "failed to load external document");
                        self.failed.insert(source, err.to_string());
                    }
                }
            }
        }
    }

    fn key_for(&mut self, source: &str) -> String {
        if let Some(key) = self.keys.get(source) {
            return key.clone();
        }

        let digest = format!("{:x}", Sha256::digest(source.as_bytes()));
        let mut length = KEY_LENGTH;
        let key = loop {
            let candidate = &digest[..length];
            match self.owners.get(candidate) {
                Some(owner) if owner != source && length < digest.len() => length += 1,
                _ => break candidate.to_string(),
            }
        };

        self.keys.insert(source.to_string(), key.clone());
        self.owners.insert(key.clone(), source.to_string());
        key
    }

    fn hoist(&mut self, root: &mut Value, root_sites: &[RefSite], base: &str) {
        let order = self.order.clone();
        let mut hoisted = Vec::with_capacity(order.len());

        for source in &order {
            let key = self.key_for(source);
            let Some(Loaded {
                mut document,
                sites,
            }) = self.loaded.remove(source)
            else {
                continue;
            };
            for site in &sites {
                self.rewrite(&mut document, site, source, Some(&key));
            }
            hoisted.push((key, source.clone(), document));
        }

        let emit_urls = self.options.url_map || self.options.depth.is_some();
        if !hoisted.is_empty() || emit_urls {
            match root {
                Value::Object(map) => {
                    if !hoisted.is_empty() {
                        let external = map
                            .entry(EXTERNAL_KEY)
                            .or_insert_with(|| Value::Object(Map::new()));
                        if let Value::Object(external) = external {
                            for (key, _, document) in &mut hoisted {
                                external.insert(key.clone(), std::mem::take(document));
                            }
                        }
                    }
                    if emit_urls {
                        let urls = map
                            .entry(EXTERNAL_URLS_KEY)
                            .or_insert_with(|| Value::Object(Map::new()));
                        if let Value::Object(urls) = urls {
                            for (key, source, _) in &hoisted {
                                urls.insert(key.clone(), Value::String(source.clone()));
                            }
                        }
                    }
                }
                _ if !hoisted.is_empty() => {
                    self.errors
                        .push("cannot hoist external documents into a non-object root".to_string());
                }
                _ => {}
            }
        }

        for site in root_sites {
            self.rewrite(root, site, base, None);
        }
    }

    /// Rewrite one reference of the document loaded from `base`.
    ///
    /// `own_key` is the hoisting key of that document; `None` for the root.
    fn rewrite(&mut self, document: &mut Value, site: &RefSite, base: &str, own_key: Option<&str>) {
        let outcome = if is_local_ref(&site.reference) {
            match own_key {
                Some(key) => Ok(prefix_local(&site.reference, key)),
                None if site.reference.starts_with("#/")
                    && get_value_by_path(document, &parse_json_pointer(&site.reference)).is_none() =>
                {
                    Err(format!("unresolved reference {}", site.reference))
                }
                None => Ok(None),
            }
        } else {
            self.external_target(&site.reference, base).map(Some)
        };

        let Some(Value::Object(node)) = get_value_by_path_mut(document, &site.path) else {
            return;
        };
        let hooks = self.options.hooks.as_ref();
        match outcome {
            Ok(rewritten) => {
                if let Some(rewritten) = rewritten {
                    node.insert(REF_KEY.to_string(), Value::String(rewritten));
                }
                if let Some(hooks) = hooks {
                    hooks.on_resolve_success(node);
                }
            }
            Err(message) => {
                warn!(reference = %site.reference, "{message}");
                if let Some(hooks) = hooks {
                    hooks.on_resolve_error(node);
                }
                self.errors.push(message);
            }
        }
    }

    fn external_target(&self, reference: &str, base: &str) -> Result<String, String> {
        let Some((source, fragment)) = split_external(reference, base) else {
            return Err(format!("cannot resolve {reference}"));
        };

        if let Some(key) = self.keys.get(&source) {
            if fragment.is_empty() || fragment.starts_with('/') {
                return Ok(format!("#/{EXTERNAL_KEY}/{key}{fragment}"));
            }
            return Err(format!("cannot bundle anchor reference {reference}"));
        }

        match self.failed.get(&source) {
            Some(message) => Err(format!("failed to resolve {reference}: {message}")),
            None => Err(format!("failed to resolve {reference}")),
        }
    }
}

/// Split an external reference into (absolute source, fragment).
fn split_external(reference: &str, base: &str) -> Option<(String, String)> {
    if is_local_ref(reference) {
        return None;
    }
    let (location, fragment) = reference.split_once('#').unwrap_or((reference, ""));
    if location.is_empty() {
        return None;
    }
    Some((resolve_reference_path(base, location), fragment.to_string()))
}

/// Re-root a local pointer of a hoisted document under its key.
fn prefix_local(reference: &str, key: &str) -> Option<String> {
    match reference {
        "#" => Some(format!("#/{EXTERNAL_KEY}/{key}")),
        _ if reference.starts_with("#/") => Some(format!("#/{EXTERNAL_KEY}/{key}{}", &reference[1..])),
        _ => None,
    }
}

fn collect_sites(
    value: &Value,
    path: &mut Vec<String>,
    depth: Option<usize>,
    is_root: bool,
    out: &mut Vec<RefSite>,
) {
    if depth.is_some_and(|depth| path.len() > depth) {
        return;
    }
    if let Some(reference) = ref_pointer(value) {
        out.push(RefSite {
            path: path.clone(),
            reference: reference.to_string(),
        });
        return;
    }

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if is_root && path.is_empty() && (key == EXTERNAL_KEY || key == EXTERNAL_URLS_KEY) {
                    continue;
                }
                path.push(key.clone());
                collect_sites(child, path, depth, is_root, out);
                path.pop();
            }
        }
        Value::Array(arr) => {
            for (i, child) in arr.iter().enumerate() {
                path.push(i.to_string());
                collect_sites(child, path, depth, is_root, out);
                path.pop();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves documents from memory for http(s) sources.
    #[derive(Default)]
    struct MemoryPlugin {
        documents: HashMap<String, Value>,
        calls: AtomicUsize,
    }

    impl MemoryPlugin {
        fn with(mut self, url: &str, document: Value) -> Self {
            self.documents.insert(url.to_string(), document);
            self
        }
    }

    #[async_trait]
    impl ResolverPlugin for Arc<MemoryPlugin> {
        fn validate(&self, source: &str) -> bool {
            source.starts_with("https://")
        }

        async fn exec(&self, source: &str) -> Result<Value, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.documents
                .get(source)
                .cloned()
                .ok_or_else(|| LoadError::FetchFailed {
                    url: source.to_string(),
                    message: "404 Not Found".to_string(),
                })
        }
    }

    fn key(source: &str) -> String {
        format!("{:x}", Sha256::digest(source.as_bytes()))[..KEY_LENGTH].to_string()
    }

    fn options(plugin: &Arc<MemoryPlugin>) -> BundleOptions {
        BundleOptions::new().with_plugin(plugin.clone())
    }

    #[tokio::test]
    async fn hoists_and_rewrites_external_refs() {
        let plugin = Arc::new(MemoryPlugin::default().with(
            "https://example.com/user.json",
            json!({ "components": { "User": { "type": "object" } } }),
        ));
        let mut doc = json!({
            "schema": { "$ref": "https://example.com/user.json#/components/User" }
        });

        let report = bundle(&mut doc, &options(&plugin)).await;

        let k = key("https://example.com/user.json");
        assert!(report.success);
        assert_eq!(doc["schema"]["$ref"], format!("#/x-ext/{k}/components/User"));
        assert_eq!(doc["x-ext"][&k]["components"]["User"]["type"], "object");
        assert!(doc.get("x-ext-urls").is_none());
    }

    #[tokio::test]
    async fn each_source_loads_once() {
        let plugin = Arc::new(
            MemoryPlugin::default().with("https://example.com/a.json", json!({ "a": 1, "b": 2 })),
        );
        let mut doc = json!({
            "x": { "$ref": "https://example.com/a.json#/a" },
            "y": { "$ref": "https://example.com/a.json#/b" },
            "z": [{ "$ref": "https://example.com/a.json" }]
        });

        let report = bundle(&mut doc, &options(&plugin)).await;

        assert!(report.success);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
        assert_eq!(doc["x-ext"].as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn nested_documents_resolve_relative_to_their_url() {
        let plugin = Arc::new(
            MemoryPlugin::default()
                .with(
                    "https://example.com/api/root.json",
                    json!({
                        "user": { "$ref": "../schemas/user.json" },
                        "self": { "$ref": "#/user" }
                    }),
                )
                .with("https://example.com/schemas/user.json", json!({ "type": "object" })),
        );
        let mut doc = json!({ "a": { "$ref": "https://example.com/api/root.json" } });

        let report = bundle(&mut doc, &options(&plugin)).await;

        let root_key = key("https://example.com/api/root.json");
        let user_key = key("https://example.com/schemas/user.json");
        assert!(report.success);
        assert_eq!(doc["a"]["$ref"], format!("#/x-ext/{root_key}"));
        assert_eq!(doc["x-ext"][&root_key]["user"]["$ref"], format!("#/x-ext/{user_key}"));
        assert_eq!(doc["x-ext"][&root_key]["self"]["$ref"], format!("#/x-ext/{root_key}/user"));
        assert_eq!(doc["x-ext"][&user_key]["type"], "object");
    }

    #[tokio::test]
    async fn failed_loads_stay_unresolved() {
        let plugin = Arc::new(
            MemoryPlugin::default().with("https://example.com/ok.json", json!({ "ok": true })),
        );
        let mut doc = json!({
            "good": { "$ref": "https://example.com/ok.json" },
            "bad": { "$ref": "https://example.com/missing.json" }
        });

        let report = bundle(&mut doc, &options(&plugin)).await;

        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("https://example.com/missing.json"));
        assert_eq!(doc["bad"]["$ref"], "https://example.com/missing.json");
        assert!(doc["good"]["$ref"].as_str().unwrap().starts_with("#/x-ext/"));
    }

    #[tokio::test]
    async fn sources_without_plugin_are_errors() {
        let plugin = Arc::new(MemoryPlugin::default());
        let mut doc = json!({ "a": { "$ref": "ftp://example.com/a.json" } });

        let report = bundle(&mut doc, &options(&plugin)).await;

        assert!(!report.success);
        assert!(report.errors[0].contains("no loader accepts"));
    }

    #[tokio::test]
    async fn url_map_lists_sources() {
        let plugin = Arc::new(MemoryPlugin::default().with("https://example.com/a.json", json!({})));
        let mut doc = json!({ "a": { "$ref": "https://example.com/a.json" } });

        bundle(&mut doc, &options(&plugin).with_url_map(true)).await;

        let k = key("https://example.com/a.json");
        assert_eq!(doc["x-ext-urls"], json!({ k: "https://example.com/a.json" }));
    }

    #[tokio::test]
    async fn depth_limits_processed_refs() {
        let plugin = Arc::new(
            MemoryPlugin::default()
                .with("https://example.com/a.json", json!({}))
                .with("https://example.com/b.json", json!({})),
        );
        let mut doc = json!({
            "a": { "$ref": "https://example.com/a.json" },
            "deep": { "b": { "$ref": "https://example.com/b.json" } }
        });

        let report = bundle(&mut doc, &options(&plugin).with_depth(1)).await;

        assert!(report.success);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 1);
        assert_eq!(doc["deep"]["b"]["$ref"], "https://example.com/b.json");
        assert!(doc.get("x-ext-urls").is_some());
    }

    #[tokio::test]
    async fn origin_resolves_relative_root_refs() {
        let plugin = Arc::new(
            MemoryPlugin::default().with("https://example.com/schemas/a.json", json!({ "t": 1 })),
        );
        let mut doc = json!({ "a": { "$ref": "./schemas/a.json" } });

        let report = bundle(
            &mut doc,
            &options(&plugin).with_origin("https://example.com/openapi.json"),
        )
        .await;

        assert!(report.success);
        let k = key("https://example.com/schemas/a.json");
        assert_eq!(doc["a"]["$ref"], format!("#/x-ext/{k}"));
    }

    #[tokio::test]
    async fn remote_cycles_terminate() {
        let plugin = Arc::new(
            MemoryPlugin::default()
                .with("https://example.com/a.json", json!({ "b": { "$ref": "https://example.com/b.json" } }))
                .with("https://example.com/b.json", json!({ "a": { "$ref": "https://example.com/a.json" } })),
        );
        let mut doc = json!({ "root": { "$ref": "https://example.com/a.json" } });

        let report = bundle(&mut doc, &options(&plugin)).await;

        assert!(report.success);
        assert_eq!(plugin.calls.load(Ordering::SeqCst), 2);
        let a = key("https://example.com/a.json");
        let b = key("https://example.com/b.json");
        assert_eq!(doc["x-ext"][&b]["a"]["$ref"], format!("#/x-ext/{a}"));
    }

    #[tokio::test]
    async fn local_dangling_refs_are_reported() {
        let mut doc = json!({ "a": { "$ref": "#/does/not/exist" }, "b": { "$ref": "#/a" } });

        let report = bundle(&mut doc, &BundleOptions::new()).await;

        assert!(!report.success);
        assert_eq!(report.errors, vec!["unresolved reference #/does/not/exist"]);
        assert_eq!(doc["a"]["$ref"], "#/does/not/exist");
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl BundleHooks for Arc<Recording> {
        fn on_resolve_start(&self, node: &mut Map<String, Value>) {
            node.insert("$status".into(), json!("loading"));
            self.events.lock().unwrap().push("start".into());
        }

        fn on_resolve_success(&self, node: &mut Map<String, Value>) {
            node.shift_remove("$status");
            self.events.lock().unwrap().push("success".into());
        }

        fn on_resolve_error(&self, node: &mut Map<String, Value>) {
            node.insert("$status".into(), json!("error"));
            self.events.lock().unwrap().push("error".into());
        }
    }

    #[tokio::test]
    async fn hooks_see_every_reference() {
        let plugin = Arc::new(MemoryPlugin::default().with("https://example.com/a.json", json!({})));
        let recording = Arc::new(Recording::default());
        let mut doc = json!({
            "ok": { "$ref": "https://example.com/a.json" },
            "bad": { "$ref": "https://example.com/missing.json" }
        });

        bundle(&mut doc, &options(&plugin).with_hooks(recording.clone())).await;

        assert_eq!(
            *recording.events.lock().unwrap(),
            vec!["start", "start", "success", "error"]
        );
        assert!(doc["ok"].get("$status").is_none());
        assert_eq!(doc["bad"]["$status"], "error");
    }

    #[tokio::test]
    async fn tree_shake_after_bundling() {
        let plugin = Arc::new(MemoryPlugin::default().with(
            "https://example.com/defs.json",
            json!({ "User": { "type": "object" }, "Unused": { "type": "string" } }),
        ));
        let mut doc = json!({ "a": { "$ref": "https://example.com/defs.json#/User" } });

        bundle(&mut doc, &options(&plugin).with_tree_shake(true)).await;

        let k = key("https://example.com/defs.json");
        assert_eq!(doc["x-ext"][&k], json!({ "User": { "type": "object" } }));
    }

    #[tokio::test]
    async fn rebundling_reuses_keys() {
        let plugin = Arc::new(MemoryPlugin::default().with("https://example.com/a.json", json!({ "v": 2 })));
        let mut doc = json!({
            "a": { "$ref": "https://example.com/a.json" },
            "x-ext-urls": { "custom1": "https://example.com/a.json" }
        });

        bundle(&mut doc, &options(&plugin)).await;

        assert_eq!(doc["a"]["$ref"], "#/x-ext/custom1");
        assert_eq!(doc["x-ext"]["custom1"]["v"], 2);
    }

    #[tokio::test]
    async fn bundle_source_without_plugin() {
        let result = bundle_source("ftp://example.com/a.json", &BundleOptions::new()).await;
        assert!(matches!(result, Err(LoadError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn bundle_source_uses_source_as_base() {
        let plugin = Arc::new(
            MemoryPlugin::default()
                .with("https://example.com/api/openapi.json", json!({ "a": { "$ref": "user.json" } }))
                .with("https://example.com/api/user.json", json!({ "type": "object" })),
        );

        let (doc, report) = bundle_source("https://example.com/api/openapi.json", &options(&plugin))
            .await
            .unwrap();

        assert!(report.success);
        let k = key("https://example.com/api/user.json");
        assert_eq!(doc["a"]["$ref"], format!("#/x-ext/{k}"));
    }

    #[test]
    fn split_external_forms() {
        assert_eq!(split_external("#/a", ""), None);
        assert_eq!(
            split_external("b.json#/x", "/docs/a.json"),
            Some(("/docs/b.json".to_string(), "/x".to_string()))
        );
    }

    #[test]
    fn prefix_local_forms() {
        assert_eq!(prefix_local("#", "k"), Some("#/x-ext/k".to_string()));
        assert_eq!(prefix_local("#/a/b", "k"), Some("#/x-ext/k/a/b".to_string()));
        assert_eq!(prefix_local("#anchor", "k"), None);
    }
}
