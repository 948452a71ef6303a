//! Reference resolution across the corpus.
//!
//! [`DocumentStore`] serves every schema the corpus knows by URI, and is the
//! retriever handed to compiled validators. [`Resolver`] follows `$ref`s by
//! hand against a stack of base URIs, for walks that need to see the schema
//! text itself (hints, combinator branches, ABI comparison).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use url::Url;

use crate::error::ResolveError;
use crate::loader::navigate_fragment;
use crate::metaschema;

fn strip_empty_fragment(uri: &str) -> &str {
    uri.strip_suffix('#').unwrap_or(uri)
}

/// The form of a document handed to the validation engine.
///
/// Devicetree documents name a devicetree meta-schema in `$schema`, which
/// the engine cannot use for draft detection. They also end `$id` and
/// whole-document `$ref`s with an empty `#`, which the engine rejects as a
/// base URI.
pub(crate) fn engine_view(document: &Value) -> Value {
    let mut view = document.clone();
    if let Value::Object(map) = &mut view {
        map.remove("$schema");
    }
    strip_empty_fragments(&mut view);
    view
}

fn strip_empty_fragments(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                match child {
                    Value::String(uri) if key == "$id" || key == "$ref" => {
                        // A bare `#` is a same-document reference and stays.
                        if uri.len() > 1 {
                            *uri = strip_empty_fragment(uri).to_string();
                        }
                    }
                    _ => strip_empty_fragments(child),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_empty_fragments),
        _ => {}
    }
}

/// Schema documents addressable by URI.
///
/// Cheap to clone. Lookups accept URIs with or without a trailing `#`, and
/// the embedded meta-schemas are always present.
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    documents: Arc<BTreeMap<String, Value>>,
}

impl DocumentStore {
    /// Build a store from documents keyed by their `$id`.
    pub fn new<'a>(documents: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        let documents = documents
            .into_iter()
            .map(|(id, doc)| (strip_empty_fragment(id).to_string(), engine_view(&doc)))
            .collect();
        Self {
            documents: Arc::new(documents),
        }
    }

    /// Look a document up without touching the network.
    pub fn get(&self, uri: &str) -> Option<&Value> {
        let key = strip_empty_fragment(uri);
        self.documents
            .get(key)
            .or_else(|| metaschema::embedded(key))
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.get(uri).is_some()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Look a document up, falling back to HTTP for URIs outside the store.
    pub fn fetch(&self, uri: &str) -> Result<Value, ResolveError> {
        if let Some(doc) = self.get(uri) {
            return Ok(doc.clone());
        }
        self.fetch_remote(strip_empty_fragment(uri))
    }

    #[cfg(feature = "remote")]
    fn fetch_remote(&self, uri: &str) -> Result<Value, ResolveError> {
        if !crate::loader::is_url(uri) || uri.starts_with(crate::types::SCHEMA_BASE_URL) {
            return Err(ResolveError::Unresolvable {
                uri: uri.to_string(),
            });
        }
        tracing::debug!(uri, "fetching remote schema");
        Ok(engine_view(&crate::loader::load_url(uri)?))
    }

    #[cfg(not(feature = "remote"))]
    fn fetch_remote(&self, uri: &str) -> Result<Value, ResolveError> {
        Err(ResolveError::Unresolvable {
            uri: uri.to_string(),
        })
    }
}

impl jsonschema::Retrieve for DocumentStore {
    fn retrieve(
        &self,
        uri: &jsonschema::Uri<&str>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        self.fetch(uri.as_str()).map_err(Into::into)
    }
}

/// Follows `$ref`s against a stack of resolution scopes.
///
/// Entering a referenced document pushes its URI with [`Resolver::push_scope`];
/// the returned guard pops it again, so the stack is balanced on every exit
/// path of a walk.
#[derive(Debug)]
pub struct Resolver<'s> {
    store: &'s DocumentStore,
    scopes: RefCell<Vec<Url>>,
}

/// Pops a resolution scope when dropped.
#[must_use = "the scope is popped as soon as the guard is dropped"]
pub struct ScopeGuard<'r, 's> {
    resolver: &'r Resolver<'s>,
}

impl Drop for ScopeGuard<'_, '_> {
    fn drop(&mut self) {
        self.resolver.scopes.borrow_mut().pop();
    }
}

impl<'s> Resolver<'s> {
    pub fn new(store: &'s DocumentStore, base: &str) -> Result<Self, ResolveError> {
        let base = parse_uri(base)?;
        Ok(Self {
            store,
            scopes: RefCell::new(vec![base]),
        })
    }

    pub fn store(&self) -> &'s DocumentStore {
        self.store
    }

    /// The innermost base URI.
    pub fn resolution_scope(&self) -> Url {
        let scopes = self.scopes.borrow();
        // The base scope pushed by `new` is never popped.
        scopes[scopes.len() - 1].clone()
    }

    pub fn depth(&self) -> usize {
        self.scopes.borrow().len()
    }

    pub fn push_scope(&self, scope: Url) -> ScopeGuard<'_, 's> {
        self.scopes.borrow_mut().push(scope);
        ScopeGuard { resolver: self }
    }

    /// Join `reference` against the current scope.
    pub fn join(&self, reference: &str) -> Result<Url, ResolveError> {
        self.resolution_scope()
            .join(reference)
            .map_err(|e| ResolveError::InvalidReference {
                reference: reference.to_string(),
                message: e.to_string(),
            })
    }

    /// Split `reference` into the document URI it points into and the JSON
    /// pointer within that document.
    pub fn locate(&self, reference: &str) -> Result<(Url, String), ResolveError> {
        let url = self.join(reference)?;
        let pointer = url.fragment().map(percent_decode).unwrap_or_default();
        let mut document_url = url;
        document_url.set_fragment(None);
        Ok((document_url, pointer))
    }

    /// Resolve `reference` to the document URI it lives in and its target value.
    pub fn resolve(&self, reference: &str) -> Result<(Url, Value), ResolveError> {
        let (document_url, pointer) = self.locate(reference)?;
        let document = self.store.fetch(document_url.as_str())?;
        let target = navigate_fragment(&document, &pointer)?.clone();
        Ok((document_url, target))
    }
}

fn parse_uri(uri: &str) -> Result<Url, ResolveError> {
    Url::parse(uri).map_err(|e| ResolveError::InvalidReference {
        reference: uri.to_string(),
        message: e.to_string(),
    })
}

/// Characters a JSON pointer may keep unescaped inside a URI fragment.
const FRAGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@');

/// Percent-encode a JSON pointer for use as a URI fragment.
pub(crate) fn encode_fragment(pointer: &str) -> String {
    utf8_percent_encode(pointer, FRAGMENT).to_string()
}

/// Decode `%XX` escapes the URL parser adds to fragments.
pub(crate) fn percent_decode(fragment: &str) -> String {
    percent_decode_str(fragment).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> DocumentStore {
        DocumentStore::new([
            (
                "http://devicetree.org/schemas/types.yaml#",
                json!({
                    "$id": "http://devicetree.org/schemas/types.yaml#",
                    "$schema": "http://devicetree.org/meta-schemas/base.yaml#",
                    "definitions": { "uint32": { "typeSize": 32 } }
                }),
            ),
            (
                "http://devicetree.org/schemas/serial/uart.yaml#",
                json!({
                    "$id": "http://devicetree.org/schemas/serial/uart.yaml#",
                    "properties": { "clock": { "$ref": "../types.yaml#/definitions/uint32" } }
                }),
            ),
        ])
    }

    #[test]
    fn lookups_ignore_empty_fragment() {
        let store = store();
        assert!(store.contains("http://devicetree.org/schemas/types.yaml"));
        assert!(store.contains("http://devicetree.org/schemas/types.yaml#"));
        assert!(store.contains("http://devicetree.org/meta-schemas/core.yaml#"));
    }

    #[test]
    fn engine_view_drops_dialect() {
        let store = store();
        let doc = store.get("http://devicetree.org/schemas/types.yaml").unwrap();
        assert!(doc.get("$schema").is_none());
        assert_eq!(doc["$id"], "http://devicetree.org/schemas/types.yaml");
    }

    #[test]
    fn engine_view_strips_empty_fragments_throughout() {
        let view = engine_view(&json!({
            "$id": "http://devicetree.org/meta-schemas/core.yaml#",
            "allOf": [{ "$ref": "keywords.yaml#" }],
            "properties": {
                "a": { "$ref": "/schemas/types.yaml#/definitions/uint32" },
                "b": { "items": { "$ref": "#" } },
                "$ref": { "const": "keywords.yaml#" }
            }
        }));
        assert_eq!(view["$id"], "http://devicetree.org/meta-schemas/core.yaml");
        assert_eq!(view["allOf"][0]["$ref"], "keywords.yaml");
        assert_eq!(view["properties"]["a"]["$ref"], "/schemas/types.yaml#/definitions/uint32");
        assert_eq!(view["properties"]["b"]["items"]["$ref"], "#");
        assert_eq!(view["properties"]["$ref"]["const"], "keywords.yaml#");
    }

    #[test]
    fn embedded_meta_schemas_have_no_fragment_bases() {
        let core = store().get(crate::metaschema::CORE_META_SCHEMA_ID).unwrap().clone();
        assert!(!core.to_string().contains("keywords.yaml#\""));
    }

    #[test]
    fn resolve_relative_reference() {
        let store = store();
        let resolver = Resolver::new(&store, "http://devicetree.org/schemas/serial/uart.yaml#").unwrap();
        let (doc, target) = resolver.resolve("../types.yaml#/definitions/uint32").unwrap();
        assert_eq!(doc.as_str(), "http://devicetree.org/schemas/types.yaml");
        assert_eq!(target, json!({ "typeSize": 32 }));

        let (_, absolute) = resolver.resolve("/schemas/types.yaml#/definitions/uint32").unwrap();
        assert_eq!(absolute, target);
    }

    #[test]
    fn scopes_are_balanced() {
        let store = store();
        let resolver = Resolver::new(&store, "http://devicetree.org/schemas/serial/uart.yaml#").unwrap();
        assert_eq!(resolver.depth(), 1);
        {
            let (doc, _) = resolver.resolve("../types.yaml#").unwrap();
            let _guard = resolver.push_scope(doc);
            assert_eq!(resolver.depth(), 2);
            let (_, local) = resolver.resolve("#/definitions/uint32").unwrap();
            assert_eq!(local["typeSize"], 32);
        }
        assert_eq!(resolver.depth(), 1);
        assert_eq!(
            resolver.resolution_scope().as_str(),
            "http://devicetree.org/schemas/serial/uart.yaml#"
        );
    }

    #[test]
    fn unknown_corpus_uri_is_unresolvable() {
        let store = store();
        let resolver = Resolver::new(&store, "http://devicetree.org/schemas/serial/uart.yaml#").unwrap();
        let err = resolver.resolve("/schemas/missing.yaml#").unwrap_err();
        assert!(matches!(err, ResolveError::Unresolvable { .. }));
        assert!(resolver.resolve("#/nowhere").is_err());
    }

    #[test]
    fn fragments_round_trip_through_encoding() {
        let pointer = "/patternProperties/^serial@[0-9a-f]+$/oneOf";
        let encoded = encode_fragment(pointer);
        assert!(!encoded.contains('^'));
        assert!(!encoded.contains('['));
        assert_eq!(percent_decode(&encoded), pointer);
    }

    #[test]
    fn percent_escapes_are_decoded() {
        assert_eq!(percent_decode("/properties/a%20b"), "/properties/a b");
        assert_eq!(percent_decode("/plain"), "/plain");
        assert_eq!(percent_decode("50%"), "50%");
    }
}
