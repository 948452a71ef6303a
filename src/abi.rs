//! Compare two corpora for changes that break existing devicetrees.
//!
//! A change is reported when a tree valid under the baseline binding could
//! fail under the new one: a property becomes required, a documented
//! property disappears, or an array needs more entries.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;
use url::Url;

use crate::corpus::CorpusIndex;
use crate::resolver::percent_decode;

const PROPERTY_KEYWORDS: [&str; 2] = ["properties", "patternProperties"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiChangeKind {
    NewRequired(Vec<String>),
    PropertyRemoved,
    NewRequiredEntry,
}

/// One ABI-relevant difference, located by binding `$id` and schema path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiChange {
    pub id: String,
    /// Slash path into the schema, e.g. `/properties/clocks`.
    pub path: String,
    pub kind: AbiChangeKind,
}

impl fmt::Display for AbiChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}: ", self.id, self.path)?;
        match &self.kind {
            AbiChangeKind::NewRequired(names) => {
                write!(f, "new required properties added: {}", names.join(", "))
            }
            AbiChangeKind::PropertyRemoved => f.write_str("existing property removed"),
            AbiChangeKind::NewRequiredEntry => f.write_str("new required entry added"),
        }
    }
}

/// Every `properties`/`patternProperties` entry of `schema`, at any depth,
/// with its path.
fn property_paths(schema: &Value) -> Vec<(Vec<String>, &Value)> {
    let mut out = Vec::new();
    collect_properties(schema, &mut Vec::new(), &mut out);
    out
}

fn collect_properties<'v>(
    schema: &'v Value,
    path: &mut Vec<String>,
    out: &mut Vec<(Vec<String>, &'v Value)>,
) {
    let Some(obj) = schema.as_object() else {
        return;
    };
    for keyword in PROPERTY_KEYWORDS {
        let Some(props) = obj.get(keyword).and_then(Value::as_object) else {
            continue;
        };
        for (name, sub) in props {
            path.push(keyword.to_string());
            path.push(name.clone());
            out.push((path.clone(), sub));
            collect_properties(sub, path, out);
            path.truncate(path.len() - 2);
        }
    }
}

fn path_string(path: &[String]) -> String {
    format!("/{}", path.join("/"))
}

fn get_path<'v>(schema: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(schema, |node, segment| node.get(segment))
}

/// Names required by `schema` directly or by its combinator branches.
fn required_names(schema: &Value) -> BTreeSet<String> {
    let names = |node: &Value| -> Vec<String> {
        node.get("required")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default()
    };
    let mut out: BTreeSet<String> = names(schema).into_iter().collect();
    for keyword in ["allOf", "oneOf", "anyOf"] {
        if let Some(branches) = schema.get(keyword).and_then(Value::as_array) {
            out.extend(branches.iter().flat_map(names));
        }
    }
    out
}

fn check_required(id: &str, base: &Value, new: &Value, out: &mut Vec<AbiChange>) {
    let mut compare = |path: Vec<String>, base: Option<&Value>, new: &Value| {
        let (Some(base), true) = (base, new.is_object()) else {
            return;
        };
        if !base.is_object() {
            return;
        }
        let added: Vec<String> = required_names(new)
            .difference(&required_names(base))
            .cloned()
            .collect();
        if !added.is_empty() {
            out.push(AbiChange {
                id: id.to_string(),
                path: path_string(&path),
                kind: AbiChangeKind::NewRequired(added),
            });
        }
    };

    compare(Vec::new(), Some(base), new);
    for (path, sub) in property_paths(new) {
        let base_sub = get_path(base, &path);
        compare(path, base_sub, sub);
    }
}

fn check_new_items(id: &str, base: &Value, new: &Value, out: &mut Vec<AbiChange>) {
    for (path, sub) in property_paths(new) {
        let Some(min) = sub.get("minItems").and_then(Value::as_u64) else {
            continue;
        };
        let base_min = get_path(base, &path)
            .and_then(|b| b.get("minItems"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if base_min > 0 && min > base_min {
            out.push(AbiChange {
                id: id.to_string(),
                path: path_string(&path),
                kind: AbiChangeKind::NewRequiredEntry,
            });
        }
    }
}

/// Follow `reference` from the document `base_id` to a schema in `corpus`.
fn follow_ref<'c>(corpus: &'c CorpusIndex, base_id: &str, reference: &str) -> Option<(String, &'c Value)> {
    let target = Url::parse(base_id).ok()?.join(reference).ok()?;
    let fragment = target.fragment().map(percent_decode).unwrap_or_default();
    let mut doc_url = target.clone();
    doc_url.set_fragment(None);

    let doc = corpus.get(doc_url.as_str())?;
    let root = corpus.store().get(doc.id())?;
    let node = if fragment.is_empty() {
        root
    } else {
        root.pointer(&fragment)?
    };
    Some((doc.id().to_string(), node))
}

/// Whether a top-level property named `name` is documented by `schema` or
/// by anything it pulls in through `$ref`.
fn has_property(
    corpus: &CorpusIndex,
    id: &str,
    schema: &Value,
    name: &str,
    visited: &mut BTreeSet<String>,
) -> bool {
    if property_paths(schema).iter().any(|(path, _)| path[1] == name) {
        return true;
    }

    let all_of_refs = schema
        .get("allOf")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|branch| branch.get("$ref"));
    let refs: Vec<&str> = schema
        .get("$ref")
        .into_iter()
        .chain(all_of_refs)
        .filter_map(Value::as_str)
        .collect();

    refs.into_iter().any(|reference| {
        let Some((target_id, target)) = follow_ref(corpus, id, reference) else {
            return false;
        };
        let key = format!("{target_id}|{reference}");
        visited.insert(key) && has_property(corpus, &target_id, target, name, visited)
    })
}

fn check_removed(
    id: &str,
    base: &Value,
    new: &Value,
    corpus: &CorpusIndex,
    out: &mut Vec<AbiChange>,
) {
    for (path, _) in property_paths(base) {
        if path.len() != 2 {
            continue;
        }
        if !has_property(corpus, id, new, &path[1], &mut BTreeSet::new()) {
            out.push(AbiChange {
                id: id.to_string(),
                path: path_string(&path),
                kind: AbiChangeKind::PropertyRemoved,
            });
        }
    }
}

/// Every ABI change from `baseline` to `new`, for bindings present in both.
pub fn compare(baseline: &CorpusIndex, new: &CorpusIndex) -> Vec<AbiChange> {
    let mut out = Vec::new();
    for doc in new.bindings() {
        let id = doc.id();
        let Some(base_doc) = baseline.get(id) else {
            continue;
        };
        let base = base_doc.to_value();
        let current = doc.to_value();

        check_required(id, &base, &current, &mut out);
        check_removed(id, &base, &current, new, &mut out);
        check_new_items(id, &base, &current, &mut out);
    }
    tracing::debug!(changes = out.len(), "compared corpora");
    out
}
