//! Selector derivation.
//!
//! A selector is the predicate deciding whether a binding applies to a node
//! at all. Authors may write one explicitly; otherwise it is derived from the
//! `compatible` strings the binding documents, or failing that from its
//! `$nodename` constraint.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::types::{SchemaNode, SchemaObject};

/// Set `select` on a normalized binding unless the author already wrote one.
pub fn add_select_schema(schema: &mut SchemaObject, generic_compatibles: &[String]) {
    if schema.select.is_none() {
        schema.select = Some(derive_selector(schema, generic_compatibles));
    }
}

fn derive_selector(schema: &SchemaObject, generic_compatibles: &[String]) -> SchemaNode {
    if schema.properties.is_none() {
        return SchemaNode::Bool(false);
    }

    if let Some(compatible) = schema.property("compatible") {
        let mut compatibles = node_compatibles(compatible);
        compatibles.retain(|c| !generic_compatibles.contains(c));
        if !compatibles.is_empty() {
            let contains = SchemaObject {
                enum_: Some(compatibles.into_iter().map(Value::String).collect()),
                ..SchemaObject::default()
            };
            let property = SchemaObject {
                contains: Some(contains.into()),
                ..SchemaObject::default()
            };
            return selector_requiring("compatible", property.into());
        }
    }

    match schema.property("$nodename") {
        Some(nodename) if !nodename.is_true() => selector_requiring("$nodename", nodename.clone()),
        _ => SchemaNode::Bool(false),
    }
}

fn selector_requiring(name: &str, constraint: SchemaNode) -> SchemaNode {
    SchemaObject {
        required: Some(vec![name.to_string()]),
        properties: Some(BTreeMap::from([(name.to_string(), constraint)])),
        ..SchemaObject::default()
    }
    .into()
}

/// Every string a `compatible` constraint names through `const` or `enum`,
/// at any depth.
pub fn node_compatibles(node: &SchemaNode) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_strings(node, &mut out);
    out
}

fn collect_strings(node: &SchemaNode, out: &mut BTreeSet<String>) {
    let Some(obj) = node.as_object() else {
        return;
    };
    if let Some(Value::String(s)) = &obj.const_ {
        out.insert(s.clone());
    }
    if let Some(values) = &obj.enum_ {
        out.extend(values.iter().filter_map(Value::as_str).map(String::from));
    }
    obj.for_each_child(&mut |child| collect_strings(child, out));
}

fn collect_patterns(node: &SchemaNode, out: &mut BTreeSet<String>) {
    let Some(obj) = node.as_object() else {
        return;
    };
    if let Some(pattern) = &obj.pattern {
        out.insert(pattern.clone());
    }
    obj.for_each_child(&mut |child| collect_patterns(child, out));
}

/// Compatible strings and compatible patterns documented anywhere in a
/// binding, including child nodes.
pub fn schema_compatibles(schema: &SchemaObject) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_compatibles(schema, &mut out);
    out
}

fn collect_compatibles(schema: &SchemaObject, out: &mut BTreeSet<String>) {
    if let Some(compatible) = schema.property("compatible") {
        out.extend(node_compatibles(compatible));
        collect_patterns(compatible, out);
    }
    schema.for_each_child(&mut |child| {
        if let Some(obj) = child.as_object() {
            collect_compatibles(obj, out);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GENERIC_COMPATIBLES;
    use serde_json::json;

    fn generic() -> Vec<String> {
        DEFAULT_GENERIC_COMPATIBLES
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn select_for(raw: Value) -> Value {
        let mut schema = SchemaObject::from_value(raw).unwrap();
        add_select_schema(&mut schema, &generic());
        schema.select.unwrap().to_value()
    }

    #[test]
    fn generic_compatibles_are_excluded() {
        let select = select_for(json!({
            "properties": {
                "compatible": { "enum": ["v,b", "v,a"], "const": "syscon" }
            }
        }));
        assert_eq!(
            select,
            json!({
                "required": ["compatible"],
                "properties": {
                    "compatible": { "contains": { "enum": ["v,a", "v,b"] } }
                }
            })
        );
    }

    #[test]
    fn nested_compatible_alternatives_are_collected() {
        let select = select_for(json!({
            "properties": {
                "compatible": {
                    "oneOf": [
                        { "items": [{ "const": "v,c" }, { "const": "v,a" }] },
                        { "items": [{ "enum": ["v,b"] }, { "const": "syscon" }] }
                    ]
                }
            }
        }));
        assert_eq!(
            select["properties"]["compatible"]["contains"]["enum"],
            json!(["v,a", "v,b", "v,c"])
        );
    }

    #[test]
    fn only_generic_compatibles_falls_back_to_nodename() {
        let select = select_for(json!({
            "properties": {
                "compatible": { "const": "syscon" },
                "$nodename": { "pattern": "^bus@" }
            }
        }));
        assert_eq!(
            select,
            json!({
                "required": ["$nodename"],
                "properties": { "$nodename": { "pattern": "^bus@" } }
            })
        );
    }

    #[test]
    fn permissive_nodename_selects_nothing() {
        let select = select_for(json!({ "properties": { "$nodename": true } }));
        assert_eq!(select, json!(false));
        assert_eq!(select_for(json!({ "title": "x" })), json!(false));
    }

    #[test]
    fn explicit_select_is_kept() {
        let select = select_for(json!({
            "select": true,
            "properties": { "compatible": { "const": "v,a" } }
        }));
        assert_eq!(select, json!(true));
    }

    #[test]
    fn schema_compatibles_reach_child_nodes() {
        let schema = SchemaObject::from_value(json!({
            "properties": { "compatible": { "const": "v,parent" } },
            "patternProperties": {
                "^child@": { "properties": { "compatible": { "enum": ["v,child"] } } },
                "^port@": { "properties": { "compatible": { "pattern": "^v,port-[0-9]+$" } } }
            }
        }))
        .unwrap();
        let all: Vec<_> = schema_compatibles(&schema).into_iter().collect();
        assert_eq!(all, vec!["^v,port-[0-9]+$", "v,child", "v,parent"]);
    }
}
