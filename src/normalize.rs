//! Schema normalization.
//!
//! Binding authors write property constraints in a shorthand that assumes
//! every property value is a bare scalar or a flat list. Subject trees encode
//! every value as an array of cell rows, so before a schema can be handed to
//! the structural validator each property constraint is lowered into the
//! matching one- or two-level array shape and every array node gets explicit
//! size bounds.
//!
//! Normalization is idempotent: running it over an already normalized schema
//! leaves the schema unchanged.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::config::SchemaDraft;
use crate::types::{Items, SchemaNode, SchemaObject};

static INT_ARRAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"int(8|16|32|64)-array").expect("static regex must compile"));

/// Property-name suffixes of physical units, whose values are integer arrays.
pub(crate) static UNIT_TYPES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"-(kBps|bits|percent|bp|m?hz|sec|ms|us|ns|ps|mm|nanoamp|(micro-)?ohms|micro(amp|watt)(-hours)?|milliwatt|microvolt|picofarads|(milli)?celsius|kelvin|kpascal)$",
    )
    .expect("static regex must compile")
});

static PINCTRL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pinctrl-[0-9]").expect("static regex must compile"));

/// Integer arrays whose names carry no unit suffix.
const KNOWN_ARRAY_PROPS: &[&str] = &[
    "assigned-clock-rates",
    "linux,keycodes",
    "max8997,pmic-buck1-dvs-voltage",
    "max8997,pmic-buck2-dvs-voltage",
    "max8997,pmic-buck5-dvs-voltage",
];

/// Matrices with variable rows whose constraints are reduced to their `$ref`.
const KNOWN_VARIABLE_MATRIX_PROPS: &[&str] = &["fsl,pins", "qcom,board-id"];

/// Properties every node may carry once unknown properties are rejected.
const IMPLICIT_NODE_PROPS: &[&str] = &[
    "phandle",
    "status",
    "secure-status",
    "$nodename",
    "bootph-pre-sram",
    "bootph-verify",
    "bootph-pre-ram",
    "bootph-some-ram",
    "bootph-all",
];

/// Documentation-only keywords removed from the root before anything else.
const DOC_ONLY_KEYWORDS: &[&str] = &["examples", "maintainers", "historical"];

/// Normalize a binding schema in place.
///
/// The selector is not built here; see [`crate::select::add_select_schema`].
pub fn normalize_schema(root: &mut SchemaObject, draft: SchemaDraft) {
    for keyword in DOC_ONLY_KEYWORDS {
        root.extra.remove(*keyword);
    }
    split_dependencies(root);
    fixup_sub_schema(root);
    if draft == SchemaDraft::Draft202012 {
        migrate_to_2020_12(root);
    }
}

/// Normalize a single property constraint as if it were declared under `name`.
pub fn normalize_property(name: &str, node: &mut SchemaNode) {
    walk_properties(name, node);
    if let Some(obj) = node.as_object_mut() {
        fixup_sub_schema(obj);
    }
}

fn fixup_sub_schema(schema: &mut SchemaObject) {
    fixup_interrupts(schema);
    fixup_node_props(schema);

    // `additionalProperties: true` defeats `unevaluatedProperties` in an including schema.
    if schema
        .additional_properties
        .as_ref()
        .is_some_and(SchemaNode::is_true)
    {
        schema.additional_properties = None;
    }

    let singles = [
        &mut schema.select,
        &mut schema.if_,
        &mut schema.then,
        &mut schema.else_,
        &mut schema.not,
        &mut schema.additional_properties,
    ];
    for node in singles.into_iter().flatten() {
        if let Some(obj) = node.as_object_mut() {
            fixup_sub_schema(obj);
        }
    }
    for list in [&mut schema.all_of, &mut schema.any_of, &mut schema.one_of]
        .into_iter()
        .flatten()
    {
        for obj in list.iter_mut().filter_map(SchemaNode::as_object_mut) {
            fixup_sub_schema(obj);
        }
    }

    let maps = [
        schema.properties.as_mut(),
        schema.pattern_properties.as_mut(),
        Some(&mut schema.dependent_schemas),
        Some(&mut schema.defs),
    ];
    for map in maps.into_iter().flatten() {
        fixup_property_map(map);
    }
}

fn fixup_property_map(map: &mut BTreeMap<String, SchemaNode>) {
    for (name, node) in map.iter_mut() {
        if KNOWN_VARIABLE_MATRIX_PROPS.contains(&name.as_str()) {
            if let SchemaNode::Object(obj) = node {
                *obj = Box::new(SchemaObject {
                    reference: obj.reference.take(),
                    ..SchemaObject::default()
                });
            }
            continue;
        }
        walk_properties(name, node);
        if let Some(obj) = node.as_object_mut() {
            fixup_sub_schema(obj);
        }
    }
}

/// Descend through conditionals to the nodes that carry the actual value constraints.
fn walk_properties(name: &str, node: &mut SchemaNode) {
    let Some(obj) = node.as_object_mut() else {
        return;
    };
    for list in [&mut obj.all_of, &mut obj.one_of, &mut obj.any_of]
        .into_iter()
        .flatten()
    {
        for sub in list.iter_mut() {
            walk_properties(name, sub);
        }
    }
    if let Some(then) = obj.then.as_mut() {
        walk_properties(name, then);
    }
    fixup_vals(name, obj);
}

fn fixup_vals(name: &str, schema: &mut SchemaObject) {
    fixup_reg_schema(name, schema);
    remove_empty_items(schema);
    fixup_int_matrix(schema);
    fixup_int_array_min_max_to_matrix(name, schema);
    fixup_int_array_items_to_matrix(name, schema);
    fixup_string_to_array(schema);
    fixup_scalar_to_array(schema);
    fixup_items_size(schema);
}

/// `reg` entries are always (address, size) rows.
fn fixup_reg_schema(name: &str, schema: &mut SchemaObject) {
    if name != "reg" {
        return;
    }
    if schema.items.is_none() {
        if schema.is_int_schema() {
            let leaf = schema.take_leaf();
            schema.items = Some(row_of(leaf));
        }
        return;
    }
    let Some(item) = schema
        .items
        .as_mut()
        .and_then(Items::first_mut)
        .and_then(SchemaNode::as_object_mut)
    else {
        return;
    };
    if !item.is_int_schema() {
        return;
    }
    let leaf = item.take_leaf();
    schema.items = Some(row_of(leaf));
}

/// `items: [ { items: [leaf] } ]`
fn row_of(leaf: SchemaObject) -> Items {
    Items::Tuple(vec![SchemaObject {
        items: Some(Items::Tuple(vec![leaf.into()])),
        ..SchemaObject::default()
    }
    .into()])
}

fn is_matrix_schema(schema: &SchemaObject) -> bool {
    schema.items.as_ref().is_some_and(|items| {
        items.nodes().into_iter().any(|node| {
            node.as_object().is_some_and(|o| {
                o.items.is_some() || o.min_items.is_some() || o.max_items.is_some()
            })
        })
    })
}

/// `(minItems, maxItems)` of an array node. `(0, 0)` means unconstrained.
pub(crate) fn array_range(schema: &SchemaObject) -> (u64, u64) {
    if let Some(Items::Tuple(list)) = &schema.items {
        let len = list.len() as u64;
        return (
            schema.min_items.unwrap_or(len),
            schema.max_items.unwrap_or(len),
        );
    }
    let min = schema.min_items.unwrap_or(0);
    (min, schema.max_items.unwrap_or(min))
}

/// Range of the rows described by `items`, when they share one shape.
pub(crate) fn items_range(items: Option<&Items>) -> (u64, u64) {
    let row = match items {
        Some(Items::Single(node)) => node.as_object(),
        Some(Items::Tuple(list)) if list.len() == 1 => list[0].as_object(),
        _ => None,
    };
    row.map(array_range).unwrap_or((0, 0))
}

fn is_variable(range: (u64, u64)) -> bool {
    range.0 != range.1
}

/// A matrix variable in both dimensions cannot be checked; keep only "is an array".
fn fixup_int_matrix(schema: &mut SchemaObject) {
    if !is_matrix_schema(schema) {
        return;
    }
    let outer = array_range(schema);
    let inner = items_range(schema.items.as_ref());
    if is_variable(outer) && is_variable(inner) {
        schema.items = None;
        schema.min_items = None;
        schema.max_items = None;
        schema.type_ = Some(Value::from("array"));
    }
}

fn is_int_array_schema(name: &str, schema: &SchemaObject) -> bool {
    let mut target = schema;
    if let Some(all_of) = &schema.all_of {
        for item in all_of.iter().filter_map(SchemaNode::as_object) {
            if item.items.is_some() {
                target = item;
                continue;
            }
            if let Some(reference) = &item.reference {
                return INT_ARRAY_RE.is_match(reference);
            }
        }
    }
    if let Some(reference) = &target.reference {
        return INT_ARRAY_RE.is_match(reference);
    }
    if UNIT_TYPES_RE.is_match(name) || KNOWN_ARRAY_PROPS.contains(&name) {
        return true;
    }
    target
        .items
        .as_ref()
        .and_then(Items::first)
        .and_then(SchemaNode::as_object)
        .is_some_and(SchemaObject::is_int_schema)
}

/// Apply `f` to the first `allOf` entry matching `pred`, or to `schema` itself.
fn with_all_of_target(
    schema: &mut SchemaObject,
    pred: fn(&SchemaObject) -> bool,
    f: impl FnOnce(&mut SchemaObject),
) {
    let idx = schema.all_of.as_ref().and_then(|list| {
        list.iter()
            .position(|node| node.as_object().is_some_and(pred))
    });
    if let Some(idx) = idx {
        if let Some(SchemaNode::Object(target)) =
            schema.all_of.as_mut().and_then(|list| list.get_mut(idx))
        {
            f(target);
            return;
        }
    }
    f(schema);
}

/// An integer array given only by its length may be written as one row of
/// cells or as one cell per row. Accept exactly one of the two encodings.
fn fixup_int_array_min_max_to_matrix(name: &str, schema: &mut SchemaObject) {
    if !is_int_array_schema(name, schema) {
        return;
    }
    with_all_of_target(
        schema,
        |o| o.min_items.is_some() || o.max_items.is_some(),
        |target| {
            if matches!(target.items, Some(Items::Tuple(_)))
                || is_matrix_schema(target)
                || target.max_items == Some(1)
            {
                return;
            }
            let (min_items, max_items) = (target.min_items.take(), target.max_items.take());
            if min_items.is_none() && max_items.is_none() {
                return;
            }
            let bounds = SchemaObject {
                min_items,
                max_items,
                ..SchemaObject::default()
            };

            let mut cell_per_row = SchemaObject {
                items: Some(Items::Single(Box::new(
                    SchemaObject {
                        max_items: Some(1),
                        ..SchemaObject::default()
                    }
                    .into(),
                ))),
                ..bounds.clone()
            };
            // A single cell would match both encodings.
            if cell_per_row.min_items == Some(1) {
                cell_per_row.min_items = Some(2);
            }
            let single_row = SchemaObject {
                items: Some(Items::Tuple(vec![bounds.into()])),
                ..SchemaObject::default()
            };

            let mut encodings = vec![SchemaNode::from(cell_per_row), single_row.into()];
            for obj in encodings.iter_mut().filter_map(SchemaNode::as_object_mut) {
                fixup_items_size(obj);
            }
            add_one_of(target, encodings);
        },
    );
}

/// Set `oneOf`, or add it under `allOf` when one is already present.
fn add_one_of(schema: &mut SchemaObject, alternatives: Vec<SchemaNode>) {
    if schema.one_of.is_some() {
        schema.all_of.get_or_insert_with(Vec::new).push(
            SchemaObject {
                one_of: Some(alternatives),
                ..SchemaObject::default()
            }
            .into(),
        );
    } else {
        schema.one_of = Some(alternatives);
    }
}

/// Push the array keywords of an integer array one level down, turning it
/// into a matrix of rows.
fn fixup_int_array_items_to_matrix(name: &str, schema: &mut SchemaObject) {
    if !is_int_array_schema(name, schema) {
        return;
    }
    with_all_of_target(
        schema,
        |o| o.items.is_some(),
        |target| {
            if target.items.is_none() || is_matrix_schema(target) {
                return;
            }
            let single = matches!(target.items, Some(Items::Single(_)));
            let row: SchemaNode = SchemaObject {
                items: target.items.take(),
                min_items: target.min_items.take(),
                max_items: target.max_items.take(),
                unique_items: target.unique_items.take(),
                default: target.default.take(),
                ..SchemaObject::default()
            }
            .into();
            target.items = Some(if single {
                Items::Single(Box::new(row))
            } else {
                Items::Tuple(vec![row])
            });
        },
    );
}

fn fixup_string_to_array(schema: &mut SchemaObject) {
    if schema.items.is_some() || !schema.is_string_schema() {
        return;
    }
    let leaf = schema.take_leaf();
    schema.items = Some(Items::Tuple(vec![leaf.into()]));
}

fn fixup_scalar_to_array(schema: &mut SchemaObject) {
    if schema.items.is_some() || !schema.is_int_schema() {
        return;
    }
    let leaf = schema.take_leaf();
    schema.items = Some(row_of(leaf));
}

/// Drop descriptions from `items` and collapse a list of entirely empty
/// item schemas into a plain length constraint.
fn remove_empty_items(schema: &mut SchemaObject) {
    let empty_len = match &mut schema.items {
        None => None,
        Some(Items::Single(node)) => {
            if let Some(obj) = node.as_object_mut() {
                remove_empty_items(obj);
            }
            None
        }
        Some(Items::Tuple(list)) => {
            let mut all_empty = true;
            for node in list.iter_mut() {
                let SchemaNode::Object(obj) = node else {
                    all_empty = false;
                    break;
                };
                obj.description = None;
                remove_empty_items(obj);
                if !obj.is_empty() {
                    all_empty = false;
                    break;
                }
            }
            all_empty.then_some(list.len() as u64)
        }
    };
    if let Some(len) = empty_len {
        schema.items = None;
        schema.type_.get_or_insert_with(|| Value::from("array"));
        schema.max_items.get_or_insert(len);
        schema.min_items.get_or_insert(len);
    }
}

/// Give every array node explicit bounds.
fn fixup_items_size(schema: &mut SchemaObject) {
    match &mut schema.items {
        Some(items) => {
            let tuple_len = match items {
                Items::Tuple(list) => Some(list.len() as u64),
                Items::Single(_) => None,
            };
            for obj in items
                .nodes_mut()
                .into_iter()
                .filter_map(SchemaNode::as_object_mut)
            {
                obj.description = None;
                fixup_items_size(obj);
            }
            schema.type_ = Some(Value::from("array"));
            if let Some(len) = tuple_len {
                schema.min_items.get_or_insert(len);
                schema.max_items.get_or_insert(len);
            }
        }
        None => match (schema.min_items, schema.max_items) {
            (None, Some(max)) => schema.min_items = Some(max),
            (Some(min), None) => schema.max_items = Some(min),
            _ => {}
        },
    }
}

/// Any node with `interrupts` also accepts `interrupts-extended`, and a
/// required `interrupts` is satisfied by either.
fn fixup_interrupts(schema: &mut SchemaObject) {
    let Some(props) = schema.properties.as_mut() else {
        return;
    };
    if (props.contains_key("interrupts") || props.contains_key("interrupt-controller"))
        && !props.contains_key("interrupt-parent")
    {
        props.insert("interrupt-parent".to_string(), SchemaNode::Bool(true));
    }
    if props.contains_key("interrupts-extended") {
        return;
    }
    let Some(interrupts) = props.get("interrupts").cloned() else {
        return;
    };
    props.insert("interrupts-extended".to_string(), interrupts);

    let Some(required) = schema.required.as_mut() else {
        return;
    };
    let Some(pos) = required.iter().position(|r| r == "interrupts") else {
        return;
    };
    required.remove(pos);

    let either = ["interrupts", "interrupts-extended"]
        .into_iter()
        .map(|name| {
            SchemaObject {
                required: Some(vec![name.to_string()]),
                ..SchemaObject::default()
            }
            .into()
        })
        .collect();
    add_one_of(schema, either);
}

/// A node that rejects unknown properties still accepts the properties any
/// node may carry.
fn fixup_node_props(schema: &mut SchemaObject) {
    let open = |node: &Option<SchemaNode>| node.as_ref().is_some_and(SchemaNode::is_true);
    if (schema.additional_properties.is_none() && schema.unevaluated_properties.is_none())
        || open(&schema.additional_properties)
        || open(&schema.unevaluated_properties)
    {
        return;
    }

    let props = schema.properties.get_or_insert_with(BTreeMap::new);
    for name in IMPLICIT_NODE_PROPS {
        props
            .entry(name.to_string())
            .or_insert(SchemaNode::Bool(true));
    }
    if props.contains_key("ranges") {
        props
            .entry("dma-ranges".to_string())
            .or_insert(SchemaNode::Bool(true));
    }

    let keys: Vec<String> = props
        .keys()
        .chain(schema.pattern_properties.iter().flat_map(|p| p.keys()))
        .cloned()
        .collect();

    if !keys.iter().any(|key| PINCTRL_RE.is_match(key)) {
        props
            .entry("pinctrl-names".to_string())
            .or_insert(SchemaNode::Bool(true));
        schema
            .pattern_properties
            .get_or_insert_with(BTreeMap::new)
            .insert("pinctrl-[0-9]+".to_string(), SchemaNode::Bool(true));
    }

    let has = |name: &str| keys.iter().any(|k| k == name);
    if has("clocks") && !has("assigned-clocks") {
        for name in [
            "assigned-clocks",
            "assigned-clock-rates",
            "assigned-clock-parents",
        ] {
            props.insert(name.to_string(), SchemaNode::Bool(true));
        }
    }
}

/// `dependencies` is split into `dependentRequired` and `dependentSchemas`.
fn split_dependencies(schema: &mut SchemaObject) {
    if let Some(deps) = schema.dependencies.take() {
        for (name, dep) in deps {
            match dep {
                Value::Array(list) => {
                    let names = list
                        .into_iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect();
                    schema.dependent_required.insert(name, names);
                }
                other => match SchemaNode::from_value(other) {
                    Ok(node) => {
                        schema.dependent_schemas.insert(name, node);
                    }
                    Err(e) => tracing::debug!(dependency = %name, "dropping dependency: {e}"),
                },
            }
        }
    }
    schema.for_each_child_mut(&mut |child| {
        if let Some(obj) = child.as_object_mut() {
            split_dependencies(obj);
        }
    });
}

/// Tuple `items` become `prefixItems`; `additionalItems` becomes `unevaluatedItems`.
fn migrate_to_2020_12(schema: &mut SchemaObject) {
    if matches!(schema.items, Some(Items::Tuple(_))) {
        if let Some(Items::Tuple(list)) = schema.items.take() {
            schema.prefix_items = Some(list);
        }
    }
    if let Some(additional) = schema.additional_items.take() {
        schema.unevaluated_items = Some(additional);
    }
    schema.for_each_child_mut(&mut |child| {
        if let Some(obj) = child.as_object_mut() {
            migrate_to_2020_12(obj);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalized(raw: Value) -> Value {
        let mut obj = SchemaObject::from_value(raw).unwrap();
        normalize_schema(&mut obj, SchemaDraft::Draft201909);
        obj.to_value()
    }

    fn property(raw: Value, name: &str) -> Value {
        normalized(json!({ "properties": { name: raw } }))["properties"][name].clone()
    }

    #[test]
    fn integer_leaf_becomes_two_level_array() {
        assert_eq!(
            property(json!({ "const": 5 }), "foo"),
            json!({
                "items": [{
                    "items": [{ "const": 5 }],
                    "minItems": 1,
                    "maxItems": 1,
                    "type": "array"
                }],
                "minItems": 1,
                "maxItems": 1,
                "type": "array"
            })
        );
    }

    #[test]
    fn string_leaf_becomes_one_level_array() {
        assert_eq!(
            property(json!({ "enum": ["a", "b"] }), "foo"),
            json!({
                "items": [{ "enum": ["a", "b"] }],
                "minItems": 1,
                "maxItems": 1,
                "type": "array"
            })
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = json!({
            "$id": "http://devicetree.org/schemas/foo.yaml#",
            "properties": {
                "compatible": { "const": "vendor,foo" },
                "reg": { "maxItems": 2 },
                "clocks": { "maxItems": 1 },
                "interrupts": { "maxItems": 1 },
                "vendor,delay-us": { "minItems": 1, "maxItems": 4, "items": { "maximum": 100 } },
                "vendor,mode": { "$ref": "/schemas/types.yaml#/definitions/uint32", "enum": [0, 1] },
                "vendor,table": {
                    "$ref": "/schemas/types.yaml#/definitions/uint32-matrix",
                    "items": { "items": [{ "description": "a" }, { "description": "b" }] }
                }
            },
            "required": ["compatible", "interrupts"],
            "dependencies": { "vendor,mode": ["vendor,table"] },
            "additionalProperties": false
        });
        let once = normalized(raw);
        let twice = normalized(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn reg_becomes_rows() {
        let reg = property(json!({ "items": [{ "minimum": 0 }] }), "reg");
        assert_eq!(reg["items"][0]["items"][0], json!({ "minimum": 0 }));
        assert_eq!(reg["items"][0]["type"], "array");
    }

    #[test]
    fn empty_items_become_length() {
        let reg = property(
            json!({ "items": [{ "description": "base" }, { "description": "size" }] }),
            "reg",
        );
        assert_eq!(
            reg,
            json!({ "type": "array", "maxItems": 2, "minItems": 2 })
        );
    }

    #[test]
    fn required_interrupts_accepts_extended() {
        let out = normalized(json!({
            "properties": { "interrupts": { "maxItems": 1 } },
            "required": ["interrupts", "reg"]
        }));
        assert_eq!(out["required"], json!(["reg"]));
        assert_eq!(
            out["oneOf"],
            json!([{ "required": ["interrupts"] }, { "required": ["interrupts-extended"] }])
        );
        assert_eq!(out["properties"]["interrupt-parent"], json!(true));
        assert_eq!(
            out["properties"]["interrupts"],
            out["properties"]["interrupts-extended"]
        );
    }

    #[test]
    fn existing_one_of_moves_interrupt_alternatives_to_all_of() {
        let out = normalized(json!({
            "properties": { "interrupts": true },
            "required": ["interrupts"],
            "oneOf": [{ "required": ["a"] }, { "required": ["b"] }]
        }));
        assert_eq!(out["oneOf"].as_array().unwrap().len(), 2);
        assert_eq!(
            out["allOf"][0]["oneOf"][1],
            json!({ "required": ["interrupts-extended"] })
        );
    }

    #[test]
    fn closed_nodes_accept_implicit_properties() {
        let out = normalized(json!({
            "properties": { "clocks": true, "ranges": true },
            "additionalProperties": false
        }));
        let props = out["properties"].as_object().unwrap();
        for name in [
            "phandle",
            "status",
            "$nodename",
            "bootph-all",
            "dma-ranges",
            "pinctrl-names",
            "assigned-clocks",
            "assigned-clock-rates",
            "assigned-clock-parents",
        ] {
            assert_eq!(props[name], json!(true), "{name}");
        }
        assert_eq!(out["patternProperties"]["pinctrl-[0-9]+"], json!(true));
    }

    #[test]
    fn open_nodes_are_left_alone() {
        let out = normalized(json!({
            "properties": { "clocks": true },
            "additionalProperties": true
        }));
        assert!(out.get("additionalProperties").is_none());
        assert!(out["properties"].get("status").is_none());

        let out = normalized(json!({ "properties": { "clocks": true } }));
        assert!(out["properties"].get("status").is_none());
    }

    #[test]
    fn unit_suffix_gets_both_encodings() {
        let prop = property(
            json!({ "minItems": 1, "maxItems": 3, "items": { "maximum": 1000 } }),
            "vendor,delay-us",
        );
        let one_of = prop["oneOf"].as_array().unwrap();
        assert_eq!(one_of.len(), 2);
        // One cell per row; bumped so a lone cell matches only the other encoding.
        assert_eq!(one_of[0]["minItems"], 2);
        assert_eq!(one_of[0]["maxItems"], 3);
        assert_eq!(one_of[0]["items"]["maxItems"], 1);
        // A single row of up to three cells.
        assert_eq!(one_of[1]["maxItems"], 1);
        assert_eq!(one_of[1]["items"][0]["minItems"], 1);
        assert_eq!(one_of[1]["items"][0]["maxItems"], 3);
        assert_eq!(prop["items"]["items"], json!({ "maximum": 1000 }));
    }

    #[test]
    fn single_entry_int_array_is_not_ambiguous() {
        let prop = property(
            json!({ "$ref": "/schemas/types.yaml#/definitions/uint32-array", "maxItems": 1 }),
            "vendor,value",
        );
        assert!(prop.get("oneOf").is_none());
        assert_eq!(prop["maxItems"], 1);
        assert_eq!(prop["minItems"], 1);
    }

    #[test]
    fn variable_matrix_is_collapsed() {
        let prop = property(
            json!({
                "$ref": "/schemas/types.yaml#/definitions/uint32-matrix",
                "minItems": 1,
                "maxItems": 8,
                "items": { "minItems": 2, "maxItems": 4 }
            }),
            "vendor,map",
        );
        assert_eq!(
            prop,
            json!({ "$ref": "/schemas/types.yaml#/definitions/uint32-matrix", "type": "array" })
        );
    }

    #[test]
    fn known_variable_matrix_keeps_only_ref() {
        let prop = property(
            json!({
                "$ref": "/schemas/types.yaml#/definitions/uint32-matrix",
                "description": "pin configuration",
                "items": { "items": [{ "description": "pin" }] }
            }),
            "fsl,pins",
        );
        assert_eq!(
            prop,
            json!({ "$ref": "/schemas/types.yaml#/definitions/uint32-matrix" })
        );
    }

    #[test]
    fn dependencies_are_split() {
        let out = normalized(json!({
            "dependencies": {
                "a": ["b"],
                "c": { "required": ["d"] }
            }
        }));
        assert!(out.get("dependencies").is_none());
        assert_eq!(out["dependentRequired"], json!({ "a": ["b"] }));
        assert_eq!(out["dependentSchemas"], json!({ "c": { "required": ["d"] } }));
    }

    #[test]
    fn draft_2020_12_uses_prefix_items() {
        let mut obj = SchemaObject::from_value(json!({
            "properties": { "foo": { "const": 1 } }
        }))
        .unwrap();
        normalize_schema(&mut obj, SchemaDraft::Draft202012);
        let foo = &obj.to_value()["properties"]["foo"];
        assert!(foo.get("items").is_none());
        assert_eq!(foo["prefixItems"][0]["prefixItems"][0], json!({ "const": 1 }));
    }

    #[test]
    fn documentation_keywords_are_dropped() {
        let out = normalized(json!({
            "title": "Foo",
            "examples": ["/ { };"],
            "maintainers": ["Someone <someone@example.com>"]
        }));
        assert_eq!(out, json!({ "title": "Foo" }));
    }

    #[test]
    fn property_descriptions_survive_for_hints() {
        let foo = property(
            json!({ "description": "Number of lanes", "items": [{ "description": "lane", "maximum": 4 }] }),
            "foo",
        );
        assert_eq!(foo["description"], "Number of lanes");
        assert!(foo["items"][0].get("description").is_none());
    }
}
