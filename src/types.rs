//! Typed model of binding schemas.
//!
//! Binding schemas are authored as loose YAML mappings. Everything the
//! normalizer, selector builder, type engine and ABI diff look at is lifted
//! into a typed field of [`SchemaObject`]; keywords nobody inspects ride along
//! untouched in [`SchemaObject::extra`], so converting a document into the model
//! and back is lossless.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Base URL of every corpus `$id`.
pub const SCHEMA_BASE_URL: &str = "http://devicetree.org/";

/// `$id` of the synthesized schema listing every documented compatible.
pub const GENERATED_COMPATIBLES_ID: &str = "http://devicetree.org/schemas/generated-compatibles";

/// `$id` of the synthesized literal property type table.
pub const GENERATED_TYPES_ID: &str = "generated-types";

/// `$id` of the synthesized pattern property type table.
pub const GENERATED_PATTERN_TYPES_ID: &str = "generated-pattern-types";

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A schema node: either a boolean schema or a keyword object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaNode {
    Bool(bool),
    Object(Box<SchemaObject>),
}

/// The two shapes `items` may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Items {
    /// Fixed-length sequence, one schema per position.
    Tuple(Vec<SchemaNode>),
    /// One schema applied to every element.
    Single(Box<SchemaNode>),
}

/// Deserialize a keyword that may legitimately hold `null`.
///
/// Without this, `const: null` would be indistinguishable from an absent `const`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A keyword object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaObject {
    #[serde(rename = "$id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(rename = "$filename", default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<Value>,
    #[serde(
        rename = "const",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub const_: Option<Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Value>,
    #[serde(rename = "multipleOf", default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Items>,
    #[serde(rename = "prefixItems", default, skip_serializing_if = "Option::is_none")]
    pub prefix_items: Option<Vec<SchemaNode>>,
    #[serde(rename = "additionalItems", default, skip_serializing_if = "Option::is_none")]
    pub additional_items: Option<SchemaNode>,
    #[serde(rename = "unevaluatedItems", default, skip_serializing_if = "Option::is_none")]
    pub unevaluated_items: Option<SchemaNode>,
    #[serde(rename = "minItems", default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(rename = "maxItems", default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(rename = "uniqueItems", default, skip_serializing_if = "Option::is_none")]
    pub unique_items: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<SchemaNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, SchemaNode>>,
    #[serde(rename = "patternProperties", default, skip_serializing_if = "Option::is_none")]
    pub pattern_properties: Option<BTreeMap<String, SchemaNode>>,
    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<SchemaNode>,
    #[serde(
        rename = "unevaluatedProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub unevaluated_properties: Option<SchemaNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Map<String, Value>>,
    #[serde(rename = "dependentRequired", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependent_required: BTreeMap<String, Vec<String>>,
    #[serde(rename = "dependentSchemas", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependent_schemas: BTreeMap<String, SchemaNode>,

    #[serde(rename = "allOf", default, skip_serializing_if = "Option::is_none")]
    pub all_of: Option<Vec<SchemaNode>>,
    #[serde(rename = "oneOf", default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<SchemaNode>>,
    #[serde(rename = "anyOf", default, skip_serializing_if = "Option::is_none")]
    pub any_of: Option<Vec<SchemaNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<SchemaNode>,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_: Option<SchemaNode>,
    #[serde(rename = "then", default, skip_serializing_if = "Option::is_none")]
    pub then: Option<SchemaNode>,
    #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
    pub else_: Option<SchemaNode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<SchemaNode>,
    #[serde(rename = "$defs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defs: BTreeMap<String, SchemaNode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub definitions: BTreeMap<String, SchemaNode>,

    /// Keywords the model does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SchemaNode {
    pub fn object(obj: SchemaObject) -> Self {
        SchemaNode::Object(Box::new(obj))
    }

    /// Parse a raw JSON value into the model.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Serialize back into a plain JSON value.
    pub fn to_value(&self) -> Value {
        // Every map in the model is keyed by String, so this cannot fail.
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn as_object(&self) -> Option<&SchemaObject> {
        match self {
            SchemaNode::Object(obj) => Some(obj),
            SchemaNode::Bool(_) => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut SchemaObject> {
        match self {
            SchemaNode::Object(obj) => Some(obj),
            SchemaNode::Bool(_) => None,
        }
    }

    /// True for the literal `true` schema.
    pub fn is_true(&self) -> bool {
        matches!(self, SchemaNode::Bool(true))
    }

    /// Visit every direct sub-schema, including ones under `items`.
    pub fn for_each_child(&self, f: &mut dyn FnMut(&SchemaNode)) {
        if let SchemaNode::Object(obj) = self {
            obj.for_each_child(f);
        }
    }
}

impl From<SchemaObject> for SchemaNode {
    fn from(obj: SchemaObject) -> Self {
        SchemaNode::object(obj)
    }
}

impl Items {
    /// The first (or only) item schema.
    pub fn first(&self) -> Option<&SchemaNode> {
        match self {
            Items::Tuple(list) => list.first(),
            Items::Single(node) => Some(node),
        }
    }

    pub fn first_mut(&mut self) -> Option<&mut SchemaNode> {
        match self {
            Items::Tuple(list) => list.first_mut(),
            Items::Single(node) => Some(node),
        }
    }

    pub fn nodes(&self) -> Vec<&SchemaNode> {
        match self {
            Items::Tuple(list) => list.iter().collect(),
            Items::Single(node) => vec![node.as_ref()],
        }
    }

    pub fn nodes_mut(&mut self) -> Vec<&mut SchemaNode> {
        match self {
            Items::Tuple(list) => list.iter_mut().collect(),
            Items::Single(node) => vec![node.as_mut()],
        }
    }
}

/// Does `value` (or its first element, for lists) satisfy `pred`?
fn value_is(value: Option<&Value>, pred: fn(&Value) -> bool) -> bool {
    match value {
        Some(Value::Array(list)) => list.first().map(pred).unwrap_or(false),
        Some(v) => pred(v),
        None => false,
    }
}

fn enum_value(values: &Option<Vec<Value>>) -> Option<&Value> {
    values.as_ref().and_then(|v| v.first())
}

impl SchemaObject {
    /// Parse a raw JSON mapping into the model.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Does `type` name `ty` (either as the string or as a member of a list)?
    pub fn type_is(&self, ty: &str) -> bool {
        match &self.type_ {
            Some(Value::String(s)) => s == ty,
            Some(Value::Array(list)) => list.iter().any(|v| v.as_str() == Some(ty)),
            _ => false,
        }
    }

    /// A scalar constraint with integer values.
    pub fn is_int_schema(&self) -> bool {
        let is_int = |v: &Value| v.is_i64() || v.is_u64();
        value_is(self.const_.as_ref(), is_int)
            || value_is(enum_value(&self.enum_), is_int)
            || value_is(self.minimum.as_ref(), is_int)
            || value_is(self.maximum.as_ref(), is_int)
    }

    /// A scalar constraint with string values.
    pub fn is_string_schema(&self) -> bool {
        value_is(self.const_.as_ref(), Value::is_string)
            || value_is(enum_value(&self.enum_), Value::is_string)
            || self.pattern.is_some()
    }

    /// Move the scalar leaf keywords out into a new object.
    pub fn take_leaf(&mut self) -> SchemaObject {
        SchemaObject {
            const_: self.const_.take(),
            enum_: self.enum_.take(),
            pattern: self.pattern.take(),
            minimum: self.minimum.take(),
            maximum: self.maximum.take(),
            multiple_of: self.multiple_of.take(),
            ..SchemaObject::default()
        }
    }

    /// True when every field is unset.
    pub fn is_empty(&self) -> bool {
        self == &SchemaObject::default()
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties
            .as_ref()
            .map(|p| p.contains_key(name))
            .unwrap_or(false)
    }

    pub fn property(&self, name: &str) -> Option<&SchemaNode> {
        self.properties.as_ref().and_then(|p| p.get(name))
    }

    /// Has nested node structure of its own.
    pub fn is_node_schema(&self) -> bool {
        self.properties.is_some()
            || self.pattern_properties.is_some()
            || self.additional_properties.is_some()
    }

    /// `required` entries, including those nested one level down in combinators.
    pub fn all_required(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for list in [&self.all_of, &self.one_of, &self.any_of].into_iter().flatten() {
            for sub in list.iter().filter_map(SchemaNode::as_object) {
                if let Some(req) = &sub.required {
                    out.extend(req.iter().map(String::as_str));
                }
            }
        }
        if let Some(req) = &self.required {
            out.extend(req.iter().map(String::as_str));
        }
        out
    }

    /// Visit every direct sub-schema.
    pub fn for_each_child(&self, f: &mut dyn FnMut(&SchemaNode)) {
        let singles = [
            &self.additional_items,
            &self.unevaluated_items,
            &self.contains,
            &self.additional_properties,
            &self.unevaluated_properties,
            &self.not,
            &self.if_,
            &self.then,
            &self.else_,
            &self.select,
        ];
        for node in singles.into_iter().flatten() {
            f(node);
        }
        if let Some(items) = &self.items {
            for node in items.nodes() {
                f(node);
            }
        }
        for list in [&self.prefix_items, &self.all_of, &self.one_of, &self.any_of]
            .into_iter()
            .flatten()
        {
            for node in list {
                f(node);
            }
        }
        for map in [&self.properties, &self.pattern_properties].into_iter().flatten() {
            for node in map.values() {
                f(node);
            }
        }
        for map in [&self.dependent_schemas, &self.defs, &self.definitions] {
            for node in map.values() {
                f(node);
            }
        }
    }
}

impl SchemaObject {
    /// Mutable counterpart of [`SchemaObject::for_each_child`].
    pub fn for_each_child_mut(&mut self, f: &mut dyn FnMut(&mut SchemaNode)) {
        let singles = [
            &mut self.additional_items,
            &mut self.unevaluated_items,
            &mut self.contains,
            &mut self.additional_properties,
            &mut self.unevaluated_properties,
            &mut self.not,
            &mut self.if_,
            &mut self.then,
            &mut self.else_,
            &mut self.select,
        ];
        for node in singles.into_iter().flatten() {
            f(node);
        }
        if let Some(items) = &mut self.items {
            for node in items.nodes_mut() {
                f(node);
            }
        }
        for list in [
            &mut self.prefix_items,
            &mut self.all_of,
            &mut self.one_of,
            &mut self.any_of,
        ]
        .into_iter()
        .flatten()
        {
            for node in list {
                f(node);
            }
        }
        for map in [&mut self.properties, &mut self.pattern_properties]
            .into_iter()
            .flatten()
        {
            for node in map.values_mut() {
                f(node);
            }
        }
        for map in [
            &mut self.dependent_schemas,
            &mut self.defs,
            &mut self.definitions,
        ] {
            for node in map.values_mut() {
                f(node);
            }
        }
    }
}

/// A finalized binding schema: a root object guaranteed to carry `$id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDoc(SchemaObject);

impl SchemaDoc {
    /// Wrap a root object. Returns `None` when it has no `$id`.
    pub fn new(root: SchemaObject) -> Option<Self> {
        root.id.as_ref()?;
        Some(SchemaDoc(root))
    }

    /// Wrap a root object, setting its `$id`.
    pub fn with_id(id: impl Into<String>, mut root: SchemaObject) -> Self {
        root.id = Some(id.into());
        SchemaDoc(root)
    }

    pub fn id(&self) -> &str {
        self.0.id.as_deref().unwrap_or_default()
    }

    pub fn filename(&self) -> Option<&str> {
        self.0.filename.as_deref()
    }

    pub fn into_inner(self) -> SchemaObject {
        self.0
    }
}

impl Deref for SchemaDoc {
    type Target = SchemaObject;

    fn deref(&self) -> &SchemaObject {
        &self.0
    }
}

impl DerefMut for SchemaDoc {
    fn deref_mut(&mut self) -> &mut SchemaObject {
        &mut self.0
    }
}
