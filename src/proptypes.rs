//! Property type engine.
//!
//! Builds a table of what type every property name has across the corpus,
//! from the `$ref`s and shapes of the normalized bindings. Names defined
//! under `patternProperties` go to a separate table matched by regex.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::loader::navigate_fragment;
use crate::normalize::{array_range, items_range};
use crate::types::{Items, SchemaDoc, SchemaNode, SchemaObject};

static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(flag|u?int(8|16|32|64)(-(array|matrix))?|string(-array)?|phandle(-array)?)")
        .expect("static regex must compile")
});

static YAML_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.yaml#?$").expect("static regex must compile"));

static MICROVOLT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-microvolt$").expect("static regex must compile"));

/// Pattern names worth keeping: something more specific than a catch-all.
static SPECIFIC_PATTERN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9a-zA-F-]{3}").expect("static regex must compile"));

/// Catch-all property names that say nothing about a property's type.
const GENERIC_NAMES: &[&str] = &[
    r"^[a-z][a-z0-9\-]*$",
    r"^[a-zA-Z][a-zA-Z0-9\-_]{0,63}$",
    r"^.*$",
    ".*",
];

/// How many dimensions an integer type has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Shape {
    Scalar,
    Array,
    Matrix,
}

/// A property value type, as named by `types.yaml` definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PropType {
    Flag,
    Node,
    Int { signed: bool, width: u8, shape: Shape },
    String,
    StringArray,
    Phandle,
    PhandleArray,
}

impl PropType {
    /// Has bounded outer and inner dimensions worth recording.
    pub fn is_dimensioned(self) -> bool {
        matches!(
            self,
            PropType::PhandleArray
                | PropType::Int {
                    shape: Shape::Matrix,
                    ..
                }
        )
    }
}

impl fmt::Display for PropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropType::Flag => f.write_str("flag"),
            PropType::Node => f.write_str("node"),
            PropType::String => f.write_str("string"),
            PropType::StringArray => f.write_str("string-array"),
            PropType::Phandle => f.write_str("phandle"),
            PropType::PhandleArray => f.write_str("phandle-array"),
            PropType::Int {
                signed,
                width,
                shape,
            } => {
                let prefix = if *signed { "int" } else { "uint" };
                let suffix = match shape {
                    Shape::Scalar => "",
                    Shape::Array => "-array",
                    Shape::Matrix => "-matrix",
                };
                write!(f, "{prefix}{width}{suffix}")
            }
        }
    }
}

impl FromStr for PropType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "flag" => PropType::Flag,
            "node" => PropType::Node,
            "string" => PropType::String,
            "string-array" => PropType::StringArray,
            "phandle" => PropType::Phandle,
            "phandle-array" => PropType::PhandleArray,
            _ => {
                let (signed, rest) = match s.strip_prefix("uint") {
                    Some(rest) => (false, rest),
                    None => (true, s.strip_prefix("int").ok_or_else(|| format!("unknown type {s:?}"))?),
                };
                let (width, shape) = match rest.split_once('-') {
                    None => (rest, Shape::Scalar),
                    Some((width, "array")) => (width, Shape::Array),
                    Some((width, "matrix")) => (width, Shape::Matrix),
                    Some(_) => return Err(format!("unknown type {s:?}")),
                };
                let width = match width {
                    "8" => 8,
                    "16" => 16,
                    "32" => 32,
                    "64" => 64,
                    _ => return Err(format!("unknown type {s:?}")),
                };
                PropType::Int {
                    signed,
                    width,
                    shape,
                }
            }
        })
    }
}

impl TryFrom<String> for PropType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PropType> for String {
    fn from(value: PropType) -> Self {
        value.to_string()
    }
}

/// `(min, max)` of one array axis; `(0, 0)` is unconstrained.
pub type Range = (u64, u64);

/// Outer (rows) and inner (cells per row) ranges of a matrix property.
pub type Dim = (Range, Range);

const NO_DIM: Dim = ((0, 0), (0, 0));

/// Combine two observed dimensions into one that admits both.
///
/// An unconstrained axis takes the other side's range.
pub fn merge_dim(a: Dim, b: Dim) -> Dim {
    fn axis(a: Range, b: Range) -> Range {
        if a == (0, 0) {
            b
        } else if b == (0, 0) {
            a
        } else {
            (a.0.min(b.0), a.1.max(b.1))
        }
    }
    (axis(a.0, b.0), axis(a.1, b.1))
}

/// One type a property is documented with, and the bindings saying so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyTypeFact {
    #[serde(rename = "type")]
    pub type_: Option<PropType>,
    #[serde(rename = "$id", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<Dim>,
}

/// Facts for a `patternProperties` name.
#[derive(Debug, Clone)]
pub struct PatternFacts {
    pub pattern: String,
    regex: Option<Regex>,
    pub facts: Vec<PropertyTypeFact>,
}

impl PatternFacts {
    fn new(pattern: String, facts: Vec<PropertyTypeFact>) -> Self {
        let regex = Regex::new(&pattern).ok();
        Self {
            pattern,
            regex,
            facts,
        }
    }

    fn is_match(&self, name: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(name))
    }
}

/// Which facts survive extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Keep facts whose type could not be determined.
    pub missing_types: bool,
    /// Keep `node` facts.
    pub node_types: bool,
}

/// Property name → type facts, for the whole corpus.
#[derive(Debug, Clone, Default)]
pub struct PropertyTypes {
    literal: BTreeMap<String, Vec<PropertyTypeFact>>,
    patterns: Vec<PatternFacts>,
}

impl PropertyTypes {
    /// Extract with default options.
    pub fn extract<'a>(schemas: impl IntoIterator<Item = &'a SchemaDoc>) -> Self {
        Self::extract_with(schemas, ExtractOptions::default())
    }

    pub fn extract_with<'a>(
        schemas: impl IntoIterator<Item = &'a SchemaDoc>,
        options: ExtractOptions,
    ) -> Self {
        let mut table = Table::default();
        for doc in schemas {
            let root = doc.to_value();
            let mut extractor = Extractor {
                root: &root,
                id: doc.id(),
                table: &mut table,
                following: Vec::new(),
            };
            extractor.subschema_types(doc);
        }

        for name in GENERIC_NAMES {
            table.facts.remove(*name);
        }

        let mut types = PropertyTypes::default();
        for (name, mut facts) in table.facts {
            facts.retain(|f| match f.type_ {
                None => options.missing_types,
                Some(PropType::Node) => options.node_types,
                Some(_) => true,
            });
            if facts.is_empty() {
                continue;
            }
            if table.patterns.contains(&name) {
                if SPECIFIC_PATTERN_RE.is_match(&name) {
                    types.patterns.push(PatternFacts::new(name, facts));
                }
            } else {
                types.literal.insert(name, facts);
            }
        }
        types
    }

    /// Rebuild from stored tables.
    pub fn from_tables(
        literal: BTreeMap<String, Vec<PropertyTypeFact>>,
        patterns: BTreeMap<String, Vec<PropertyTypeFact>>,
    ) -> Self {
        Self {
            literal,
            patterns: patterns
                .into_iter()
                .map(|(pattern, facts)| PatternFacts::new(pattern, facts))
                .collect(),
        }
    }

    pub fn literal_table(&self) -> &BTreeMap<String, Vec<PropertyTypeFact>> {
        &self.literal
    }

    pub fn pattern_table(&self) -> BTreeMap<String, Vec<PropertyTypeFact>> {
        self.patterns
            .iter()
            .map(|p| (p.pattern.clone(), p.facts.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.literal.is_empty() && self.patterns.is_empty()
    }

    /// Types `name` is documented with.
    ///
    /// Literal names win over patterns. `node` is dropped when the name
    /// also has a value type.
    pub fn property_type(&self, name: &str) -> BTreeSet<PropType> {
        let mut types: BTreeSet<PropType> = self
            .literal
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|f| f.type_)
            .collect();
        if types.is_empty() {
            types = self
                .patterns
                .iter()
                .filter(|p| p.is_match(name))
                .filter_map(|p| p.facts.first().and_then(|f| f.type_))
                .collect();
        }
        if types.len() > 1 {
            types.remove(&PropType::Node);
        }
        types
    }

    /// Dimensions recorded for a matrix property.
    pub fn property_dim(&self, name: &str) -> Option<Dim> {
        if let Some(facts) = self.literal.get(name) {
            return facts.iter().find_map(|f| f.dim);
        }
        self.patterns
            .iter()
            .filter(|p| p.is_match(name))
            .find_map(|p| p.facts.iter().find_map(|f| f.dim))
    }

    /// True when either axis of the property's dimensions is fixed.
    pub fn property_has_fixed_dimensions(&self, name: &str) -> bool {
        self.property_dim(name)
            .is_some_and(|(outer, inner)| outer.0 == outer.1 || inner.0 == inner.1)
    }

    /// Every literal property and its facts.
    pub fn all_properties(&self) -> &BTreeMap<String, Vec<PropertyTypeFact>> {
        &self.literal
    }
}

#[derive(Default)]
struct Table {
    facts: BTreeMap<String, Vec<PropertyTypeFact>>,
    patterns: BTreeSet<String>,
}

struct Extractor<'a> {
    root: &'a Value,
    id: &'a str,
    table: &'a mut Table,
    /// Local `$ref`s being followed, to stop on self-referencing definitions.
    following: Vec<String>,
}

impl Extractor<'_> {
    fn subschema_types(&mut self, schema: &SchemaObject) {
        if let Some(SchemaNode::Object(additional)) = &schema.additional_properties {
            self.subschema_types(additional);
        }
        for (map, is_pattern) in [(&schema.properties, false), (&schema.pattern_properties, true)] {
            for (name, node) in map.iter().flatten() {
                self.prop_type(name, node, is_pattern);
            }
        }
    }

    fn prop_type(&mut self, name: &str, node: &SchemaNode, is_pattern: bool) {
        if name.starts_with('$') {
            return;
        }
        let Some(schema) = node.as_object() else {
            return;
        };

        if let Some(reference) = schema.reference.as_deref().filter(|r| r.starts_with("#/")) {
            if !self.following.iter().any(|r| r == reference) {
                let target = navigate_fragment(self.root, reference)
                    .ok()
                    .and_then(|v| SchemaNode::from_value(v.clone()).ok());
                if let Some(target) = target {
                    self.following.push(reference.to_string());
                    self.prop_type(name, &target, is_pattern);
                    self.following.pop();
                }
            }
        }
        for list in [&schema.all_of, &schema.one_of, &schema.any_of].into_iter().flatten() {
            for sub in list {
                self.prop_type(name, sub, is_pattern);
            }
        }

        if !self.table.facts.contains_key(name) && is_pattern {
            self.table.patterns.insert(name.to_string());
        }
        let facts = self.table.facts.entry(name.to_string()).or_default();

        let Some(prop_type) = determine_type(name, schema) else {
            if facts.is_empty() {
                facts.push(PropertyTypeFact {
                    type_: None,
                    ids: BTreeSet::from([self.id.to_string()]),
                    dim: None,
                });
            }
            return;
        };

        let dim = if prop_type.is_dimensioned() {
            (array_range(schema), items_range(schema.items.as_ref()))
        } else {
            NO_DIM
        };
        let mut new = Some(PropertyTypeFact {
            type_: Some(prop_type),
            ids: BTreeSet::from([self.id.to_string()]),
            dim: prop_type.is_dimensioned().then_some(dim),
        });

        let new_name = prop_type.to_string();
        let mut replaced = None;
        for (index, fact) in facts.iter_mut().enumerate() {
            let Some(existing) = fact.type_ else {
                replaced = Some(index);
                break;
            };
            // Any dimensioned fact absorbs the bounds, whatever its cell width.
            if dim != NO_DIM && existing.is_dimensioned() {
                fact.dim = Some(match fact.dim {
                    Some(current) if current != dim => merge_dim(current, dim),
                    _ => dim,
                });
                return;
            }
            let existing_name = existing.to_string();
            if existing_name.starts_with(&new_name) {
                // Same or looser type already known.
                fact.ids.insert(self.id.to_string());
                new = None;
                break;
            }
            if new_name.contains(&existing_name) {
                // Scalar superseded by its array form.
                if let Some(new) = new.as_mut() {
                    new.ids.extend(fact.ids.iter().cloned());
                }
                replaced = Some(index);
                break;
            }
        }
        if let Some(index) = replaced {
            facts.remove(index);
        }
        if let Some(new) = new {
            facts.push(new);
        }

        if schema.is_node_schema() {
            self.subschema_types(schema);
        }
    }
}

fn determine_type(name: &str, schema: &SchemaObject) -> Option<PropType> {
    if schema.type_is("object") || schema.is_node_schema() {
        return Some(PropType::Node);
    }
    if let Some(found) = schema
        .reference
        .as_deref()
        .and_then(|r| TYPE_RE.find(r))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(found);
    }
    if schema.type_is("boolean") {
        return Some(PropType::Flag);
    }
    if let Some(items) = &schema.items {
        let first = match items {
            Items::Single(node) => Some(node.as_ref()),
            Items::Tuple(list) => list.first(),
        };
        if first
            .and_then(SchemaNode::as_object)
            .is_some_and(SchemaObject::is_string_schema)
        {
            return Some(PropType::StringArray);
        }
        if MICROVOLT_RE.is_match(name) {
            return Some(PropType::Int {
                signed: true,
                width: 32,
                shape: Shape::Matrix,
            });
        }
        if name.ends_with("-hz") && !name.starts_with("opp") {
            return Some(PropType::Int {
                signed: false,
                width: 32,
                shape: Shape::Matrix,
            });
        }
        return None;
    }
    if schema
        .reference
        .as_deref()
        .is_some_and(|r| YAML_REF_RE.is_match(r))
    {
        return Some(PropType::Node);
    }
    None
}
