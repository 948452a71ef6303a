//! Subject trees: devicetree documents to validate.
//!
//! A subject document is the YAML rendering of one or more devicetrees. Each
//! mapping is a node, mapping-valued entries are child nodes, and every other
//! entry is a property whose value is an array of cells or strings. Sized
//! integer rows carry a `!u8`/`!u16`/`!u32`/`!u64` tag and phandle cells a
//! `!phandle` tag; plain JSON has no room for those, so they are kept in a
//! side table keyed by JSON pointer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::SubjectError;
use crate::loader::{load_document, load_tagged_yaml, load_tagged_yaml_str};

/// Side-channel marker attached to a value by its YAML tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellTag {
    /// Bit width of every cell in a tagged row.
    Width(u8),
    /// The value is a phandle reference.
    Phandle,
}

impl CellTag {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim_start_matches('!') {
            "u8" => Some(CellTag::Width(8)),
            "u16" => Some(CellTag::Width(16)),
            "u32" => Some(CellTag::Width(32)),
            "u64" => Some(CellTag::Width(64)),
            "phandle" => Some(CellTag::Phandle),
            _ => None,
        }
    }
}

/// Tags of a subject document, by JSON pointer.
#[derive(Debug, Clone, Default)]
pub struct CellTags(BTreeMap<String, CellTag>);

impl CellTags {
    pub fn get(&self, pointer: &str) -> Option<CellTag> {
        self.0.get(pointer).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, CellTag)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Zero-based line and column of mapping keys and sequence entries, by JSON pointer.
///
/// Built from a scan of block-style YAML; content inside flow collections
/// is attributed to the key that opens it, and block scalar (`|`, `>`)
/// bodies are skipped.
#[derive(Debug, Clone, Default)]
pub struct PositionIndex(BTreeMap<String, (usize, usize)>);

struct OpenEntry {
    indent: usize,
    pointer: String,
    sequence_item: bool,
}

impl PositionIndex {
    pub fn from_yaml(content: &str) -> Self {
        let mut positions = BTreeMap::new();
        let mut stack: Vec<OpenEntry> = Vec::new();
        let mut item_counts: HashMap<String, usize> = HashMap::new();
        let mut flow_depth = 0i32;
        // Indent of the entry owning an open block scalar.
        let mut block_owner: Option<usize> = None;

        for (line_no, line) in content.lines().enumerate() {
            if flow_depth > 0 {
                flow_depth += bracket_delta(line);
                continue;
            }
            let trimmed = line.trim_start();
            if let Some(owner) = block_owner {
                if trimmed.is_empty() || line.len() - trimmed.len() > owner {
                    continue;
                }
                block_owner = None;
            }
            if trimmed.is_empty()
                || trimmed.starts_with('#')
                || trimmed.starts_with('%')
                || trimmed.starts_with("...")
            {
                continue;
            }
            if trimmed.starts_with("---") {
                stack.clear();
                continue;
            }

            let mut indent = line.len() - trimmed.len();
            let mut owner = indent;
            let mut rest = trimmed;

            while let Some(after) = rest
                .strip_prefix("- ")
                .or_else(|| (rest == "-").then_some(""))
            {
                while stack
                    .last()
                    .is_some_and(|e| e.indent > indent || (e.indent == indent && e.sequence_item))
                {
                    stack.pop();
                }
                let parent = stack.last().map(|e| e.pointer.as_str()).unwrap_or("");
                let count = item_counts.entry(format!("{parent}@{indent}")).or_insert(0);
                let pointer = format!("{parent}/{count}");
                *count += 1;
                positions.insert(pointer.clone(), (line_no, indent));
                stack.push(OpenEntry {
                    indent,
                    pointer,
                    sequence_item: true,
                });

                let value = after.trim_start();
                owner = indent;
                indent += rest.len() - value.len();
                rest = value;
            }
            if rest.is_empty() {
                continue;
            }
            if is_block_scalar(rest) {
                block_owner = Some(owner);
                continue;
            }

            let Some((key, value)) = split_key(rest) else {
                flow_depth = bracket_delta(rest).max(0);
                continue;
            };
            while stack.last().is_some_and(|e| e.indent >= indent) {
                stack.pop();
            }
            let parent = stack.last().map(|e| e.pointer.as_str()).unwrap_or("");
            let pointer = format!("{parent}/{}", escape_pointer(&key));
            positions.insert(pointer.clone(), (line_no, indent));

            let value = value.trim();
            if is_block_scalar(value) {
                block_owner = Some(indent);
            } else if value.is_empty() || value.starts_with('#') {
                stack.push(OpenEntry {
                    indent,
                    pointer,
                    sequence_item: false,
                });
            } else {
                flow_depth = bracket_delta(value).max(0);
            }
        }

        PositionIndex(positions)
    }

    /// Exact position of a key or sequence entry.
    pub fn get(&self, pointer: &str) -> Option<(usize, usize)> {
        self.0.get(pointer).copied()
    }

    /// Position of `pointer`, or of its nearest ancestor with one.
    ///
    /// Synthesized `$nodename` entries have no position.
    pub fn locate(&self, pointer: &str) -> Option<(usize, usize)> {
        if pointer.ends_with("/$nodename") {
            return None;
        }
        let mut current = pointer;
        loop {
            if let Some(pos) = self.get(current) {
                return Some(pos);
            }
            current = &current[..current.rfind('/')?];
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Split `key: value` (or `key:`) into its parts. Handles quoted keys.
fn split_key(text: &str) -> Option<(String, &str)> {
    let first = text.chars().next()?;
    if first == '"' || first == '\'' {
        let body = &text[1..];
        let mut escaped = false;
        for (i, c) in body.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            if c == '\\' && first == '"' {
                escaped = true;
                continue;
            }
            if c == first {
                let after = &body[i + 1..];
                let value = after.strip_prefix(':')?;
                if !(value.is_empty() || value.starts_with(' ')) {
                    return None;
                }
                return Some((body[..i].to_string(), value));
            }
        }
        return None;
    }
    if matches!(first, '[' | '{' | ']' | '}' | ',' | '#' | '&' | '*' | '!' | '|' | '>') {
        return None;
    }
    let idx = text
        .find(": ")
        .or_else(|| text.ends_with(':').then(|| text.len() - 1))?;
    Some((text[..idx].trim_end().to_string(), &text[idx + 1..]))
}

/// A `|` or `>` header, with optional chomping and indentation indicators.
fn is_block_scalar(value: &str) -> bool {
    let header = value.split(" #").next().unwrap_or_default().trim_end();
    let mut chars = header.chars();
    matches!(chars.next(), Some('|' | '>'))
        && chars.all(|c| matches!(c, '-' | '+' | '1'..='9'))
}

/// Net count of flow brackets opened on a line, ignoring quoted text.
fn bracket_delta(text: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for c in text.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '#') => break,
            (None, '[' | '{') => depth += 1,
            (None, ']' | '}') => depth -= 1,
            _ => {}
        }
    }
    depth
}

pub(crate) fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// A node while walking a [`SubjectTree`].
#[derive(Debug, Clone)]
pub struct SubjectNode<'a> {
    /// Node name; `/` for a root.
    pub name: &'a str,
    /// Devicetree path, e.g. `/soc/serial@1000`.
    pub path: String,
    /// JSON pointer of the node within the document.
    pub pointer: String,
    pub value: &'a Value,
}

impl SubjectNode<'_> {
    /// The node's `compatible` strings.
    pub fn compatibles(&self) -> Vec<&str> {
        self.value
            .get("compatible")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// A parsed subject document.
#[derive(Debug, Clone)]
pub struct SubjectTree {
    path: PathBuf,
    root: Value,
    tags: CellTags,
    positions: PositionIndex,
}

impl SubjectTree {
    /// Load a YAML (or untagged JSON) subject document.
    pub fn load(path: &Path) -> Result<Self, SubjectError> {
        let load_error = |source| SubjectError::Load {
            path: path.to_path_buf(),
            source,
        };
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            let value = load_document(path).map_err(load_error)?;
            return Self::from_json(path, value);
        }
        let (content, value) = load_tagged_yaml(path).map_err(load_error)?;
        Self::from_yaml_value(path, &content, value)
    }

    /// Parse a subject document held in memory.
    pub fn from_yaml_str(path: impl Into<PathBuf>, content: &str) -> Result<Self, SubjectError> {
        let path = path.into();
        let value = load_tagged_yaml_str(content).map_err(|source| SubjectError::Load {
            path: path.clone(),
            source,
        })?;
        Self::from_yaml_value(&path, content, value)
    }

    fn from_yaml_value(
        path: &Path,
        content: &str,
        value: serde_yaml::Value,
    ) -> Result<Self, SubjectError> {
        let mut tags = CellTags::default();
        let root = convert_yaml(value, "", &mut tags).map_err(|message| SubjectError::NotATree {
            path: path.to_path_buf(),
            message,
        })?;
        let mut tree = Self {
            path: path.to_path_buf(),
            root,
            tags,
            positions: PositionIndex::from_yaml(content),
        };
        tree.finish()?;
        Ok(tree)
    }

    fn from_json(path: &Path, root: Value) -> Result<Self, SubjectError> {
        let mut tree = Self {
            path: path.to_path_buf(),
            root,
            tags: CellTags::default(),
            positions: PositionIndex::default(),
        };
        tree.finish()?;
        Ok(tree)
    }

    fn finish(&mut self) -> Result<(), SubjectError> {
        let pointers = self.tree_pointers();
        if pointers.is_empty() {
            return Err(SubjectError::NotATree {
                path: self.path.clone(),
                message: "expected a mapping or a list of mappings".to_string(),
            });
        }
        for pointer in pointers {
            if let Some(node) = self.root.pointer_mut(&pointer) {
                inject_nodenames(node, "/");
            }
        }
        Ok(())
    }

    fn tree_pointers(&self) -> Vec<String> {
        match &self.root {
            Value::Object(_) => vec![String::new()],
            Value::Array(list) if list.iter().all(Value::is_object) => {
                (0..list.len()).map(|i| format!("/{i}")).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole document, as JSON.
    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn tags(&self) -> &CellTags {
        &self.tags
    }

    pub fn positions(&self) -> &PositionIndex {
        &self.positions
    }

    /// Every node of every tree, parents before children.
    pub fn nodes(&self) -> Vec<SubjectNode<'_>> {
        let mut out = Vec::new();
        for pointer in self.tree_pointers() {
            if let Some(value) = self.root.pointer(&pointer) {
                collect_nodes("/", "/".to_string(), pointer, value, &mut out);
            }
        }
        out
    }

    /// Every `compatible` string used anywhere in the document.
    pub fn compatibles(&self) -> BTreeSet<String> {
        self.nodes()
            .iter()
            .flat_map(|node| node.compatibles())
            .map(String::from)
            .collect()
    }
}

fn collect_nodes<'a>(
    name: &'a str,
    path: String,
    pointer: String,
    value: &'a Value,
    out: &mut Vec<SubjectNode<'a>>,
) {
    let Value::Object(map) = value else {
        return;
    };
    let children: Vec<(&'a str, &'a Value)> = map
        .iter()
        .filter(|(_, v)| v.is_object())
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    out.push(SubjectNode {
        name,
        path: path.clone(),
        pointer: pointer.clone(),
        value,
    });
    for (child, child_value) in children {
        let child_path = if path == "/" {
            format!("/{child}")
        } else {
            format!("{path}/{child}")
        };
        let child_pointer = format!("{pointer}/{}", escape_pointer(child));
        collect_nodes(child, child_path, child_pointer, child_value, out);
    }
}

fn inject_nodenames(node: &mut Value, name: &str) {
    let Value::Object(map) = node else {
        return;
    };
    for (child, value) in map.iter_mut() {
        if value.is_object() {
            inject_nodenames(value, child);
        }
    }
    map.insert("$nodename".to_string(), Value::Array(vec![Value::from(name)]));
}

fn yaml_key(key: serde_yaml::Value) -> Result<String, String> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok("null".to_string()),
        other => Err(format!("unsupported mapping key {other:?}")),
    }
}

fn convert_yaml(value: serde_yaml::Value, pointer: &str, tags: &mut CellTags) -> Result<Value, String> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::from(u)
            } else if let Some(i) = n.as_i64() {
                Value::from(i)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(list) => Value::Array(
            list.into_iter()
                .enumerate()
                .map(|(i, v)| convert_yaml(v, &format!("{pointer}/{i}"), tags))
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, v) in mapping {
                let key = yaml_key(key)?;
                let child = format!("{pointer}/{}", escape_pointer(&key));
                map.insert(key, convert_yaml(v, &child, tags)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            match CellTag::from_tag(&tag) {
                Some(cell_tag) => {
                    tags.0.insert(pointer.to_string(), cell_tag);
                }
                None => tracing::debug!(%tag, pointer, "ignoring unknown tag"),
            }
            convert_yaml(tagged.value, pointer, tags)?
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = "\
- '#address-cells': [[0x1]]
  compatible: [\"vendor,board\"]
  soc:
    serial@1000:
      compatible: [\"vendor,uart\"]
      reg: [[0x1000, 0x100]]
      clocks: [[!phandle 0x2, 0x3]]
      data: [!u8 [0x1, 0x2]]
";

    #[test]
    fn nodes_get_nodenames_and_paths() {
        let tree = SubjectTree::from_yaml_str("board.yaml", SAMPLE).unwrap();
        let nodes = tree.nodes();
        let paths: Vec<_> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/soc", "/soc/serial@1000"]);

        assert_eq!(nodes[0].value["$nodename"], json!(["/"]));
        assert_eq!(nodes[2].value["$nodename"], json!(["serial@1000"]));
        assert_eq!(nodes[2].pointer, "/0/soc/serial@1000");
        assert_eq!(nodes[2].compatibles(), vec!["vendor,uart"]);
    }

    #[test]
    fn tags_are_recorded_by_pointer() {
        let tree = SubjectTree::from_yaml_str("board.yaml", SAMPLE).unwrap();
        assert_eq!(
            tree.tags().get("/0/soc/serial@1000/data/0"),
            Some(CellTag::Width(8))
        );
        assert_eq!(
            tree.tags().get("/0/soc/serial@1000/clocks/0/0"),
            Some(CellTag::Phandle)
        );
        assert_eq!(
            tree.root().pointer("/0/soc/serial@1000/data"),
            Some(&json!([[1, 2]]))
        );
    }

    #[test]
    fn positions_follow_block_keys() {
        let tree = SubjectTree::from_yaml_str("board.yaml", SAMPLE).unwrap();
        let positions = tree.positions();
        assert_eq!(positions.get("/0"), Some((0, 0)));
        assert_eq!(positions.get("/0/#address-cells"), Some((0, 2)));
        assert_eq!(positions.get("/0/soc/serial@1000/reg"), Some((5, 6)));
        assert_eq!(positions.locate("/0/soc/serial@1000/reg/0/1"), Some((5, 6)));
        assert_eq!(positions.locate("/0/soc/$nodename"), None);
    }

    #[test]
    fn compatibles_collects_every_node() {
        let tree = SubjectTree::from_yaml_str("board.yaml", SAMPLE).unwrap();
        let all: Vec<_> = tree.compatibles().into_iter().collect();
        assert_eq!(all, vec!["vendor,board", "vendor,uart"]);
    }

    #[test]
    fn single_mapping_document_is_a_tree() {
        let tree = SubjectTree::from_yaml_str("x.yaml", "compatible: [\"a,b\"]\n").unwrap();
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.nodes()[0].pointer, "");
    }

    #[test]
    fn scalar_document_is_rejected() {
        let err = SubjectTree::from_yaml_str("x.yaml", "42\n").unwrap_err();
        assert!(matches!(err, SubjectError::NotATree { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn multi_line_flow_values_are_skipped() {
        let index = PositionIndex::from_yaml("a: [1,\n  2]\nb:\n  c: x\n");
        assert_eq!(index.get("/a"), Some((0, 0)));
        assert_eq!(index.get("/b/c"), Some((3, 2)));
    }

    #[test]
    fn block_scalar_bodies_are_not_keys() {
        let index = PositionIndex::from_yaml(
            "label: |\n  first: line\n\n  second: line\nreg: [[1]]\nnames:\n  - >-\n    a: b\n  - c: d\n",
        );
        assert_eq!(index.get("/label"), Some((0, 0)));
        assert_eq!(index.get("/first"), None);
        assert_eq!(index.get("/second"), None);
        assert_eq!(index.get("/reg"), Some((4, 0)));
        assert_eq!(index.get("/names/0"), Some((6, 2)));
        assert_eq!(index.get("/names/0/a"), None);
        assert_eq!(index.get("/names/1/c"), Some((8, 4)));
    }
}
