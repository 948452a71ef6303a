//! Diagnostics and their rendering.
//!
//! Validation errors are anchored to a source position through the
//! subject's [`PositionIndex`](crate::subject::PositionIndex), and errors
//! from `oneOf`/`anyOf` are expanded into the branch failures that caused
//! them so users see why no alternative matched.

use std::fmt;
use std::path::PathBuf;

use jsonschema::ValidationError;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::SchemaDraft;
use crate::resolver::{encode_fragment, DocumentStore, Resolver};
use crate::subject::{escape_pointer, SubjectNode, SubjectTree};

/// What a diagnostic is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// No binding claims the node.
    NoMatchingSchema,
    /// A binding claimed the node and the node breaks it.
    Validation,
    /// A `compatible` string no binding documents.
    UndocumentedCompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One branch failure behind a combinator error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cause {
    pub path: Vec<String>,
    pub position: Option<(usize, usize)>,
    pub message: String,
}

/// A problem found in a subject document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub file: PathBuf,
    /// Zero-based line and column, when the value has a source position.
    pub position: Option<(usize, usize)>,
    /// Devicetree path of the node.
    pub node_path: String,
    /// Property path within the node.
    pub path: Vec<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<Cause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    fn write_location(
        &self,
        f: &mut fmt::Formatter<'_>,
        position: Option<(usize, usize)>,
        path: &[String],
    ) -> fmt::Result {
        match position {
            Some((line, col)) => write!(f, "{}:{}:{}: ", self.file.display(), line + 1, col + 1)?,
            None => write!(f, "{}: ", self.file.display())?,
        }
        write!(f, "{}: ", self.node_path)?;
        for segment in path {
            write!(f, "{segment}:")?;
        }
        if !path.is_empty() {
            write!(f, " ")?;
        }
        Ok(())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_location(f, self.position, &self.path)?;
        write!(f, "{}", self.message)?;
        if !self.causes.is_empty() {
            write!(f, " (Possible causes of the failure):")?;
            for cause in &self.causes {
                write!(f, "\n\t")?;
                self.write_location(f, cause.position, &cause.path)?;
                write!(f, "{}", cause.message)?;
            }
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n\thint: {hint}")?;
        }
        if let Some(id) = &self.schema_id {
            write!(f, "\n\tfrom schema $id: {id}")?;
        }
        Ok(())
    }
}

/// Split a JSON pointer into unescaped segments.
pub(crate) fn pointer_segments(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn join_pointer(base: &str, segments: &[String]) -> String {
    let mut pointer = base.to_string();
    for segment in segments {
        pointer.push('/');
        pointer.push_str(&escape_pointer(segment));
    }
    pointer
}

fn subject_file(tree: &SubjectTree) -> PathBuf {
    std::path::absolute(tree.path()).unwrap_or_else(|_| tree.path().to_path_buf())
}

/// A node no binding claims.
pub(crate) fn no_matching_schema(tree: &SubjectTree, node: &SubjectNode<'_>) -> Diagnostic {
    let compatibles = node.compatibles();
    let message = if compatibles.is_empty() {
        "failed to match any schema".to_string()
    } else {
        format!("failed to match any schema with compatible: {compatibles:?}")
    };
    Diagnostic {
        kind: DiagnosticKind::NoMatchingSchema,
        severity: Severity::Error,
        file: subject_file(tree),
        position: tree.positions().locate(&node.pointer),
        node_path: node.path.clone(),
        path: Vec::new(),
        message,
        schema_id: None,
        causes: Vec::new(),
        hint: None,
    }
}

/// A `compatible` string used by a node but documented nowhere.
pub(crate) fn undocumented_compatible(
    tree: &SubjectTree,
    node: &SubjectNode<'_>,
    compatible: &str,
) -> Diagnostic {
    Diagnostic {
        kind: DiagnosticKind::UndocumentedCompatible,
        severity: Severity::Warning,
        file: subject_file(tree),
        position: tree.positions().locate(&format!("{}/compatible", node.pointer)),
        node_path: node.path.clone(),
        path: vec!["compatible".to_string()],
        message: format!("{compatible:?} is not documented in any schema"),
        schema_id: None,
        causes: Vec::new(),
        hint: None,
    }
}

/// What is needed to explain a failed validation.
pub(crate) struct ErrorContext<'a> {
    pub tree: &'a SubjectTree,
    pub node: &'a SubjectNode<'a>,
    pub schema_id: &'a str,
    /// The binding as handed to the validation engine.
    pub schema: &'a Value,
    pub store: &'a DocumentStore,
    pub draft: SchemaDraft,
}

/// Turn one validation error into a diagnostic.
pub(crate) fn validation_error(ctx: &ErrorContext<'_>, error: &ValidationError<'_>) -> Diagnostic {
    let path = pointer_segments(&error.instance_path.to_string());
    let schema_path = error.schema_path.to_string();
    let pointer = join_pointer(&ctx.node.pointer, &path);

    Diagnostic {
        kind: DiagnosticKind::Validation,
        severity: Severity::Error,
        file: subject_file(ctx.tree),
        position: ctx.tree.positions().locate(&pointer),
        node_path: ctx.node.path.clone(),
        path: path.clone(),
        message: error.to_string(),
        schema_id: Some(ctx.schema_id.to_string()),
        causes: combinator_causes(ctx, &schema_path, &path),
        hint: schema_hint(ctx.store, ctx.schema_id, ctx.schema, &schema_path),
    }
}

/// Re-validate each branch of a failed `oneOf`/`anyOf` to explain the failure.
///
/// The deepest branch failure comes first. Empty when any branch passes,
/// which means the combinator failed by matching more than once.
fn combinator_causes(ctx: &ErrorContext<'_>, schema_path: &str, path: &[String]) -> Vec<Cause> {
    if !(schema_path.ends_with("/oneOf") || schema_path.ends_with("/anyOf")) {
        return Vec::new();
    }
    let Some(location) = locate_schema(ctx.store, ctx.schema_id, ctx.schema, schema_path) else {
        return Vec::new();
    };
    let Some(branches) = location.node.as_array() else {
        return Vec::new();
    };
    let Some(instance) = ctx.node.value.pointer(&join_pointer("", path)) else {
        return Vec::new();
    };

    let mut failures: Vec<(Vec<String>, String)> = Vec::new();
    for index in 0..branches.len() {
        let reference = format!(
            "{}#{}",
            location.document,
            encode_fragment(&format!("{}/{index}", location.pointer))
        );
        let branch = serde_json::json!({ "$ref": reference });
        let Ok(validator) = crate::validator::build_validator(ctx.store, ctx.draft, &branch) else {
            return Vec::new();
        };
        let errors: Vec<_> = validator
            .iter_errors(instance)
            .map(|e| {
                let mut full = path.to_vec();
                full.extend(pointer_segments(&e.instance_path.to_string()));
                (full, e.to_string())
            })
            .collect();
        if errors.is_empty() {
            return Vec::new();
        }
        failures.extend(errors);
    }

    // Deepest first; the sort is stable so branch order breaks ties.
    failures.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    let mut causes: Vec<Cause> = Vec::new();
    for (index, (full, message)) in failures.into_iter().enumerate() {
        if index > 0 && full.len() == path.len() {
            continue;
        }
        if causes.iter().any(|c| c.path == full && c.message == message) {
            continue;
        }
        let pointer = join_pointer(&ctx.node.pointer, &full);
        causes.push(Cause {
            position: ctx.tree.positions().locate(&pointer),
            path: full,
            message,
        });
    }
    causes
}

/// Where a schema path ends up after following `$ref`s.
#[derive(Debug, Clone)]
pub(crate) struct SchemaLocation {
    /// Document the final node lives in, without fragment.
    pub document: Url,
    /// JSON pointer of the node within `document`.
    pub pointer: String,
    pub node: Value,
}

/// Walk `schema_path` from `root`, following `$ref` segments into the
/// documents they name.
pub(crate) fn locate_schema(
    store: &DocumentStore,
    base: &str,
    root: &Value,
    schema_path: &str,
) -> Option<SchemaLocation> {
    locate_segments(store, base, root, &pointer_segments(schema_path))
}

fn locate_segments(
    store: &DocumentStore,
    base: &str,
    root: &Value,
    segments: &[String],
) -> Option<SchemaLocation> {
    let resolver = Resolver::new(store, base).ok()?;
    walk(&resolver, root, String::new(), segments)
}

fn walk(
    resolver: &Resolver<'_>,
    node: &Value,
    pointer: String,
    segments: &[String],
) -> Option<SchemaLocation> {
    let Some((first, rest)) = segments.split_first() else {
        let mut document = resolver.resolution_scope();
        document.set_fragment(None);
        return Some(SchemaLocation {
            document,
            pointer,
            node: node.clone(),
        });
    };

    // Under `properties`, `$ref` can also be a plain property name.
    if let Some(reference) = (first == "$ref")
        .then(|| node.get("$ref").and_then(Value::as_str))
        .flatten()
    {
        let (document, target_pointer) = resolver.locate(reference).ok()?;
        let (_, target) = resolver.resolve(reference).ok()?;
        let _scope = resolver.push_scope(document);
        return walk(resolver, &target, target_pointer, rest);
    }

    let child = match node {
        Value::Array(list) => list.get(first.parse::<usize>().ok()?)?,
        Value::Object(map) => map.get(first)?,
        _ => return None,
    };
    walk(
        resolver,
        child,
        format!("{pointer}/{}", escape_pointer(first)),
        rest,
    )
}

/// Description of the nearest schema enclosing the keyword at the end of
/// `schema_path`.
///
/// The search stops at the last `$ref` on the path, and a document's own
/// top-level description never counts.
pub fn schema_hint(
    store: &DocumentStore,
    base: &str,
    root: &Value,
    schema_path: &str,
) -> Option<String> {
    let segments = pointer_segments(schema_path);
    let floor = (0..segments.len())
        .rev()
        .find(|&i| segments[i] == "$ref" && (i == 0 || segments[i - 1] != "properties"))
        .map_or(0, |i| i + 1);
    (floor..segments.len()).rev().find_map(|end| {
        let location = locate_segments(store, base, root, &segments[..end])?;
        if location.pointer.is_empty() {
            return None;
        }
        location
            .node
            .get("description")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diagnostic() -> Diagnostic {
        Diagnostic {
            kind: DiagnosticKind::Validation,
            severity: Severity::Error,
            file: PathBuf::from("/work/board.yaml"),
            position: Some((4, 6)),
            node_path: "/soc/serial@1000".to_string(),
            path: vec!["reg".to_string()],
            message: "[[1]] is too short".to_string(),
            schema_id: Some("http://devicetree.org/schemas/serial/uart.yaml#".to_string()),
            causes: Vec::new(),
            hint: None,
        }
    }

    #[test]
    fn display_matches_compiler_style() {
        assert_eq!(
            diagnostic().to_string(),
            "/work/board.yaml:5:7: /soc/serial@1000: reg: [[1]] is too short\n\
             \tfrom schema $id: http://devicetree.org/schemas/serial/uart.yaml#"
        );
    }

    #[test]
    fn display_without_position_or_path() {
        let mut d = diagnostic();
        d.position = None;
        d.path.clear();
        d.schema_id = None;
        d.hint = Some("Use interrupts-extended".to_string());
        assert_eq!(
            d.to_string(),
            "/work/board.yaml: /soc/serial@1000: [[1]] is too short\n\thint: Use interrupts-extended"
        );
    }

    #[test]
    fn causes_are_indented() {
        let mut d = diagnostic();
        d.schema_id = None;
        d.message = "is not valid under any of the given schemas".to_string();
        d.causes.push(Cause {
            path: vec!["reg".to_string(), "0".to_string()],
            position: None,
            message: "too short".to_string(),
        });
        assert_eq!(
            d.to_string(),
            "/work/board.yaml:5:7: /soc/serial@1000: reg: is not valid under any of the given schemas \
             (Possible causes of the failure):\n\
             \t/work/board.yaml: /soc/serial@1000: reg:0: too short"
        );
    }

    #[test]
    fn pointer_segments_unescape() {
        assert_eq!(pointer_segments(""), Vec::<String>::new());
        assert_eq!(pointer_segments("/a~1b/0"), vec!["a/b", "0"]);
    }

    #[test]
    fn locate_follows_refs_across_documents() {
        let store = DocumentStore::new([(
            "http://devicetree.org/schemas/types.yaml#",
            json!({
                "$id": "http://devicetree.org/schemas/types.yaml#",
                "definitions": { "uint32": { "description": "A cell", "maxItems": 1 } }
            }),
        )]);
        let root = json!({
            "properties": { "p": { "$ref": "types.yaml#/definitions/uint32" } }
        });
        let base = "http://devicetree.org/schemas/uart.yaml#";

        let location = locate_schema(&store, base, &root, "/properties/p/$ref").unwrap();
        assert_eq!(location.document.as_str(), "http://devicetree.org/schemas/types.yaml");
        assert_eq!(location.pointer, "/definitions/uint32");

        let hint = schema_hint(&store, base, &root, "/properties/p/$ref/maxItems");
        assert_eq!(hint.as_deref(), Some("A cell"));
        assert_eq!(schema_hint(&store, base, &root, "/properties/q/maxItems"), None);
    }

    #[test]
    fn hint_comes_from_nearest_described_ancestor() {
        let store = DocumentStore::default();
        let base = "http://devicetree.org/schemas/uart.yaml#";
        let root = json!({
            "description": "A UART",
            "properties": {
                "lanes": {
                    "description": "Number of lanes",
                    "items": [{ "items": [{ "maximum": 4 }] }]
                },
                "mode": { "maxItems": 1 }
            }
        });

        let hint = schema_hint(&store, base, &root, "/properties/lanes/items/0/items/0/maximum");
        assert_eq!(hint.as_deref(), Some("Number of lanes"));
        assert_eq!(schema_hint(&store, base, &root, "/properties/mode/maxItems"), None);
    }
}
