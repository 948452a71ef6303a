//! The schema corpus: every usable binding, normalized and indexed by `$id`.
//!
//! Schemas that fail to parse or break their meta-schema are skipped with a
//! warning rather than failing the whole load. A processed corpus can be
//! written out as a snapshot and read back without reprocessing.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::config::SessionOptions;
use crate::error::{CorpusError, SchemaError};
use crate::loader::{collect_files, load_document, load_mapping, load_yaml_str};
use crate::metaschema::{MetaSchemaChecker, CORE_SCHEMA_SOURCES};
use crate::normalize::normalize_schema;
use crate::proptypes::{PropertyTypeFact, PropertyTypes};
use crate::resolver::DocumentStore;
use crate::select::{add_select_schema, schema_compatibles};
use crate::types::{
    SchemaDoc, SchemaObject, GENERATED_COMPATIBLES_ID, GENERATED_PATTERN_TYPES_ID,
    GENERATED_TYPES_ID,
};

/// Compatible values that look like regular expressions.
static PATTERN_LIKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*[\^\[{\(\$].*").expect("static regex must compile"));

/// The catch-all compatible pattern some bindings use; it would accept anything.
const GENERIC_COMPATIBLE_PATTERN: &str = r"^[a-zA-Z0-9][a-zA-Z0-9,+\-._/]+$";

/// Prefix for `$filename` of schemas built into the crate.
const BUILTIN_PREFIX: &str = "builtin:schemas/";

enum Source {
    File(PathBuf),
    Builtin {
        name: &'static str,
        content: &'static str,
    },
}

/// Load, check and normalize one binding file.
///
/// # Errors
///
/// Returns a [`SchemaError`] describing why the file must be skipped.
pub fn process_schema(
    path: &Path,
    checker: &MetaSchemaChecker,
    options: &SessionOptions,
) -> Result<SchemaDoc, SchemaError> {
    let raw = load_mapping(path).map_err(|source| SchemaError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    process_value(path, raw, checker, options)
}

fn process_value(
    path: &Path,
    raw: Value,
    checker: &MetaSchemaChecker,
    options: &SessionOptions,
) -> Result<SchemaDoc, SchemaError> {
    if let Some(violation) = checker.first_violation(&raw) {
        return Err(SchemaError::Structural {
            path: path.to_path_buf(),
            keyword_path: violation.keyword_path,
            message: violation.message,
        });
    }

    let mut root = SchemaObject::from_value(raw).map_err(|source| SchemaError::Model {
        path: path.to_path_buf(),
        source,
    })?;
    normalize_schema(&mut root, options.draft);
    add_select_schema(&mut root, &options.generic_compatibles);
    root.type_ = Some(Value::from("object"));
    root.filename = Some(path.display().to_string());

    SchemaDoc::new(root).ok_or_else(|| SchemaError::MissingId {
        path: path.to_path_buf(),
    })
}

fn process_source(
    source: &Source,
    checker: &MetaSchemaChecker,
    options: &SessionOptions,
) -> Result<SchemaDoc, SchemaError> {
    match source {
        Source::File(path) => process_schema(path, checker, options),
        Source::Builtin { name, content } => {
            let path = PathBuf::from(format!("{BUILTIN_PREFIX}{name}"));
            let raw = load_yaml_str(content).map_err(|source| SchemaError::Load {
                path: path.clone(),
                source,
            })?;
            process_value(&path, raw, checker, options)
        }
    }
}

/// Synthesize the schema accepting every documented compatible string.
pub fn make_compatible_schema<'a>(schemas: impl IntoIterator<Item = &'a SchemaDoc>) -> SchemaDoc {
    let mut literals = BTreeSet::new();
    let mut patterns = BTreeSet::new();
    for doc in schemas {
        for compatible in schema_compatibles(doc) {
            if PATTERN_LIKE_RE.is_match(&compatible) {
                if compatible != GENERIC_COMPATIBLE_PATTERN {
                    patterns.insert(compatible);
                }
            } else {
                literals.insert(compatible);
            }
        }
    }

    // Example bindings use "foo" compatibles.
    let mut any_of = vec![json!({ "enum": literals }), json!({ "pattern": "^foo" })];
    any_of.extend(patterns.into_iter().map(|p| json!({ "pattern": p })));

    let raw = json!({
        "$id": GENERATED_COMPATIBLES_ID,
        "$filename": "Generated schema of documented compatible strings",
        "select": true,
        "properties": { "compatible": { "items": { "anyOf": any_of } } }
    });
    SchemaDoc::with_id(
        GENERATED_COMPATIBLES_ID,
        SchemaObject::from_value(raw).unwrap_or_default(),
    )
}

fn is_generated(id: &str) -> bool {
    let id = id.strip_suffix('#').unwrap_or(id);
    [
        GENERATED_COMPATIBLES_ID,
        GENERATED_TYPES_ID,
        GENERATED_PATTERN_TYPES_ID,
    ]
    .iter()
    .any(|generated| generated.strip_suffix('#').unwrap_or(generated) == id)
}

/// Normalized bindings by `$id`, plus the derived tables.
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    schemas: BTreeMap<String, SchemaDoc>,
    types: PropertyTypes,
    store: DocumentStore,
}

impl CorpusIndex {
    /// Scan `options.schema_paths`, process every binding found, and index them.
    ///
    /// Directories are searched recursively for `*.yaml`. Duplicate `$id`s
    /// keep the first schema loaded.
    ///
    /// # Errors
    ///
    /// Returns `CorpusError::Empty` when no schema survives loading.
    pub fn load(options: &SessionOptions) -> Result<Self, CorpusError> {
        let checker = MetaSchemaChecker::new()?;

        let mut sources = Vec::new();
        for path in &options.schema_paths {
            if path.is_dir() {
                let files = collect_files(path, &["yaml"]);
                if files.is_empty() {
                    tracing::warn!("no schema found in path: {}", path.display());
                }
                sources.extend(files.into_iter().map(Source::File));
            } else {
                sources.push(Source::File(path.clone()));
            }
        }
        if options.core_schemas {
            sources.extend(
                CORE_SCHEMA_SOURCES
                    .iter()
                    .map(|&(name, content)| Source::Builtin { name, content }),
            );
        }

        let processed: Vec<_> = sources
            .par_iter()
            .map(|source| process_source(source, &checker, options))
            .collect();

        let mut schemas = BTreeMap::new();
        for result in processed {
            let doc = match result {
                Ok(doc) => doc,
                Err(err) => {
                    tracing::warn!("{err}");
                    continue;
                }
            };
            match schemas.entry(doc.id().to_string()) {
                Entry::Vacant(slot) => {
                    tracing::debug!(id = doc.id(), "loaded schema");
                    slot.insert(doc);
                }
                Entry::Occupied(_) => {
                    tracing::warn!(
                        "{}: duplicate '$id' value '{}'",
                        doc.filename().unwrap_or("<unknown>"),
                        doc.id()
                    );
                }
            }
        }

        if schemas.is_empty() {
            return Err(CorpusError::Empty);
        }
        tracing::info!(count = schemas.len(), "processed schemas");
        Ok(Self::assemble(schemas, None))
    }

    /// Open either a snapshot file or a set of schema paths.
    ///
    /// A lone file is a snapshot unless it is itself a binding (a mapping
    /// with a top-level string `$id`).
    pub fn open(options: &SessionOptions) -> Result<Self, CorpusError> {
        if let [path] = options.schema_paths.as_slice() {
            if path.is_file() {
                let value = load_document(path).map_err(|source| CorpusError::Snapshot {
                    path: path.clone(),
                    source,
                })?;
                if value.get("$id").and_then(Value::as_str).is_none() {
                    return Self::from_snapshot_value(path, value);
                }
            }
        }
        Self::load(options)
    }

    /// Read a corpus written by [`CorpusIndex::write_snapshot`].
    ///
    /// Both the mapping form and the older list-of-schemas form are accepted.
    pub fn from_snapshot(path: &Path) -> Result<Self, CorpusError> {
        let value = load_document(path).map_err(|source| CorpusError::Snapshot {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_snapshot_value(path, value)
    }

    fn from_snapshot_value(path: &Path, value: Value) -> Result<Self, CorpusError> {
        let invalid = |message: String| CorpusError::InvalidSnapshot {
            path: path.to_path_buf(),
            message,
        };
        let entries: Vec<Value> = match value {
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            Value::Array(list) => list,
            other => {
                return Err(invalid(format!(
                    "expected a mapping or a list, found {}",
                    crate::types::json_type_name(&other)
                )))
            }
        };

        let mut schemas = BTreeMap::new();
        let mut literal = None;
        let mut patterns = None;
        for entry in entries {
            let id = entry
                .get("$id")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("entry without '$id'".to_string()))?
                .to_string();
            match id.as_str() {
                GENERATED_TYPES_ID => literal = Some(type_table(&entry).map_err(invalid)?),
                GENERATED_PATTERN_TYPES_ID => {
                    patterns = Some(type_table(&entry).map_err(invalid)?)
                }
                _ => {
                    let root = SchemaObject::from_value(entry)
                        .map_err(|e| invalid(format!("{id}: {e}")))?;
                    if let Some(doc) = SchemaDoc::new(root) {
                        schemas.entry(id).or_insert(doc);
                    }
                }
            }
        }
        if schemas.is_empty() {
            return Err(CorpusError::Empty);
        }

        let types = match (literal, patterns) {
            (None, None) => None,
            (literal, patterns) => Some(PropertyTypes::from_tables(
                literal.unwrap_or_default(),
                patterns.unwrap_or_default(),
            )),
        };
        tracing::info!(count = schemas.len(), path = %path.display(), "loaded schema snapshot");
        Ok(Self::assemble(schemas, types))
    }

    fn assemble(mut schemas: BTreeMap<String, SchemaDoc>, types: Option<PropertyTypes>) -> Self {
        if !schemas.contains_key(GENERATED_COMPATIBLES_ID) {
            let generated = make_compatible_schema(schemas.values());
            schemas.insert(GENERATED_COMPATIBLES_ID.to_string(), generated);
        }
        let types = types.unwrap_or_else(|| {
            PropertyTypes::extract(schemas.values().filter(|doc| !is_generated(doc.id())))
        });
        let store = DocumentStore::new(
            schemas
                .iter()
                .map(|(id, doc)| (id.as_str(), doc.to_value())),
        );
        Self {
            schemas,
            types,
            store,
        }
    }

    /// Write the corpus and its type tables. `.json` paths get JSON,
    /// anything else YAML.
    pub fn write_snapshot(&self, path: &Path) -> Result<(), CorpusError> {
        let mut map = Map::new();
        for (id, doc) in &self.schemas {
            map.insert(id.clone(), doc.to_value());
        }
        map.insert(
            GENERATED_TYPES_ID.to_string(),
            generated_table(GENERATED_TYPES_ID, self.types.literal_table()),
        );
        map.insert(
            GENERATED_PATTERN_TYPES_ID.to_string(),
            generated_table(GENERATED_PATTERN_TYPES_ID, &self.types.pattern_table()),
        );
        let value = Value::Object(map);

        let text = if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::to_string_pretty(&value).map_err(|e| e.to_string())
        } else {
            serde_yaml::to_string(&value).map_err(|e| e.to_string())
        }
        .map_err(|message| CorpusError::InvalidSnapshot {
            path: path.to_path_buf(),
            message,
        })?;

        std::fs::write(path, text).map_err(|source| CorpusError::WriteSnapshot {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), count = self.schemas.len(), "wrote schema snapshot");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&SchemaDoc> {
        self.schemas
            .get(id)
            .or_else(|| self.schemas.get(&format!("{id}#")))
            .or_else(|| id.strip_suffix('#').and_then(|bare| self.schemas.get(bare)))
    }

    /// Every schema, including the generated ones.
    pub fn schemas(&self) -> impl Iterator<Item = &SchemaDoc> {
        self.schemas.values()
    }

    /// Bindings that describe hardware, without the generated schemas.
    pub fn bindings(&self) -> impl Iterator<Item = &SchemaDoc> {
        self.schemas.values().filter(|doc| !is_generated(doc.id()))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn generated_compatibles(&self) -> Option<&SchemaDoc> {
        self.schemas.get(GENERATED_COMPATIBLES_ID)
    }

    pub fn property_types(&self) -> &PropertyTypes {
        &self.types
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }
}

fn generated_table(id: &str, table: &BTreeMap<String, Vec<PropertyTypeFact>>) -> Value {
    json!({
        "$id": id,
        "$filename": "Generated property types",
        "select": false,
        "properties": table,
    })
}

fn type_table(entry: &Value) -> Result<BTreeMap<String, Vec<PropertyTypeFact>>, String> {
    match entry.get("properties") {
        Some(properties) => serde_json::from_value(properties.clone()).map_err(|e| e.to_string()),
        None => Ok(BTreeMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UART: &str = r#"%YAML 1.2
---
$id: http://devicetree.org/schemas/serial/uart.yaml#
$schema: http://devicetree.org/meta-schemas/core.yaml#
title: Example UART
properties:
  compatible:
    enum: ["vendor,uart", syscon]
  reg:
    maxItems: 1
  clock-frequency:
    $ref: /schemas/types.yaml#/definitions/uint32
required: [compatible, reg]
"#;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    fn options(dir: &TempDir) -> SessionOptions {
        SessionOptions::new([dir.path()])
    }

    #[test]
    fn load_processes_bindings_and_core_schemas() {
        let dir = TempDir::new().unwrap();
        write(&dir, "serial/uart.yaml", UART);

        let corpus = CorpusIndex::load(&options(&dir)).unwrap();
        let uart = corpus.get("http://devicetree.org/schemas/serial/uart.yaml").unwrap();
        assert_eq!(uart.type_, Some(Value::from("object")));
        assert!(uart.filename().unwrap().ends_with("uart.yaml"));
        assert_eq!(
            uart.select.as_ref().unwrap().to_value(),
            json!({
                "required": ["compatible"],
                "properties": { "compatible": { "contains": { "enum": ["vendor,uart"] } } }
            })
        );
        assert!(corpus.get("http://devicetree.org/schemas/types.yaml#").is_some());
        assert!(corpus.generated_compatibles().is_some());
        assert_eq!(
            corpus.property_types().property_type("clock-frequency"),
            BTreeSet::from(["uint32".parse().unwrap()])
        );
    }

    #[test]
    fn broken_schemas_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "good.yaml", UART);
        write(&dir, "unparsable.yaml", "title: [unterminated");
        write(&dir, "no-title.yaml", &UART.replace("title: Example UART\n", ""));

        let corpus = CorpusIndex::load(&options(&dir).core_schemas(false)).unwrap();
        assert_eq!(corpus.bindings().count(), 1);
    }

    #[test]
    fn duplicate_ids_keep_the_first() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yaml", UART);
        write(&dir, "b.yaml", &UART.replace("Example UART", "Second UART"));

        let corpus = CorpusIndex::load(&options(&dir).core_schemas(false)).unwrap();
        let uart = corpus.get("http://devicetree.org/schemas/serial/uart.yaml#").unwrap();
        assert!(uart.filename().unwrap().ends_with("a.yaml"));
        assert_eq!(uart.extra.get("title"), Some(&Value::from("Example UART")));
    }

    #[test]
    fn bindings_named_generated_are_still_bindings() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "clock/generated-clock.yaml",
            &UART
                .replace("serial/uart.yaml", "clock/generated-clock.yaml")
                .replace("vendor,uart", "vendor,generated-clock"),
        );

        let corpus = CorpusIndex::load(&options(&dir).core_schemas(false)).unwrap();
        let ids: Vec<&str> = corpus.bindings().map(SchemaDoc::id).collect();
        assert_eq!(ids, vec!["http://devicetree.org/schemas/clock/generated-clock.yaml#"]);
        assert!(corpus.generated_compatibles().is_some());
        assert!(is_generated(GENERATED_COMPATIBLES_ID));
    }

    #[test]
    fn empty_corpus_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = CorpusIndex::load(&options(&dir).core_schemas(false)).unwrap_err();
        assert!(matches!(err, CorpusError::Empty));
    }

    #[test]
    fn generated_compatibles_split_literals_and_patterns() {
        let docs: Vec<SchemaDoc> = [
            json!({ "$id": "a", "properties": { "compatible": { "enum": ["v,b", "v,a"] } } }),
            json!({ "$id": "b", "properties": { "compatible": { "pattern": "^v,c-[0-9]+$" } } }),
            json!({ "$id": "c", "properties": { "compatible": { "pattern": GENERIC_COMPATIBLE_PATTERN } } }),
        ]
        .into_iter()
        .map(|raw| SchemaDoc::new(SchemaObject::from_value(raw).unwrap()).unwrap())
        .collect();

        let generated = make_compatible_schema(&docs).to_value();
        assert_eq!(generated["select"], json!(true));
        assert_eq!(
            generated["properties"]["compatible"]["items"]["anyOf"],
            json!([
                { "enum": ["v,a", "v,b"] },
                { "pattern": "^foo" },
                { "pattern": "^v,c-[0-9]+$" }
            ])
        );
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        write(&dir, "serial/uart.yaml", UART);
        let corpus = CorpusIndex::load(&options(&dir)).unwrap();

        let snapshot = dir.path().join("processed.json");
        corpus.write_snapshot(&snapshot).unwrap();
        let reloaded = CorpusIndex::from_snapshot(&snapshot).unwrap();

        assert_eq!(reloaded.len(), corpus.len());
        assert_eq!(
            reloaded.get("http://devicetree.org/schemas/serial/uart.yaml#"),
            corpus.get("http://devicetree.org/schemas/serial/uart.yaml#")
        );
        assert_eq!(
            reloaded.property_types().literal_table(),
            corpus.property_types().literal_table()
        );
    }

    #[test]
    fn legacy_list_snapshot_is_upgraded() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "legacy.json",
            r#"[{"$id": "http://devicetree.org/schemas/a.yaml#", "select": false}]"#,
        );
        let corpus = CorpusIndex::from_snapshot(&path).unwrap();
        assert!(corpus.get("http://devicetree.org/schemas/a.yaml#").is_some());
        assert!(corpus.generated_compatibles().is_some());
    }

    #[test]
    fn open_detects_snapshots() {
        let dir = TempDir::new().unwrap();
        let binding = write(&dir, "uart.yaml", UART);
        let corpus = CorpusIndex::open(&SessionOptions::new([&binding])).unwrap();
        assert!(corpus.get("http://devicetree.org/schemas/serial/uart.yaml#").is_some());

        let snapshot = dir.path().join("processed.yaml");
        corpus.write_snapshot(&snapshot).unwrap();
        let reopened = CorpusIndex::open(&SessionOptions::new([&snapshot])).unwrap();
        assert_eq!(reopened.len(), corpus.len());
    }

    #[test]
    fn snapshot_must_be_a_mapping_or_list() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.json", "42");
        let err = CorpusIndex::from_snapshot(&path).unwrap_err();
        assert!(matches!(err, CorpusError::InvalidSnapshot { .. }));
    }
}
