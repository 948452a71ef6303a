//! Embedded meta-schemas and the structural check of binding schemas.
//!
//! Every binding is validated against the meta-schema its `$schema` names
//! before it may enter the corpus. The meta-schemas, and the core type
//! schemas every corpus includes, ship inside the binary.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde_json::Value;

use crate::error::CorpusError;
use crate::loader::load_yaml_str;
use crate::report::schema_hint;
use crate::resolver::{engine_view, DocumentStore};

pub const META_SCHEMA_BASE_URL: &str = "http://devicetree.org/meta-schemas/";
pub const CORE_META_SCHEMA_ID: &str = "http://devicetree.org/meta-schemas/core.yaml#";
pub const BASE_META_SCHEMA_ID: &str = "http://devicetree.org/meta-schemas/base.yaml#";

const META_SCHEMA_SOURCES: [(&str, &str); 3] = [
    ("core.yaml", include_str!("../meta-schemas/core.yaml")),
    ("base.yaml", include_str!("../meta-schemas/base.yaml")),
    ("keywords.yaml", include_str!("../meta-schemas/keywords.yaml")),
];

/// Core schemas loaded into every corpus, by file name.
pub const CORE_SCHEMA_SOURCES: [(&str, &str); 1] =
    [("types.yaml", include_str!("../schemas/types.yaml"))];

static META_SCHEMAS: LazyLock<BTreeMap<String, Value>> = LazyLock::new(|| {
    META_SCHEMA_SOURCES
        .iter()
        .map(|(name, source)| {
            let doc = load_yaml_str(source).expect("embedded meta-schema must parse");
            (format!("{META_SCHEMA_BASE_URL}{name}"), engine_view(&doc))
        })
        .collect()
});

/// An embedded meta-schema by URI, with or without the trailing `#`.
pub(crate) fn embedded(uri: &str) -> Option<&'static Value> {
    META_SCHEMAS.get(uri.strip_suffix('#').unwrap_or(uri))
}

/// One way a schema document breaks its meta-schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Slash-separated location within the checked document.
    pub keyword_path: String,
    pub message: String,
    /// Description of the meta-schema rule that failed, if it has one.
    pub hint: Option<String>,
}

/// Compiled meta-schemas.
pub struct MetaSchemaChecker {
    store: DocumentStore,
    validators: BTreeMap<&'static str, jsonschema::Validator>,
}

impl std::fmt::Debug for MetaSchemaChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaSchemaChecker")
            .field("meta_schemas", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MetaSchemaChecker {
    pub fn new() -> Result<Self, CorpusError> {
        let store = DocumentStore::default();
        let mut validators = BTreeMap::new();
        for id in [CORE_META_SCHEMA_ID, BASE_META_SCHEMA_ID] {
            let compile_error = |message: String| CorpusError::Compile {
                id: id.to_string(),
                message,
            };
            let meta = embedded(id).ok_or_else(|| compile_error("not embedded".to_string()))?;
            let validator = jsonschema::options()
                .with_draft(jsonschema::Draft::Draft201909)
                .with_retriever(store.clone())
                .build(meta)
                .map_err(|e| compile_error(e.to_string()))?;
            validators.insert(id, validator);
        }
        Ok(Self { store, validators })
    }

    /// Check `schema` against the meta-schema named by its `$schema`,
    /// defaulting to the core meta-schema.
    pub fn check(&self, schema: &Value) -> Vec<Violation> {
        let meta_id = schema
            .get("$schema")
            .and_then(Value::as_str)
            .unwrap_or(CORE_META_SCHEMA_ID);
        let Some((&id, validator)) = self
            .validators
            .iter()
            .find(|(id, _)| id.trim_end_matches('#') == meta_id.trim_end_matches('#'))
        else {
            return vec![Violation {
                keyword_path: "$schema".to_string(),
                message: format!("unknown meta-schema {meta_id:?}"),
                hint: None,
            }];
        };
        let Some(meta) = embedded(id) else {
            return Vec::new();
        };

        validator
            .iter_errors(schema)
            .map(|error| {
                let pointer = error.instance_path.to_string();
                let keyword_path = match pointer.trim_start_matches('/') {
                    "" => "(root)".to_string(),
                    path => path.to_string(),
                };
                Violation {
                    keyword_path,
                    message: error.to_string(),
                    hint: schema_hint(&self.store, id, meta, &error.schema_path.to_string()),
                }
            })
            .collect()
    }

    /// First violation only, which is all the corpus loader reports.
    pub fn first_violation(&self, schema: &Value) -> Option<Violation> {
        self.check(schema).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checker() -> MetaSchemaChecker {
        MetaSchemaChecker::new().unwrap()
    }

    fn binding(extra: Value) -> Value {
        let mut doc = json!({
            "$id": "http://devicetree.org/schemas/serial/uart.yaml#",
            "$schema": "http://devicetree.org/meta-schemas/core.yaml#",
            "title": "Example UART",
            "properties": { "reg": { "maxItems": 1 } }
        });
        if let (Value::Object(doc), Value::Object(extra)) = (&mut doc, extra) {
            doc.extend(extra);
        }
        doc
    }

    #[test]
    fn meta_schemas_compile_and_admit_a_binding_file() {
        let checker = MetaSchemaChecker::new();
        assert!(checker.is_ok(), "{checker:?}");

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("uart.yaml");
        std::fs::write(
            &path,
            "$id: http://devicetree.org/schemas/uart.yaml#\n\
             $schema: http://devicetree.org/meta-schemas/core.yaml#\n\
             title: Example UART\n\
             properties:\n  reg:\n    maxItems: 1\n",
        )
        .unwrap();
        let corpus = crate::corpus::CorpusIndex::load(&crate::config::SessionOptions::new([&path]));
        assert!(corpus.is_ok(), "{corpus:?}");
        assert!(corpus
            .unwrap()
            .get("http://devicetree.org/schemas/uart.yaml#")
            .is_some());
    }

    #[test]
    fn embedded_meta_schemas_parse() {
        assert!(embedded(CORE_META_SCHEMA_ID).is_some());
        assert!(embedded("http://devicetree.org/meta-schemas/keywords.yaml").is_some());
        assert!(embedded("http://devicetree.org/meta-schemas/missing.yaml").is_none());
        for (_, source) in CORE_SCHEMA_SOURCES {
            assert!(load_yaml_str(source).is_ok());
        }
    }

    #[test]
    fn well_formed_binding_passes() {
        assert!(checker().check(&binding(json!({}))).is_empty());
    }

    #[test]
    fn missing_title_is_reported() {
        let mut doc = binding(json!({}));
        doc.as_object_mut().unwrap().remove("title");
        let violations = checker().check(&doc);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].keyword_path, "(root)");
        assert!(violations[0].message.contains("title"));
    }

    #[test]
    fn bad_keyword_value_carries_hint() {
        let doc = binding(json!({ "properties": { "reg": { "minItems": 0 } } }));
        let violation = checker().first_violation(&doc).unwrap();
        assert_eq!(violation.keyword_path, "properties/reg/minItems");
        assert_eq!(
            violation.hint.as_deref(),
            Some("minItems must be a positive integer")
        );
    }

    #[test]
    fn id_must_be_a_devicetree_url() {
        let doc = binding(json!({ "$id": "http://example.com/uart.yaml" }));
        let violation = checker().first_violation(&doc).unwrap();
        assert_eq!(violation.keyword_path, "$id");
    }

    #[test]
    fn unknown_meta_schema_is_rejected() {
        let doc = binding(json!({ "$schema": "http://example.com/meta.yaml#" }));
        let violation = checker().first_violation(&doc).unwrap();
        assert_eq!(violation.keyword_path, "$schema");
    }

    #[test]
    fn core_schemas_satisfy_base_meta_schema() {
        let checker = checker();
        for (_, source) in CORE_SCHEMA_SOURCES {
            let doc = load_yaml_str(source).unwrap();
            assert!(checker.check(&doc).is_empty());
        }
    }
}
