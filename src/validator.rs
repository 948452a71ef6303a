//! Validation sessions.
//!
//! A [`Session`] compiles every binding's selector and full schema once,
//! then dispatches each subject node to the bindings whose selector accepts
//! it. Bindings are independent: each one that selects a node validates it
//! and reports its own errors.

use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::{json, Value};

use crate::config::{SchemaDraft, SessionOptions};
use crate::corpus::CorpusIndex;
use crate::error::{SubjectError, ValidateError};
use crate::keywords::{self, TagScope};
use crate::report::{self, Diagnostic, ErrorContext};
use crate::resolver::{encode_fragment, engine_view, DocumentStore};
use crate::subject::{SubjectNode, SubjectTree};
use crate::types::{SchemaDoc, SchemaNode};

/// Compile `schema` with the devicetree keywords, resolving `$ref`s through `store`.
pub(crate) fn build_validator(
    store: &DocumentStore,
    draft: SchemaDraft,
    schema: &Value,
) -> Result<jsonschema::Validator, String> {
    let mut options = jsonschema::options();
    options
        .with_draft(draft.jsonschema_draft())
        .with_retriever(store.clone());
    keywords::register(&mut options);
    options.build(schema).map_err(|e| e.to_string())
}

enum Selector {
    Always,
    Never,
    Schema(jsonschema::Validator),
}

impl Selector {
    fn matches(&self, node: &Value) -> bool {
        match self {
            Selector::Always => true,
            Selector::Never => false,
            Selector::Schema(validator) => validator.is_valid(node),
        }
    }
}

struct CompiledSchema {
    id: String,
    /// The binding as compiled, for locating schema paths in errors.
    view: Value,
    selector: Selector,
    validator: jsonschema::Validator,
}

fn compile_schema(
    store: &DocumentStore,
    draft: SchemaDraft,
    doc: &SchemaDoc,
) -> Result<CompiledSchema, String> {
    let view = engine_view(&doc.to_value());
    let selector = match &doc.select {
        None | Some(SchemaNode::Bool(false)) => Selector::Never,
        Some(SchemaNode::Bool(true)) => Selector::Always,
        Some(SchemaNode::Object(_)) => {
            // By reference, so `$ref`s inside the selector resolve against the binding.
            let uri = doc.id().trim_end_matches('#');
            let wrapper = json!({ "$ref": format!("{uri}#{}", encode_fragment("/select")) });
            Selector::Schema(build_validator(store, draft, &wrapper)?)
        }
    };
    let validator = build_validator(store, draft, &view)?;
    Ok(CompiledSchema {
        id: doc.id().to_string(),
        view,
        selector,
        validator,
    })
}

/// Compiled corpus ready to validate subject documents.
pub struct Session {
    corpus: Arc<CorpusIndex>,
    draft: SchemaDraft,
    schemas: Vec<CompiledSchema>,
    compatibles: Option<jsonschema::Validator>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("schemas", &self.schemas.len())
            .field("draft", &self.draft)
            .finish()
    }
}

impl Session {
    /// Compile the corpus. Bindings that fail to compile are skipped with a warning.
    pub fn new(corpus: Arc<CorpusIndex>, options: &SessionOptions) -> Self {
        let draft = options.draft;
        let store = corpus.store();
        let selected: Vec<&SchemaDoc> = corpus
            .bindings()
            .filter(|doc| {
                options
                    .filter
                    .as_deref()
                    .map_or(true, |filter| doc.id().contains(filter))
            })
            .collect();
        if selected.is_empty() {
            tracing::warn!(filter = ?options.filter, "no schemas to validate against");
        }

        let schemas: Vec<CompiledSchema> = selected
            .par_iter()
            .filter_map(|doc| match compile_schema(store, draft, doc) {
                Ok(compiled) => Some(compiled),
                Err(message) => {
                    tracing::warn!(id = doc.id(), "cannot compile schema: {message}");
                    None
                }
            })
            .collect();

        let compatibles = corpus.generated_compatibles().and_then(|doc| {
            build_validator(store, draft, &engine_view(&doc.to_value()))
                .map_err(|message| tracing::warn!("cannot compile generated compatibles: {message}"))
                .ok()
        });

        tracing::debug!(count = schemas.len(), "compiled schemas");
        Self {
            corpus,
            draft,
            schemas,
            compatibles,
        }
    }

    pub fn corpus(&self) -> &CorpusIndex {
        &self.corpus
    }

    /// `$id`s of the schemas nodes are dispatched to.
    pub fn schema_ids(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().map(|s| s.id.as_str())
    }

    /// `$id`s of the schemas whose selector accepts `node`.
    pub fn matching_schemas(&self, node: &Value) -> Vec<&str> {
        self.schemas
            .iter()
            .filter(|s| s.selector.matches(node))
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Which of `compatibles` no binding documents.
    pub fn undocumented_compatibles<'a>(
        &self,
        compatibles: impl IntoIterator<Item = &'a str>,
    ) -> Vec<&'a str> {
        let Some(validator) = &self.compatibles else {
            return Vec::new();
        };
        compatibles
            .into_iter()
            .filter(|c| !validator.is_valid(&json!({ "compatible": [c] })))
            .collect()
    }

    /// Validate every node of a tree.
    pub fn validate_tree(&self, tree: &SubjectTree) -> Vec<Diagnostic> {
        let _tags = TagScope::enter(tree);
        let mut diagnostics = Vec::new();
        for node in tree.nodes() {
            diagnostics.extend(self.check_node(tree, &node));
            for compatible in self.undocumented_compatibles(node.compatibles()) {
                diagnostics.push(report::undocumented_compatible(tree, &node, compatible));
            }
        }
        diagnostics
    }

    fn check_node(&self, tree: &SubjectTree, node: &SubjectNode<'_>) -> Vec<Diagnostic> {
        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        let mut matched = false;
        for schema in &self.schemas {
            if !schema.selector.matches(node.value) {
                continue;
            }
            matched = true;
            tracing::trace!(node = %node.path, schema = %schema.id, "validating");

            let ctx = ErrorContext {
                tree,
                node,
                schema_id: &schema.id,
                schema: &schema.view,
                store: self.corpus.store(),
                draft: self.draft,
            };
            for error in schema.validator.iter_errors(node.value) {
                let diagnostic = report::validation_error(&ctx, &error);
                if !diagnostics.contains(&diagnostic) {
                    diagnostics.push(diagnostic);
                }
            }
        }
        if !matched {
            diagnostics.push(report::no_matching_schema(tree, node));
        }
        diagnostics
    }

    /// Load and validate subject files in parallel, in input order.
    pub fn validate_files(&self, paths: &[PathBuf]) -> Vec<Result<Vec<Diagnostic>, SubjectError>> {
        paths
            .par_iter()
            .map(|path| {
                let tree = SubjectTree::load(path)?;
                tracing::debug!(path = %path.display(), "validating");
                Ok(self.validate_tree(&tree))
            })
            .collect()
    }
}

/// Open the corpus named by `options` and validate `paths` against it.
///
/// Documents that fail to parse are logged and skipped. On success, returns
/// the warnings found.
///
/// # Errors
///
/// `ValidateError::Invalid` carries every diagnostic when any is an error.
pub fn validate(paths: &[PathBuf], options: &SessionOptions) -> Result<Vec<Diagnostic>, ValidateError> {
    let corpus = CorpusIndex::open(options)?;
    let session = Session::new(Arc::new(corpus), options);

    let mut diagnostics = Vec::new();
    let mut unreadable = None;
    for result in session.validate_files(paths) {
        match result {
            Ok(found) => diagnostics.extend(found),
            Err(err) => {
                tracing::error!("{err}");
                unreadable.get_or_insert(err);
            }
        }
    }

    if diagnostics.iter().any(Diagnostic::is_error) {
        return Err(ValidateError::Invalid { diagnostics });
    }
    if let Some(err) = unreadable {
        return Err(err.into());
    }
    Ok(diagnostics)
}
