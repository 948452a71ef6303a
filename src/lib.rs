//! Devicetree binding schemas
//!
//! Loads a corpus of devicetree binding schemas, checks each against its
//! meta-schema, normalizes it into the encoding devicetree data actually
//! takes, and validates decoded devicetrees against every binding that
//! selects each node.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dt_schema::{CorpusIndex, Session, SessionOptions, SubjectTree};
//!
//! let options = SessionOptions::new(["Documentation/devicetree/bindings"]);
//! let corpus = CorpusIndex::load(&options)?;
//! let session = Session::new(Arc::new(corpus), &options);
//!
//! let tree = SubjectTree::load("board.dt.yaml".as_ref())?;
//! for diagnostic in session.validate_tree(&tree) {
//!     eprintln!("{diagnostic}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Value encoding
//!
//! Every property value is an array. Integer properties are matrices:
//! each row is one `<...>` group of cells, so `reg = <0x1000 0x100>;`
//! decodes as `[[0x1000, 0x100]]`. Bindings are written against the
//! logical shape; normalization rewrites them to accept the encoded one.
//!
//! | Binding declares | Accepted values |
//! |------------------|-----------------|
//! | `const: 5` | `[[5]]` |
//! | `maxItems: 2` on an integer array | `[[a, b]]` or `[[a], [b]]` |
//! | `const: "okay"` | `["okay"]` |
//! | `type: boolean` | `true` |

mod abi;
mod config;
mod corpus;
mod error;
mod keywords;
mod linter;
mod loader;
mod metaschema;
mod normalize;
mod proptypes;
mod report;
mod resolver;
mod select;
mod subject;
mod types;
mod validator;

pub use abi::{compare, AbiChange, AbiChangeKind};
pub use config::{SchemaDraft, SessionOptions, DEFAULT_GENERIC_COMPATIBLES};
pub use corpus::{make_compatible_schema, process_schema, CorpusIndex};
pub use error::{CorpusError, LoadError, ResolveError, SchemaError, SubjectError, ValidateError};
pub use keywords::{register as register_keywords, TagScope, DEFAULT_CELL_WIDTH};
pub use linter::{lint, lint_file, FileResult, FileStatus, LintDiagnostic, LintResult};
pub use loader::{collect_files, load_document, load_mapping, load_yaml_str, navigate_fragment};
pub use metaschema::{
    MetaSchemaChecker, Violation, BASE_META_SCHEMA_ID, CORE_META_SCHEMA_ID, META_SCHEMA_BASE_URL,
};
pub use normalize::{normalize_property, normalize_schema};
pub use proptypes::{
    merge_dim, Dim, ExtractOptions, PropType, PropertyTypeFact, PropertyTypes, Shape,
};
pub use report::{schema_hint, Cause, Diagnostic, DiagnosticKind, Severity};
pub use resolver::{DocumentStore, Resolver, ScopeGuard};
pub use select::{add_select_schema, node_compatibles, schema_compatibles};
pub use subject::{CellTag, CellTags, PositionIndex, SubjectNode, SubjectTree};
pub use types::{
    SchemaDoc, SchemaNode, SchemaObject, GENERATED_COMPATIBLES_ID, GENERATED_PATTERN_TYPES_ID,
    GENERATED_TYPES_ID, SCHEMA_BASE_URL,
};
pub use validator::{validate, Session};

#[cfg(feature = "remote")]
pub use loader::load_url;
