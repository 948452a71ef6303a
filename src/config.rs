//! Session configuration.

use std::path::PathBuf;

/// Compatible values too common to discriminate between bindings.
pub const DEFAULT_GENERIC_COMPATIBLES: &[&str] = &["syscon", "simple-mfd"];

/// JSON Schema draft the corpus is migrated to and evaluated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaDraft {
    /// `dependencies` is split; tuple `items` is kept.
    #[default]
    Draft201909,
    /// Additionally rewrites tuple `items` to `prefixItems` and
    /// `additionalItems` to `unevaluatedItems`.
    Draft202012,
}

impl SchemaDraft {
    pub(crate) fn jsonschema_draft(self) -> jsonschema::Draft {
        match self {
            SchemaDraft::Draft201909 => jsonschema::Draft::Draft201909,
            SchemaDraft::Draft202012 => jsonschema::Draft::Draft202012,
        }
    }
}

/// Options for building a validation session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Schema files and directories to scan (directories recursively for `*.yaml`).
    pub schema_paths: Vec<PathBuf>,
    /// Compatible values excluded when deriving selectors.
    pub generic_compatibles: Vec<String>,
    /// Target draft.
    pub draft: SchemaDraft,
    /// Only dispatch to schemas whose `$id` contains this substring.
    pub filter: Option<String>,
    /// Include the built-in core schemas (`types.yaml` and friends).
    pub core_schemas: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            schema_paths: Vec::new(),
            generic_compatibles: DEFAULT_GENERIC_COMPATIBLES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            draft: SchemaDraft::default(),
            filter: None,
            core_schemas: true,
        }
    }
}

impl SessionOptions {
    /// Create options scanning the given schema paths.
    pub fn new(schema_paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            schema_paths: schema_paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a compatible value to the generic exclusion list.
    pub fn generic_compatible(mut self, compatible: impl Into<String>) -> Self {
        let compatible = compatible.into();
        if !self.generic_compatibles.contains(&compatible) {
            self.generic_compatibles.push(compatible);
        }
        self
    }

    pub fn draft(mut self, draft: SchemaDraft) -> Self {
        self.draft = draft;
        self
    }

    pub fn filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn core_schemas(mut self, core_schemas: bool) -> Self {
        self.core_schemas = core_schemas;
        self
    }
}
