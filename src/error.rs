//! Error types for schema loading, corpus assembly and validation.

use std::path::PathBuf;
use thiserror::Error;

use crate::report::Diagnostic;

/// Errors reading a YAML or JSON document from disk or the network.
#[derive(Debug, Error)]
pub enum LoadError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("{what} is not a mapping")]
    NotAMapping { what: String },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            LoadError::NetworkError { .. } => 3,
            _ => 2,
        }
    }
}

/// Reasons a binding schema file is excluded from the corpus.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{path}: ignoring, error parsing file: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    #[error("{path}: ignoring, error in schema: {keyword_path}: {message}")]
    Structural {
        path: PathBuf,
        keyword_path: String,
        message: String,
    },

    #[error("{path}: ignoring, unsupported schema shape: {source}")]
    Model {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: ignoring, missing $id")]
    MissingId { path: PathBuf },
}

/// A subject document that cannot be turned into a tree.
#[derive(Debug, Error)]
pub enum SubjectError {
    #[error("{path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    #[error("{path}: not a devicetree document: {message}")]
    NotATree { path: PathBuf, message: String },
}

impl SubjectError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SubjectError::Load { source, .. } => source.exit_code(),
            SubjectError::NotATree { .. } => 2,
        }
    }
}

/// Errors assembling the corpus as a whole.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("no schemas loaded")]
    Empty,

    #[error("cannot load schema snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    #[error("invalid schema snapshot {path}: {message}")]
    InvalidSnapshot { path: PathBuf, message: String },

    #[error("cannot write schema snapshot {path}: {source}")]
    WriteSnapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot compile schema {id}: {message}")]
    Compile { id: String, message: String },
}

impl CorpusError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CorpusError::Snapshot { source, .. } => source.exit_code(),
            CorpusError::WriteSnapshot { .. } => 3,
            _ => 2,
        }
    }
}

/// Failures resolving a `$ref`.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    #[error("unresolvable reference: {uri}")]
    Unresolvable { uri: String },

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Errors during validation of subject documents.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    Subject(#[from] SubjectError),

    #[error("validation reported {} diagnostic(s)", diagnostics.len())]
    Invalid { diagnostics: Vec<Diagnostic> },
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Corpus(e) => e.exit_code(),
            ValidateError::Subject(e) => e.exit_code(),
            ValidateError::Invalid { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("foo.yaml"),
        };
        assert_eq!(err.exit_code(), 3);

        let err = LoadError::NotAMapping {
            what: "foo.yaml".into(),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn corpus_error_exit_codes() {
        assert_eq!(CorpusError::Empty.exit_code(), 2);
        let err = CorpusError::Snapshot {
            path: PathBuf::from("processed.json"),
            source: LoadError::FileNotFound {
                path: PathBuf::from("processed.json"),
            },
        };
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn validate_error_exit_codes() {
        let err = ValidateError::Invalid {
            diagnostics: Vec::new(),
        };
        assert_eq!(err.exit_code(), 1);

        let err = ValidateError::Corpus(CorpusError::Empty);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn structural_error_display() {
        let err = SchemaError::Structural {
            path: PathBuf::from("foo.yaml"),
            keyword_path: "properties/reg".into(),
            message: "not valid".into(),
        };
        assert_eq!(
            err.to_string(),
            "foo.yaml: ignoring, error in schema: properties/reg: not valid"
        );
    }
}
