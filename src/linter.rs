//! Schema linting - static checks of binding files before they enter a corpus.
//!
//! Checks each binding for:
//! - YAML/JSON syntax errors
//! - Meta-schema violations
//! - `$ref`s that cannot resolve locally
//! - A missing `$id`, or one that disagrees with the file's location

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;

use crate::error::CorpusError;
use crate::loader::{collect_files, is_url, load_mapping, navigate_fragment};
use crate::metaschema::MetaSchemaChecker;
use crate::report::Severity;

/// Base URL every binding `$id` lives under.
pub const SCHEMA_ID_BASE: &str = "http://devicetree.org/schemas/";

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct LintDiagnostic {
    pub severity: Severity,
    pub code: String,
    pub file: PathBuf,
    /// Path to the issue within the schema (e.g., "/properties/reg/minItems")
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl LintDiagnostic {
    fn error(code: &str, file: &Path, path: impl Into<String>, message: String) -> Self {
        Self {
            severity: Severity::Error,
            code: code.to_string(),
            file: file.to_path_buf(),
            path: path.into(),
            message,
            hint: None,
        }
    }

    fn warning(code: &str, file: &Path, path: impl Into<String>, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, file, path, message)
        }
    }
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<LintDiagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Lint a binding file or every `*.yaml` under a directory.
///
/// If `strict` is true, warnings count as failures.
///
/// # Errors
///
/// Fails only when the embedded meta-schemas cannot be compiled.
pub fn lint(path: &Path, strict: bool) -> Result<LintResult, CorpusError> {
    let checker = MetaSchemaChecker::new()?;
    let files = collect_files(path, &["yaml"]);
    let base = if path.is_file() {
        path.parent().unwrap_or(Path::new("."))
    } else {
        path
    };

    let results: Vec<FileResult> = files
        .par_iter()
        .map(|file| lint_file(file, base, &checker))
        .collect();

    let count = |severity: Severity| {
        results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .filter(|d| d.severity == severity)
            .count()
    };
    let errors = count(Severity::Error);
    let warnings = count(Severity::Warning);

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    Ok(LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors,
        warnings,
        results,
    })
}

/// Lint a single binding. `base_path` is the directory `$id`s are relative to.
pub fn lint_file(file: &Path, base_path: &Path, checker: &MetaSchemaChecker) -> FileResult {
    let relative = file.strip_prefix(base_path).unwrap_or(file).to_path_buf();

    let schema = match load_mapping(file) {
        Ok(s) => s,
        Err(e) => {
            return FileResult {
                file: relative,
                status: FileStatus::Error,
                diagnostics: vec![LintDiagnostic::error(
                    "E001",
                    file,
                    "/",
                    format!("syntax error: {e}"),
                )],
            };
        }
    };

    let mut diagnostics = Vec::new();

    for violation in checker.check(&schema) {
        let path = match violation.keyword_path.as_str() {
            "(root)" => "/".to_string(),
            keyword_path => format!("/{keyword_path}"),
        };
        diagnostics.push(LintDiagnostic {
            hint: violation.hint,
            ..LintDiagnostic::error("E002", file, path, violation.message)
        });
    }

    let file_dir = file.parent().unwrap_or(Path::new("."));
    check_refs(&schema, file, file_dir, "", &schema, &mut diagnostics);
    check_id(&schema, file, &relative, &mut diagnostics);

    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    let has_warnings = diagnostics.iter().any(|d| d.severity == Severity::Warning);

    let status = if has_errors {
        FileStatus::Error
    } else if has_warnings {
        FileStatus::Warning
    } else {
        FileStatus::Ok
    };

    FileResult {
        file: relative,
        status,
        diagnostics,
    }
}

fn check_id(schema: &Value, file: &Path, relative: &Path, diagnostics: &mut Vec<LintDiagnostic>) {
    let Some(id) = schema.get("$id").and_then(Value::as_str) else {
        diagnostics.push(LintDiagnostic::warning(
            "W002",
            file,
            "/",
            "schema missing $id field".to_string(),
        ));
        return;
    };

    let expected: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let expected = expected.join("/");
    let id_path = id.trim_end_matches('#');
    let matches = id_path
        .strip_prefix(SCHEMA_ID_BASE)
        .is_some_and(|rest| rest == expected || rest.ends_with(&format!("/{expected}")));
    if !matches {
        diagnostics.push(LintDiagnostic::warning(
            "W001",
            file,
            "/$id",
            format!("$id {id:?} does not match file location {expected:?}"),
        ));
    }
}

/// Recursively check $ref values in a schema.
fn check_refs(
    value: &Value,
    file: &Path,
    file_dir: &Path,
    path: &str,
    root: &Value,
    diagnostics: &mut Vec<LintDiagnostic>,
) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(ref_val)) = map.get("$ref") {
                check_single_ref(ref_val, file, file_dir, path, root, diagnostics);
            }

            for (key, val) in map {
                let child_path = format!("{path}/{key}");
                check_refs(val, file, file_dir, &child_path, root, diagnostics);
            }
        }
        Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                let child_path = format!("{path}/{i}");
                check_refs(item, file, file_dir, &child_path, root, diagnostics);
            }
        }
        _ => {}
    }
}

/// Check a single $ref value.
///
/// Absolute references (`/schemas/...`, URLs) name other corpus documents
/// and are only resolvable once the corpus is assembled.
fn check_single_ref(
    ref_val: &str,
    file: &Path,
    file_dir: &Path,
    path: &str,
    root: &Value,
    diagnostics: &mut Vec<LintDiagnostic>,
) {
    if is_url(ref_val) || ref_val.starts_with('/') {
        return;
    }

    let (file_part, fragment) = match ref_val.find('#') {
        Some(idx) => (&ref_val[..idx], &ref_val[idx..]),
        None => (ref_val, ""),
    };

    let target = if file_part.is_empty() {
        root.clone()
    } else {
        let ref_path = file_dir.join(file_part);
        if !ref_path.exists() {
            diagnostics.push(LintDiagnostic::error(
                "E003",
                file,
                path,
                format!("file not found: {file_part}"),
            ));
            return;
        }
        match load_mapping(&ref_path) {
            Ok(doc) => doc,
            // The referenced file gets its own E001 when linted.
            Err(_) => return,
        }
    };

    if fragment.len() > 1 && navigate_fragment(&target, fragment).is_err() {
        diagnostics.push(LintDiagnostic::error(
            "E003",
            file,
            path,
            format!("cannot resolve reference: {ref_val}"),
        ));
    }
}
