//! End-to-end validation through the library API.

use std::path::Path;
use std::sync::Arc;

use dt_schema::{CorpusIndex, Diagnostic, DiagnosticKind, Session, SessionOptions, SubjectTree};
use tempfile::TempDir;

const DEVICE: &str = "\
$id: http://devicetree.org/schemas/vendor-dev.yaml#
$schema: http://devicetree.org/meta-schemas/core.yaml#
title: Example device
properties:
  compatible:
    const: vendor,dev
  data:
    $ref: /schemas/types.yaml#/definitions/uint32-array
  clocks:
    $ref: /schemas/types.yaml#/definitions/phandle-array
required: [compatible]
";

fn corpus(dir: &Path) -> CorpusIndex {
    std::fs::write(dir.join("vendor-dev.yaml"), DEVICE).unwrap();
    CorpusIndex::load(&SessionOptions::new([dir])).unwrap()
}

fn session() -> (TempDir, Session) {
    let dir = TempDir::new().unwrap();
    let corpus = corpus(dir.path());
    (dir, Session::new(Arc::new(corpus), &SessionOptions::default()))
}

fn validation_errors(session: &Session, content: &str) -> Vec<Diagnostic> {
    let tree = SubjectTree::from_yaml_str("board.yaml", content).unwrap();
    session
        .validate_tree(&tree)
        .into_iter()
        .filter(|d| d.kind == DiagnosticKind::Validation)
        .collect()
}

#[test]
fn untagged_cells_are_32_bit() {
    let (_dir, session) = session();
    let errors = validation_errors(&session, "compatible: [\"vendor,dev\"]\ndata: [[1, 2, 3]]\n");
    assert!(errors.is_empty(), "{errors:#?}");
}

#[test]
fn eight_bit_rows_fail_a_32_bit_type() {
    let (_dir, session) = session();
    let errors = validation_errors(&session, "compatible: [\"vendor,dev\"]\ndata: [!u8 [1, 2, 3]]\n");
    assert!(
        errors
            .iter()
            .any(|e| e.path.first().map(String::as_str) == Some("data")
                && e.to_string().contains("size is 8, expected 32")),
        "{errors:#?}"
    );
}

#[test]
fn phandle_cells_need_the_tag() {
    let (_dir, session) = session();
    let errors = validation_errors(
        &session,
        "compatible: [\"vendor,dev\"]\nclocks: [[!phandle 1, 5]]\n",
    );
    assert!(errors.is_empty(), "{errors:#?}");

    let errors = validation_errors(&session, "compatible: [\"vendor,dev\"]\nclocks: [[1, 5]]\n");
    assert!(
        errors
            .iter()
            .any(|e| e.path.first().map(String::as_str) == Some("clocks")),
        "{errors:#?}"
    );
    assert!(
        errors
            .iter()
            .any(|e| e.to_string().contains("missing phandle tag")),
        "{errors:#?}"
    );
}

#[test]
fn snapshot_validates_like_the_sources() {
    let dir = TempDir::new().unwrap();
    let corpus = corpus(dir.path());
    let snapshot = dir.path().join("processed.json");
    corpus.write_snapshot(&snapshot).unwrap();

    let options = SessionOptions::default();
    let from_sources = Session::new(Arc::new(corpus), &options);
    let from_snapshot = Session::new(Arc::new(CorpusIndex::from_snapshot(&snapshot).unwrap()), &options);

    let content = "compatible: [\"vendor,dev\"]\ndata: [!u8 [1]]\nclocks: [[7]]\n";
    let messages = |session: &Session| {
        validation_errors(session, content)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    };
    let expected = messages(&from_sources);
    assert!(!expected.is_empty());
    assert_eq!(messages(&from_snapshot), expected);
    assert_eq!(
        from_snapshot.corpus().property_types().literal_table(),
        from_sources.corpus().property_types().literal_table()
    );
}

#[test]
fn every_tree_in_a_document_is_checked() {
    let (_dir, session) = session();
    let content = "\
- compatible: [\"vendor,dev\"]
  data: [[1]]
- compatible: [\"vendor,dev\"]
  data: [!u16 [1]]
";
    let errors = validation_errors(&session, content);
    assert_eq!(errors.len(), 1, "{errors:#?}");
    assert_eq!(errors[0].node_path, "/");
    assert_eq!(errors[0].position, Some((3, 2)));
}
