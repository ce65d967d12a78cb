mod common;

use common::{png_fixture, TestHarness};
use mriscan::uploads::IncomingFile;
use mriscan::StorageError;

fn file(name: &str) -> IncomingFile {
    IncomingFile {
        filename: name.to_string(),
        content: png_fixture(3, 8, 8),
    }
}

#[test]
fn test_invalid_label_touches_nothing() {
    let harness = TestHarness::new();

    let err = harness
        .retrainer
        .uploads()
        .store_batch("Astrocytoma", vec![file("a.png")])
        .unwrap_err();

    match err {
        StorageError::InvalidLabel { label, allowed } => {
            assert_eq!(label, "Astrocytoma");
            assert!(allowed.contains("Glioma"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!harness.uploads_dir().join("Astrocytoma").exists());
}

#[test]
fn test_duplicate_names_never_overwrite() {
    let harness = TestHarness::new();
    let uploads = harness.retrainer.uploads();

    let first = uploads
        .store_batch("Glioma", vec![file("scan.png"), file("scan.png")])
        .unwrap();
    let second = uploads.store_batch("Glioma", vec![file("scan.png")]).unwrap();

    assert_eq!(first.uploaded_count, 2);
    assert_eq!(second.uploaded_count, 1);
    assert!(first.errors.is_empty());

    let mut names: Vec<String> = first
        .stored
        .iter()
        .chain(second.stored.iter())
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 3);
    assert_eq!(uploads.counts().unwrap()["Glioma"], 3);
}

#[test]
fn test_path_components_are_stripped() {
    let harness = TestHarness::new();

    let report = harness
        .retrainer
        .uploads()
        .store_batch("Pituitary", vec![file("../../escape.png")])
        .unwrap();

    let stored = &report.stored[0];
    assert!(stored.starts_with(harness.uploads_dir().join("Pituitary")));
    assert_eq!(stored.file_name().unwrap(), "escape.png");
}

#[test]
fn test_counts_report_every_label() {
    let harness = TestHarness::new();
    harness.upload("Meningioma", 5, 2);

    let counts = harness.retrainer.uploads().counts().unwrap();
    assert_eq!(counts.len(), 4);
    assert_eq!(counts["Meningioma"], 2);
    assert_eq!(counts["Glioma"], 0);
    assert_eq!(counts["No_Tumor"], 0);
}
