use modelshelf_core::storage::models::{ScanFields, ScannedModel};
use modelshelf_core::storage::Database;
use modelshelf_core::sync::{prune_missing, sync_files};
use modelshelf_core::Error;
use std::path::Path;
use std::sync::atomic::AtomicBool;

fn model(path: &str, size: i64) -> ScannedModel {
    ScannedModel {
        file_path: path.to_string(),
        scan: ScanFields {
            file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            content_hash: Some(format!("hash-of-{path}")),
            size_bytes: size,
            modified_at: "2024-05-01T12:00:00.000Z".to_string(),
        },
    }
}

#[test]
fn test_batches_report_progress_after_each_commit() {
    let db = Database::open_in_memory().unwrap();
    let models: Vec<_> = (0..5).map(|i| model(&format!("/lib/{i}.stl"), 10)).collect();

    let mut progress = Vec::new();
    let report = sync_files(&db, &models, 2, None, |done, total| progress.push((done, total)));

    assert_eq!(progress, vec![(2, 5), (4, 5), (5, 5)]);
    assert_eq!(report.batches, 3);
    assert_eq!(report.counts.inserted, 5);
    assert!(report.is_complete());
}

#[test]
fn test_failed_batch_is_retried_once_and_skipped() {
    let db = Database::open_in_memory().unwrap();
    let models = vec![
        model("/lib/0.stl", 10),
        model("/lib/1.stl", 10),
        model("/lib/2.stl", -5), // violates the size CHECK
        model("/lib/3.stl", 10),
        model("/lib/4.stl", 10),
    ];

    let report = sync_files(&db, &models, 2, None, |_, _| {});

    assert_eq!(report.batches, 3);
    assert_eq!(report.retried_batches, 1);
    assert_eq!(report.failed_batches.len(), 1);
    let failed = &report.failed_batches[0];
    assert_eq!(failed.index, 1);
    assert_eq!(failed.rows, 2);
    match &failed.error {
        Error::Transaction { batch, committed, .. } => {
            assert_eq!(*batch, 1);
            assert_eq!(*committed, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Batches 0 and 2 committed; the whole of batch 1 rolled back.
    assert_eq!(report.committed_rows(), 3);
    assert_eq!(db.model_count().unwrap(), 3);
    assert!(db.get_model("/lib/3.stl").unwrap().is_none());
    assert!(db.get_model("/lib/4.stl").unwrap().is_some());
}

#[test]
fn test_cancel_flag_stops_between_batches() {
    let db = Database::open_in_memory().unwrap();
    let models: Vec<_> = (0..4).map(|i| model(&format!("/lib/{i}.stl"), 1)).collect();
    let cancel = AtomicBool::new(true);

    let report = sync_files(&db, &models, 2, Some(&cancel), |_, _| {});
    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert_eq!(db.model_count().unwrap(), 0);
}

#[test]
fn test_prune_respects_component_boundary() {
    let db = Database::open_in_memory().unwrap();
    db.upsert_models(&[
        model("/lib/gone.stl", 1),
        model("/lib/kept.stl", 1),
        model("/lib/sub/gone.3mf", 1),
        model("/library/gone.stl", 1),
        model("/elsewhere/gone.stl", 1),
    ])
    .unwrap();

    let removed = prune_missing(&db, "/lib", |path: &Path| path.ends_with("kept.stl")).unwrap();
    assert_eq!(removed, 2);
    assert!(db.get_model("/lib/kept.stl").unwrap().is_some());
    assert!(db.get_model("/library/gone.stl").unwrap().is_some());
    assert!(db.get_model("/elsewhere/gone.stl").unwrap().is_some());
}

#[test]
fn test_prune_with_nothing_missing() {
    let db = Database::open_in_memory().unwrap();
    db.upsert_models(&[model("/lib/a.stl", 1)]).unwrap();
    assert_eq!(prune_missing(&db, "/lib/", |_| true).unwrap(), 0);
    assert_eq!(db.model_count().unwrap(), 1);
}
