use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use modelshelf_core::analysis::{find_duplicates, DuplicateSummary};
use modelshelf_core::platform;
use modelshelf_core::render::{
    EmbeddedPreviewBackend, RenderBackend, RenderScheduler, SchedulerOptions, Thumbnail,
    ThumbnailCache, TokioClock,
};
use modelshelf_core::storage::models::UserFields;
use modelshelf_core::storage::settings;
use modelshelf_core::{
    AppConfig, Error, Library, ProgressReporter, RenderError, ScanEngine, SilentReporter,
    ThumbnailReport,
};

const CUBE: &[u8] = b"solid cube\nfacet normal 0 0 1\nendfacet\nendsolid cube\n";

fn silent() -> Arc<dyn ProgressReporter> {
    Arc::new(SilentReporter)
}

fn engine() -> ScanEngine {
    ScanEngine::new(AppConfig::default(), Library::open_in_memory().unwrap())
}

fn preview_3mf(path: &Path) {
    let png = {
        let image = image::DynamicImage::ImageRgba8(image::RgbaImage::new(64, 48));
        let mut out = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    };
    let mut zip = zip::ZipWriter::new(fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("3D/3dmodel.model", options).unwrap();
    zip.write_all(b"<model unit=\"millimeter\"/>").unwrap();
    zip.start_file("Metadata/plate_1.png", options).unwrap();
    zip.write_all(&png).unwrap();
    zip.finish().unwrap();
}

/// Layout:
///   root/
///     a.stl            (CUBE)
///     parts/b.stl      (CUBE)        <- same bytes as a.stl
///     parts/c.3mf      (zip with a plate preview)
///     parts/readme.txt (not a model)
///     __MACOSX/a.stl   (skipped directory)
fn create_library(root: &Path) {
    let parts = root.join("parts");
    let mac = root.join("__MACOSX");
    fs::create_dir_all(&parts).unwrap();
    fs::create_dir_all(&mac).unwrap();

    fs::write(root.join("a.stl"), CUBE).unwrap();
    fs::write(parts.join("b.stl"), CUBE).unwrap();
    preview_3mf(&parts.join("c.3mf"));
    fs::write(parts.join("readme.txt"), "print me").unwrap();
    fs::write(mac.join("a.stl"), CUBE).unwrap();
}

/// Stored key for `p`. Paths whose file is already gone resolve through
/// their parent directory.
fn path_of(p: &Path) -> String {
    let resolved = match platform::canonical_path(p) {
        Ok(resolved) => resolved,
        Err(_) => platform::canonical_path(p.parent().unwrap())
            .unwrap()
            .join(p.file_name().unwrap()),
    };
    platform::normalize_path(&resolved)
}

#[tokio::test]
async fn test_full_scan_pipeline() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let engine = engine();
    let outcome = engine.scan(&root, silent()).await.unwrap();

    assert_eq!(outcome.files, 3, "a.stl, b.stl and c.3mf");
    assert!(outcome.total_examined >= 4);
    assert_eq!(outcome.removed, 0);
    assert_eq!(outcome.hashed, 3);
    assert_eq!(outcome.sync.counts.inserted, 3);
    assert!(outcome.sync.is_complete());

    let groups = engine
        .library()
        .with_db(|db| find_duplicates(db))
        .unwrap();
    assert_eq!(groups.len(), 1);
    let members: Vec<_> = groups.values().next().unwrap().iter().map(|m| m.file_name.as_str()).collect();
    assert_eq!(members, vec!["a.stl", "b.stl"]);

    let summary = DuplicateSummary::from_groups(&groups);
    assert_eq!(summary.files, 2);
    assert_eq!(summary.wasted_bytes, CUBE.len() as i64);
}

#[tokio::test]
async fn test_idempotent_rescan() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let engine = engine();
    engine.scan(&root, silent()).await.unwrap();
    let second = engine.scan(&root, silent()).await.unwrap();

    assert_eq!(second.removed, 0);
    assert_eq!(second.hashed, 0);
    assert_eq!(second.reused_hashes, 3);
    assert_eq!(second.sync.counts.inserted, 0);
    assert_eq!(second.sync.counts.updated, 0);
    assert_eq!(second.sync.counts.unchanged, 3);
    assert_eq!(engine.library().with_db(|db| Ok(db.model_count()?)).unwrap(), 3);
}

#[tokio::test]
async fn test_changed_file_is_rehashed() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let engine = engine();
    engine.scan(&root, silent()).await.unwrap();

    fs::write(root.join("parts/b.stl"), b"solid other\nendsolid other\n").unwrap();
    let rescan = engine.scan(&root, silent()).await.unwrap();
    assert_eq!(rescan.hashed, 1);
    assert_eq!(rescan.sync.counts.updated, 1);

    let groups = engine.library().with_db(|db| find_duplicates(db)).unwrap();
    assert!(groups.is_empty());
}

#[tokio::test]
async fn test_rescan_after_deletion_prunes_record_and_tags() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);
    let a_path = path_of(&root.join("a.stl"));
    let b_path = path_of(&root.join("parts/b.stl"));

    let engine = engine();
    engine.scan(&root, silent()).await.unwrap();

    let b_fields = UserFields {
        designer: Some("Grace".to_string()),
        printed: true,
        ..Default::default()
    };
    let (a_id, b_id) = engine
        .library()
        .with_db(|db| {
            let a = db.get_model(&a_path)?.unwrap().record.id;
            let b = db.get_model(&b_path)?.unwrap().record.id;
            db.set_model_tags(a, &["calibration".to_string()])?;
            db.set_model_tags(b, &["calibration".to_string()])?;
            db.update_user_fields(&b_path, &b_fields)?;
            Ok((a, b))
        })
        .unwrap();

    fs::remove_file(root.join("a.stl")).unwrap();
    let rescan = engine.scan(&root, silent()).await.unwrap();
    assert_eq!(rescan.removed, 1);
    assert_eq!(rescan.files, 2);

    engine
        .library()
        .with_db(|db| {
            assert!(db.get_model(&a_path)?.is_none());
            let a_links: i64 = db.connection().query_row(
                "SELECT COUNT(*) FROM model_tags WHERE model_id = ?1",
                [a_id],
                |row| row.get(0),
            )?;
            assert_eq!(a_links, 0);

            let b = db.get_model(&b_path)?.unwrap();
            assert_eq!(b.record.id, b_id);
            assert_eq!(b.record.user, b_fields);
            assert_eq!(b.tags, vec!["calibration".to_string()]);

            assert!(find_duplicates(db)?.is_empty());
            assert_eq!(db.count_orphaned_model_tags()?, 0);
            Ok(())
        })
        .unwrap();
}

#[tokio::test]
async fn test_pruning_never_touches_records_outside_root() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("lib");
    let sibling = tmp.path().join("lib-archive");
    create_library(&root);
    fs::create_dir_all(&sibling).unwrap();
    fs::write(sibling.join("old.stl"), CUBE).unwrap();

    let engine = engine();
    engine.scan(&root, silent()).await.unwrap();
    engine.scan(&sibling, silent()).await.unwrap();

    // The sibling's file vanishes but only `lib` is rescanned.
    fs::remove_file(sibling.join("old.stl")).unwrap();
    let rescan = engine.scan(&root, silent()).await.unwrap();
    assert_eq!(rescan.removed, 0);

    let old = path_of(&sibling.join("old.stl"));
    assert!(engine
        .library()
        .with_db(|db| Ok(db.get_model(&old)?))
        .unwrap()
        .is_some());

    let pruned = engine.scan(&sibling, silent()).await.unwrap();
    assert_eq!(pruned.removed, 1);
}

#[tokio::test]
async fn test_size_ceiling_from_settings() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let engine = engine();
    engine
        .library()
        .with_db(|db| Ok(db.set_setting(settings::MAX_FILE_SIZE_MB, "0")?))
        .unwrap();
    let outcome = engine.scan(&root, silent()).await.unwrap();
    assert_eq!(outcome.files, 0);
    assert!(outcome.total_examined >= 4);
}

#[tokio::test]
async fn test_ignore_patterns_exclude_files() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let config = AppConfig {
        ignore_patterns: vec!["**/parts/**".to_string()],
        ..Default::default()
    };
    let engine = ScanEngine::new(config, Library::open_in_memory().unwrap());
    let outcome = engine.scan(&root, silent()).await.unwrap();
    assert_eq!(outcome.files, 1);
}

#[tokio::test]
async fn test_missing_root_is_rejected() {
    let tmp = tempdir().unwrap();
    let err = engine()
        .scan(&tmp.path().join("nope"), silent())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RootNotFound(_)));
}

#[tokio::test]
async fn test_cancelled_scan_stops_early() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let engine = engine();
    engine.cancel_token().store(true, Ordering::Relaxed);
    let outcome = engine.scan(&root, silent()).await.unwrap();
    assert!(outcome.walk_cancelled);
    assert_eq!(outcome.files, 0);
    assert_eq!(outcome.sync.counts.total(), 0);
}

#[tokio::test]
async fn test_generate_thumbnails_renders_previews_and_falls_back() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let engine = engine();
    engine.scan(&root, silent()).await.unwrap();

    let scheduler = Arc::new(RenderScheduler::start(
        EmbeddedPreviewBackend::new(32),
        ThumbnailCache::shared(100),
        Arc::new(TokioClock),
        SchedulerOptions {
            max_concurrent_renders: 2,
            pacing: Duration::ZERO,
            retry_cooldown: Duration::ZERO,
            max_surface_uses: 100,
        },
    ));

    let report = engine
        .generate_thumbnails(Some(&root), &scheduler, silent())
        .await
        .unwrap();
    assert_eq!(report.requested, 3);
    assert_eq!(report.rendered, 1);
    assert_eq!(report.fallbacks, 2);
    assert_eq!(report.save_failures, 0);

    let c_path = path_of(&root.join("parts/c.3mf"));
    let stored = engine
        .library()
        .with_db(|db| Ok(db.get_thumbnail(&c_path)?))
        .unwrap()
        .unwrap();
    let decoded = image::load_from_memory(&stored).unwrap();
    assert!(decoded.width() <= 32 && decoded.height() <= 32);

    let again = engine
        .generate_thumbnails(Some(&root), &scheduler, silent())
        .await
        .unwrap();
    assert_eq!(again.requested, 0);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_rescan_through_another_spelling_of_the_root() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("lib");
    create_library(&root);

    let engine = engine();
    let first = engine.scan(&root, silent()).await.unwrap();
    assert_eq!(first.sync.counts.inserted, 3);

    let detour = root.join("parts").join("..").join("..").join("lib");
    let again = engine.scan(&detour, silent()).await.unwrap();
    assert_eq!(again.root, first.root);
    assert_eq!(again.sync.counts.inserted, 0);
    assert_eq!(again.sync.counts.unchanged, 3);
    assert_eq!(again.removed, 0);

    let stored = engine
        .library()
        .with_db(|db| Ok((db.model_count()?, find_duplicates(db)?)))
        .unwrap();
    assert_eq!(stored.0, 3);
    assert_eq!(stored.1.len(), 1);
    let members: Vec<_> = stored.1.values().next().unwrap().iter().map(|m| m.file_path.clone()).collect();
    assert_eq!(
        members,
        vec![path_of(&root.join("a.stl")), path_of(&root.join("parts/b.stl"))]
    );
    assert!(members.iter().all(|p| !p.contains("..")));
}

/// Succeeds after a fixed delay and counts how often it was asked.
struct SlowBackend {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl RenderBackend for SlowBackend {
    type Surface = ();

    fn create_surface(&self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn render(&self, _surface: &mut (), path: &Path) -> Result<Thumbnail, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Thumbnail::from_png(path.to_string_lossy().as_bytes().to_vec()))
    }
}

fn slow_scheduler(delay: Duration) -> Arc<RenderScheduler<SlowBackend>> {
    Arc::new(RenderScheduler::start(
        SlowBackend {
            delay,
            calls: AtomicUsize::new(0),
        },
        ThumbnailCache::shared(100),
        Arc::new(TokioClock),
        SchedulerOptions {
            max_concurrent_renders: 1,
            pacing: Duration::ZERO,
            retry_cooldown: Duration::ZERO,
            max_surface_uses: 100,
        },
    ))
}

#[tokio::test]
async fn test_cancel_stops_thumbnail_generation_midway() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("many");
    fs::create_dir_all(&root).unwrap();
    for i in 0..20 {
        fs::write(root.join(format!("part{i:02}.stl")), format!("solid p{i}\nendsolid p{i}\n")).unwrap();
    }

    let engine = engine();
    engine.scan(&root, silent()).await.unwrap();

    let scheduler = slow_scheduler(Duration::from_millis(20));
    let cancel = engine.cancel_token();
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.store(true, Ordering::Relaxed);
    });

    let report = engine
        .generate_thumbnails(Some(&root), &scheduler, silent())
        .await
        .unwrap();
    trigger.await.unwrap();

    let calls = scheduler.pool().backend().calls.load(Ordering::SeqCst);
    assert_eq!(report.requested, 20);
    assert!(report.skipped > 0, "nothing was skipped: {:?}", report);
    assert_eq!(calls, report.rendered);
    assert_eq!(report.rendered + report.skipped, 20);

    let remaining = engine
        .library()
        .with_db(|db| Ok(db.models_without_thumbnails(None)?.len()))
        .unwrap();
    assert_eq!(remaining, report.skipped);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_before_thumbnails_renders_nothing() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("library");
    create_library(&root);

    let engine = engine();
    engine.scan(&root, silent()).await.unwrap();
    engine.cancel_token().store(true, Ordering::Relaxed);

    let scheduler = slow_scheduler(Duration::ZERO);
    let report = engine
        .generate_thumbnails(Some(&root), &scheduler, silent())
        .await
        .unwrap();
    assert_eq!(report.requested, 3);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.rendered + report.fallbacks, 0);
    assert_eq!(scheduler.pool().backend().calls.load(Ordering::SeqCst), 0);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_thumbnails_stay_inside_the_requested_roots() {
    let tmp = tempdir().unwrap();
    let shelf = tmp.path().join("shelf");
    let attic = tmp.path().join("attic");
    fs::create_dir_all(&shelf).unwrap();
    fs::create_dir_all(&attic).unwrap();
    fs::write(shelf.join("gear.stl"), CUBE).unwrap();
    fs::write(shelf.join("axle.stl"), b"solid axle\nendsolid axle\n").unwrap();
    fs::write(attic.join("vase.stl"), b"solid vase\nendsolid vase\n").unwrap();

    let engine = engine();
    engine.scan(&shelf, silent()).await.unwrap();
    engine.scan(&attic, silent()).await.unwrap();

    let scheduler = slow_scheduler(Duration::ZERO);
    let mut total = ThumbnailReport::default();
    let first = engine
        .generate_thumbnails(Some(&shelf), &scheduler, silent())
        .await
        .unwrap();
    assert_eq!(first.requested, 2);
    total.add(first);

    let untouched = engine
        .library()
        .with_db(|db| Ok(db.models_without_thumbnails(None)?))
        .unwrap();
    assert_eq!(untouched, vec![path_of(&attic.join("vase.stl"))]);

    let second = engine
        .generate_thumbnails(Some(&attic), &scheduler, silent())
        .await
        .unwrap();
    total.add(second);
    assert_eq!(total.requested, 3);
    assert_eq!(total.rendered, 3);
    assert_eq!(total.skipped, 0);
    assert_eq!(scheduler.pool().backend().calls.load(Ordering::SeqCst), 3);
    scheduler.shutdown().await;
}
