//! End-to-end capture and restore against a real git binary.
//!
//! Each test returns early when git is not installed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use larder::{
    Backups, HookError, JobConfig, JobHooks, RepositoryBinding, Settings, SnapshotError,
    SnapshotHook, SnapshotJob, SnapshotScheduler, Stage, Stream, Tool, VersionStore,
};
use parking_lot::Mutex;
use tempfile::{tempdir, TempDir};

const IDENTITY: [(&str, &str); 3] = [
    ("user.name", "Larder Tests"),
    ("user.email", "larder@example.invalid"),
    ("commit.gpgsign", "false"),
];

fn git() -> Tool {
    Tool::new("git", Duration::from_secs(60))
}

async fn git_available() -> bool {
    git().probe().await.is_ok()
}

/// Store under `root/store-<name>`, working tree under `root/tree-<name>`.
async fn open_job(root: &Path, name: &str, tracked: Vec<PathBuf>) -> SnapshotJob {
    open_job_with_hooks(root, name, tracked, JobHooks::none()).await
}

async fn open_job_with_hooks(
    root: &Path,
    name: &str,
    tracked: Vec<PathBuf>,
    hooks: JobHooks,
) -> SnapshotJob {
    let tree = root.join(format!("tree-{name}"));
    std::fs::create_dir_all(&tree).unwrap();
    let store = VersionStore::open(
        RepositoryBinding::new(root.join(format!("store-{name}")), &tree),
        git(),
        IDENTITY,
    )
    .await
    .unwrap();
    SnapshotJob::new(
        JobConfig::new(name).with_tracked_paths(tracked),
        store,
        hooks,
    )
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

/// Writes "dump <n>" into `file` on every call, like a database dump.
struct DumpingHook {
    file: PathBuf,
    calls: AtomicUsize,
}

#[async_trait]
impl SnapshotHook for DumpingHook {
    fn name(&self) -> &str {
        "dumping"
    }

    async fn call(&self) -> Result<(), HookError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        write(&self.file, &format!("dump {n}"));
        Ok(())
    }
}

/// Records what `file` holds when called, then optionally fails.
struct RecordingHook {
    file: PathBuf,
    seen: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingHook {
    fn new(file: PathBuf, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            file,
            seen: Mutex::new(Vec::new()),
            fail,
        })
    }
}

#[async_trait]
impl SnapshotHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    async fn call(&self) -> Result<(), HookError> {
        let content = std::fs::read_to_string(&self.file)?;
        self.seen.lock().push(content);
        if self.fail {
            return Err("database refused the dump".into());
        }
        Ok(())
    }
}

// === Capture Tests ===

#[tokio::test]
async fn test_capture_then_head() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let job = open_job(dir.path(), "data", Vec::new()).await;
    assert!(job.head().await.unwrap().is_none());
    assert!(job.list().await.unwrap().is_empty());

    write(&job.store().work_tree().join("conf/app.conf"), "port=8080\n");
    let capture = job.run().await.unwrap();

    let commit = capture.commit.expect("first capture creates a snapshot");
    assert_eq!(job.head().await.unwrap(), Some(commit.clone()));
    assert_eq!(job.list().await.unwrap(), vec![commit.clone()]);
    assert_eq!(job.get(&commit.id).await.unwrap(), Some(commit));
}

#[tokio::test]
async fn test_capture_is_idempotent() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let job = open_job(dir.path(), "data", Vec::new()).await;
    write(&job.store().work_tree().join("a.txt"), "one");

    let first = job.run().await.unwrap().commit.unwrap();
    let second = job.run().await.unwrap();

    assert!(second.commit.is_none());
    assert_eq!(job.list().await.unwrap().len(), 1);
    assert_eq!(job.head().await.unwrap(), Some(first));
}

#[tokio::test]
async fn test_capture_of_empty_tree_creates_nothing() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let job = open_job(dir.path(), "program", Vec::new()).await;

    let capture = job.run().await.unwrap();

    assert!(capture.commit.is_none());
    assert!(job.head().await.unwrap().is_none());
}

#[tokio::test]
async fn test_tracked_paths_limit_staging() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree-data");
    let a = tree.join("conf/a.conf");
    let b = tree.join("data/b.bin");
    let ignored = tree.join("tmp/scratch");
    write(&a, "a1");
    write(&b, "b1");
    write(&ignored, "x");
    let job = open_job(dir.path(), "data", vec![a.clone(), tree.join("data")]).await;

    let first = job.run().await.unwrap().commit.unwrap();
    write(&a, "a2");
    let second = job.run().await.unwrap().commit.unwrap();

    assert_ne!(first, second);
    assert_eq!(job.diff(&first.id).await.unwrap(), vec!["conf/a.conf".to_string()]);
    assert!(job.diff(&second.id).await.unwrap().is_empty());
    assert_eq!(job.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_never_captured_missing_path_is_skipped() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree-data");
    write(&tree.join("other.txt"), "x");
    let job = open_job(
        dir.path(),
        "data",
        vec![tree.join("absent"), tree.join("other.txt")],
    )
    .await;

    assert!(job.run().await.unwrap().commit.is_some());

    // Direct staging still reports the missing path
    let err = job
        .store()
        .add(Stage::Path(&tree.join("absent")))
        .await
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Staging { .. }));
}

#[tokio::test]
async fn test_tracking_work_tree_root() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree-data");
    write(&tree.join("conf/app.conf"), "port=1");
    let job = open_job(dir.path(), "data", vec![tree.clone()]).await;

    let first = job.run().await.unwrap().commit.unwrap();
    assert!(job.run().await.unwrap().commit.is_none());

    write(&tree.join("conf/app.conf"), "port=2");
    job.run().await.unwrap().commit.unwrap();
    assert_eq!(job.diff(&first.id).await.unwrap(), vec!["conf/app.conf".to_string()]);
}

#[tokio::test]
async fn test_deleted_tracked_file_is_captured() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree-data");
    let a = tree.join("a.txt");
    let b = tree.join("b.txt");
    write(&a, "a");
    write(&b, "b");
    let job = open_job(dir.path(), "data", vec![a.clone(), b.clone()]).await;
    let first = job.run().await.unwrap().commit.unwrap();

    std::fs::remove_file(&a).unwrap();
    let second = job.run().await.unwrap().commit.unwrap();

    assert_ne!(first, second);
    assert_eq!(job.diff(&first.id).await.unwrap(), vec!["a.txt".to_string()]);
    assert!(job.diff(&second.id).await.unwrap().is_empty());

    job.rollback(&first.id).await.unwrap();
    assert_eq!(read(&a), "a");
}

// === Restore Tests ===

#[tokio::test]
async fn test_rollback_restores_and_keeps_safety_capture() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let job = open_job(dir.path(), "data", Vec::new()).await;
    let file = job.store().work_tree().join("conf/app.conf");

    write(&file, "v1");
    let v1 = job.run().await.unwrap().commit.unwrap();
    write(&file, "v2");

    job.rollback(&v1.id).await.unwrap();

    assert_eq!(read(&file), "v1");
    assert!(job.diff(&v1.id).await.unwrap().is_empty());
    assert_eq!(job.head().await.unwrap(), Some(v1.clone()));

    // The unsaved "v2" state was captured before the checkout
    let history = job.list().await.unwrap();
    assert_eq!(history.len(), 2);
    let safety = history.into_iter().find(|c| c != &v1).unwrap();

    job.rollback(&safety.id).await.unwrap();
    assert_eq!(read(&file), "v2");
    assert_eq!(job.list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_captures_on_detached_head_stay_listed() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let job = open_job(dir.path(), "data", Vec::new()).await;
    let file = job.store().work_tree().join("state");

    write(&file, "1");
    let first = job.run().await.unwrap().commit.unwrap();
    write(&file, "2");
    job.run().await.unwrap();

    job.rollback(&first.id).await.unwrap();
    write(&file, "3");
    let third = job.run().await.unwrap().commit.unwrap();
    job.rollback(&first.id).await.unwrap();

    let ids: Vec<String> = job.list().await.unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&third.id));
    assert_eq!(job.get(&third.id).await.unwrap(), Some(third));
}

#[tokio::test]
async fn test_unknown_restore_leaves_tree_untouched() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let job = open_job(dir.path(), "data", Vec::new()).await;
    let file = job.store().work_tree().join("a.txt");
    write(&file, "kept");
    job.run().await.unwrap();
    write(&file, "unsaved");

    let err = job.rollback("deadbeef").await.unwrap_err();

    assert!(matches!(err, SnapshotError::Restore(id) if id == "deadbeef"));
    assert_eq!(read(&file), "unsaved");
    assert_eq!(job.list().await.unwrap().len(), 1);
    assert!(job.get("deadbeef").await.unwrap().is_none());
}

#[tokio::test]
async fn test_apply_only_accepts_checkout() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let job = open_job(dir.path(), "data", Vec::new()).await;
    let file = job.store().work_tree().join("a.txt");
    write(&file, "one");
    let one = job.run().await.unwrap().commit.unwrap();
    write(&file, "two");

    let err = job.apply("reset", &one.id).await.unwrap_err();
    assert!(matches!(err, SnapshotError::UnsupportedCommand(_)));
    assert_eq!(read(&file), "two");
    assert_eq!(job.list().await.unwrap().len(), 1);

    job.apply("checkout", &one.id).await.unwrap();
    assert_eq!(read(&file), "one");
}

#[tokio::test]
async fn test_restore_before_path_existed_keeps_capturing() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree-data");
    let log = tree.join("logs/server.log");
    write(&tree.join("conf/app.conf"), "port=1");
    let job = open_job(dir.path(), "data", vec![tree.join("conf")]).await;
    let first = job.run().await.unwrap().commit.unwrap();

    write(&log, "started");
    job.add_tracked_path(tree.join("logs"));
    let second = job.run().await.unwrap().commit.unwrap();

    job.rollback(&first.id).await.unwrap();
    assert!(!log.exists());

    // The checkout removed a tracked path; captures carry on without it
    assert!(job.run().await.unwrap().commit.is_none());

    job.rollback(&second.id).await.unwrap();
    assert_eq!(read(&log), "started");
    assert_eq!(job.list().await.unwrap().len(), 2);
}

// === Hook Tests ===

#[tokio::test]
async fn test_before_capture_output_lands_in_commit() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let dump = dir.path().join("tree-data/pgsql/app.dump");
    let hook = Arc::new(DumpingHook {
        file: dump.clone(),
        calls: AtomicUsize::new(0),
    });
    let job = open_job_with_hooks(
        dir.path(),
        "data",
        Vec::new(),
        JobHooks {
            before_capture: Some(hook.clone()),
            after_restore: None,
        },
    )
    .await;

    let first = job.run().await.unwrap().commit.unwrap();
    assert!(job.diff(&first.id).await.unwrap().is_empty());

    // Nothing else changed, so the new dump alone makes a new snapshot
    let second = job.run().await.unwrap().commit.unwrap();
    assert_ne!(first, second);
    assert_eq!(read(&dump), "dump 2");

    job.rollback(&first.id).await.unwrap();
    assert_eq!(hook.calls.load(Ordering::SeqCst), 3);
    assert_eq!(read(&dump), "dump 1");
    assert_eq!(job.list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_after_restore_sees_restored_files() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let file = dir.path().join("tree-data/conf/app.conf");
    let hook = RecordingHook::new(file.clone(), false);
    let job = open_job_with_hooks(
        dir.path(),
        "data",
        Vec::new(),
        JobHooks {
            before_capture: None,
            after_restore: Some(hook.clone()),
        },
    )
    .await;

    write(&file, "v1");
    let v1 = job.run().await.unwrap().commit.unwrap();
    write(&file, "v2");
    job.run().await.unwrap();
    assert!(hook.seen.lock().is_empty());

    job.rollback(&v1.id).await.unwrap();

    assert_eq!(*hook.seen.lock(), vec!["v1".to_string()]);
}

#[tokio::test]
async fn test_after_restore_failure_is_reported() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let file = dir.path().join("tree-data/conf/app.conf");
    let hook = RecordingHook::new(file.clone(), true);
    let job = open_job_with_hooks(
        dir.path(),
        "data",
        Vec::new(),
        JobHooks {
            before_capture: None,
            after_restore: Some(hook.clone()),
        },
    )
    .await;

    write(&file, "v1");
    let v1 = job.run().await.unwrap().commit.unwrap();
    write(&file, "v2");

    let err = job.rollback(&v1.id).await.unwrap_err();

    assert!(matches!(err, SnapshotError::Hook { stage: "after-restore", .. }));
    assert_eq!(*hook.seen.lock(), vec!["v1".to_string()]);
    // Checkout and safety capture both happened before the hook
    assert_eq!(read(&file), "v1");
    assert_eq!(job.list().await.unwrap().len(), 2);
}

// === Isolation Tests ===

#[tokio::test]
async fn test_jobs_run_concurrently_in_isolation() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let data = open_job(dir.path(), "data", Vec::new()).await;
    let program = open_job(dir.path(), "program", Vec::new()).await;
    write(&data.store().work_tree().join("db.dump"), "rows");
    write(&program.store().work_tree().join("bin/app"), "binary");

    let (d, p) = tokio::join!(data.run(), program.run());
    let d = d.unwrap().commit.unwrap();
    let p = p.unwrap().commit.unwrap();

    assert_eq!(data.list().await.unwrap(), vec![d.clone()]);
    assert_eq!(program.list().await.unwrap(), vec![p.clone()]);
    assert!(data.get(&p.id).await.unwrap().is_none());
    assert!(program.get(&d.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_same_job_runs_are_serialized() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let job = Arc::new(open_job(dir.path(), "data", Vec::new()).await);
    write(&job.store().work_tree().join("a.txt"), "a");

    let (first, second) = tokio::join!(job.run(), job.run());
    let created = [first.unwrap().commit, second.unwrap().commit]
        .into_iter()
        .flatten()
        .count();

    assert_eq!(created, 1);
    assert_eq!(job.list().await.unwrap().len(), 1);
}

// === Store Tests ===

#[tokio::test]
async fn test_store_init_requires_parent() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let result = VersionStore::open(
        RepositoryBinding::new(dir.path().join("missing/store"), dir.path().join("tree")),
        git(),
        IDENTITY,
    )
    .await;

    assert!(matches!(result, Err(SnapshotError::StoreInit { .. })));
}

#[tokio::test]
async fn test_store_inside_work_tree_rejected() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree");
    std::fs::create_dir_all(&tree).unwrap();

    let result = VersionStore::open(
        RepositoryBinding::new(tree.join("backup"), &tree),
        git(),
        IDENTITY,
    )
    .await;

    assert!(matches!(result, Err(SnapshotError::StoreInit { .. })));
    assert!(!tree.join("backup").exists());
}

#[tokio::test]
async fn test_reopen_keeps_history() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let job = open_job(dir.path(), "data", Vec::new()).await;
    write(&job.store().work_tree().join("a.txt"), "a");
    let commit = job.run().await.unwrap().commit.unwrap();
    drop(job);

    let reopened = open_job(dir.path(), "data", Vec::new()).await;
    assert_eq!(reopened.head().await.unwrap(), Some(commit));
}

// === Assembly Tests ===

fn settings_in(dir: &TempDir) -> Settings {
    let root = dir.path();
    let mut settings = Settings::default();
    settings.git.dir = root.join("backup");
    for (key, value) in IDENTITY {
        settings.git.config.insert(key.to_string(), value.to_string());
    }
    settings.data.working_tree = root.join("var");
    settings.data.files = vec![root.join("var/conf")];
    settings.program.working_tree = root.join("app");
    std::fs::create_dir_all(root.join("var/conf")).unwrap();
    std::fs::create_dir_all(root.join("app")).unwrap();
    settings
}

#[tokio::test]
async fn test_backups_open_both_streams() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let settings = settings_in(&dir);
    settings.validate().unwrap();

    let backups = Backups::open(&settings).await.unwrap();

    assert!(dir.path().join("backup/data/HEAD").exists());
    assert!(dir.path().join("backup/program/HEAD").exists());
    assert_eq!(backups.get(Stream::Data).name(), "data");
    assert_eq!(backups.get(Stream::Program).name(), "program");
    assert_eq!(backups.iter().count(), 2);

    write(&dir.path().join("var/conf/app.conf"), "port=1");
    write(&dir.path().join("var/logs/server.log"), "noise");
    backups.get(Stream::Data).run().await.unwrap().commit.unwrap();
    write(&dir.path().join("var/conf/app.conf"), "port=2");
    write(&dir.path().join("var/logs/server.log"), "more noise");

    let head = backups.get(Stream::Data).head().await.unwrap().unwrap();
    assert_eq!(
        backups.get(Stream::Data).diff(&head.id).await.unwrap(),
        vec!["conf/app.conf".to_string()]
    );
    assert!(backups.get(Stream::Program).head().await.unwrap().is_none());
}

#[tokio::test]
async fn test_backups_reject_store_inside_working_tree() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let mut settings = settings_in(&dir);
    settings.git.dir = dir.path().join("var/backup");

    let result = Backups::open(&settings).await;

    assert!(matches!(result, Err(SnapshotError::StoreInit { .. })));
    assert!(!dir.path().join("var/backup/data/HEAD").exists());
}

#[tokio::test]
async fn test_backups_schedule_counts_bound_jobs() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let mut settings = settings_in(&dir);
    settings.data.schedule = Some("0 30 22 * * Mon-Fri".to_string());

    let backups = Backups::open(&settings).await.unwrap();
    let scheduler = SnapshotScheduler::new().await.unwrap();

    assert_eq!(backups.schedule(&scheduler).await.unwrap(), 1);
    assert_eq!(scheduler.job_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_fires_capture() {
    if !git_available().await {
        return;
    }
    let dir = tempdir().unwrap();
    let tree = dir.path().join("tree-data");
    write(&tree.join("a.txt"), "a");
    let store = VersionStore::open(
        RepositoryBinding::new(dir.path().join("store-data"), &tree),
        git(),
        IDENTITY,
    )
    .await
    .unwrap();
    let job = Arc::new(SnapshotJob::new(
        JobConfig::new("data").with_schedule("* * * * * *"),
        store,
        JobHooks::none(),
    ));

    let mut scheduler = SnapshotScheduler::new().await.unwrap();
    scheduler.schedule(job.clone()).await.unwrap();
    scheduler.start().await.unwrap();

    let mut captured = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if job.head().await.unwrap().is_some() {
            captured = true;
            break;
        }
    }
    scheduler.shutdown().await.unwrap();

    assert!(captured);
    assert!(scheduler.stats().fired() >= 1);
}
