//! Version store backed by a git repository kept apart from its working tree

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, trace, warn};

use crate::commit::{parse_log, Commit, LOG_FORMAT};
use crate::error::{SnapshotError, SnapshotResult};
use crate::process::{Tool, ToolOutput};

/// Output fragments git prints when a commit has nothing staged.
const NOTHING_TO_COMMIT: [&str; 3] = [
    "nothing to commit",
    "nothing added to commit",
    "no changes added to commit",
];

/// Namespace for refs that keep captured commits reachable.
const KEEP_REF_PREFIX: &str = "refs/snapshots/";

/// Where a store lives and which tree it versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryBinding {
    /// Version-control metadata directory
    pub store_dir: PathBuf,
    /// Directory whose contents are versioned
    pub work_tree: PathBuf,
}

impl RepositoryBinding {
    pub fn new(store_dir: impl Into<PathBuf>, work_tree: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            work_tree: work_tree.into(),
        }
    }
}

/// What to stage before a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage<'a> {
    /// Every change in the working tree
    All,
    /// One file or directory
    Path(&'a Path),
}

/// A git repository bound to one working tree
pub struct VersionStore {
    store_dir: PathBuf,
    work_tree: PathBuf,
    git: Tool,
}

impl VersionStore {
    /// Bind a store without touching the filesystem.
    ///
    /// Relative paths are resolved against the current directory, since git
    /// runs from inside the working tree. The store may not live inside the
    /// tree it versions, or every capture would commit the store itself.
    pub fn new(binding: RepositoryBinding, git: Tool) -> SnapshotResult<Self> {
        let store_dir = absolute(&binding.store_dir)?;
        let work_tree = absolute(&binding.work_tree)?;
        if store_dir.starts_with(&work_tree) {
            return Err(SnapshotError::StoreInit {
                path: store_dir,
                reason: format!("inside its own working tree {}", work_tree.display()),
            });
        }
        let git = git
            .with_current_dir(&work_tree)
            .with_env("LC_ALL", "C")
            .with_env("GIT_TERMINAL_PROMPT", "0");

        Ok(Self {
            store_dir,
            work_tree,
            git,
        })
    }

    /// Bind, initialize and configure a store.
    pub async fn open<'a, I>(binding: RepositoryBinding, git: Tool, options: I) -> SnapshotResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let store = Self::new(binding, git)?;
        store.initialize().await?;
        for (key, value) in options {
            store.configure(key, value).await?;
        }
        Ok(store)
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    /// Create the store if it does not exist yet.
    pub async fn initialize(&self) -> SnapshotResult<()> {
        let parent = self.store_dir.parent().unwrap_or(Path::new("/"));
        if !fs::try_exists(parent).await.unwrap_or(false) {
            return Err(SnapshotError::StoreInit {
                path: self.store_dir.clone(),
                reason: format!("parent directory {} does not exist", parent.display()),
            });
        }

        if fs::try_exists(self.store_dir.join("HEAD")).await.unwrap_or(false) {
            debug!(store = %self.store_dir.display(), "Store already initialized");
            return Ok(());
        }

        fs::create_dir_all(&self.store_dir)
            .await
            .map_err(|e| SnapshotError::StoreInit {
                path: self.store_dir.clone(),
                reason: e.to_string(),
            })?;
        self.git(["init", "--quiet"]).await?;

        info!(
            store = %self.store_dir.display(),
            work_tree = %self.work_tree.display(),
            "Initialized store"
        );
        Ok(())
    }

    /// Apply a repository option; empty values are skipped.
    pub async fn configure(&self, key: &str, value: &str) -> SnapshotResult<()> {
        if key.is_empty() || value.is_empty() {
            return Ok(());
        }
        self.git(["config", key, value]).await?;
        debug!(key, value, "Applied store option");
        Ok(())
    }

    /// Stage the whole working tree or a single path.
    pub async fn add(&self, stage: Stage<'_>) -> SnapshotResult<()> {
        match stage {
            Stage::All => {
                self.git(["add", "--all"]).await?;
            }
            Stage::Path(path) => {
                let full = self.work_tree.join(path);
                if !fs::try_exists(&full).await.unwrap_or(false) {
                    return Err(SnapshotError::staging(full, "path does not exist"));
                }
                let relative = self.worktree_relative(&full)?;
                let mut args = vec![OsString::from("add"), "--all".into(), "--".into()];
                args.push(relative.into_os_string());
                self.git(args).await?;
            }
        }
        Ok(())
    }

    /// Stage a tracked path for a capture.
    ///
    /// Unlike [`add`], a path missing from disk is not an error: its deletion
    /// is staged when the index knows it, otherwise it is skipped. Returns
    /// whether anything was staged.
    ///
    /// [`add`]: VersionStore::add
    pub async fn stage_tracked(&self, path: &Path) -> SnapshotResult<bool> {
        let full = self.work_tree.join(path);
        if fs::try_exists(&full).await.unwrap_or(false) {
            self.add(Stage::Path(&full)).await?;
            return Ok(true);
        }

        let relative = self.worktree_relative(&full)?;
        if !self.is_known(&relative).await? {
            warn!(
                store = %self.store_dir.display(),
                path = %full.display(),
                "Tracked path is missing and was never captured, skipping"
            );
            return Ok(false);
        }

        debug!(path = %full.display(), "Staging removal of tracked path");
        let mut args = vec![OsString::from("add"), "--all".into(), "--".into()];
        args.push(relative.into_os_string());
        self.git(args).await?;
        Ok(true)
    }

    /// Commit staged changes, returning the tool's output.
    ///
    /// A commit with nothing staged succeeds and leaves the history untouched.
    pub async fn commit(&self, message: &str) -> SnapshotResult<String> {
        let output = self.git_output(["commit", "-m", message]).await?;
        let text = output.combined();
        if output.success() {
            return Ok(text);
        }
        if NOTHING_TO_COMMIT.iter().any(|marker| text.contains(marker)) {
            debug!(store = %self.store_dir.display(), "Nothing to commit");
            return Ok(text);
        }
        Err(SnapshotError::ToolInvocation {
            command: "git commit".to_string(),
            status: output.status,
            output: text,
        })
    }

    /// Keep a commit reachable from `--all` even after HEAD moves away from it.
    pub async fn keep(&self, commit: &Commit) -> SnapshotResult<()> {
        let reference = format!("{KEEP_REF_PREFIX}{}", commit.id);
        self.git(["update-ref", reference.as_str(), commit.id.as_str()])
            .await?;
        trace!(reference = %reference, "Pinned commit");
        Ok(())
    }

    /// Compact the store. Advisory: failures are only logged.
    pub async fn gc(&self) {
        match self.git(["gc", "--quiet"]).await {
            Ok(_) => debug!(store = %self.store_dir.display(), "Store compacted"),
            Err(e) => warn!(store = %self.store_dir.display(), error = %e, "Store compaction failed"),
        }
    }

    /// Move the working tree and HEAD to `id` in detached mode.
    pub async fn checkout(&self, id: &str) -> SnapshotResult<String> {
        if !self.resolves(id).await? {
            return Err(SnapshotError::Restore(id.to_string()));
        }
        let output = self.git(["checkout", "--detach", id]).await?;
        Ok(output.combined())
    }

    /// Paths that differ between `id` and the working tree.
    pub async fn diff(&self, id: &str) -> SnapshotResult<Vec<String>> {
        if id.starts_with('-') {
            return Err(SnapshotError::Restore(id.to_string()));
        }
        let output = self.git(["diff", "--name-only", id, "--"]).await?;
        Ok(output
            .stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// All commits, newest first.
    pub async fn commits(&self) -> SnapshotResult<Vec<Commit>> {
        self.commits_matching(&["--all"]).await
    }

    /// Commits matching a rev-list selector, in the store's native order.
    pub async fn commits_matching(&self, selector: &[&str]) -> SnapshotResult<Vec<Commit>> {
        let mut args = vec!["rev-list", "--abbrev-commit", LOG_FORMAT];
        args.extend_from_slice(selector);
        let output = self.git(args).await?;
        Ok(parse_log(&output.stdout))
    }

    /// Look up one commit by its abbreviated id.
    pub async fn commit_by_id(&self, id: &str) -> SnapshotResult<Option<Commit>> {
        if !self.resolves(id).await? {
            return Ok(None);
        }
        let commit = self
            .commits_matching(&["-n", "1", id])
            .await?
            .into_iter()
            .next();
        Ok(commit.filter(|c| c.id == id))
    }

    /// Latest commit, `None` on an empty store.
    pub async fn head(&self) -> SnapshotResult<Option<Commit>> {
        if !self.resolves("HEAD").await? {
            return Ok(None);
        }
        Ok(self
            .commits_matching(&["-n", "1", "HEAD"])
            .await?
            .into_iter()
            .next())
    }

    /// Path relative to the working tree, quoted for display in commands.
    ///
    /// Fails with [`SnapshotError::Staging`] for paths outside the tree.
    pub fn relative_path(&self, path: &Path) -> SnapshotResult<String> {
        let relative = self.worktree_relative(&self.work_tree.join(path))?;
        Ok(format!("\"{}\"", relative.display()))
    }

    // Private helpers

    /// The tree root itself maps to `.`, never to an empty pathspec.
    fn worktree_relative(&self, path: &Path) -> SnapshotResult<PathBuf> {
        let normalized = normalize(path);
        let relative = normalized.strip_prefix(&self.work_tree).map_err(|_| {
            SnapshotError::staging(
                path,
                format!("outside working tree {}", self.work_tree.display()),
            )
        })?;
        if relative.as_os_str().is_empty() {
            Ok(PathBuf::from("."))
        } else {
            Ok(relative.to_path_buf())
        }
    }

    /// Whether the index holds `relative` or anything below it.
    async fn is_known(&self, relative: &Path) -> SnapshotResult<bool> {
        let mut args = vec![
            OsString::from("ls-files"),
            "--error-unmatch".into(),
            "--".into(),
        ];
        args.push(relative.as_os_str().to_os_string());
        Ok(self.git_output(args).await?.success())
    }

    /// Whether `rev` names a commit in this store.
    async fn resolves(&self, rev: &str) -> SnapshotResult<bool> {
        if rev.is_empty() || rev.starts_with('-') {
            return Ok(false);
        }
        let revision = format!("{rev}^{{commit}}");
        let output = self
            .git_output(["rev-parse", "--verify", "--quiet", revision.as_str()])
            .await?;
        Ok(output.success())
    }

    fn git_args<I, S>(&self, args: I) -> Vec<OsString>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut git_dir = OsString::from("--git-dir=");
        git_dir.push(&self.store_dir);
        let mut work_tree = OsString::from("--work-tree=");
        work_tree.push(&self.work_tree);

        let mut full = vec![git_dir, work_tree];
        full.extend(args.into_iter().map(Into::into));
        full
    }

    async fn git<I, S>(&self, args: I) -> SnapshotResult<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.git.run(self.git_args(args)).await
    }

    async fn git_output<I, S>(&self, args: I) -> SnapshotResult<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.git.output(self.git_args(args)).await
    }
}

fn absolute(path: &Path) -> SnapshotResult<PathBuf> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(path)))
    }
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
