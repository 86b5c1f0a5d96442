//! The push pipeline run from git's hooks.
//!
//! For one hook invocation: parse every ref update, apply policy, then for
//! each update allocate a uniquely named workspace, export the pushed tree
//! into it, run the configured [`PushHandler`] there, and remove the
//! workspace again (unless running in debug mode).

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncReadExt};
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::input::{is_zero_rev, read_hook_input, HookInfo};
use crate::config::ReceiverSettings;
use crate::git::GitCommand;

const MASTER_REF: &str = "refs/heads/master";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("invalid hook input: {line:?}")]
    InvalidInput { line: String },

    #[error("no hook input received")]
    NoInput,

    #[error("failed to read hook input: {0}")]
    ReadInput(#[source] io::Error),

    #[error("pushing to {git_ref} is not allowed, only refs/heads/master accepts pushes")]
    NonMasterRef { git_ref: String },

    #[error("force push to {git_ref} denied")]
    ForcePushDenied { git_ref: String },

    #[error("failed to create workspace {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("repository might be empty: nothing to export at {rev}")]
    RepositoryEmpty { rev: String },

    #[error("failed to export {rev}: {output}")]
    Materialize { rev: String, output: String },

    #[error("{0:#}")]
    Spawn(anyhow::Error),

    #[error("git merge-base failed: {output}")]
    MergeBase { output: String },

    #[error("push handler failed: {0:#}")]
    Handler(anyhow::Error),
}

impl ReceiveError {
    /// Malformed or missing hook input.  Raised before any side effect.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::NoInput | Self::ReadInput(_)
        )
    }

    /// Rejected by configured policy.  Raised before any workspace exists.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::NonMasterRef { .. } | Self::ForcePushDenied { .. })
    }
}

// ---------------------------------------------------------------------------
// Handler capability
// ---------------------------------------------------------------------------

/// Work to run against a materialized push.
#[async_trait::async_trait]
pub trait PushHandler: Send + Sync {
    async fn handle(&self, info: &HookInfo, workspace: &Path) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ReceiverConfig {
    pub debug: bool,
    pub master_only: bool,
    pub deny_force_push: bool,
    pub temp_root: PathBuf,
    pub git_path: String,
    pub handler: Option<Arc<dyn PushHandler>>,
}

impl ReceiverConfig {
    pub fn from_settings(settings: &ReceiverSettings, handler: Option<Arc<dyn PushHandler>>) -> Self {
        Self {
            debug: settings.debug,
            master_only: settings.master_only,
            deny_force_push: settings.deny_force_push,
            temp_root: settings.temp_root.clone(),
            git_path: settings.git_path.clone(),
            handler,
        }
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// A uniquely named scratch directory owned by one push.  Removed on drop
/// unless `keep` is set.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    keep: bool,
}

impl Workspace {
    /// Create `<root>/<uuid>`.  The final component is created exclusively,
    /// so two pushes can never share a directory.
    pub async fn create(root: &Path, keep: bool) -> Result<Self, ReceiveError> {
        let path = root.join(Uuid::new_v4().to_string());
        let workspace_err = |source| ReceiveError::Workspace {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(root).await.map_err(workspace_err)?;
        let mut builder = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(0o774);
        builder.create(&path).await.map_err(workspace_err)?;

        debug!(workspace = %path.display(), "created workspace");
        Ok(Self { path, keep })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.keep {
            info!(workspace = %self.path.display(), "keeping workspace for inspection");
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(workspace = %self.path.display(), error = %e, "failed to remove workspace");
        }
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

pub struct Receiver {
    config: ReceiverConfig,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Self {
        Self { config }
    }

    /// Process one hook invocation read from `input` for the repository at
    /// `repo_path`.
    ///
    /// All input is parsed and every update passes policy before the first
    /// workspace is created.  Updates are then processed in order, stopping
    /// at the first failure.
    #[instrument(skip(self, input), fields(repo = %repo_path.display()))]
    pub async fn handle<R>(&self, input: R, repo_path: &Path) -> Result<(), ReceiveError>
    where
        R: AsyncBufRead + Unpin,
    {
        let updates = read_hook_input(input, repo_path).await?;
        for info in &updates {
            self.check_policy(info).await?;
        }
        for info in &updates {
            self.process(info).await?;
        }
        Ok(())
    }

    async fn check_policy(&self, info: &HookInfo) -> Result<(), ReceiveError> {
        if self.config.master_only && info.git_ref != MASTER_REF {
            return Err(ReceiveError::NonMasterRef {
                git_ref: info.git_ref.clone(),
            });
        }
        if self.config.deny_force_push
            && is_force_push(&self.config.git_path, &info.repo_path, &info.old_rev, &info.new_rev)
                .await?
        {
            return Err(ReceiveError::ForcePushDenied {
                git_ref: info.git_ref.clone(),
            });
        }
        Ok(())
    }

    async fn process(&self, info: &HookInfo) -> Result<(), ReceiveError> {
        let workspace = Workspace::create(&self.config.temp_root, self.config.debug).await?;

        if is_zero_rev(&info.new_rev) {
            debug!(git_ref = %info.git_ref, "ref deleted; nothing to export");
        } else {
            materialize(
                &self.config.git_path,
                &info.repo_path,
                &info.new_rev,
                workspace.path(),
            )
            .await?;
        }

        if let Some(handler) = &self.config.handler {
            handler
                .handle(info, workspace.path())
                .await
                .map_err(ReceiveError::Handler)?;
        }

        info!(action = %info.action, git_ref = %info.git_ref, rev = %info.new_rev, "push processed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Materialization
// ---------------------------------------------------------------------------

/// Export the tree at `rev` into `dest` by streaming `git archive` output
/// through a tar extractor.
#[instrument(skip(git_path), fields(repo = %repo_path.display(), dest = %dest.display()))]
pub async fn materialize(
    git_path: &str,
    repo_path: &Path,
    rev: &str,
    dest: &Path,
) -> Result<(), ReceiveError> {
    let mut process = GitCommand::new(git_path, "archive")
        .arg("archive")
        .arg("--format=tar")
        .arg(rev)
        .current_dir(repo_path)
        .spawn()
        .map_err(ReceiveError::Spawn)?;
    let stderr = process.drain_stderr();

    let Some(stdout) = process.take_stdout() else {
        process.terminate().await;
        return Err(ReceiveError::Materialize {
            rev: rev.to_owned(),
            output: "archive stdout unavailable".to_owned(),
        });
    };

    let reader = CountingReader::new(SyncIoBridge::new(stdout));
    let dest_owned = dest.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || {
        let mut archive = tar::Archive::new(reader);
        let unpacked = archive.unpack(&dest_owned);
        let mut reader = archive.into_inner();
        // Drain trailing padding so git never sees a closed pipe.
        let _ = io::copy(&mut reader, &mut io::sink());
        (unpacked, reader.count)
    })
    .await;

    let (unpacked, bytes) = match extracted {
        Ok(result) => result,
        Err(e) => {
            process.terminate().await;
            return Err(ReceiveError::Materialize {
                rev: rev.to_owned(),
                output: format!("extraction task failed: {e}"),
            });
        }
    };

    let status = process.finish().await;
    let stderr = stderr.await.unwrap_or_default();

    let output = match status {
        Ok(status) if status.success() && bytes == 0 => {
            warn!(op = "archive", %rev, "archive produced no data");
            return Err(ReceiveError::RepositoryEmpty { rev: rev.to_owned() });
        }
        Ok(status) if status.success() => match unpacked {
            Ok(()) => {
                debug!(op = "archive", bytes, "tree exported");
                return Ok(());
            }
            Err(e) => format!("tar extraction failed: {e}"),
        },
        Ok(status) => {
            if bytes == 0 && !has_refs(git_path, repo_path).await.unwrap_or(true) {
                warn!(op = "archive", %rev, "repository has no refs");
                return Err(ReceiveError::RepositoryEmpty { rev: rev.to_owned() });
            }
            format!("git archive exited with {status}: {}", stderr.trim())
        }
        Err(e) => format!("failed to wait on git archive: {e}"),
    };
    Err(ReceiveError::Materialize {
        rev: rev.to_owned(),
        output,
    })
}

/// Whether the repository holds at least one ref.  `None` when git cannot
/// answer, e.g. because `repo_path` is not a repository.
async fn has_refs(git_path: &str, repo_path: &Path) -> Option<bool> {
    let mut process = GitCommand::new(git_path, "for-each-ref")
        .arg("for-each-ref")
        .arg("--count=1")
        .current_dir(repo_path)
        .spawn()
        .ok()?;
    let stderr = process.drain_stderr();
    let mut stdout = String::new();
    if let Some(mut out) = process.take_stdout() {
        out.read_to_string(&mut stdout).await.ok()?;
    }
    let status = process.finish().await.ok()?;
    let _ = stderr.await;
    status.success().then(|| !stdout.trim().is_empty())
}

/// `Read` adapter that counts the bytes passing through it.
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Force-push detection
// ---------------------------------------------------------------------------

/// Whether updating `old_rev` to `new_rev` is not a fast-forward.
///
/// Creations and deletions are never force pushes and return without running
/// git.  When git cannot determine a merge base the error is returned, never
/// a default answer.  Histories without any common ancestor (`merge-base`
/// exits 1 with no output) count as a force push.
#[instrument(skip(git_path), fields(repo = %repo_path.display()))]
pub async fn is_force_push(
    git_path: &str,
    repo_path: &Path,
    old_rev: &str,
    new_rev: &str,
) -> Result<bool, ReceiveError> {
    if is_zero_rev(old_rev) || is_zero_rev(new_rev) {
        return Ok(false);
    }

    let mut process = GitCommand::new(git_path, "merge-base")
        .arg("merge-base")
        .arg(old_rev)
        .arg(new_rev)
        .current_dir(repo_path)
        .spawn()
        .map_err(ReceiveError::Spawn)?;
    let stderr = process.drain_stderr();

    let mut stdout = String::new();
    let read = match process.take_stdout() {
        Some(mut out) => out.read_to_string(&mut stdout).await.map(|_| ()),
        None => Ok(()),
    };
    let status = process.finish().await;
    let stderr = stderr.await.unwrap_or_default();

    let status = match (read, status) {
        (Ok(()), Ok(status)) => status,
        (Err(e), _) | (_, Err(e)) => {
            return Err(ReceiveError::MergeBase {
                output: e.to_string(),
            })
        }
    };

    let base = stdout.trim();
    if status.success() {
        let forced = base != old_rev;
        debug!(op = "merge-base", %base, forced, "computed merge base");
        return Ok(forced);
    }
    if status.code() == Some(1) && base.is_empty() && stderr.trim().is_empty() {
        debug!(op = "merge-base", "no common ancestor");
        return Ok(true);
    }
    Err(ReceiveError::MergeBase {
        output: format!("{status}: {}", stderr.trim()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::process::Command;
    use std::sync::Mutex;

    use super::*;
    use crate::git::repo::tests::git_available;
    use crate::hook::input::ZERO_REV;

    const MISSING_GIT: &str = "/nonexistent/gitrelay-test-git";

    /// A work tree with `commits` linear commits; returns their revisions.
    fn repo_with_commits(dir: &Path, commits: usize) -> Vec<String> {
        let git = |args: &[&str]| {
            let out = Command::new("git")
                .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
                .args(args)
                .current_dir(dir)
                .output()
                .unwrap();
            assert!(out.status.success(), "git {args:?}: {out:?}");
            String::from_utf8(out.stdout).unwrap().trim().to_owned()
        };
        git(&["init", "-q"]);
        (0..commits)
            .map(|i| {
                std::fs::write(dir.join("README.md"), format!("revision {i}\n")).unwrap();
                std::fs::create_dir_all(dir.join("src")).unwrap();
                std::fs::write(dir.join("src/lib.rs"), format!("// {i}\n")).unwrap();
                git(&["add", "."]);
                git(&["commit", "-q", "-m", &format!("commit {i}")]);
                git(&["rev-parse", "HEAD"])
            })
            .collect()
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, PathBuf, bool)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl PushHandler for Recorder {
        async fn handle(&self, info: &HookInfo, workspace: &Path) -> anyhow::Result<()> {
            let has_readme = workspace.join("README.md").is_file();
            self.calls.lock().unwrap().push((
                info.action.to_string(),
                workspace.to_path_buf(),
                has_readme,
            ));
            anyhow::ensure!(!self.fail, "deploy failed");
            Ok(())
        }
    }

    fn config(temp_root: &Path, handler: Arc<Recorder>) -> ReceiverConfig {
        ReceiverConfig {
            debug: false,
            master_only: false,
            deny_force_push: false,
            temp_root: temp_root.to_path_buf(),
            git_path: "git".into(),
            handler: Some(handler as Arc<dyn PushHandler>),
        }
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    // ── is_force_push ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_zero_rev_is_never_forced() {
        let rev = "a3d33576d686e7dc1d90ec4b1a6e94e760a893b2";
        let here = Path::new(".");
        // A git binary that cannot be spawned proves git is never run.
        assert!(!is_force_push(MISSING_GIT, here, ZERO_REV, rev).await.unwrap());
        assert!(!is_force_push(MISSING_GIT, here, rev, ZERO_REV).await.unwrap());
        assert!(matches!(
            is_force_push(MISSING_GIT, here, rev, rev).await,
            Err(ReceiveError::Spawn(_))
        ));
    }

    #[tokio::test]
    async fn test_force_push_detection() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let revs = repo_with_commits(tmp.path(), 2);

        assert!(!is_force_push("git", tmp.path(), &revs[0], &revs[1]).await.unwrap());
        assert!(is_force_push("git", tmp.path(), &revs[1], &revs[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_revision_is_an_error() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let revs = repo_with_commits(tmp.path(), 1);
        let bogus = "1111111111111111111111111111111111111111";

        let err = is_force_push("git", tmp.path(), &revs[0], bogus)
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::MergeBase { .. }));
    }

    // ── Receiver ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_invalid_input_has_no_side_effects() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("work");
        let handler = Arc::new(Recorder::default());
        let receiver = Receiver::new(config(&root, handler.clone()));

        let err = receiver
            .handle(&b"a b c d\n"[..], tmp.path())
            .await
            .unwrap_err();
        assert!(err.is_input_error());
        assert!(!root.exists());
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_master_only_rejects_before_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("work");
        let handler = Arc::new(Recorder::default());
        let mut cfg = config(&root, handler.clone());
        cfg.master_only = true;
        cfg.git_path = MISSING_GIT.into();

        let input = format!(
            "{ZERO_REV} a3d33576d686e7dc1d90ec4b1a6e94e760a893b2 refs/heads/develop\n"
        );
        let err = Receiver::new(cfg)
            .handle(input.as_bytes(), tmp.path())
            .await
            .unwrap_err();
        assert!(err.is_policy_violation());
        assert!(!root.exists());
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_workspace_removed_after_success() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir(&repo).unwrap();
        let revs = repo_with_commits(&repo, 1);
        let root = tmp.path().join("work");
        let handler = Arc::new(Recorder::default());

        let input = format!("{ZERO_REV} {} refs/heads/master\n", revs[0]);
        Receiver::new(config(&root, handler.clone()))
            .handle(input.as_bytes(), &repo)
            .await
            .unwrap();

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (action, workspace, had_readme) = &calls[0];
        assert_eq!(action, "branch.create");
        assert!(had_readme);
        assert!(workspace.starts_with(&root));
        assert!(!workspace.exists());
        assert_eq!(entries(&root), 0);
    }

    #[tokio::test]
    async fn test_workspace_kept_in_debug_mode() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir(&repo).unwrap();
        let revs = repo_with_commits(&repo, 2);
        let root = tmp.path().join("work");
        let handler = Arc::new(Recorder::default());
        let mut cfg = config(&root, handler.clone());
        cfg.debug = true;

        let input = format!("{} {} refs/heads/master\n", revs[0], revs[1]);
        Receiver::new(cfg)
            .handle(input.as_bytes(), &repo)
            .await
            .unwrap();

        let calls = handler.calls.lock().unwrap();
        let workspace = &calls[0].1;
        assert_eq!(
            std::fs::read_to_string(workspace.join("README.md")).unwrap(),
            "revision 1\n"
        );
        assert_eq!(
            std::fs::read_to_string(workspace.join("src/lib.rs")).unwrap(),
            "// 1\n"
        );
    }

    #[tokio::test]
    async fn test_workspace_removed_after_handler_error() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir(&repo).unwrap();
        let revs = repo_with_commits(&repo, 1);
        let root = tmp.path().join("work");
        let handler = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });

        let input = format!("{ZERO_REV} {} refs/heads/master\n", revs[0]);
        let err = Receiver::new(config(&root, handler.clone()))
            .handle(input.as_bytes(), &repo)
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::Handler(_)));
        assert!(err.to_string().contains("deploy failed"));
        assert_eq!(entries(&root), 0);
    }

    #[tokio::test]
    async fn test_empty_repository() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("empty.git");
        crate::git::init_bare_repo("git", &repo).await.unwrap();
        let root = tmp.path().join("work");
        let handler = Arc::new(Recorder::default());

        let input = format!(
            "{ZERO_REV} a3d33576d686e7dc1d90ec4b1a6e94e760a893b2 refs/heads/master\n"
        );
        let err = Receiver::new(config(&root, handler.clone()))
            .handle(input.as_bytes(), &repo)
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::RepositoryEmpty { .. }));
        assert!(handler.calls.lock().unwrap().is_empty());
        assert_eq!(entries(&root), 0);
    }

    #[tokio::test]
    async fn test_archive_failures_keep_git_output() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let plain = tmp.path().join("plain");
        std::fs::create_dir(&plain).unwrap();
        let dest = tmp.path().join("dest");
        std::fs::create_dir(&dest).unwrap();

        let err = materialize("git", &plain, "a3d33576d686e7dc1d90ec4b1a6e94e760a893b2", &dest)
            .await
            .unwrap_err();
        match err {
            ReceiveError::Materialize { output, .. } => assert!(!output.is_empty()),
            other => panic!("expected Materialize, got {other:?}"),
        }

        let populated = tmp.path().join("populated");
        std::fs::create_dir(&populated).unwrap();
        repo_with_commits(&populated, 1);
        let err = materialize("git", &populated, "1111111111111111111111111111111111111111", &dest)
            .await
            .unwrap_err();
        match err {
            ReceiveError::Materialize { output, .. } => {
                assert!(output.contains("exited with"), "{output}")
            }
            other => panic!("expected Materialize, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_repository_archive() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("empty.git");
        crate::git::init_bare_repo("git", &repo).await.unwrap();
        let dest = tmp.path().join("dest");
        std::fs::create_dir(&dest).unwrap();

        let err = materialize("git", &repo, "HEAD", &dest).await.unwrap_err();
        assert!(matches!(err, ReceiveError::RepositoryEmpty { .. }));
    }

    #[tokio::test]
    async fn test_deletion_gets_empty_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("work");
        let handler = Arc::new(Recorder::default());
        let mut cfg = config(&root, handler.clone());
        cfg.git_path = MISSING_GIT.into();

        let input = format!(
            "a3d33576d686e7dc1d90ec4b1a6e94e760a893b2 {ZERO_REV} refs/tags/v1.0\n"
        );
        Receiver::new(cfg)
            .handle(input.as_bytes(), tmp.path())
            .await
            .unwrap();

        let calls = handler.calls.lock().unwrap();
        assert_eq!(calls[0].0, "tag.delete");
        assert!(!calls[0].2);
    }

    #[tokio::test]
    async fn test_deny_force_push() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir(&repo).unwrap();
        let revs = repo_with_commits(&repo, 2);
        let root = tmp.path().join("work");
        let handler = Arc::new(Recorder::default());
        let mut cfg = config(&root, handler.clone());
        cfg.deny_force_push = true;

        let input = format!("{} {} refs/heads/master\n", revs[1], revs[0]);
        let err = Receiver::new(cfg)
            .handle(input.as_bytes(), &repo)
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::ForcePushDenied { .. }));
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_workspaces_are_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let a = Workspace::create(tmp.path(), false).await.unwrap();
        let b = Workspace::create(tmp.path(), false).await.unwrap();
        assert_ne!(a.path(), b.path());
        let kept = a.path().to_path_buf();
        drop(a);
        assert!(!kept.exists());
        assert!(b.path().is_dir());
    }
}
