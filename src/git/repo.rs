//! Bare repository helpers used by the resolver and bootstrap.
//!
//! A directory counts as a repository once it has an `objects` directory;
//! creation shells out to `git init --bare` through [`GitCommand`] so it gets
//! the same process-group handling as every other invocation.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use super::process::GitCommand;
use crate::config::HookScripts;

const HOOKS_DIR: &str = "hooks";

// ---------------------------------------------------------------------------
// Existence
// ---------------------------------------------------------------------------

/// Whether `path` holds a repository (has an `objects` directory).
pub async fn repo_exists(path: &Path) -> bool {
    tokio::fs::metadata(path.join("objects"))
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

/// Initialise a new bare repository at `path`, creating missing parents.
#[instrument(skip(git_path), fields(path = %path.display()))]
pub async fn init_bare_repo(git_path: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create parent directory: {}", parent.display()))?;
    }

    let mut process = GitCommand::new(git_path, "init")
        .arg("init")
        .arg("--bare")
        .arg(path)
        .spawn()?;
    let stderr = process.drain_stderr();

    let mut stdout = Vec::new();
    if let Some(mut out) = process.take_stdout() {
        out.read_to_end(&mut stdout)
            .await
            .context("failed to read git init output")?;
    }
    let status = process.finish().await.context("failed to wait on git init")?;
    let stderr = stderr.await.unwrap_or_default();

    if !status.success() {
        bail!("git init --bare failed (status {status}): {}", stderr.trim());
    }

    debug!("bare repo initialised");
    Ok(())
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Replace the contents of `<repo_path>/hooks` with the non-empty scripts in
/// `hooks`, each written with mode 0755.
#[instrument(skip(hooks), fields(path = %repo_path.display()))]
pub async fn provision_hooks(repo_path: &Path, hooks: &HookScripts) -> Result<()> {
    let dir = repo_path.join(HOOKS_DIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create hooks directory: {}", dir.display()))?;

    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .with_context(|| format!("failed to read hooks directory: {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            continue;
        }
        let path = entry.path();
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to remove old hook: {}", path.display()))?;
    }

    for (name, script) in hooks.entries() {
        if script.is_empty() {
            continue;
        }
        let path = dir.join(name);
        tokio::fs::write(&path, script)
            .await
            .with_context(|| format!("failed to write hook: {}", path.display()))?;
        set_executable(&path).await?;
        debug!(hook = name, "installed hook");
    }
    Ok(())
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .with_context(|| format!("failed to chmod hook: {}", path.display()))
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
