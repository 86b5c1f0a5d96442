//! [`PushHandler`] that runs a configured shell command in the workspace.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::input::HookInfo;
use super::receiver::PushHandler;

/// Runs `sh -c <command>` inside the workspace with the push described in
/// `GITRELAY_*` environment variables.  Output goes straight to the hook's
/// stdout/stderr, which git relays to the pusher.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    command: String,
}

impl CommandHandler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait::async_trait]
impl PushHandler for CommandHandler {
    #[instrument(skip_all, fields(action = %info.action, git_ref = %info.git_ref))]
    async fn handle(&self, info: &HookInfo, workspace: &Path) -> Result<()> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(workspace)
            .env("GITRELAY_ACTION", info.action.as_str())
            .env("GITRELAY_REPO_NAME", &info.repo_name)
            .env("GITRELAY_REPO_PATH", &info.repo_path)
            .env("GITRELAY_OLD_REV", &info.old_rev)
            .env("GITRELAY_NEW_REV", &info.new_rev)
            .env("GITRELAY_REF", &info.git_ref)
            .env("GITRELAY_REF_TYPE", &info.ref_type)
            .env("GITRELAY_REF_NAME", &info.ref_name)
            .env("GITRELAY_WORKSPACE", workspace)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("failed to run handler command: {}", self.command))?;

        anyhow::ensure!(status.success(), "handler command exited with {status}");
        debug!(%status, "handler command finished");
        Ok(())
    }
}
