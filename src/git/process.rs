//! Spawning `git` in its own process group.
//!
//! Every subprocess is started as the leader of a fresh process group so that
//! helpers it forks (`pack-objects`, `index-pack`, compression filters) can be
//! terminated together with it.  A [`GitProcess`] must be released exactly
//! once, either with [`GitProcess::finish`] after its output has been
//! consumed, or with [`GitProcess::terminate`] on an early exit.  A handle
//! that is dropped without either (a panic, a cancelled future) kills the
//! whole group synchronously and leaves reaping of the leader to the Tokio
//! runtime.
//!
//! On platforms without process groups only the direct child is killed.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::RpcKind;

/// How long a terminated group gets to exit after SIGTERM before SIGKILL.
const GRACE_PERIOD: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Command builder
// ---------------------------------------------------------------------------

/// Builder for one `git` invocation.
///
/// The host environment is inherited unchanged: hooks rely on `GIT_DIR` and
/// the quarantine variables git exports to them.
pub struct GitCommand {
    cmd: Command,
    op: &'static str,
}

impl GitCommand {
    /// Start building an invocation of `program`.  `op` tags every log line
    /// about this process.
    pub fn new(program: impl AsRef<OsStr>, op: &'static str) -> Self {
        let mut cmd = Command::new(program);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        Self { cmd, op }
    }

    /// `<subcommand> --stateless-rpc [--advertise-refs] <repo_path>`.
    pub fn stateless_rpc(
        program: impl AsRef<OsStr>,
        rpc: RpcKind,
        repo_path: &Path,
        advertise_refs: bool,
        op: &'static str,
    ) -> Self {
        let mut command = Self::new(program, op)
            .arg(rpc.subcommand())
            .arg("--stateless-rpc");
        if advertise_refs {
            command = command.arg("--advertise-refs");
        }
        command.arg(repo_path)
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.cmd.arg(arg);
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cmd.current_dir(dir);
        self
    }

    /// Give the process a writable stdin instead of `/dev/null`.
    pub fn stdin_piped(mut self) -> Self {
        self.cmd.stdin(Stdio::piped());
        self
    }

    /// Spawn the process as the leader of a new process group.
    pub fn spawn(mut self) -> Result<GitProcess> {
        #[cfg(unix)]
        self.cmd.process_group(0);

        let program = self.cmd.as_std().get_program().to_string_lossy().into_owned();
        let child = self
            .cmd
            .spawn()
            .with_context(|| format!("failed to spawn {program} ({})", self.op))?;
        let pid = child.id();

        debug!(op = self.op, ?pid, %program, "spawned git process");

        Ok(GitProcess {
            child: Some(child),
            pid,
            op: self.op,
        })
    }
}

// ---------------------------------------------------------------------------
// Process handle
// ---------------------------------------------------------------------------

/// An owned, one-shot handle to a running `git` process group.
#[derive(Debug)]
pub struct GitProcess {
    child: Option<Child>,
    pid: Option<u32>,
    op: &'static str,
}

impl GitProcess {
    /// The phase tag this process was spawned for.
    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.as_mut()?.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.as_mut()?.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.as_mut()?.stderr.take()
    }

    /// Drain stderr on a background task, logging each line and returning
    /// the collected text once the pipe closes.
    ///
    /// Must be called before the process can block on a full stderr pipe.
    pub fn drain_stderr(&mut self) -> JoinHandle<String> {
        let stderr = self.take_stderr();
        let op = self.op;
        tokio::spawn(async move {
            let mut collected = String::new();
            let Some(stderr) = stderr else {
                return collected;
            };
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        warn!(op, %line, "git stderr");
                        collected.push_str(&line);
                        collected.push('\n');
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(op, error = %e, "failed to read git stderr");
                        break;
                    }
                }
            }
            collected
        })
    }

    /// Release after normal completion: wait for the leader to exit, kill
    /// whatever is left in its group, then reap the leader.
    ///
    /// The unreaped leader keeps the group id reserved, so the kill cannot
    /// reach a recycled group.  Where the exit cannot be observed without
    /// reaping, leftover members are not signalled.
    pub async fn finish(mut self) -> io::Result<ExitStatus> {
        let Some(mut child) = self.child.take() else {
            return Err(io::Error::other("git process already released"));
        };

        #[cfg(target_os = "linux")]
        if let Some(pid) = self.pid {
            if wait_unreaped(pid).await {
                signal_group(pid, nix::sys::signal::Signal::SIGKILL, self.op);
            }
        }
        let result = child.wait().await;

        match &result {
            Ok(status) if status.success() => debug!(op = self.op, %status, "git exited"),
            Ok(status) => warn!(op = self.op, %status, "git exited with non-zero status"),
            Err(e) => warn!(op = self.op, error = %e, "failed to wait on git"),
        }
        result
    }

    /// Release on an early exit: SIGTERM the group, give it a short grace
    /// period, SIGKILL it, and reap the leader.
    pub async fn terminate(mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            use nix::sys::signal::Signal;

            signal_group(pid, Signal::SIGTERM, self.op);
            let deadline = tokio::time::Instant::now() + GRACE_PERIOD;
            while tokio::time::Instant::now() < deadline {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            signal_group(pid, Signal::SIGKILL, self.op);
        }

        #[cfg(not(unix))]
        if let Err(e) = child.start_kill() {
            warn!(op = self.op, error = %e, "failed to kill git process");
        }

        match child.wait().await {
            Ok(status) => debug!(op = self.op, %status, "terminated git process"),
            Err(e) => warn!(op = self.op, error = %e, "failed to reap terminated git process"),
        }
    }

}

/// Block until `pid` has exited without reaping it.  Returns false when the
/// exit could not be observed.
#[cfg(target_os = "linux")]
async fn wait_unreaped(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let waited = tokio::task::spawn_blocking(move || loop {
        match waitid(
            Id::Pid(Pid::from_raw(raw)),
            WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT,
        ) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    })
    .await;
    match waited {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            warn!(pid, error = %e, "failed to observe git exit");
            false
        }
        Err(e) => {
            warn!(pid, error = %e, "exit watcher task failed");
            false
        }
    }
}

impl Drop for GitProcess {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        warn!(op = self.op, pid = ?self.pid, "git process dropped without release; killing group");

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            signal_group(pid, nix::sys::signal::Signal::SIGKILL, self.op);
        }
        // Also covers platforms without process groups.  The runtime reaps
        // the leader once it is dropped.
        let _ = child.start_kill();
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal, op: &'static str) {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(op, pid, ?signal, error = %e, "failed to signal process group"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn stateless_rpc_argument_convention() {
        let command = GitCommand::stateless_rpc(
            "git",
            RpcKind::UploadPack,
            Path::new("/srv/repos/acme/widgets"),
            true,
            "test",
        );
        let args: Vec<_> = command
            .cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "upload-pack",
                "--stateless-rpc",
                "--advertise-refs",
                "/srv/repos/acme/widgets"
            ]
        );
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let err = GitCommand::new("/nonexistent/gitrelay-test-git", "test")
            .spawn()
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn finish_reports_exit_status_and_output() {
        let mut process = GitCommand::new("sh", "test")
            .arg("-c")
            .arg("printf out; printf err >&2; exit 3")
            .spawn()
            .unwrap();
        let stderr = process.drain_stderr();
        let mut stdout = process.take_stdout().unwrap();
        let mut out = String::new();
        stdout.read_to_string(&mut out).await.unwrap();

        let status = process.finish().await.unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(out, "out");
        assert_eq!(stderr.await.unwrap(), "err\n");
    }

    #[tokio::test]
    async fn stdin_is_forwarded_and_closed() {
        let mut process = GitCommand::new("cat", "test").stdin_piped().spawn().unwrap();
        let mut stdin = process.take_stdin().unwrap();
        stdin.write_all(b"payload").await.unwrap();
        drop(stdin);

        let mut out = Vec::new();
        process
            .take_stdout()
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        assert!(process.finish().await.unwrap().success());
        assert_eq!(out, b"payload");
    }

    #[tokio::test]
    async fn terminate_kills_the_whole_group() {
        // The grandchild `sleep` inherits the group and keeps stdout open.
        let mut process = GitCommand::new("sh", "test")
            .arg("-c")
            .arg("sleep 30 & sleep 30")
            .spawn()
            .unwrap();
        let mut stdout = process.take_stdout().unwrap();

        let started = Instant::now();
        process.terminate().await;

        // Every writer of the pipe is gone, so EOF arrives promptly.
        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stdout.read_to_end(&mut rest))
            .await
            .expect("group members still hold stdout open")
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn finish_kills_members_left_behind_by_the_leader() {
        // The leader exits at once while the backgrounded `sleep` holds stdout.
        let mut process = GitCommand::new("sh", "test")
            .arg("-c")
            .arg("sleep 30 &")
            .spawn()
            .unwrap();
        let mut stdout = process.take_stdout().unwrap();
        assert!(process.finish().await.unwrap().success());

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stdout.read_to_end(&mut rest))
            .await
            .expect("group members still hold stdout open")
            .unwrap();
    }

    #[tokio::test]
    async fn dropping_without_release_kills_the_group() {
        let mut process = GitCommand::new("sh", "test")
            .arg("-c")
            .arg("sleep 30 & sleep 30")
            .spawn()
            .unwrap();
        let mut stdout = process.take_stdout().unwrap();
        drop(process);

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stdout.read_to_end(&mut rest))
            .await
            .expect("group members still hold stdout open")
            .unwrap();
    }
}
