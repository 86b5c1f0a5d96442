//! Everything that shells out to the `git` binary.
//!
//! Subprocesses are spawned through [`process::GitCommand`], which puts each
//! one in its own process group and hands back a [`process::GitProcess`] that
//! must be released on every exit path.

pub mod process;
pub mod repo;

pub use process::{GitCommand, GitProcess};
pub use repo::{init_bare_repo, provision_hooks, repo_exists};
