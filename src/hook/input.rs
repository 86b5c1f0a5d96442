//! Parsing of the ref-update lines git feeds to `pre-receive`,
//! `post-receive` and friends, and classification of each transition.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::receiver::ReceiveError;

/// Revision meaning "ref did not exist" (old side) or "ref no longer exists"
/// (new side).
pub const ZERO_REV: &str = "0000000000000000000000000000000000000000";

const REF_PREFIX: &str = "refs";
const TAGS: &str = "tags";

/// Whether `rev` is the all-zero sentinel.  Matches both the SHA-1 and the
/// SHA-256 width.
pub fn is_zero_rev(rev: &str) -> bool {
    !rev.is_empty() && rev.bytes().all(|b| b == b'0')
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// What a ref update did.  Always derived by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    BranchCreate,
    BranchDelete,
    BranchPush,
    TagCreate,
    TagDelete,
    TagPush,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BranchCreate => "branch.create",
            Self::BranchDelete => "branch.delete",
            Self::BranchPush => "branch.push",
            Self::TagCreate => "tag.create",
            Self::TagDelete => "tag.delete",
            Self::TagPush => "tag.push",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map `(old_rev, new_rev, ref_type)` to an [`Action`].
///
/// zero/zero matches neither create nor delete and falls through to push.
pub fn classify(old_rev: &str, new_rev: &str, ref_type: &str) -> Action {
    let tag = ref_type == TAGS;
    match (is_zero_rev(old_rev), is_zero_rev(new_rev), tag) {
        (true, false, false) => Action::BranchCreate,
        (true, false, true) => Action::TagCreate,
        (false, true, false) => Action::BranchDelete,
        (false, true, true) => Action::TagDelete,
        (_, _, false) => Action::BranchPush,
        (_, _, true) => Action::TagPush,
    }
}

// ---------------------------------------------------------------------------
// HookInfo
// ---------------------------------------------------------------------------

/// One parsed ref-update event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInfo {
    pub action: Action,
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub old_rev: String,
    pub new_rev: String,
    /// The full ref, e.g. `refs/heads/feature/x`.
    pub git_ref: String,
    /// Second ref component (`heads`, `tags`, ...).
    pub ref_type: String,
    /// Everything after `refs/<type>/`, e.g. `feature/x`.
    pub ref_name: String,
}

/// Parse one `<old> <new> <ref>` line.  `repo_path` is the repository the
/// hook runs in; its final component becomes the repository name.
pub fn parse_line(line: &str, repo_path: &Path) -> Result<HookInfo, ReceiveError> {
    let invalid = || ReceiveError::InvalidInput {
        line: line.to_owned(),
    };

    let fields: Vec<&str> = line.split(' ').collect();
    let [old_rev, new_rev, git_ref] = fields[..] else {
        return Err(invalid());
    };
    if !is_revision(old_rev) || !is_revision(new_rev) {
        return Err(invalid());
    }

    let mut parts = git_ref.splitn(3, '/');
    let (Some(REF_PREFIX), Some(ref_type), Some(ref_name)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    if ref_type.is_empty() || ref_name.is_empty() {
        return Err(invalid());
    }

    let repo_name = repo_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(HookInfo {
        action: classify(old_rev, new_rev, ref_type),
        repo_name,
        repo_path: repo_path.to_path_buf(),
        old_rev: old_rev.to_owned(),
        new_rev: new_rev.to_owned(),
        git_ref: git_ref.to_owned(),
        ref_type: ref_type.to_owned(),
        ref_name: ref_name.to_owned(),
    })
}

fn is_revision(rev: &str) -> bool {
    matches!(rev.len(), 40 | 64) && rev.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Read every ref-update line from `input`.  Blank lines are skipped; the
/// whole input is parsed before anything is returned, so a malformed line
/// anywhere yields an error and no events.
pub async fn read_hook_input<R>(input: R, repo_path: &Path) -> Result<Vec<HookInfo>, ReceiveError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut infos = Vec::new();
    while let Some(line) = lines.next_line().await.map_err(ReceiveError::ReadInput)? {
        if line.trim().is_empty() {
            continue;
        }
        infos.push(parse_line(&line, repo_path)?);
    }
    if infos.is_empty() {
        return Err(ReceiveError::NoInput);
    }
    Ok(infos)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
