//! Maps the repository part of a request path onto a directory under the
//! repository root, optionally creating the repository on first use.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::config::{Config, HookScripts};
use crate::git::repo;

/// Resolved identity of the repository one request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoContext {
    /// `namespace/name` relative to the repository root.
    pub repo_name: String,
    pub repo_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("missing repository name")]
    MissingName,

    #[error("invalid repository path: {0:?}")]
    InvalidPath(String),

    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("failed to initialise repository {name}: {source:#}")]
    Init { name: String, source: anyhow::Error },
}

#[derive(Debug, Clone)]
pub struct RepoResolver {
    root: PathBuf,
    git_path: String,
    auto_create: bool,
    /// Provisioned into auto-created repositories when set.
    hooks: Option<HookScripts>,
}

impl RepoResolver {
    pub fn new(root: impl Into<PathBuf>, git_path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            git_path: git_path.into(),
            auto_create: false,
            hooks: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut resolver = Self::new(&config.server.repo_root, &config.server.git_path);
        resolver.auto_create = config.server.auto_create;
        if config.server.auto_hooks {
            resolver.hooks = Some(config.hooks.clone());
        }
        resolver
    }

    pub fn with_auto_create(mut self, hooks: Option<HookScripts>) -> Self {
        self.auto_create = true;
        self.hooks = hooks;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map `url_repo_path` (the request path minus its git suffix) to a
    /// repository that exists on disk.
    #[instrument(skip(self))]
    pub async fn resolve(&self, url_repo_path: &str) -> Result<RepoContext, ResolveError> {
        let repo_name = normalize(url_repo_path)?;
        let repo_path = self.root.join(&repo_name);

        if !repo::repo_exists(&repo_path).await {
            if !self.auto_create {
                return Err(ResolveError::NotFound(repo_name));
            }
            self.create(&repo_name, &repo_path).await?;
        }

        Ok(RepoContext {
            repo_name,
            repo_path,
        })
    }

    async fn create(&self, name: &str, path: &Path) -> Result<(), ResolveError> {
        let init_err = |source| ResolveError::Init {
            name: name.to_owned(),
            source,
        };

        repo::init_bare_repo(&self.git_path, path)
            .await
            .map_err(init_err)?;
        if let Some(hooks) = &self.hooks {
            repo::provision_hooks(path, hooks).await.map_err(init_err)?;
        }
        if !repo::repo_exists(path).await {
            return Err(ResolveError::NotFound(name.to_owned()));
        }

        info!(repo = name, "created repository");
        Ok(())
    }
}

/// Trim surrounding slashes and reject anything that could leave the root.
fn normalize(url_repo_path: &str) -> Result<String, ResolveError> {
    let trimmed = url_repo_path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(ResolveError::MissingName);
    }
    let valid = trimmed.split('/').all(|segment| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && !segment.contains(['\\', '\0'])
    });
    if !valid {
        return Err(ResolveError::InvalidPath(url_repo_path.to_owned()));
    }
    Ok(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::repo::tests::git_available;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/acme/widgets.git").unwrap(), "acme/widgets.git");
        assert_eq!(normalize("widgets/").unwrap(), "widgets");
        assert!(matches!(normalize(""), Err(ResolveError::MissingName)));
        assert!(matches!(normalize("///"), Err(ResolveError::MissingName)));
        for bad in ["../etc", "a/../b", "a//b", "./a", "a\\b", "a\0b"] {
            assert!(
                matches!(normalize(bad), Err(ResolveError::InvalidPath(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_repo_without_auto_create() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = RepoResolver::new(tmp.path(), "git");
        let err = resolver.resolve("/acme/widgets").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(name) if name == "acme/widgets"));
        assert!(!tmp.path().join("acme").exists());
    }

    #[tokio::test]
    async fn test_existing_repo() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("acme/widgets/objects")).unwrap();

        let ctx = RepoResolver::new(tmp.path(), "git")
            .resolve("acme/widgets")
            .await
            .unwrap();
        assert_eq!(ctx.repo_name, "acme/widgets");
        assert_eq!(ctx.repo_path, tmp.path().join("acme/widgets"));
    }

    #[tokio::test]
    async fn test_auto_create_with_hooks() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let hooks = HookScripts {
            post_receive: "#!/bin/sh\n".into(),
            ..Default::default()
        };
        let resolver = RepoResolver::new(tmp.path(), "git").with_auto_create(Some(hooks));

        let ctx = resolver.resolve("/acme/new.git").await.unwrap();
        assert!(ctx.repo_path.join("objects").is_dir());
        assert!(ctx.repo_path.join("hooks/post-receive").is_file());
        assert!(!ctx.repo_path.join("hooks/pre-receive").exists());
    }

    #[tokio::test]
    async fn test_auto_create_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver =
            RepoResolver::new(tmp.path(), "/nonexistent/gitrelay-test-git").with_auto_create(None);
        let err = resolver.resolve("widgets").await.unwrap_err();
        assert!(matches!(err, ResolveError::Init { .. }));
    }
}
