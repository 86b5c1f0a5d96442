use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Complete service configuration.  Every section and field has a default,
/// so an empty YAML document is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub hooks: HookScripts,
    pub auth: AuthConfig,
    pub receiver: ReceiverSettings,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address for the HTTP listener (e.g. `0.0.0.0:5000`).
    pub listen: String,
    /// Directory that holds all served repositories.
    pub repo_root: PathBuf,
    /// Path to the `git` binary.
    pub git_path: String,
    /// Initialise a bare repository on first request when it does not exist.
    pub auto_create: bool,
    /// Provision [`HookScripts`] into repositories at bootstrap and on
    /// auto-create.
    pub auto_hooks: bool,
    /// Upper bound (seconds) on one bridged exchange, covering request-body
    /// ingestion and output streaming.  Absent means no deadline.
    pub rpc_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
            repo_root: PathBuf::from("./repos"),
            git_path: default_git_path(),
            auto_create: false,
            auto_hooks: false,
            rpc_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    pub fn rpc_timeout(&self) -> Option<Duration> {
        self.rpc_timeout_secs.map(Duration::from_secs)
    }
}

fn default_git_path() -> String {
    "git".to_string()
}

// ---------------------------------------------------------------------------
// Hook scripts
// ---------------------------------------------------------------------------

/// Script bodies written into `<repo>/hooks`.  Empty scripts are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HookScripts {
    pub pre_receive: String,
    pub update: String,
    pub post_receive: String,
}

impl HookScripts {
    /// `(file name, script)` pairs for every hook git looks up.
    pub fn entries(&self) -> [(&'static str, &str); 3] {
        [
            ("pre-receive", self.pre_receive.as_str()),
            ("update", self.update.as_str()),
            ("post-receive", self.post_receive.as_str()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require HTTP Basic credentials on every git route.
    pub enabled: bool,
    /// Realm announced in `WWW-Authenticate`.
    pub realm: String,
    /// Username -> lowercase hex SHA-256 of the password.
    pub users: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            realm: "gitrelay".to_string(),
            users: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Push receiver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverSettings {
    /// Keep workspaces after processing for inspection.
    pub debug: bool,
    /// Reject updates to any ref other than `refs/heads/master`.
    pub master_only: bool,
    /// Reject non-fast-forward updates.
    pub deny_force_push: bool,
    /// Directory under which per-push workspaces are created.
    pub temp_root: PathBuf,
    /// Path to the `git` binary used inside hooks.
    pub git_path: String,
    /// Shell command run inside each materialized workspace.
    pub handler_command: Option<String>,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            debug: false,
            master_only: false,
            deny_force_push: false,
            temp_root: std::env::temp_dir().join("gitrelay"),
            git_path: default_git_path(),
            handler_command: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config = parse_config(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Parse and validate a YAML document.
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = if contents.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    config
        .server
        .listen
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server.listen address: {}", config.server.listen))?;
    anyhow::ensure!(
        config.server.rpc_timeout_secs != Some(0),
        "server.rpc_timeout_secs must be greater than zero"
    );
    anyhow::ensure!(
        !config.server.git_path.is_empty() && !config.receiver.git_path.is_empty(),
        "git_path must not be empty"
    );
    anyhow::ensure!(
        !config.receiver.temp_root.as_os_str().is_empty(),
        "receiver.temp_root must not be empty"
    );
    anyhow::ensure!(
        !config.auth.enabled || !config.auth.users.is_empty(),
        "auth.enabled requires at least one entry in auth.users"
    );
    for (user, hash) in &config.auth.users {
        anyhow::ensure!(
            hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit()),
            "auth.users.{user} must be a hex-encoded SHA-256 digest"
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Create the repository root if needed and, when `auto_hooks` is set,
/// provision hook scripts into every repository directly below it.
pub async fn bootstrap(config: &Config) -> Result<()> {
    let root = &config.server.repo_root;

    if tokio::fs::metadata(root).await.is_err() {
        create_dir_with_mode(root)
            .await
            .with_context(|| format!("failed to create repository root: {}", root.display()))?;
        info!(root = %root.display(), "created repository root");
    }

    if !config.server.auto_hooks {
        return Ok(());
    }

    let mut entries = tokio::fs::read_dir(root)
        .await
        .with_context(|| format!("failed to read repository root: {}", root.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let path = entry.path();
        crate::git::repo::provision_hooks(&path, &config.hooks).await?;
        debug!(repo = %path.display(), "provisioned hooks");
    }
    Ok(())
}

async fn create_dir_with_mode(path: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    #[cfg(unix)]
    builder.mode(0o755);
    builder.create(path).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
