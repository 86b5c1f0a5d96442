use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gitrelay::config::{self, Config};
use gitrelay::hook::{CommandHandler, PushHandler, Receiver, ReceiverConfig};
use gitrelay::http::auth::{AuthBackend, StaticUsers};
use gitrelay::http::bridge::Bridge;
use gitrelay::http::{create_router, AppState, AuthGate, RepoResolver};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gitrelay", about = "Git smart HTTP server and push receiver")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true, default_value = "/etc/gitrelay/config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve repositories over smart HTTP.
    Serve,
    /// Run the push receiver over ref updates on stdin.  Meant to be
    /// installed as a repository hook.
    Hook,
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn serve(config_path: &Path) -> Result<()> {
    let config = config::load_config(config_path)?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %config_path.display(), "starting gitrelay");

    config::bootstrap(&config).await?;

    let state = Arc::new(build_state(&config));
    let app = create_router(state);

    let listen_addr: std::net::SocketAddr = config
        .server
        .listen
        .parse()
        .context("invalid server.listen address")?;
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(
        %listen_addr,
        repo_root = %config.server.repo_root.display(),
        "HTTP server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("gitrelay shut down cleanly");
    Ok(())
}

fn build_state(config: &Config) -> AppState {
    let auth = config.auth.enabled.then(|| AuthGate {
        realm: config.auth.realm.clone(),
        backend: Some(Arc::new(StaticUsers::new(config.auth.users.clone())) as Arc<dyn AuthBackend>),
    });
    AppState {
        resolver: RepoResolver::from_config(config),
        bridge: Bridge::new(&config.server.git_path, config.server.rpc_timeout()),
        auth,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// hook
// ---------------------------------------------------------------------------

async fn hook(config_path: &Path) -> Result<ExitCode> {
    // git relays hook stderr to the pushing client, so keep it readable.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .without_time()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = if config_path.exists() {
        config::load_config(config_path)?
    } else {
        tracing::debug!(config_path = %config_path.display(), "no config file; using defaults");
        Config::default()
    };

    let handler = config
        .receiver
        .handler_command
        .as_deref()
        .map(|command| Arc::new(CommandHandler::new(command)) as Arc<dyn PushHandler>);
    let receiver = Receiver::new(ReceiverConfig::from_settings(&config.receiver, handler));

    let repo_path = std::env::current_dir().context("failed to determine repository directory")?;
    let stdin = BufReader::new(tokio::io::stdin());

    match receiver.handle(stdin, &repo_path).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!(error = %e, "push rejected");
            Ok(ExitCode::FAILURE)
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve(&cli.config).await.map(|()| ExitCode::SUCCESS),
        Command::Hook => hook(&cli.config).await,
    }
}
