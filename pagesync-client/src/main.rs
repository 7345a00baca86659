//! # Pagesync CLI
//!
//! Joins an editing session from the terminal, logs what happens, and prints
//! the page tree as JSON every time a snapshot arrives.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pagesync_client::{CollabSession, SessionConfig, StaticToken};
use pagesync_core::SharedDocument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for pagesync.
#[derive(Debug, Clone, Parser)]
#[command(name = "pagesync")]
#[command(about = "Join a collaborative page editing session")]
#[command(version)]
struct CliArgs {
    /// Collaboration server base URL (e.g., <wss://editor.example.com>)
    #[arg(long, env = "PAGESYNC_URL", default_value = "ws://127.0.0.1:8080")]
    url: String,

    /// Project to join
    #[arg(long, env = "PAGESYNC_PROJECT_ID")]
    project: String,

    /// Page to edit
    #[arg(long, env = "PAGESYNC_PAGE_ID")]
    page: String,

    /// Local user ID (random if omitted)
    #[arg(long, env = "PAGESYNC_USER_ID")]
    user_id: Option<String>,

    /// Display name shown to collaborators
    #[arg(long, env = "PAGESYNC_USER_NAME", default_value = "Anonymous")]
    user_name: String,

    /// Bearer token for the socket handshake
    #[arg(long, env = "PAGESYNC_TOKEN", hide_env_values = true)]
    token: String,

    /// Ask for a page snapshot as soon as the session is open
    #[arg(long)]
    sync: bool,
}

/// Initialize structured tracing with optional JSON format.
///
/// Set `RUST_LOG` to control log levels (default: info,pagesync_client=debug).
/// Set `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pagesync_client=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

/// Environment defaults overlaid with command-line values.
fn session_config(args: &CliArgs) -> SessionConfig {
    let mut config = SessionConfig::from_env();
    config.endpoint.clone_from(&args.url);
    config.project_id.clone_from(&args.project);
    config.page_id.clone_from(&args.page);
    if let Some(user_id) = &args.user_id {
        config.user_id.clone_from(user_id);
    }
    config.user_name.clone_from(&args.user_name);
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = CliArgs::parse();

    let config = session_config(&args);
    let doc = SharedDocument::new();
    let session = CollabSession::new(
        config,
        Arc::new(StaticToken::new(args.token.clone())),
        Arc::new(doc.clone()),
    )
    .context("Invalid session configuration")?;

    session.on_status(|state| tracing::info!(%state, "Connection status"));
    session.on_error(|error| tracing::warn!("Session error: {error}"));
    session.on_presence(|entries| {
        tracing::debug!(collaborators = entries.len(), "Presence changed");
    });
    {
        let doc = doc.clone();
        session.on_synced(move |users| {
            tracing::info!(users = users.len(), elements = doc.len(), "Page synced");
            match serde_json::to_string_pretty(&doc.snapshot()) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::warn!("Failed to render page: {e}"),
            }
        });
    }

    session.connect();
    if args.sync {
        // Queued until the socket opens, right behind `join`.
        session.request_sync()?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");
    session.destroy();
    Ok(())
}
