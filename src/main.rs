use std::path::{Path, PathBuf};

use clap::Parser;
use paperlight::api::{AccessToken, InstapaperClient};
use paperlight::config::{Cli, Command, Config, State, default_config_dir, default_config_path};
use paperlight::sync::{SyncOptions, Syncer};
use paperlight::unpack_error;
use paperlight::vault::FsVault;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    // Determine config path and data directory
    // If --config is provided, use its parent directory for data (state, etc.)
    // Otherwise use ~/.paperlight/ for both
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::new(config_path.to_str().unwrap()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });

    let client = InstapaperClient::new(
        cfg.app.api_url.clone(),
        AccessToken {
            token: cfg.auth.token.clone(),
            token_secret: cfg.auth.token_secret.clone(),
        },
    );

    let state_path = data_dir.join("state.yaml");

    match args.command {
        Command::Save { url } => match client.add_bookmark(&url).await {
            Ok(article) => {
                tracing::info!(id = article.id, title = %article.title, "saved bookmark");
            }
            Err(e) => {
                tracing::error!("failed to save bookmark: {}", unpack_error(&e));
                std::process::exit(1);
            }
        },
        Command::UpdateNotes => {
            let syncer = build_syncer(&cfg, client);
            // Full pass from the beginning so every existing block is
            // visited, not just ones past the watermark.
            run_once(&syncer, &state_path, Some(0), cfg.update_notes_options()).await;
        }
        Command::Sync { once } => {
            let syncer = build_syncer(&cfg, client);
            if once {
                run_once(&syncer, &state_path, None, cfg.sync_options()).await;
                return;
            }
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                cfg.app.sync_interval_seconds,
            ));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_once(&syncer, &state_path, None, cfg.sync_options()).await;
                    }
                    _ = signal::ctrl_c() => {
                        tracing::info!("ctrl+c signal received, shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn build_syncer(cfg: &Config, client: InstapaperClient) -> Syncer<InstapaperClient, FsVault> {
    Syncer::new(
        client,
        FsVault,
        cfg.notes_folder(),
        cfg.template(),
        cfg.properties.clone(),
    )
}

/// Runs one sync pass and persists the returned cursor. The orchestrator
/// never persists state itself; at-least-once delivery on crash is absorbed
/// by its idempotent appends.
async fn run_once(
    syncer: &Syncer<InstapaperClient, FsVault>,
    state_path: &Path,
    cursor_override: Option<i64>,
    options: SyncOptions,
) {
    let state = match State::load(state_path) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "failed to load sync state");
            return;
        }
    };

    let start = cursor_override.unwrap_or(state.cursor);
    let outcome = syncer.sync(start, &options).await;

    let next = State {
        cursor: outcome.cursor,
    };
    if let Err(e) = next.store(state_path) {
        tracing::error!(error = %e, "failed to persist sync state");
        return;
    }
    tracing::info!(appended = outcome.count, cursor = outcome.cursor, "sync pass complete");
}
