mod auth_commands;
mod catalog_commands;

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "playlistwiz", about = "Playlist management for your streaming library")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// OAuth client id registered with the streaming provider.
    #[arg(long, global = true, env = "PLAYLISTWIZ_CLIENT_ID", default_value = "")]
    client_id: String,

    /// Local port the login callback redirect returns to.
    #[arg(long, global = true, env = "PLAYLISTWIZ_CALLBACK_PORT", default_value_t = 8080)]
    callback_port: u16,
}

#[derive(Subcommand)]
enum Commands {
    /// Authentication against the streaming provider.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// Playlist listing and editing.
    Playlists {
        #[command(subcommand)]
        action: catalog_commands::PlaylistAction,
    },
    /// Search the catalog.
    Search {
        /// Free-text query.
        query: String,
        /// Comma-separated result types (track, album, artist).
        #[arg(long, default_value = "track,album,artist")]
        types: String,
    },
}

/// Configuration every command needs to reach the provider.
#[derive(Clone)]
pub struct AppConfig {
    pub client_id: String,
    pub callback_port: u16,
}

impl AppConfig {
    fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        if cli.client_id.is_empty() {
            anyhow::bail!(
                "no client id configured; pass --client-id or set PLAYLISTWIZ_CLIENT_ID"
            );
        }
        Ok(Self {
            client_id: cli.client_id.clone(),
            callback_port: cli.callback_port,
        })
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "playlistwiz starting");

    let config = AppConfig::from_cli(&cli)?;
    match cli.command {
        Commands::Auth { action } => auth_commands::handle_auth(&config, action).await,
        Commands::Playlists { action } => {
            catalog_commands::handle_playlists(&config, action).await
        },
        Commands::Search { query, types } => {
            catalog_commands::handle_search(&config, &query, &types).await
        },
    }
}
