//! `sync-client`: watches a local vault directory and keeps it in sync
//! with a `sync-server` over one long-lived websocket connection.

mod fs;
mod state;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use sync_core::ids::now_ms;
use sync_core::wire::{ADAPTER_POLL_INTERVAL_MS, WATCH_DEBOUNCE_MS};
use sync_engine::{Engine, Strategy};
use sync_transport::{ClientTransport, ConnState};
use vault_watch::ExclusionRules;

use crate::fs::RealFs;
use crate::state::FileClientState;

#[derive(Parser, Debug)]
#[command(name = "sync-client", about = "Keep a local vault in sync with a sync-server")]
struct Cli {
    /// Path to the vault directory to watch and sync.
    #[arg(long)]
    vault: PathBuf,
    /// `ws://` or `wss://` URL of the sync-server's `/sync` endpoint.
    #[arg(long)]
    server_url: String,
    /// This device's display name, used the first time this vault syncs
    /// with the given server.
    #[arg(long, default_value = "device")]
    device_name: String,
    /// Reconciliation strategy used on the first sync after connecting.
    #[arg(long, value_enum, default_value_t = CliStrategy::Merge)]
    strategy: CliStrategy,
    /// Override the default state-file location
    /// (`<vault>/.obsidian/plugins/advanced-sync/state.json`).
    #[arg(long)]
    state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStrategy {
    ForcePull,
    Pull,
    Push,
    Merge,
}

impl From<CliStrategy> for Strategy {
    fn from(s: CliStrategy) -> Self {
        match s {
            CliStrategy::ForcePull => Self::ForcePull,
            CliStrategy::Pull => Self::Pull,
            CliStrategy::Push => Self::Push,
            CliStrategy::Merge => Self::Merge,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_json_logging();
    let cli = Cli::parse();
    let strategy: Strategy = cli.strategy.into();

    let state_path = cli.state_file.clone().unwrap_or_else(|| state::default_state_path(&cli.vault));
    let client_state = FileClientState::load_or_init(state_path, &cli.device_name, &cli.server_url)?;
    let client_id = client_state.client_id();
    let device_name = client_state.device_name();
    let exclusion = ExclusionRules::new(client_state.exclusion_config());

    tracing::info!(%client_id, %device_name, vault = %cli.vault.display(), "starting sync-client");

    let vault_fs = RealFs::new(cli.vault.clone());
    let mut engine = Engine::new(client_id, device_name, exclusion, vault_fs, client_state);

    let (transport, mut inbound) = ClientTransport::connect(cli.server_url.clone());

    // Only the very first authentication attempt (no stored token yet) may
    // need a freshly entered password; every reconnect after that relies on
    // the stored token `begin_auth` already prefers.
    let mut initial_password = std::env::var("VAULT_PASSWORD").ok().map(sync_core::crypto::Password::new);

    let mut adapter_ticker = tokio::time::interval(Duration::from_millis(ADAPTER_POLL_INTERVAL_MS));
    let mut debounce_ticker = tokio::time::interval(Duration::from_millis(WATCH_DEBOUNCE_MS));
    // Polled frequently enough to catch a reconnect well inside the 1s
    // minimum backoff delay; the engine re-runs authentication on every
    // transition into `Open`, per the transport's reconnect contract.
    let mut conn_poll_ticker = tokio::time::interval(Duration::from_millis(200));
    let mut last_conn_state = ConnState::Disconnected;
    let vault_root = cli.vault.clone();

    loop {
        tokio::select! {
            frame = inbound.recv() => {
                let Some(frame) = frame else {
                    tracing::warn!("transport closed permanently");
                    break;
                };
                for event in engine.on_frame(frame, &transport, strategy) {
                    log_event(&event);
                }
            }
            _ = adapter_ticker.tick() => {
                let snapshot = fs::snapshot(&vault_root);
                engine.poll_adapter(snapshot, now_ms());
            }
            _ = debounce_ticker.tick() => {
                for event in engine.drain_local_changes(now_ms(), &transport) {
                    log_event(&event);
                }
            }
            _ = conn_poll_ticker.tick() => {
                let state = transport.state();
                if state == ConnState::Open && last_conn_state != ConnState::Open {
                    tracing::info!("transport (re)opened, authenticating");
                    let auth_msg = engine.begin_auth(initial_password.take());
                    transport.send(auth_msg);
                } else if last_conn_state == ConnState::Open && state != ConnState::Open {
                    tracing::warn!("transport closed, dropping in-flight batch state");
                    log_event(&engine.on_disconnect());
                }
                last_conn_state = state;
            }
        }
    }

    Ok(())
}

fn log_event(event: &sync_engine::EngineEvent) {
    tracing::info!(?event, "engine event");
}
