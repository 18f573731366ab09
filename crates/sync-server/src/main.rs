//! `sync-server`: the vault's central dispatcher. Accepts `/sync` and
//! `/ui` websocket upgrades, serves the dashboard/init HTTP surface, and
//! answers LAN discovery probes, all against one [`change_log::Store`].

use std::net::SocketAddr;
use std::sync::Arc;

use change_log::Store;
use sync_core::ids::new_server_id;
use sync_server::dispatch::ServerContext;
use sync_server::{http, Hub, ServerConfig};
use telemetry::SyncMetrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_json_logging();
    let config = ServerConfig::from_env();
    tracing::info!(?config, "starting sync-server");

    let store = Store::open(&config.data_dir)?;
    let server_id = load_or_create_server_id(&store)?;

    let ctx = Arc::new(ServerContext { store, server_id: server_id.clone(), hub: Hub::new(), metrics: SyncMetrics::new() });

    let discovery = tokio::spawn(sync_server::discovery::run(
        config.discovery_port,
        server_id,
        config.hostname.clone(),
        config.port,
    ));

    let app = http::router(ctx).into_make_service_with_connect_info::<SocketAddr>();
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    tokio::select! {
        result = serve => {
            if let Err(err) = result {
                tracing::error!(%err, "server loop exited with error");
            }
        }
        () = async { let _ = discovery.await; } => {
            tracing::error!("discovery task exited unexpectedly");
        }
    }

    Ok(())
}

fn load_or_create_server_id(store: &Store) -> anyhow::Result<String> {
    if let Some(id) = store.get_meta(change_log::meta_key::SERVER_ID)? {
        return Ok(id);
    }
    let id = new_server_id();
    store.set_meta(change_log::meta_key::SERVER_ID, &id)?;
    Ok(id)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return;
        };
        sig.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
