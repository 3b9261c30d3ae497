//! The running node: the listener hosting [`SyncEngine`] as a
//! [`RequestHandler`], and a background announcer that re-advertises every
//! locally-registered drop, cooperating via a shutdown flag (spec.md
//! section 5 "Scheduling model": "a separate worker may drive background
//! peer-store announcements and cooperate with the loop via a simple
//! shutdown flag").

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use syncr_core::error::SyncrResult;
use syncr_lookup::PeerRecord;
use syncr_lookup::dht::{DEFAULT_TTL, reannounce_interval};
use syncr_net::Listener;
use syncr_sync::SyncEngine;

use crate::context::NodeContext;

/// Runs the listener and announcer until `shutdown` is signalled, then
/// waits for both to finish.
pub async fn run_until_shutdown(
    context: Arc<NodeContext>,
    shutdown: watch::Receiver<bool>,
) -> SyncrResult<()> {
    let listener = Listener::new(Arc::clone(&context.engine));
    let engine = Arc::clone(&context.engine);
    let advertise_addr = context.config.advertise_addr;

    let announcer = tokio::spawn(announce_loop(engine, advertise_addr, shutdown.clone()));

    let listen_addr = context.config.listen_addr;
    let result = listener.serve(listen_addr, shutdown).await;

    let _ = announcer.await;
    result
}

async fn announce_loop(engine: Arc<SyncEngine>, advertise_addr: SocketAddr, mut shutdown: watch::Receiver<bool>) {
    let interval = reannounce_interval(DEFAULT_TTL);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                announce_once(&engine, advertise_addr).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn announce_once(engine: &SyncEngine, advertise_addr: SocketAddr) {
    let drop_ids = match engine.registry().list() {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list locally-registered drops");
            return;
        }
    };
    let peer = PeerRecord {
        node_id: engine.node_id(),
        ip: advertise_addr.ip(),
        port: advertise_addr.port(),
    };
    for drop_id in drop_ids {
        if let Err(e) = engine.peer_store().announce(&drop_id, peer).await {
            tracing::warn!(error = %e, "failed to announce drop");
        }
    }
}

/// Sleeps until a shutdown signal, for binding to `tokio::signal::ctrl_c`
/// from whichever external entry point owns the process lifecycle.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}
