pub mod handler;
pub mod session;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use russh::keys::{Algorithm, HashAlg};
use russh::server::Config;
use russh::Preferred;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::audit::AuditLog;
use crate::common::ChannelEvent;
use crate::config::Config as BastionConfig;
use crate::keys::load_host_keys;
use handler::{ReadyHandoff, ServerHandler};
use session::SessionCoordinator;

/// Starts the inbound SSH listener: builds the `russh` server config from
/// the discovered host keys, accepts connections, and for each one runs
/// the protocol driver and the session coordinator as two concurrent
/// tasks bridged by a one-shot channel handoff, mirroring the split
/// between the fast protocol task and the slower per-session task.
pub async fn run_server(config: Arc<BastionConfig>) -> anyhow::Result<()> {
    let audit = AuditLog::connect(&config.global).await?;
    let keys = load_host_keys(&config.global)?;

    let russh_config = Arc::new(Config {
        keys,
        preferred: Preferred {
            key: Cow::Borrowed(&[
                Algorithm::Ed25519,
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha512),
                },
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha256),
                },
            ]),
            ..Preferred::default()
        },
        ..Config::default()
    });

    let listener = TcpListener::bind(&config.global.listen_path).await?;
    info!(address = %config.global.listen_path, "listening");

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let config = config.clone();
        let audit = audit.clone();
        let russh_config = russh_config.clone();

        tokio::spawn(async move {
            let (events_tx, events_rx) = mpsc::unbounded_channel::<ChannelEvent>();
            let (ready_tx, ready_rx) = oneshot::channel::<ReadyHandoff>();

            let mut handler = ServerHandler::new(events_tx, ready_tx);
            handler.peer_addr = Some(peer_addr);

            let protocol_fut = russh::server::run_stream(russh_config, stream, handler);
            let coordinator_fut = drive_session(config, audit, peer_addr, ready_rx, events_rx);

            tokio::select! {
                result = protocol_fut => {
                    if let Err(error) = result {
                        error!(%error, %peer_addr, "inbound SSH connection ended with error");
                    }
                }
                _ = coordinator_fut => {}
            }
        });
    }
}

/// Waits for the handler to accept the first `session` channel, then runs
/// the full coordinator state machine on it. A connection that never
/// opens a session channel idles here until the protocol-driver future
/// above completes and this task is dropped with it.
async fn drive_session(
    config: Arc<BastionConfig>,
    audit: Arc<AuditLog>,
    peer_addr: std::net::SocketAddr,
    ready_rx: oneshot::Receiver<ReadyHandoff>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    let Ok(handoff) = ready_rx.await else {
        return;
    };

    let start_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    info!(%peer_addr, user = %handoff.user, "session channel accepted");

    let coordinator = SessionCoordinator {
        config,
        audit,
        server_handle: handoff.handle,
        channel: handoff.channel,
        user: handoff.user,
        peer_addr: Some(peer_addr),
        permissions: handoff.permissions,
        start_time,
    };
    coordinator.run(events_rx).await;
}
