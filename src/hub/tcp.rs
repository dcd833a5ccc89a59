//! Newline-framed JSON transport over raw TCP.
//!
//! One JSON object per line, both directions. Each accepted connection gets
//! a reader loop feeding the hub and a writer task draining the hub's
//! outbound queue.

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tokio_util::codec::LinesCodec;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::message::ServerMessage;
use super::ConnectionHub;

/// Upper bound on one framed line. Oversized frames fail the read, which
/// drops the connection instead of buffering without limit.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Accept loop. Runs until the shutdown channel fires.
pub async fn run_tcp_listener(
    hub: ConnectionHub,
    listener: TcpListener,
    mut shutdown: watch::Receiver<()>,
) {
    info!(addr = ?listener.local_addr().ok(), "TCP listener started");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let hub = hub.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            handle_connection(hub, stream, peer.to_string(), shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept TCP connection");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("TCP listener shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    hub: ConnectionHub,
    stream: TcpStream,
    peer: String,
    mut shutdown: watch::Receiver<()>,
) {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let (mut sink, mut lines) = framed.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = hub.register_connection(outbound_tx, Some(peer.clone()));

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(message.to_json()).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            line = lines.next() => {
                match line {
                    Some(Ok(text)) => hub.handle_text(&connection_id, &text).await,
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "TCP read failed");
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    hub.disconnect(&connection_id);
    writer.abort();
    debug!(connection = %connection_id, peer = %peer, "TCP connection closed");
}
