//! WebSocket transport.
//!
//! Text frames carry the same one-JSON-object-per-message protocol as the
//! TCP transport. Binary and control frames are ignored.

use std::net::SocketAddr;

use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;
use warp::ws::Message;
use warp::ws::WebSocket;
use warp::ws::Ws;
use warp::Filter;

use super::message::ServerMessage;
use super::ConnectionHub;

/// Serves WebSocket upgrades at the server root until shutdown fires.
pub async fn run_ws_listener(
    hub: ConnectionHub,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<()>,
) {
    let with_hub = warp::any().map(move || hub.clone());
    let route = warp::path::end()
        .and(warp::ws())
        .and(with_hub)
        .and(warp::addr::remote())
        .map(|ws: Ws, hub: ConnectionHub, peer: Option<SocketAddr>| {
            ws.on_upgrade(move |socket| {
                handle_socket(socket, hub, peer.map(|p| p.to_string()))
            })
        });

    let (bound, server) = warp::serve(route).bind_with_graceful_shutdown(addr, async move {
        let _ = shutdown.changed().await;
    });
    info!(addr = %bound, "WebSocket listener started");
    server.await;
    info!("WebSocket listener shutting down");
}

async fn handle_socket(
    socket: WebSocket,
    hub: ConnectionHub,
    peer: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = hub.register_connection(outbound_tx, peer);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(Message::text(message.to_json())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                if let Ok(text) = message.to_str() {
                    hub.handle_text(&connection_id, text).await;
                }
            }
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    hub.disconnect(&connection_id);
    writer.abort();
    debug!(connection = %connection_id, "WebSocket connection closed");
}
