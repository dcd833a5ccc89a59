//! Server assembly.
//!
//! Wires one [`Store`] to the connection hub, the TCP and WebSocket
//! listeners, and the periodic snapshot task, and runs them until the
//! shutdown channel fires.

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::Settings;
use crate::hub::tcp;
use crate::hub::ws;
use crate::hub::ConnectionHub;
use crate::snapshot;
use crate::store::Store;
use crate::HubError;
use crate::Result;

pub struct Server {
    store: Store,
    hub: ConnectionHub,
    settings: Settings,
}

impl Server {
    /// Builds a server around a fresh store, restoring persisted state.
    pub async fn build(settings: Settings) -> Result<Self> {
        let store = Store::new();
        snapshot::load(&store, &settings.snapshot.path).await?;
        let hub = ConnectionHub::new(store.clone())
            .with_pending_call_timeout(settings.pending_call_timeout());
        Ok(Self {
            store,
            hub,
            settings,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Serves until `shutdown` fires. The snapshot task writes a final
    /// snapshot on its way out.
    pub async fn run(
        self,
        shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let tcp_listener = TcpListener::bind(&self.settings.server.listen_addr)
            .await
            .map_err(|source| HubError::BindFailed {
                addr: self.settings.server.listen_addr.clone(),
                source,
            })?;

        let tasks = vec![
            tokio::spawn(tcp::run_tcp_listener(
                self.hub.clone(),
                tcp_listener,
                shutdown.clone(),
            )),
            tokio::spawn(ws::run_ws_listener(
                self.hub.clone(),
                self.settings.ws_socket_addr(),
                shutdown.clone(),
            )),
            tokio::spawn(snapshot::run_periodic(
                self.store.clone(),
                self.settings.snapshot.path.clone(),
                self.settings.snapshot_interval(),
                shutdown.clone(),
            )),
        ];

        for task in tasks {
            let _ = task.await;
        }
        info!("Server stopped");
        Ok(())
    }
}
