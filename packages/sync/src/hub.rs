//! # Hub
//!
//! Hosts a [`ServerStore`] on a task and fans its deliveries out to the
//! connected clients over channels.
//!
//! ```text
//!   client A ──ChannelTransport──┐                    ┌──► events A
//!   client B ──ChannelTransport──┼─► ops ─► ServerStore ─┼──► events B
//!   client C ──ChannelTransport──┘                    └──► events C
//! ```
//!
//! Ops from one client travel one channel and the server's replies to it
//! travel another, so each client sees acks and remote ops in the order the
//! server produced them.

use crate::actor::{ClientActor, ClientHandle};
use crate::client_store::ClientStore;
use crate::config::SyncConfig;
use crate::errors::{SyncError, SyncResult};
use crate::protocol::{Delivery, OutboundOp, ServerEvent};
use crate::server_store::ServerStore;
use crate::transport::ChannelTransport;
use canopy_common::ActorId;
use canopy_storage::{Pool, Snapshot};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

enum HubCommand {
    Connect {
        events: mpsc::Sender<ServerEvent>,
        reply: oneshot::Sender<(ActorId, Snapshot)>,
    },
    Disconnect(ActorId),
    Resync(ActorId),
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Version {
        reply: oneshot::Sender<u64>,
    },
    Shutdown,
}

pub struct Hub {
    server: ServerStore,
    clients: HashMap<ActorId, mpsc::Sender<ServerEvent>>,
    commands: mpsc::Receiver<HubCommand>,
    ops: mpsc::Receiver<OutboundOp>,
}

impl Hub {
    pub fn spawn(server: ServerStore, config: &SyncConfig) -> HubHandle {
        let (commands_tx, commands) = mpsc::channel(config.outbound_capacity);
        let (ops_tx, ops) = mpsc::channel(config.outbound_capacity);
        let hub = Self {
            server,
            clients: HashMap::new(),
            commands,
            ops,
        };
        tokio::spawn(hub.run());
        HubHandle {
            commands: commands_tx,
            ops: ops_tx,
            config: config.clone(),
        }
    }

    async fn run(mut self) {
        info!("Hub started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(HubCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command).await,
                },
                Some(op) = self.ops.recv() => {
                    let deliveries = self.server.receive(op);
                    self.route(deliveries).await;
                }
            }
        }
        info!(version = self.server.version(), "Hub stopped");
    }

    async fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect { events, reply } => {
                let (actor, _) = self.server.connect();
                self.clients.insert(actor, events);
                if reply.send((actor, self.server.snapshot())).is_err() {
                    self.drop_client(actor);
                }
            }
            HubCommand::Disconnect(actor) => self.drop_client(actor),
            HubCommand::Resync(actor) => {
                let delivery = Delivery {
                    to: actor,
                    event: self.server.resync(),
                };
                self.route(vec![delivery]).await;
            }
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.server.snapshot());
            }
            HubCommand::Version { reply } => {
                let _ = reply.send(self.server.version());
            }
            HubCommand::Shutdown => {}
        }
    }

    async fn route(&mut self, deliveries: Vec<Delivery>) {
        for Delivery { to, event } in deliveries {
            let Some(tx) = self.clients.get(&to) else {
                debug!(actor = %to, event = event.name(), "No channel for client");
                continue;
            };
            if tx.send(event).await.is_err() {
                warn!(actor = %to, "Client channel closed");
                self.drop_client(to);
            }
        }
    }

    fn drop_client(&mut self, actor: ActorId) {
        if self.clients.remove(&actor).is_some() {
            self.server.disconnect(actor);
        }
    }
}

/// The pieces a client needs to talk to the hub
pub struct Connection {
    pub actor: ActorId,
    pub snapshot: Snapshot,
    pub events: mpsc::Receiver<ServerEvent>,
    pub transport: ChannelTransport,
}

#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    ops: mpsc::Sender<OutboundOp>,
    config: SyncConfig,
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubCommand::Connect { .. } => f.write_str("Connect"),
            HubCommand::Disconnect(actor) => write!(f, "Disconnect({})", actor),
            HubCommand::Resync(actor) => write!(f, "Resync({})", actor),
            HubCommand::Snapshot { .. } => f.write_str("Snapshot"),
            HubCommand::Version { .. } => f.write_str("Version"),
            HubCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl HubHandle {
    async fn send(&self, command: HubCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::HubClosed)
    }

    /// Register with the server. The returned snapshot is the room as of
    /// registration; every later change arrives on `events`.
    pub async fn connect(&self) -> SyncResult<Connection> {
        let (events_tx, events) = mpsc::channel(self.config.event_capacity);
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Connect {
            events: events_tx,
            reply,
        })
        .await?;
        let (actor, snapshot) = rx.await.map_err(|_| SyncError::HubClosed)?;
        Ok(Connection {
            actor,
            snapshot,
            events,
            transport: ChannelTransport::new(self.ops.clone()),
        })
    }

    /// Connect and run a client store on its own task
    pub async fn join(&self) -> SyncResult<ClientHandle> {
        let Connection {
            actor,
            snapshot,
            events,
            transport,
        } = self.connect().await?;
        let pool = Pool::from_snapshot(actor, &snapshot)?;
        let store = ClientStore::with_config(pool, transport, &self.config);
        Ok(ClientActor::spawn(store, events, &self.config))
    }

    pub async fn disconnect(&self, actor: ActorId) -> SyncResult<()> {
        self.send(HubCommand::Disconnect(actor)).await
    }

    /// Push a full copy of the room to one client
    pub async fn resync(&self, actor: ActorId) -> SyncResult<()> {
        self.send(HubCommand::Resync(actor)).await
    }

    pub async fn snapshot(&self) -> SyncResult<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| SyncError::HubClosed)
    }

    /// Number of ops the server has applied
    pub async fn version(&self) -> SyncResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Version { reply }).await?;
        rx.await.map_err(|_| SyncError::HubClosed)
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(HubCommand::Shutdown).await;
    }
}
