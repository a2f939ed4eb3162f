//! # Client actor
//!
//! Runs a [`ClientStore`] on its own task. Local requests and server events
//! arrive on two channels and are handled strictly one at a time, so the
//! store never sees two mutations in flight.
//!
//! ```text
//!   ClientHandle ──Command──►┐
//!                            ├─► select! ─► ClientStore ─► broadcast<ChangeEvent>
//!   server ──ServerEvent────►┘
//! ```

use crate::client_store::ClientStore;
use crate::config::SyncConfig;
use crate::errors::{SyncError, SyncResult};
use crate::protocol::ServerEvent;
use crate::transport::Transport;
use canopy_common::{ActorId, NodeId};
use canopy_storage::{
    Applied, ChangeEvent, ChildKey, Draft, Lson, Op, Snapshot, StorageContext, StorageResult,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

enum Command {
    Apply {
        op: Op,
        reply: oneshot::Sender<StorageResult<Applied>>,
    },
    Get {
        node: NodeId,
        key: ChildKey,
        reply: oneshot::Sender<StorageResult<Option<Lson>>>,
    },
    ToJson {
        reply: oneshot::Sender<Value>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Undo {
        reply: oneshot::Sender<StorageResult<bool>>,
    },
    Redo {
        reply: oneshot::Sender<StorageResult<bool>>,
    },
    Flush {
        reply: oneshot::Sender<usize>,
    },
    PendingLen {
        reply: oneshot::Sender<usize>,
    },
    Deliver(ServerEvent),
    Shutdown,
}

pub struct ClientActor<T> {
    store: ClientStore<T>,
    commands: mpsc::Receiver<Command>,
    server_events: mpsc::Receiver<ServerEvent>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl<T: Transport + Send + 'static> ClientActor<T> {
    /// Move `store` onto a new task and return a handle to it
    pub fn spawn(
        store: ClientStore<T>,
        server_events: mpsc::Receiver<ServerEvent>,
        config: &SyncConfig,
    ) -> ClientHandle {
        let (commands_tx, commands) = mpsc::channel(config.outbound_capacity);
        let (changes, _) = broadcast::channel(config.event_capacity);
        let handle = ClientHandle {
            actor: store.actor(),
            commands: commands_tx,
            changes: changes.clone(),
        };

        let actor = Self {
            store,
            commands,
            server_events,
            changes,
        };
        tokio::spawn(actor.run());
        handle
    }

    async fn run(mut self) {
        let mut server_open = true;
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                event = self.server_events.recv(), if server_open => match event {
                    Some(event) => self.deliver(event),
                    None => {
                        debug!(actor = %self.store.actor(), "Server channel closed");
                        server_open = false;
                    }
                },
            }
            self.publish();
        }
        debug!(actor = %self.store.actor(), "Client actor stopped");
    }

    fn handle(&mut self, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            Command::Apply { op, reply } => {
                let _ = reply.send(self.store.apply_op(op));
            }
            Command::Get { node, key, reply } => {
                let value = self
                    .store
                    .pool()
                    .get_child(node, &key)
                    .map(|v| v.cloned());
                let _ = reply.send(value);
            }
            Command::ToJson { reply } => {
                let _ = reply.send(self.store.pool().to_json());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.store.pool().to_snapshot());
            }
            Command::Undo { reply } => {
                let _ = reply.send(self.store.undo());
            }
            Command::Redo { reply } => {
                let _ = reply.send(self.store.redo());
            }
            Command::Flush { reply } => {
                let _ = reply.send(self.store.flush());
            }
            Command::PendingLen { reply } => {
                let _ = reply.send(self.store.pending_len());
            }
            Command::Deliver(event) => self.deliver(event),
            Command::Shutdown => {}
        }
    }

    fn deliver(&mut self, event: ServerEvent) {
        if let Err(err) = self.store.receive(event) {
            warn!(actor = %self.store.actor(), error = %err, "Server event failed");
        }
    }

    fn publish(&mut self) {
        for event in self.store.take_events() {
            // No subscribers is fine
            let _ = self.changes.send(event);
        }
    }
}

/// Cheap, cloneable access to a running client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    actor: ActorId,
    commands: mpsc::Sender<Command>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Apply { .. } => "Apply",
            Command::Get { .. } => "Get",
            Command::ToJson { .. } => "ToJson",
            Command::Snapshot { .. } => "Snapshot",
            Command::Undo { .. } => "Undo",
            Command::Redo { .. } => "Redo",
            Command::Flush { .. } => "Flush",
            Command::PendingLen { .. } => "PendingLen",
            Command::Deliver(_) => "Deliver",
            Command::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl ClientHandle {
    pub fn actor(&self) -> ActorId {
        self.actor
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> SyncResult<R> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| SyncError::ClientClosed)?;
        rx.await.map_err(|_| SyncError::ClientClosed)
    }

    pub async fn apply(&self, op: Op) -> SyncResult<Applied> {
        Ok(self.request(|reply| Command::Apply { op, reply }).await??)
    }

    pub async fn set(
        &self,
        node: NodeId,
        key: impl Into<ChildKey>,
        value: impl Into<Draft>,
    ) -> SyncResult<Applied> {
        self.apply(Op::set(node, key, value)).await
    }

    pub async fn insert(
        &self,
        list: NodeId,
        index: usize,
        value: impl Into<Draft>,
    ) -> SyncResult<Applied> {
        self.apply(Op::insert(list, index, value)).await
    }

    pub async fn delete(&self, node: NodeId, key: impl Into<ChildKey>) -> SyncResult<bool> {
        Ok(self.apply(Op::delete(node, key)).await?.changed)
    }

    pub async fn move_item(&self, list: NodeId, from: usize, to: usize) -> SyncResult<bool> {
        Ok(self.apply(Op::moved(list, from, to)).await?.changed)
    }

    pub async fn get(&self, node: NodeId, key: impl Into<ChildKey>) -> SyncResult<Option<Lson>> {
        let key = key.into();
        Ok(self
            .request(|reply| Command::Get { node, key, reply })
            .await??)
    }

    pub async fn to_json(&self) -> SyncResult<Value> {
        self.request(|reply| Command::ToJson { reply }).await
    }

    pub async fn snapshot(&self) -> SyncResult<Snapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn undo(&self) -> SyncResult<bool> {
        Ok(self.request(|reply| Command::Undo { reply }).await??)
    }

    pub async fn redo(&self) -> SyncResult<bool> {
        Ok(self.request(|reply| Command::Redo { reply }).await??)
    }

    /// Retry sending ops the transport refused earlier
    pub async fn flush(&self) -> SyncResult<usize> {
        self.request(|reply| Command::Flush { reply }).await
    }

    pub async fn pending_len(&self) -> SyncResult<usize> {
        self.request(|reply| Command::PendingLen { reply }).await
    }

    /// Feed a server event directly, bypassing the server channel
    pub async fn deliver(&self, event: ServerEvent) -> SyncResult<()> {
        self.commands
            .send(Command::Deliver(event))
            .await
            .map_err(|_| SyncError::ClientClosed)
    }

    /// Change notifications from now on
    pub fn subscribe(&self) -> BroadcastStream<ChangeEvent> {
        BroadcastStream::new(self.changes.subscribe())
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use canopy_storage::Pool;
    use serde_json::json;
    use tokio_stream::StreamExt;

    fn spawn() -> (ClientHandle, mpsc::Sender<ServerEvent>) {
        let store = ClientStore::new(Pool::new(ActorId(1)), MemoryTransport::new());
        let (events_tx, events_rx) = mpsc::channel(16);
        (
            ClientActor::spawn(store, events_rx, &SyncConfig::default()),
            events_tx,
        )
    }

    #[tokio::test]
    async fn test_read_your_writes_through_handle() {
        let (client, _server) = spawn();
        client.set(NodeId::root(), "k", 5).await.unwrap();
        assert_eq!(
            client.get(NodeId::root(), "k").await.unwrap(),
            Some(Lson::Json(json!(5)))
        );
        assert_eq!(client.pending_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_server_events_settle_queue() {
        let (client, server) = spawn();
        client.set(NodeId::root(), "k", 1).await.unwrap();
        server.send(ServerEvent::Ack { seq: 1 }).await.unwrap();

        // Commands queue behind the event once it has been picked up
        let mut pending = client.pending_len().await.unwrap();
        for _ in 0..50 {
            if pending == 0 {
                break;
            }
            tokio::task::yield_now().await;
            pending = client.pending_len().await.unwrap();
        }
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let (client, _server) = spawn();
        let mut changes = client.subscribe();
        client.set(NodeId::root(), "title", "hello").await.unwrap();

        let event = changes.next().await.unwrap().unwrap();
        assert_eq!(event.path, vec![ChildKey::from("title")]);
        assert_eq!(event.new, Some(Lson::Json(json!("hello"))));
    }

    #[tokio::test]
    async fn test_cyclic_attach_surfaces_to_caller() {
        let (client, _server) = spawn();
        let applied = client
            .set(NodeId::root(), "o", Draft::object::<&str>([]))
            .await
            .unwrap();
        let o = applied.op.created_ids()[0];
        let err = client.set(o, "self", Draft::Attach(o)).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Storage(canopy_storage::StorageError::CyclicAttachment { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (client, _server) = spawn();
        client.shutdown().await;
        let err = client.to_json().await.unwrap_err();
        assert!(matches!(err, SyncError::ClientClosed));
    }
}
