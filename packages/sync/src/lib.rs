//! # Canopy Sync
//!
//! Client and server stores that keep a shared document consistent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐        ┌──────────────────────────┐
//! │ ClientStore                  │  ops   │ ServerStore              │
//! │  pool: base + overlay        │ ─────► │  pool: authoritative     │
//! │  pending: Local ... Sent     │        │  guards                  │
//! │  history: undo / redo        │ ◄───── │                          │
//! └──────────────────────────────┘ events └──────────────────────────┘
//!          ▲ ClientActor                         ▲ Hub
//!          └────────── tokio tasks + channels ───┘
//! ```
//!
//! ## Reconciliation
//!
//! 1. A local op is applied to the overlay and queued
//! 2. `Ack` moves the confirmed ops into the base
//! 3. `Reject` drops the op; the overlay is rebuilt from the remaining queue
//! 4. `Remote` changes the base underneath the queue, which is replayed on top
//! 5. `FullResync` replaces everything and clears the queue
//!
//! After each step the store reports the slots whose visible value changed.

mod actor;
mod client_store;
mod config;
mod errors;
mod hub;
mod protocol;
mod server_store;
mod settings;
mod transport;
mod visible;

pub use actor::{ClientActor, ClientHandle};
pub use client_store::{ClientStore, PendingOp, PendingState};
pub use config::SyncConfig;
pub use errors::{SyncError, SyncResult, TransportError};
pub use hub::{Connection, Hub, HubHandle};
pub use protocol::{Delivery, OutboundOp, ServerEvent};
pub use server_store::{MaxListLength, OpGuard, ReadOnlyKeys, ServerStore};
pub use settings::RoomSettings;
pub use transport::{ChannelTransport, MemoryTransport, Transport};
pub use visible::VisibleSlots;
