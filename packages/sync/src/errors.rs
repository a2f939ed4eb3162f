//! Error types for client and server stores

use canopy_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Outbound queue is full")]
    Full,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Client task has stopped")]
    ClientClosed,

    #[error("Hub task has stopped")]
    HubClosed,
}

pub type SyncResult<T> = Result<T, SyncError>;
