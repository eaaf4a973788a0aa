//! Error types for cask

use thiserror::Error;

/// Result type for cask operations
pub type Result<T> = std::result::Result<T, CaskError>;

/// Cask error types
#[derive(Error, Debug)]
pub enum CaskError {
    #[error("Container error: {0}")]
    Container(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image already exists: {0}")]
    ImageExists(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Tag conflict: {0}")]
    TagConflict(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Pool overflow: {0}")]
    PoolOverflow(String),

    #[error("Port not mapped: {0}")]
    PortNotMapped(u16),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Packet filter error: {0}")]
    PacketFilter(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
