//! Error types for SwarmLink mesh operations.
//!
//! The hot path rarely surfaces these: decode, authentication and capacity
//! failures on received frames are counted and logged, and the frame is
//! dropped. They appear at setup and at the seams to the radio and uplinks.

use swarmlink_core::CoreError;
use swarmlink_radio::RadioError;
use thiserror::Error;

use crate::envelope::{DecodeError, EncodeError};

/// Errors that can occur in mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Invalid node configuration
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    /// Frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Envelope could not be encoded
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Envelope failed shared-key validation
    #[error("Authentication failed for envelope from {device_id}")]
    Auth { device_id: String },

    /// Bounded table or store has no room
    #[error("Capacity exhausted: {0}")]
    Capacity(String),

    /// Radio or transport failure
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Uplink I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
