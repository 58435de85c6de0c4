//! Error types for radio operations.

use thiserror::Error;

/// Errors raised by the radio driver or controller.
///
/// None of these are fatal to the node: the caller logs them and retries on
/// the next scheduled tick.
#[derive(Debug, Error)]
pub enum RadioError {
    /// Transport failed to come up
    #[error("Radio init failed: {0}")]
    Init(String),

    /// Transport switch failed part way
    #[error("Radio mode switch failed: {0}")]
    Switch(String),

    /// Frame could not be handed to the transport
    #[error("Radio send failed: {0}")]
    Send(String),

    /// Send attempted while the broadcast transport is down
    #[error("Broadcast transport is not active")]
    NotActive,

    /// Infra mode requested without any configured networks
    #[error("No infra networks configured")]
    NoInfraNetworks,

    /// Invalid radio address text
    #[error("Invalid radio address: {0}")]
    InvalidAddress(String),
}

/// Result type for radio operations.
pub type RadioResult<T> = Result<T, RadioError>;
