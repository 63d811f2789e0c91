pub mod identity;
pub mod manager;
pub mod models;
pub mod poller;

pub use manager::QuantumDevice;
pub use models::*;
pub use poller::{CommandQueue, Poller, SharedState};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device already connected")]
    AlreadyConnected,

    #[error("Device not connected")]
    NotConnected,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
