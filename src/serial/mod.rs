pub mod interface;
pub mod protocol;

pub use interface::{ResponseBuffer, SerialInterface, SerialPortIO, TransportTiming};
pub use protocol::NumericMode;

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("Malformed telegram: {0}")]
    MalformedTelegram(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
