use std::borrow::Cow;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::{Result, SerialError};

// Quantum controllers talk 9600-8-N-1 without handshaking
pub const BAUD_RATE: u32 = 9600;

/// Ceiling for a single reply. Anything past this is left unread.
pub const MAX_COMM_BUFFER_SIZE: usize = 128;

/// Byte-level access to the device.
///
/// `read_data` returns `SerialError::Timeout` when nothing arrives within
/// `timeout_ms`. The real port implementation lives below; tests supply
/// scripted devices.
#[async_trait::async_trait]
pub trait SerialPortIO: Send {
    async fn send_data(&mut self, data: &[u8]) -> Result<()>;
    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize>;
    async fn flush(&mut self) -> Result<()>;
}

#[async_trait::async_trait]
impl SerialPortIO for SerialStream {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        AsyncWriteExt::write_all(self, data).await?;
        Ok(())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        match timeout(Duration::from_millis(timeout_ms), AsyncReadExt::read(self, buffer)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(SerialError::Timeout),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        AsyncWriteExt::flush(self).await?;
        Ok(())
    }
}

/// Open a Quantum serial port with the fixed line settings.
///
/// Must be called from inside a tokio runtime; the port registers with the
/// reactor of the calling task.
pub fn open_port(port_name: &str) -> Result<SerialStream> {
    let port = tokio_serial::new(port_name, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()?;

    log::info!("Opened {} at {} baud (8-N-1)", port_name, BAUD_RATE);
    Ok(port)
}

/// Waits used by [`SerialInterface::exchange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTiming {
    /// How long to wait for the first reply byte after each write.
    pub response_timeout_ms: u64,
    /// Total write+wait attempts before giving up with `Timeout`.
    pub max_attempts: u32,
    /// Idle wait after the first byte, while the device is still composing.
    pub settle_timeout_ms: u64,
    /// Inter-byte silence that ends a reply.
    pub idle_timeout_ms: u64,
}

impl Default for TransportTiming {
    fn default() -> Self {
        Self {
            response_timeout_ms: 1000,
            max_attempts: 3,
            settle_timeout_ms: 100,
            idle_timeout_ms: 10,
        }
    }
}

/// Bounded scratch buffer holding one reply.
#[derive(Clone)]
pub struct ResponseBuffer {
    bytes: [u8; MAX_COMM_BUFFER_SIZE],
    len: usize,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self {
            bytes: [0; MAX_COMM_BUFFER_SIZE],
            len: 0,
        }
    }

    /// Build a buffer from raw bytes, truncating at the ceiling.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut buffer = Self::new();
        for &byte in data {
            if !buffer.push(byte) {
                break;
            }
        }
        buffer
    }

    /// Append one byte; returns false once the buffer is full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.is_full() {
            return false;
        }
        self.bytes[self.len] = byte;
        self.len += 1;
        true
    }

    pub fn is_full(&self) -> bool {
        self.len == MAX_COMM_BUFFER_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Reply text up to the first NUL with trailing CR/LF and blanks removed.
    pub fn text(&self) -> Cow<'_, str> {
        let raw = self.as_bytes();
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        match String::from_utf8_lossy(&raw[..end]) {
            Cow::Borrowed(s) => Cow::Borrowed(s.trim_end()),
            Cow::Owned(s) => Cow::Owned(s.trim_end().to_string()),
        }
    }
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResponseBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResponseBuffer").field(&self.text()).finish()
    }
}

/// One-shot command/response exchange over a [`SerialPortIO`].
///
/// The protocol has no end-of-reply delimiter: a reply is over once the line
/// stays silent for `idle_timeout_ms`, or once the buffer is full.
pub struct SerialInterface {
    port: Box<dyn SerialPortIO>,
    timing: TransportTiming,
}

impl SerialInterface {
    pub fn from_io(port: Box<dyn SerialPortIO>, timing: TransportTiming) -> Self {
        Self { port, timing }
    }

    pub fn timing(&self) -> TransportTiming {
        self.timing
    }

    /// Send a newline-terminated command and collect the reply.
    ///
    /// A failed write is returned immediately as `WriteFailed`. Silence after
    /// a successful write repeats the whole write+wait step, up to
    /// `max_attempts` times in total, before failing with `Timeout`.
    pub async fn exchange(&mut self, command: &str) -> Result<ResponseBuffer> {
        let mut response = ResponseBuffer::new();
        let mut byte = [0u8; 1];
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.write_command(command).await?;

            match self.port.read_data(&mut byte, self.timing.response_timeout_ms).await {
                Ok(n) if n > 0 => {
                    response.push(byte[0]);
                    break;
                }
                Ok(_) | Err(SerialError::Timeout) => {
                    if attempt >= self.timing.max_attempts {
                        log::debug!("{:?} unanswered after {} attempts", command.trim_end(), attempt);
                        return Err(SerialError::Timeout);
                    }
                    log::debug!("{:?} attempt {} timed out, retrying", command.trim_end(), attempt);
                }
                Err(e) => return Err(e),
            }
        }

        let mut idle_ms = self.timing.settle_timeout_ms;
        while !response.is_full() {
            match self.port.read_data(&mut byte, idle_ms).await {
                Ok(n) if n > 0 => {
                    response.push(byte[0]);
                }
                Ok(_) | Err(SerialError::Timeout) => break,
                Err(e) => return Err(e),
            }
            idle_ms = self.timing.idle_timeout_ms;
        }

        log::debug!("{:?} -> {:?}", command.trim_end(), response.text());
        Ok(response)
    }

    /// Exchange and return the reply as trimmed text.
    pub async fn send_command(&mut self, command: &str) -> Result<String> {
        let response = self.exchange(command).await?;
        Ok(response.text().into_owned())
    }

    async fn write_command(&mut self, command: &str) -> Result<()> {
        self.port
            .send_data(command.as_bytes())
            .await
            .map_err(|e| SerialError::WriteFailed(e.to_string()))?;
        self.port
            .flush()
            .await
            .map_err(|e| SerialError::WriteFailed(e.to_string()))
    }
}
