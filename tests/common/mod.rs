#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quantum_link_lib::serial::{SerialError, SerialPortIO};

pub const INFO_TELEGRAM: &str =
    "v2.00 00 01 0001005C 00 0026 039D 0000289F 00000488 00000000 00002EE0 00ED";

/// Commands written to a [`ScriptedDevice`], newline stripped.
#[derive(Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<String>>>);

impl WriteLog {
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|c| *c == command).count()
    }
}

/// `timeout_ms` of every `read_data` call, in order.
#[derive(Clone, Default)]
pub struct WaitLog(Arc<Mutex<Vec<u64>>>);

impl WaitLog {
    pub fn waits(&self) -> Vec<u64> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// One scripted reply. `None` marks a silence gap: the read that reaches it
/// sleeps for its full timeout and then times out.
type Reply = Vec<Option<u8>>;

fn reply_bytes(text: &str) -> Reply {
    text.bytes().map(Some).collect()
}

/// In-memory device answering commands from a script.
///
/// Per-command sequences are consumed first (`None` = stay silent for that
/// write), then the fallback reply is used. Unknown commands stay silent.
pub struct ScriptedDevice {
    fallback: HashMap<String, Reply>,
    sequences: HashMap<String, VecDeque<Option<Reply>>>,
    pending: VecDeque<Option<u8>>,
    writes: WriteLog,
    waits: WaitLog,
    broken: bool,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self {
            fallback: HashMap::new(),
            sequences: HashMap::new(),
            pending: VecDeque::new(),
            writes: WriteLog::default(),
            waits: WaitLog::default(),
            broken: false,
        }
    }

    pub fn reply(mut self, command: &str, text: &str) -> Self {
        self.fallback.insert(command.to_string(), reply_bytes(text));
        self
    }

    /// Reply sent in parts with a silence gap between consecutive parts.
    pub fn reply_with_gaps(mut self, command: &str, parts: &[&str]) -> Self {
        let mut reply = Reply::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                reply.push(None);
            }
            reply.extend(reply_bytes(part));
        }
        self.fallback.insert(command.to_string(), reply);
        self
    }

    pub fn sequence(mut self, command: &str, replies: &[Option<&str>]) -> Self {
        self.sequences.insert(
            command.to_string(),
            replies.iter().map(|r| r.map(reply_bytes)).collect(),
        );
        self
    }

    /// Every write fails as if the port had vanished.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn writes(&self) -> WriteLog {
        self.writes.clone()
    }

    pub fn waits(&self) -> WaitLog {
        self.waits.clone()
    }
}

#[async_trait::async_trait]
impl SerialPortIO for ScriptedDevice {
    async fn send_data(&mut self, data: &[u8]) -> Result<(), SerialError> {
        let command = String::from_utf8_lossy(data).trim_end().to_string();
        self.writes.0.lock().unwrap().push(command.clone());

        if self.broken {
            return Err(SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "port gone",
            )));
        }

        let reply = match self.sequences.get_mut(&command).and_then(|q| q.pop_front()) {
            Some(reply) => reply,
            None => self.fallback.get(&command).cloned(),
        };
        if let Some(bytes) = reply {
            self.pending.extend(bytes);
        }
        Ok(())
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize, SerialError> {
        self.waits.0.lock().unwrap().push(timeout_ms);

        match self.pending.front() {
            None => Err(SerialError::Timeout),
            Some(None) => {
                self.pending.pop_front();
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                Err(SerialError::Timeout)
            }
            Some(Some(_)) => {
                let mut n = 0;
                while n < buffer.len() {
                    match self.pending.front() {
                        Some(Some(byte)) => {
                            buffer[n] = *byte;
                            self.pending.pop_front();
                            n += 1;
                        }
                        _ => break,
                    }
                }
                Ok(n)
            }
        }
    }

    async fn flush(&mut self) -> Result<(), SerialError> {
        Ok(())
    }
}

/// A healthy single-heater controller on current (hex) firmware.
pub fn quantum() -> ScriptedDevice {
    ScriptedDevice::new()
        .reply("GI", INFO_TELEGRAM)
        .reply("GS", "Q1234")
        .reply("GA", "0002")
        .reply("GX", "1005C")
        .reply("GN", "Quantum SE")
        .reply("GB", "0.5")
}
