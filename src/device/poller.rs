use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::sync::{broadcast, watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::serial::protocol::{self, NumericMode, CMD_GET_INFO};
use crate::serial::SerialInterface;

use super::models::{BootInfo, DeviceEvent, DeviceIdentity, DeviceStatus, PollerState, POLL_FAILURE_CODE};

/// FIFO mailbox of outbound commands, drained one per poll cycle.
pub struct CommandQueue {
    commands: StdMutex<VecDeque<String>>,
    wake: Notify,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            commands: StdMutex::new(VecDeque::new()),
            wake: Notify::new(),
        }
    }

    /// Append a command and wake the poller if it is waiting between cycles.
    pub fn enqueue(&self, command: String) {
        {
            let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
            commands.push_back(command);
        }
        self.wake.notify_one();
    }

    pub fn dequeue_one(&self) -> Option<String> {
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        commands.pop_front()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves on the next `enqueue`, or at once if one happened since the
    /// last wake.
    pub async fn woken(&self) {
        self.wake.notified().await
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between one connection's worker and its consumers.
///
/// The status record is only ever replaced whole and read by copying it out;
/// neither lock is held across I/O.
pub struct SharedState {
    status: StdMutex<DeviceStatus>,
    identity: OnceCell<DeviceIdentity>,
    queue: CommandQueue,
    events: broadcast::Sender<DeviceEvent>,
    state: Arc<watch::Sender<PollerState>>,
}

impl SharedState {
    pub fn new(events: broadcast::Sender<DeviceEvent>, state: Arc<watch::Sender<PollerState>>) -> Self {
        Self {
            status: StdMutex::new(DeviceStatus::default()),
            identity: OnceCell::new(),
            queue: CommandQueue::new(),
            events,
            state,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace_status(&self, status: DeviceStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.get()
    }

    /// Store the identity; later calls are ignored and return false.
    pub fn set_identity(&self, identity: DeviceIdentity) -> bool {
        self.identity.set(identity).is_ok()
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: PollerState) {
        self.state.send_replace(state);
    }

    pub fn emit(&self, event: DeviceEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// Steady-state polling of one connected device.
pub struct Poller {
    interface: SerialInterface,
    mode: NumericMode,
    shared: Arc<SharedState>,
    boot_info: Option<BootInfo>,
}

impl Poller {
    pub fn new(
        interface: SerialInterface,
        mode: NumericMode,
        shared: Arc<SharedState>,
        boot_info: Option<BootInfo>,
    ) -> Self {
        Self {
            interface,
            mode,
            shared,
            boot_info,
        }
    }

    /// One cycle: send at most one queued command, then refresh the status.
    ///
    /// A failed refresh publishes `FatalError` and leaves the previous
    /// snapshot in place; it never stops the poller.
    pub async fn run_cycle(&mut self) {
        if let Some(command) = self.shared.queue().dequeue_one() {
            match self.interface.exchange(&command).await {
                Ok(reply) => log::debug!("{:?} answered {:?}", command.trim_end(), reply.text()),
                Err(e) => log::warn!("Queued command {:?} failed: {}", command.trim_end(), e),
            }
        }

        match self.poll_status().await {
            Ok(status) => {
                self.shared.replace_status(status);
                self.shared.emit(DeviceEvent::StatusUpdated);
            }
            Err(e) => {
                log::warn!("Status poll failed: {}", e);
                self.shared.emit(DeviceEvent::FatalError {
                    code: POLL_FAILURE_CODE,
                });
            }
        }
    }

    async fn poll_status(&mut self) -> crate::serial::Result<DeviceStatus> {
        let reply = self.interface.send_command(CMD_GET_INFO).await?;
        let mut status = protocol::parse_status(&reply, self.mode)?;
        status.boot_info = self.boot_info;
        Ok(status)
    }

    /// Cycle until cancelled. The next cycle fires `interval` after the
    /// previous one finished, or earlier when a command is queued.
    pub async fn run(mut self, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.run_cycle() => {}
            }

            let shared = self.shared.clone();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = shared.queue().woken() => log::debug!("Poll cycle started early for queued command"),
                _ = tokio::time::sleep(interval) => {}
            }
        }
        log::debug!("Poller cancelled");
    }
}
