use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::serial::interface::open_port;
use crate::serial::protocol;
use crate::serial::{SerialInterface, SerialPortIO};

use super::identity;
use super::models::{DeviceEvent, DeviceIdentity, DeviceStatus, PollerState};
use super::poller::{Poller, SharedState};
use super::{DeviceError, Result};

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Connection to one Quantum controller.
///
/// All serial I/O happens on a dedicated worker task which opens the port,
/// runs the identity handshake and then polls until disconnected. Consumers
/// read copies of the latest status, queue commands and listen for
/// [`DeviceEvent`]s; none of these calls block on I/O.
pub struct QuantumDevice {
    config: ConnectionConfig,
    shared: Arc<SharedState>,
    events: broadcast::Sender<DeviceEvent>,
    state: Arc<watch::Sender<PollerState>>,
    worker: Option<Worker>,
}

impl QuantumDevice {
    pub fn new(config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(PollerState::Idle);
        let state = Arc::new(state);
        let shared = Arc::new(SharedState::new(events.clone(), state.clone()));

        Self {
            config,
            shared,
            events,
            state,
            worker: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Subscribe before `connect` to see `Connected` or `ConnectFailed`.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn state_receiver(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PollerState {
        self.shared.state()
    }

    /// Check if the worker is up and polling
    pub fn is_connected(&self) -> bool {
        self.worker_running() && self.state() == PollerState::Polling
    }

    /// Connect to the controller on a serial port.
    ///
    /// Returns once the worker is spawned; the outcome arrives as
    /// `Connected` or `ConnectFailed`. Must be called inside a tokio runtime.
    pub fn connect(&mut self, port_name: &str) -> Result<()> {
        let port_name = port_name.to_string();
        log::info!("Attempting to connect to port: {}", port_name);
        self.connect_with(move || open_port(&port_name))
    }

    /// Connect through any byte channel. `open` runs on the worker task.
    pub fn connect_with<F, P>(&mut self, open: F) -> Result<()>
    where
        F: FnOnce() -> crate::serial::Result<P> + Send + 'static,
        P: SerialPortIO + 'static,
    {
        if self.worker_running() {
            return Err(DeviceError::AlreadyConnected);
        }

        // Identity, status and queue belong to a single connection
        self.shared = Arc::new(SharedState::new(self.events.clone(), self.state.clone()));
        self.shared.set_state(PollerState::Idle);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_worker(
            open,
            self.config.clone(),
            self.shared.clone(),
            cancel.clone(),
        ));
        self.worker = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Stop the worker, waiting up to the shutdown grace before aborting it.
    pub async fn disconnect(&mut self) -> Result<()> {
        let worker = self.worker.take().ok_or(DeviceError::NotConnected)?;
        worker.cancel.cancel();

        let mut handle = worker.handle;
        let grace = self.config.shutdown_grace();
        if timeout(grace, &mut handle).await.is_err() {
            log::warn!("Worker did not stop within {:?}, aborting it", grace);
            handle.abort();
        }

        self.shared.set_state(PollerState::Stopped);
        log::info!("Disconnected from device");
        Ok(())
    }

    /// Copy of the latest status snapshot.
    pub fn status(&self) -> DeviceStatus {
        self.shared.status()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.shared.identity().cloned()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.shared.identity().map(|i| i.serial_number.as_str())
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.shared.identity().map(|i| i.firmware_version.as_str())
    }

    pub fn model_name(&self) -> Option<&str> {
        self.shared.identity().map(|i| i.model_name.as_str())
    }

    pub fn bandwidth(&self) -> Option<&str> {
        self.shared.identity().map(|i| i.bandwidth.as_str())
    }

    pub fn design_wavelength(&self) -> Option<&str> {
        self.shared.identity().map(|i| i.design_wavelength.as_str())
    }

    /// Queue a raw command for the next poll cycle.
    pub fn add_command(&self, command: &str) -> Result<()> {
        let body = command.trim_end_matches('\n');
        if body.trim().is_empty() {
            return Err(DeviceError::InvalidCommand("empty command".to_string()));
        }
        if body.contains(['\n', '\r']) {
            return Err(DeviceError::InvalidCommand(format!("{:?} spans several lines", body)));
        }
        if !self.worker_running() {
            return Err(DeviceError::NotConnected);
        }

        self.shared.queue().enqueue(protocol::terminate(body));
        Ok(())
    }

    pub fn queued_commands(&self) -> usize {
        self.shared.queue().len()
    }

    /// Set the wing-shift, in tenths of a wavelength unit.
    pub fn set_wing_shift(&self, tenths: i32) -> Result<()> {
        self.add_command(&protocol::set_wing_shift(tenths))
    }

    pub fn center_wing_shift(&self) -> Result<()> {
        self.set_wing_shift(0)
    }

    /// Step the wing-shift one tenth from the last reported value. Returns
    /// false without queuing anything when already at the limit.
    pub fn nudge_wing_shift(&self, up: bool) -> Result<bool> {
        match protocol::step_wing_shift(self.status().wing_shift, up) {
            Some(command) => {
                self.add_command(&command)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn worker_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.handle.is_finished())
    }
}

impl Drop for QuantumDevice {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
            worker.handle.abort();
        }
    }
}

/// Body of the worker task. The port is opened and dropped here only.
async fn run_worker<F, P>(
    open: F,
    config: ConnectionConfig,
    shared: Arc<SharedState>,
    cancel: CancellationToken,
) where
    F: FnOnce() -> crate::serial::Result<P> + Send + 'static,
    P: SerialPortIO + 'static,
{
    let port = match open() {
        Ok(port) => port,
        Err(e) => {
            connect_failed(&shared, format!("Could not open port: {}", e));
            return;
        }
    };
    let mut interface = SerialInterface::from_io(Box::new(port), config.timing());

    let handshake = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            shared.set_state(PollerState::Stopped);
            return;
        }
        result = identity::perform_handshake(&mut interface, config.query_boot_info) => result,
    };

    let handshake = match handshake {
        Ok(handshake) => handshake,
        Err(e) => {
            connect_failed(&shared, format!("Handshake failed: {}", e));
            return;
        }
    };

    let boot_info = handshake.status.boot_info;
    shared.set_identity(handshake.identity);
    shared.replace_status(handshake.status);
    shared.set_state(PollerState::Polling);
    shared.emit(DeviceEvent::Connected);
    log::info!("Connected, polling every {:?}", config.poll_interval());

    Poller::new(interface, handshake.mode, shared.clone(), boot_info)
        .run(config.poll_interval(), cancel)
        .await;

    shared.set_state(PollerState::Stopped);
    log::info!("Connection worker stopped");
}

fn connect_failed(shared: &SharedState, reason: String) {
    log::error!("{}", reason);
    shared.set_state(PollerState::Stopped);
    shared.emit(DeviceEvent::ConnectFailed { reason });
}
