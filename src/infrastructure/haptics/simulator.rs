//! In-process haptic endpoint
//!
//! Backs the `Embedded` connector and the local-socket endpoint server.
//! Devices are either attached up front, queued to appear on the next scan,
//! or hot-plugged while a session is open. Every command that reaches a device
//! is recorded so callers can inspect what was dispatched.

use crate::domain::error::TransportError;
use crate::domain::models::{DeviceCapabilities, RemoteDevice};
use crate::infrastructure::haptics::transport::{
    Session, TransportAdapter, TransportEvent, TransportEventSender, TransportResult,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimulatorCommand {
    Vibrate { device_index: u32, intensity: f64 },
    Stop { device_index: u32 },
}

#[derive(Default)]
struct SimulatorState {
    latency: Duration,
    fail_handshake: bool,
    next_session: u64,
    session: Option<Session>,
    events: Option<TransportEventSender>,
    devices: BTreeMap<u32, RemoteDevice>,
    queued: Vec<RemoteDevice>,
    scanning: bool,
    commands: Vec<SimulatorCommand>,
}

impl SimulatorState {
    fn check_session(&self, session: Session) -> TransportResult<()> {
        match self.session {
            Some(current) if current == session => Ok(()),
            _ => Err(TransportError::SessionClosed),
        }
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[derive(Clone, Default)]
pub struct Simulator {
    inner: Arc<Mutex<SimulatorState>>,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A simulator whose scan discovers a vibrator, a stroker and a second vibrator.
    pub fn with_demo_devices() -> Self {
        let simulator = Self::new();
        simulator.queue_device(RemoteDevice::new(
            0,
            "Simulated Vibrator",
            DeviceCapabilities::vibrator(),
        ));
        simulator.queue_device(RemoteDevice::new(
            1,
            "Simulated Stroker",
            DeviceCapabilities {
                linear: true,
                ..Default::default()
            },
        ));
        simulator.queue_device(RemoteDevice::new(
            2,
            "Simulated Dual Vibe",
            DeviceCapabilities {
                vibrate: true,
                rotate: true,
                ..Default::default()
            },
        ));
        simulator
    }

    fn state(&self) -> MutexGuard<'_, SimulatorState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Delay applied to every request before it resolves
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn set_fail_handshake(&self, fail: bool) {
        self.state().fail_handshake = fail;
    }

    /// Attach a device now, announcing it if a session is open.
    pub fn add_device(&self, device: RemoteDevice) {
        let mut state = self.state();
        info!("Simulator: device {} '{}' attached", device.index, device.name);
        state.emit(TransportEvent::DeviceAdded(device.clone()));
        state.devices.insert(device.index, device);
    }

    /// Queue a device that appears on the next scan.
    pub fn queue_device(&self, device: RemoteDevice) {
        self.state().queued.push(device);
    }

    pub fn remove_device(&self, index: u32) -> Option<RemoteDevice> {
        let mut state = self.state();
        let removed = state.devices.remove(&index);
        if removed.is_some() {
            info!("Simulator: device {} detached", index);
            state.emit(TransportEvent::DeviceRemoved(index));
        }
        removed
    }

    /// End an ongoing scan from the endpoint side.
    pub fn finish_scan(&self) {
        let mut state = self.state();
        if state.scanning {
            state.scanning = false;
            state.emit(TransportEvent::ScanningFinished);
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scanning
    }

    pub fn session(&self) -> Option<Session> {
        self.state().session
    }

    pub fn commands(&self) -> Vec<SimulatorCommand> {
        self.state().commands.clone()
    }

    async fn respond(&self) {
        let latency = self.state().latency;
        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }
    }

    async fn open_session(&self, events: TransportEventSender) -> TransportResult<Session> {
        self.respond().await;

        let mut state = self.state();
        if state.fail_handshake {
            return Err(TransportError::Unreachable(
                "simulated handshake failure".to_string(),
            ));
        }
        if state.session.is_some() {
            return Err(TransportError::Rejected(
                "endpoint already serves a client".to_string(),
            ));
        }

        state.next_session += 1;
        let session = Session {
            id: state.next_session,
        };
        state.session = Some(session);
        state.events = Some(events);

        // Devices attached before the handshake are announced right away
        let attached: Vec<RemoteDevice> = state.devices.values().cloned().collect();
        for device in attached {
            state.emit(TransportEvent::DeviceAdded(device));
        }

        debug!("Simulator: session {} opened", session.id);
        Ok(session)
    }

    async fn close_session(&self, session: Session) -> TransportResult<()> {
        self.respond().await;

        let mut state = self.state();
        state.check_session(session)?;
        state.session = None;
        state.events = None;
        state.scanning = false;
        debug!("Simulator: session {} closed", session.id);
        Ok(())
    }

    async fn begin_scan(&self, session: Session) -> TransportResult<()> {
        self.respond().await;

        let mut state = self.state();
        state.check_session(session)?;
        state.scanning = true;

        let found: Vec<RemoteDevice> = state.queued.drain(..).collect();
        for device in found {
            state.emit(TransportEvent::DeviceAdded(device.clone()));
            state.devices.insert(device.index, device);
        }
        Ok(())
    }

    async fn end_scan(&self, session: Session) -> TransportResult<()> {
        self.respond().await;

        let mut state = self.state();
        state.check_session(session)?;
        state.scanning = false;
        Ok(())
    }

    async fn command(&self, session: Session, command: SimulatorCommand) -> TransportResult<()> {
        self.respond().await;

        let mut state = self.state();
        state.check_session(session)?;
        let device_index = match command {
            SimulatorCommand::Vibrate { device_index, .. } => device_index,
            SimulatorCommand::Stop { device_index } => device_index,
        };
        if !state.devices.contains_key(&device_index) {
            return Err(TransportError::UnknownDevice(device_index));
        }
        state.commands.push(command);
        Ok(())
    }
}

impl TransportAdapter for Simulator {
    fn connect(&self, events: TransportEventSender) -> BoxFuture<'_, TransportResult<Session>> {
        self.open_session(events).boxed()
    }

    fn disconnect(&self, session: Session) -> BoxFuture<'_, TransportResult<()>> {
        self.close_session(session).boxed()
    }

    fn start_scanning(&self, session: Session) -> BoxFuture<'_, TransportResult<()>> {
        self.begin_scan(session).boxed()
    }

    fn stop_scanning(&self, session: Session) -> BoxFuture<'_, TransportResult<()>> {
        self.end_scan(session).boxed()
    }

    fn send_vibrate(
        &self,
        session: Session,
        device_index: u32,
        intensity: f64,
    ) -> BoxFuture<'_, TransportResult<()>> {
        self.command(
            session,
            SimulatorCommand::Vibrate {
                device_index,
                intensity,
            },
        )
        .boxed()
    }

    fn send_stop(&self, session: Session, device_index: u32) -> BoxFuture<'_, TransportResult<()>> {
        self.command(session, SimulatorCommand::Stop { device_index })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn scan_announces_queued_devices() {
        let simulator = Simulator::with_demo_devices();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let session = simulator.connect(tx).await.unwrap();
        assert!(rx.try_recv().is_err());

        simulator.start_scanning(session).await.unwrap();
        assert!(simulator.is_scanning());

        let mut indices = Vec::new();
        while let Ok(TransportEvent::DeviceAdded(device)) = rx.try_recv() {
            indices.push(device.index);
        }
        assert_eq!(indices, vec![0, 1, 2]);

        simulator.finish_scan();
        assert_eq!(rx.try_recv(), Ok(TransportEvent::ScanningFinished));
    }

    #[tokio::test]
    async fn attached_devices_are_announced_on_connect() {
        let simulator = Simulator::new();
        simulator.add_device(RemoteDevice::new(3, "Early", DeviceCapabilities::vibrator()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        simulator.connect(tx).await.unwrap();
        match rx.try_recv() {
            Ok(TransportEvent::DeviceAdded(device)) => assert_eq!(device.index, 3),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn commands_require_open_session_and_known_device() {
        let simulator = Simulator::new();
        simulator.add_device(RemoteDevice::new(0, "Vibe", DeviceCapabilities::vibrator()));
        let (tx, _rx) = mpsc::unbounded_channel();

        let session = simulator.connect(tx).await.unwrap();
        simulator.send_vibrate(session, 0, 0.25).await.unwrap();
        assert_eq!(
            simulator.send_stop(session, 9).await,
            Err(TransportError::UnknownDevice(9))
        );

        simulator.disconnect(session).await.unwrap();
        assert_eq!(
            simulator.send_stop(session, 0).await,
            Err(TransportError::SessionClosed)
        );
        assert_eq!(
            simulator.commands(),
            vec![SimulatorCommand::Vibrate {
                device_index: 0,
                intensity: 0.25
            }]
        );
    }

    #[tokio::test]
    async fn only_one_client_at_a_time() {
        let simulator = Simulator::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        simulator.connect(tx.clone()).await.unwrap();

        assert!(matches!(
            simulator.connect(tx).await,
            Err(TransportError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn handshake_failure_switch() {
        let simulator = Simulator::new();
        simulator.set_fail_handshake(true);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(matches!(
            simulator.connect(tx).await,
            Err(TransportError::Unreachable(_))
        ));
        assert!(simulator.session().is_none());
    }
}
