//! Connection Controller
//!
//! Owns the connection state machine and the live transport handle, and
//! relays transport notifications into the device registry.
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!      ^                        |                  |
//!      +-------- failure -------+             disconnect
//!      |                                           v
//!      +------------------ done ------------- Disconnecting
//! ```
//!
//! Transitions happen under a short synchronous lock; the transport is only
//! awaited outside of it. A lifecycle request that finds the state transient
//! is rejected instead of queued. No timeout is imposed here: if the
//! transport never resolves, the state stays `Connecting`/`Disconnecting`.

use crate::domain::error::{ConnectionError, PipelineError, TransportError};
use crate::domain::models::{
    AppEvent, ConnectionState, ConnectorChoice, MessageSeverity, RemoteDevice, StatusMessage,
};
use crate::domain::registry::{DeviceRegistry, SelectOutcome};
use crate::infrastructure::haptics::transport::{
    Session, TransportAdapter, TransportEvent, TransportFactory,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Command addressed to the selected device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceCommand {
    Vibrate(f64),
    Stop,
}

struct ActiveLink {
    transport: Arc<dyn TransportAdapter>,
    session: Session,
    relay: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ControllerState {
    state: ConnectionState,
    link: Option<ActiveLink>,
    registry: DeviceRegistry,
    scanning: bool,
}

impl ControllerState {
    fn current_session(&self) -> Option<Session> {
        match self.state {
            ConnectionState::Connected => self.link.as_ref().map(|l| l.session),
            _ => None,
        }
    }
}

fn lock_state(shared: &Mutex<ControllerState>) -> MutexGuard<'_, ControllerState> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionController {
    shared: Arc<Mutex<ControllerState>>,
    factory: Arc<dyn TransportFactory>,
    app_events: mpsc::UnboundedSender<AppEvent>,
}

impl ConnectionController {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        app_events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            shared: Arc::default(),
            factory,
            app_events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        lock_state(&self.shared)
    }

    fn publish(&self, event: AppEvent) {
        let _ = self.app_events.send(event);
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        self.publish(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }

    fn set_state(&self, state: ConnectionState) {
        self.lock().state = state;
        self.publish(AppEvent::ConnectionStatus(state));
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    /// Vibration-capable devices, ascending by index
    pub fn devices(&self) -> Vec<RemoteDevice> {
        self.lock().registry.devices()
    }

    pub fn selected_device(&self) -> Option<RemoteDevice> {
        self.lock().registry.selected_device()
    }

    pub fn session(&self) -> Option<Session> {
        self.lock().current_session()
    }

    pub fn select_device(&self, index: Option<u32>) -> SelectOutcome {
        let outcome = self.lock().registry.select(index);
        if outcome != SelectOutcome::Ignored {
            self.publish(AppEvent::DevicesChanged);
        }
        outcome
    }

    pub async fn connect(&self, choice: ConnectorChoice) -> Result<(), ConnectionError> {
        {
            let mut state = self.lock();
            match state.state {
                ConnectionState::Disconnected => state.state = ConnectionState::Connecting,
                ConnectionState::Connecting => return Err(ConnectionError::AlreadyConnecting),
                ConnectionState::Connected | ConnectionState::Disconnecting => {
                    return Err(ConnectionError::AlreadyConnected)
                }
            }
        }
        self.publish(AppEvent::ConnectionStatus(ConnectionState::Connecting));
        info!("Connecting to haptic endpoint ({})", choice);
        self.send_log(
            format!("Connecting ({} connector)...", choice),
            MessageSeverity::Info,
        );

        let transport = self.factory.create(choice);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let session = match transport.connect(events_tx).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Handshake failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                self.send_log(format!("Connection failed: {}", e), MessageSeverity::Error);
                return Err(ConnectionError::HandshakeFailed(e));
            }
        };

        {
            let mut state = self.lock();
            state.state = ConnectionState::Connected;
            state.link = Some(ActiveLink {
                transport,
                session,
                relay: None,
            });
        }

        let relay = tokio::spawn(relay_events(
            self.shared.clone(),
            session,
            events_rx,
            self.app_events.clone(),
        ));
        {
            let mut state = self.lock();
            match state.link.as_mut() {
                Some(link) if link.session == session => link.relay = Some(relay),
                _ => relay.abort(),
            }
        }

        info!("Connected, session {}", session.id);
        self.publish(AppEvent::ConnectionStatus(ConnectionState::Connected));
        self.send_log("Connected to haptic endpoint", MessageSeverity::Success);
        Ok(())
    }

    /// Always ends `Disconnected` with an empty registry; a transport error
    /// while closing is still returned.
    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        let link = {
            let mut state = self.lock();
            if state.state != ConnectionState::Connected {
                return Err(ConnectionError::NotConnected);
            }
            state.state = ConnectionState::Disconnecting;
            state.link.take()
        };
        self.publish(AppEvent::ConnectionStatus(ConnectionState::Disconnecting));

        let result = match link {
            Some(link) => {
                let result = link.transport.disconnect(link.session).await;
                if let Some(relay) = link.relay {
                    relay.abort();
                }
                result
            }
            None => Ok(()),
        };

        let was_scanning = {
            let mut state = self.lock();
            state.registry.clear();
            state.state = ConnectionState::Disconnected;
            std::mem::take(&mut state.scanning)
        };
        self.publish(AppEvent::ConnectionStatus(ConnectionState::Disconnected));
        self.publish(AppEvent::DevicesChanged);
        if was_scanning {
            self.publish(AppEvent::ScanningChanged(false));
        }

        match result {
            Ok(()) => {
                info!("Disconnected from haptic endpoint");
                self.send_log("Disconnected", MessageSeverity::Info);
                Ok(())
            }
            Err(e) => {
                warn!("Endpoint did not close cleanly: {}", e);
                self.send_log(
                    format!("Disconnected (endpoint error: {})", e),
                    MessageSeverity::Warning,
                );
                Err(ConnectionError::Transport(e))
            }
        }
    }

    fn active_link(&self) -> Option<(Arc<dyn TransportAdapter>, Session)> {
        let state = self.lock();
        match (state.state, state.link.as_ref()) {
            (ConnectionState::Connected, Some(link)) => Some((link.transport.clone(), link.session)),
            _ => None,
        }
    }

    fn set_scanning(&self, session: Session, scanning: bool) {
        let changed = {
            let mut state = self.lock();
            let current = state.current_session() == Some(session);
            let changed = current && state.scanning != scanning;
            if current {
                state.scanning = scanning;
            }
            changed
        };
        if changed {
            self.publish(AppEvent::ScanningChanged(scanning));
        }
    }

    pub async fn start_scanning(&self) -> Result<(), ConnectionError> {
        let Some((transport, session)) = self.active_link() else {
            debug!("Start scanning ignored: not connected");
            return Err(ConnectionError::NotConnected);
        };
        transport.start_scanning(session).await?;
        self.set_scanning(session, true);
        info!("Scanning for devices");
        Ok(())
    }

    pub async fn stop_scanning(&self) -> Result<(), ConnectionError> {
        let Some((transport, session)) = self.active_link() else {
            debug!("Stop scanning ignored: not connected");
            return Err(ConnectionError::NotConnected);
        };
        transport.stop_scanning(session).await?;
        self.set_scanning(session, false);
        info!("Scanning stopped");
        Ok(())
    }

    /// Send a command to the selected device. A missing selection is a no-op.
    pub(crate) async fn dispatch(&self, command: DeviceCommand) -> Result<(), PipelineError> {
        let (transport, session, selected) = {
            let state = self.lock();
            match (state.state, state.link.as_ref()) {
                (ConnectionState::Connected, Some(link)) => (
                    link.transport.clone(),
                    link.session,
                    state.registry.selected_index(),
                ),
                _ => return Err(PipelineError::NotConnected),
            }
        };
        let Some(device_index) = selected else {
            debug!("No device selected, dropping {:?}", command);
            return Ok(());
        };

        let result: Result<(), TransportError> = match command {
            DeviceCommand::Vibrate(intensity) => {
                transport.send_vibrate(session, device_index, intensity).await
            }
            DeviceCommand::Stop => transport.send_stop(session, device_index).await,
        };
        result.map_err(|e| {
            warn!("{:?} to device {} failed: {}", command, device_index, e);
            PipelineError::Transport(e)
        })
    }
}

/// Applies transport notifications in arrival order while `session` is live.
async fn relay_events(
    shared: Arc<Mutex<ControllerState>>,
    session: Session,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    app_events: mpsc::UnboundedSender<AppEvent>,
) {
    while let Some(event) = events.recv().await {
        let notification = {
            let mut state = lock_state(&shared);
            if state.current_session() != Some(session) {
                debug!("Dropping {:?} from stale session {}", event, session.id);
                continue;
            }
            match event {
                TransportEvent::DeviceAdded(device) => {
                    info!("Device added: {} '{}'", device.index, device.name);
                    state.registry.insert(device);
                    AppEvent::DevicesChanged
                }
                TransportEvent::DeviceRemoved(index) => {
                    if state.registry.remove(index).is_none() {
                        debug!("Removal of unknown device {}", index);
                        continue;
                    }
                    info!("Device removed: {}", index);
                    AppEvent::DevicesChanged
                }
                TransportEvent::ScanningFinished => {
                    if !std::mem::take(&mut state.scanning) {
                        continue;
                    }
                    AppEvent::ScanningChanged(false)
                }
            }
        };
        let _ = app_events.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceCapabilities;
    use crate::infrastructure::haptics::simulator::Simulator;
    use crate::infrastructure::haptics::transport::{
        DefaultTransportFactory, TransportEventSender, TransportResult,
    };
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::time::Duration;

    /// Simulator whose close always fails after releasing the session
    struct BrokenClose(Simulator);

    impl TransportAdapter for BrokenClose {
        fn connect(&self, events: TransportEventSender) -> BoxFuture<'_, TransportResult<Session>> {
            self.0.connect(events)
        }

        fn disconnect(&self, session: Session) -> BoxFuture<'_, TransportResult<()>> {
            async move {
                let _ = self.0.disconnect(session).await;
                Err(TransportError::Io("connection reset".to_string()))
            }
            .boxed()
        }

        fn start_scanning(&self, session: Session) -> BoxFuture<'_, TransportResult<()>> {
            self.0.start_scanning(session)
        }

        fn stop_scanning(&self, session: Session) -> BoxFuture<'_, TransportResult<()>> {
            self.0.stop_scanning(session)
        }

        fn send_vibrate(
            &self,
            session: Session,
            device_index: u32,
            intensity: f64,
        ) -> BoxFuture<'_, TransportResult<()>> {
            self.0.send_vibrate(session, device_index, intensity)
        }

        fn send_stop(&self, session: Session, device_index: u32) -> BoxFuture<'_, TransportResult<()>> {
            self.0.send_stop(session, device_index)
        }
    }

    struct BrokenCloseFactory(Simulator);

    impl TransportFactory for BrokenCloseFactory {
        fn create(&self, _choice: ConnectorChoice) -> Arc<dyn TransportAdapter> {
            Arc::new(BrokenClose(self.0.clone()))
        }
    }

    fn controller_with(
        simulator: &Simulator,
    ) -> (ConnectionController, mpsc::UnboundedReceiver<AppEvent>) {
        let factory = DefaultTransportFactory::new(simulator.clone(), "test", "unused.sock");
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionController::new(Arc::new(factory), tx), rx)
    }

    async fn settle(rx: &mut mpsc::UnboundedReceiver<AppEvent>, done: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done() {
                if rx.recv().await.is_none() {
                    break;
                }
            }
        })
        .await
        .expect("timed out waiting for controller");
    }

    #[tokio::test]
    async fn scan_populates_registry_and_disconnect_clears_it() {
        let simulator = Simulator::with_demo_devices();
        let (controller, mut rx) = controller_with(&simulator);

        controller.connect(ConnectorChoice::Embedded).await.unwrap();
        assert_eq!(controller.state(), ConnectionState::Connected);

        controller.start_scanning().await.unwrap();
        assert!(controller.is_scanning());
        settle(&mut rx, || controller.devices().len() == 2).await;

        // The stroker is known but not listed
        let indices: Vec<u32> = controller.devices().iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 2]);

        assert_eq!(controller.select_device(Some(2)), SelectOutcome::Selected(2));
        controller.disconnect().await.unwrap();

        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(controller.devices().is_empty());
        assert!(controller.selected_device().is_none());
        assert!(!controller.is_scanning());
        assert!(simulator.session().is_none());
    }

    #[tokio::test]
    async fn second_connect_while_connecting_is_rejected() {
        let simulator = Simulator::new();
        simulator.set_latency(Duration::from_millis(20));
        let (controller, _rx) = controller_with(&simulator);

        let (first, second) = tokio::join!(
            controller.connect(ConnectorChoice::Embedded),
            controller.connect(ConnectorChoice::Embedded)
        );
        assert_eq!(first, Ok(()));
        assert_eq!(second, Err(ConnectionError::AlreadyConnecting));
        assert_eq!(controller.session(), simulator.session());
    }

    #[tokio::test]
    async fn connect_while_connected_keeps_session() {
        let simulator = Simulator::new();
        let (controller, _rx) = controller_with(&simulator);

        controller.connect(ConnectorChoice::Embedded).await.unwrap();
        let session = controller.session();

        assert_eq!(
            controller.connect(ConnectorChoice::Embedded).await,
            Err(ConnectionError::AlreadyConnected)
        );
        assert_eq!(controller.session(), session);
        assert!(session.is_some());
    }

    #[tokio::test]
    async fn failed_handshake_returns_to_disconnected() {
        let simulator = Simulator::new();
        simulator.set_fail_handshake(true);
        let (controller, mut rx) = controller_with(&simulator);

        let result = controller.connect(ConnectorChoice::Embedded).await;
        assert!(matches!(result, Err(ConnectionError::HandshakeFailed(_))));
        assert_eq!(controller.state(), ConnectionState::Disconnected);

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::ConnectionStatus(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );

        simulator.set_fail_handshake(false);
        controller.connect(ConnectorChoice::Embedded).await.unwrap();
        assert!(controller.is_connected());
    }

    #[tokio::test]
    async fn lifecycle_requests_need_a_connection() {
        let simulator = Simulator::new();
        let (controller, _rx) = controller_with(&simulator);

        assert_eq!(controller.disconnect().await, Err(ConnectionError::NotConnected));
        assert_eq!(
            controller.start_scanning().await,
            Err(ConnectionError::NotConnected)
        );
        assert_eq!(
            controller.stop_scanning().await,
            Err(ConnectionError::NotConnected)
        );
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(!simulator.is_scanning());
    }

    #[tokio::test]
    async fn removing_selected_device_clears_selection() {
        let simulator = Simulator::new();
        for i in 0..3 {
            simulator.add_device(RemoteDevice::new(
                i,
                format!("Vibe {}", i),
                DeviceCapabilities::vibrator(),
            ));
        }
        let (controller, mut rx) = controller_with(&simulator);
        controller.connect(ConnectorChoice::Embedded).await.unwrap();
        settle(&mut rx, || controller.devices().len() == 3).await;

        assert_eq!(controller.select_device(Some(1)), SelectOutcome::Selected(1));
        simulator.remove_device(0);
        settle(&mut rx, || controller.devices().len() == 2).await;
        assert_eq!(controller.selected_device().map(|d| d.index), Some(1));

        simulator.remove_device(1);
        settle(&mut rx, || controller.devices().len() == 1).await;
        assert!(controller.selected_device().is_none());
    }

    #[tokio::test]
    async fn unknown_selection_is_ignored() {
        let simulator = Simulator::new();
        simulator.add_device(RemoteDevice::new(4, "Vibe", DeviceCapabilities::vibrator()));
        let (controller, mut rx) = controller_with(&simulator);
        controller.connect(ConnectorChoice::Embedded).await.unwrap();
        settle(&mut rx, || controller.devices().len() == 1).await;

        controller.select_device(Some(4));
        assert_eq!(controller.select_device(Some(0)), SelectOutcome::Ignored);
        assert_eq!(controller.selected_device().map(|d| d.index), Some(4));
    }

    #[tokio::test]
    async fn endpoint_can_end_a_scan() {
        let simulator = Simulator::with_demo_devices();
        let (controller, mut rx) = controller_with(&simulator);
        controller.connect(ConnectorChoice::Embedded).await.unwrap();
        controller.start_scanning().await.unwrap();
        assert!(controller.is_scanning());

        simulator.finish_scan();
        settle(&mut rx, || !controller.is_scanning()).await;
        assert!(!controller.is_scanning());
    }

    #[tokio::test]
    async fn dispatch_requires_connection() {
        let simulator = Simulator::new();
        let (controller, _rx) = controller_with(&simulator);

        assert_eq!(
            controller.dispatch(DeviceCommand::Vibrate(0.5)).await,
            Err(PipelineError::NotConnected)
        );
        assert!(simulator.commands().is_empty());
    }

    #[tokio::test]
    async fn failed_close_still_tears_down() {
        let simulator = Simulator::new();
        simulator.add_device(RemoteDevice::new(1, "Vibe", DeviceCapabilities::vibrator()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller =
            ConnectionController::new(Arc::new(BrokenCloseFactory(simulator.clone())), tx);

        controller.connect(ConnectorChoice::Embedded).await.unwrap();
        controller.start_scanning().await.unwrap();
        settle(&mut rx, || controller.devices().len() == 1).await;
        assert_eq!(controller.select_device(Some(1)), SelectOutcome::Selected(1));

        assert_eq!(
            controller.disconnect().await,
            Err(ConnectionError::Transport(TransportError::Io(
                "connection reset".to_string()
            )))
        );
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(controller.devices().is_empty());
        assert!(controller.selected_device().is_none());
        assert!(!controller.is_scanning());
        assert!(controller.session().is_none());

        // A fresh connect is accepted afterwards
        controller.connect(ConnectorChoice::Embedded).await.unwrap();
        assert!(controller.is_connected());
    }
}
