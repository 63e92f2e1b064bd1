//! Haptic service worker
//!
//! Owns the connection controller and the vibration pipeline and runs
//! [`HapticCommand`]s one at a time. Nothing a command does can end the loop;
//! failures are logged and published as [`AppEvent::LogMessage`].

use crate::domain::error::{ConnectionError, PipelineError};
use crate::domain::models::{AppEvent, HapticCommand, MessageSeverity, StatusMessage};
use crate::domain::settings::SettingsService;
use crate::domain::vibration::VibrationSettings;
use crate::infrastructure::haptics::connection::ConnectionController;
use crate::infrastructure::haptics::pipeline::VibrationPipeline;
use crate::infrastructure::haptics::transport::TransportFactory;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct HapticService {
    controller: ConnectionController,
    pipeline: VibrationPipeline,
    settings: Arc<Mutex<SettingsService>>,
    event_tx: mpsc::UnboundedSender<AppEvent>,
}

impl HapticService {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        settings: Arc<Mutex<SettingsService>>,
        event_tx: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let vibration = {
            let settings = settings.lock().unwrap_or_else(|e| e.into_inner());
            VibrationSettings::new(
                settings.get().vibration_enabled,
                settings.get().vibration_modifier,
            )
        };
        let controller = ConnectionController::new(factory, event_tx.clone());
        let pipeline = VibrationPipeline::new(controller.clone(), vibration);

        Self {
            controller,
            pipeline,
            settings,
            event_tx,
        }
    }

    pub fn controller(&self) -> &ConnectionController {
        &self.controller
    }

    pub fn pipeline(&self) -> &VibrationPipeline {
        &self.pipeline
    }

    fn settings(&self) -> MutexGuard<'_, SettingsService> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn report(&self, what: &str, error: impl Display, severity: MessageSeverity) {
        match severity {
            MessageSeverity::Error => error!("{}: {}", what, error),
            _ => warn!("{}: {}", what, error),
        }
        let _ = self.event_tx.send(AppEvent::LogMessage(StatusMessage::new(
            format!("{}: {}", what, error),
            severity,
        )));
    }

    fn report_scan(&self, what: &str, result: Result<(), ConnectionError>) {
        match result {
            Ok(()) => {}
            Err(ConnectionError::NotConnected) => debug!("{} skipped: not connected", what),
            Err(e) => self.report(what, e, MessageSeverity::Error),
        }
    }

    fn report_dispatch(&self, what: &str, result: Result<(), PipelineError>) {
        match result {
            Ok(()) => {}
            // Gameplay keeps firing while disconnected
            Err(PipelineError::NotConnected) => debug!("{} dropped: not connected", what),
            Err(e) => self.report(what, e, MessageSeverity::Warning),
        }
    }

    pub async fn handle(&mut self, command: HapticCommand) {
        debug!("Haptic command: {:?}", command);
        match command {
            HapticCommand::Connect => {
                let choice = self.settings().get().connector;
                match self.controller.connect(choice).await {
                    // The controller already published the failure
                    Ok(()) | Err(ConnectionError::HandshakeFailed(_)) => {}
                    Err(e) => self.report("Connect", e, MessageSeverity::Warning),
                }
            }
            HapticCommand::Disconnect => {
                // Stop the device before the session goes away
                if self.controller.is_connected() {
                    let result = self.pipeline.stop().await;
                    self.report_dispatch("Stop before disconnect", result);
                }
                match self.controller.disconnect().await {
                    Ok(()) | Err(ConnectionError::Transport(_)) => {}
                    Err(e) => self.report("Disconnect", e, MessageSeverity::Warning),
                }
            }
            HapticCommand::StartScan => {
                let result = self.controller.start_scanning().await;
                self.report_scan("Start scan", result);
            }
            HapticCommand::StopScan => {
                let result = self.controller.stop_scanning().await;
                self.report_scan("Stop scan", result);
            }
            HapticCommand::SelectDevice(index) => {
                let outcome = self.controller.select_device(index);
                debug!("Select {:?}: {:?}", index, outcome);
            }
            HapticCommand::Vibrate(value) => {
                let result = self.pipeline.vibrate(value).await;
                self.report_dispatch("Vibrate", result);
            }
            HapticCommand::StopVibration => {
                let result = self.pipeline.stop().await;
                self.report_dispatch("Stop", result);
            }
            HapticCommand::SetEnabled { enabled, start_now } => {
                let result = self.pipeline.set_enabled(enabled, start_now).await;
                self.report_dispatch("Toggle vibration", result);
                if let Err(e) = self.settings().set_vibration_enabled(enabled) {
                    self.report("Saving settings", format!("{:#}", e), MessageSeverity::Error);
                }
            }
            HapticCommand::SetModifier(value) => {
                self.pipeline.set_modifier(value);
                if let Err(e) = self.settings().set_vibration_modifier(value) {
                    self.report("Saving settings", format!("{:#}", e), MessageSeverity::Error);
                }
            }
            HapticCommand::SetConnector(choice) => {
                info!("Connector set to {}", choice);
                if let Err(e) = self.settings().set_connector(choice) {
                    self.report("Saving settings", format!("{:#}", e), MessageSeverity::Error);
                }
            }
        }
    }

    /// Process commands until every sender is gone, then close any open session.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HapticCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        if self.controller.is_connected() {
            self.handle(HapticCommand::Disconnect).await;
        }
        info!("Haptic service stopped");
    }

    /// Start the worker on the current runtime.
    pub fn spawn(self) -> (mpsc::UnboundedSender<HapticCommand>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(command_rx));
        (command_tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConnectionState, ConnectorChoice};
    use crate::infrastructure::haptics::simulator::{Simulator, SimulatorCommand};
    use crate::infrastructure::haptics::transport::DefaultTransportFactory;
    use std::time::Duration;

    struct Harness {
        service: HapticService,
        simulator: Simulator,
        events: mpsc::UnboundedReceiver<AppEvent>,
        settings_path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("settings.json");
        let mut settings = SettingsService::with_path(&settings_path);
        settings.set_connector(ConnectorChoice::Embedded).unwrap();

        let simulator = Simulator::with_demo_devices();
        let factory = DefaultTransportFactory::new(simulator.clone(), "test", "unused.sock");
        let (tx, events) = mpsc::unbounded_channel();
        let service = HapticService::new(Arc::new(factory), Arc::new(Mutex::new(settings)), tx);

        Harness {
            service,
            simulator,
            events,
            settings_path,
            _dir: dir,
        }
    }

    async fn settle(events: &mut mpsc::UnboundedReceiver<AppEvent>, done: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done() {
                if events.recv().await.is_none() {
                    break;
                }
            }
        })
        .await
        .expect("timed out waiting for service");
    }

    fn drain_logs(events: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<StatusMessage> {
        let mut logs = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AppEvent::LogMessage(message) = event {
                logs.push(message);
            }
        }
        logs
    }

    #[tokio::test]
    async fn connect_scan_select_and_vibrate() {
        let mut h = harness();
        h.service.handle(HapticCommand::Connect).await;
        h.service.handle(HapticCommand::StartScan).await;
        {
            let controller = h.service.controller().clone();
            settle(&mut h.events, || controller.devices().len() == 2).await;
        }

        h.service.handle(HapticCommand::SelectDevice(Some(2))).await;
        h.service.handle(HapticCommand::Vibrate(Some(1.0))).await;
        h.service.handle(HapticCommand::StopVibration).await;

        assert_eq!(
            h.simulator.commands(),
            vec![
                SimulatorCommand::Vibrate {
                    device_index: 2,
                    intensity: 1.0
                },
                SimulatorCommand::Stop { device_index: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_stops_selected_device_first() {
        let mut h = harness();
        h.service.handle(HapticCommand::Connect).await;
        h.service.handle(HapticCommand::StartScan).await;
        {
            let controller = h.service.controller().clone();
            settle(&mut h.events, || controller.devices().len() == 2).await;
        }
        h.service.handle(HapticCommand::SelectDevice(Some(0))).await;

        h.service.handle(HapticCommand::Disconnect).await;

        assert_eq!(
            h.simulator.commands(),
            vec![SimulatorCommand::Stop { device_index: 0 }]
        );
        assert_eq!(h.service.controller().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn settings_changes_are_written_through() {
        let mut h = harness();
        h.service.handle(HapticCommand::SetModifier(0.25)).await;
        h.service
            .handle(HapticCommand::SetEnabled {
                enabled: false,
                start_now: false,
            })
            .await;
        h.service
            .handle(HapticCommand::SetConnector(ConnectorChoice::External))
            .await;

        assert_eq!(h.service.pipeline().settings().modifier(), 0.25);
        assert!(!h.service.pipeline().enabled());

        let reloaded = SettingsService::with_path(&h.settings_path);
        assert_eq!(reloaded.get().vibration_modifier, 0.25);
        assert!(!reloaded.get().vibration_enabled);
        assert_eq!(reloaded.get().connector, ConnectorChoice::External);
    }

    #[tokio::test]
    async fn duplicate_connect_is_reported_not_fatal() {
        let mut h = harness();
        h.service.handle(HapticCommand::Connect).await;
        drain_logs(&mut h.events);

        h.service.handle(HapticCommand::Connect).await;
        let logs = drain_logs(&mut h.events);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].severity, MessageSeverity::Warning);
        assert_eq!(h.service.controller().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn commands_while_disconnected_are_quiet() {
        let mut h = harness();
        h.service.handle(HapticCommand::StartScan).await;
        h.service.handle(HapticCommand::Vibrate(Some(0.5))).await;
        h.service.handle(HapticCommand::StopVibration).await;

        assert!(drain_logs(&mut h.events).is_empty());
        assert!(h.simulator.commands().is_empty());
        assert_eq!(h.service.pipeline().settings().intensity(), 0.5);
    }

    #[tokio::test]
    async fn worker_disconnects_when_senders_drop() {
        let h = harness();
        let simulator = h.simulator.clone();
        let (commands, worker) = h.service.spawn();

        commands.send(HapticCommand::Connect).unwrap();
        commands.send(HapticCommand::StartScan).unwrap();
        drop(commands);

        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("worker did not stop")
            .unwrap();
        assert!(simulator.session().is_none());
    }
}
