use crate::domain::game::{GameEvent, GameState, GameWorld};
use crate::domain::models::{
    AppEvent, ConnectionState, ConnectorChoice, HapticCommand, MessageSeverity, StatusMessage,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::haptics::{
    ConnectionController, DefaultTransportFactory, HapticService, Simulator,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const GAME_SPEED: f64 = 10.0;

// Flap feedback
const FLAP_PULSE: f64 = 0.8;
const PULSE_DECAY: f64 = 0.8;
const PULSE_FLOOR: f64 = 0.05;

/// Ticks the full-intensity crash buzz lasts before the stop
const CRASH_HOLD_TICKS: u32 = 20;

/// Turns game events into vibration commands.
#[derive(Debug, Default)]
pub struct HapticFeedback {
    level: f64,
    crash_hold: u32,
}

impl HapticFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn is_holding_crash(&self) -> bool {
        self.crash_hold > 0
    }

    pub fn on_event(&mut self, event: GameEvent) -> Option<HapticCommand> {
        match event {
            GameEvent::Flapped if self.crash_hold == 0 => {
                self.level = FLAP_PULSE;
                Some(HapticCommand::Vibrate(Some(self.level)))
            }
            GameEvent::Flapped | GameEvent::Passed => None,
            GameEvent::Crashed => {
                self.level = 1.0;
                self.crash_hold = CRASH_HOLD_TICKS;
                Some(HapticCommand::Vibrate(Some(self.level)))
            }
        }
    }

    /// Decay the current pulse; emits the stop once it fades out.
    pub fn on_tick(&mut self) -> Option<HapticCommand> {
        if self.crash_hold > 0 {
            self.crash_hold -= 1;
            if self.crash_hold == 0 {
                self.level = 0.0;
                return Some(HapticCommand::StopVibration);
            }
            return None;
        }
        if self.level <= 0.0 {
            return None;
        }

        self.level *= PULSE_DECAY;
        if self.level < PULSE_FLOOR {
            self.level = 0.0;
            Some(HapticCommand::StopVibration)
        } else {
            Some(HapticCommand::Vibrate(Some(self.level)))
        }
    }
}

pub struct AppOptions {
    /// Persisted as the new connector choice when given
    pub connector: Option<ConnectorChoice>,
    /// Overrides the endpoint name from settings for this run
    pub endpoint: Option<String>,
    pub ticks: u64,
    pub tick_interval: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            connector: None,
            endpoint: None,
            ticks: 600,
            tick_interval: Duration::from_millis(16),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub crashes: u32,
    pub best_score: u32,
}

pub struct FlappyTacoApp {
    // Services
    pub(crate) settings: Arc<Mutex<SettingsService>>,
    pub(crate) simulator: Simulator,
    pub(crate) controller: ConnectionController,

    // Haptics worker
    pub(crate) haptic_tx: mpsc::UnboundedSender<HapticCommand>,
    pub(crate) event_rx: mpsc::UnboundedReceiver<AppEvent>,
    pub(crate) worker: JoinHandle<()>,

    // Game
    pub(crate) world: GameWorld,
    pub(crate) feedback: HapticFeedback,
    pub(crate) options: AppOptions,

    // State
    pub(crate) connection_status: ConnectionState,
    pub(crate) status_message: Option<StatusMessage>,
    pub(crate) is_scanning: bool,
}

impl FlappyTacoApp {
    /// Must be called inside a tokio runtime; the haptic worker is spawned here.
    pub fn new(settings_service: SettingsService, options: AppOptions) -> Self {
        let endpoint = options
            .endpoint
            .clone()
            .unwrap_or_else(|| settings_service.get().endpoint_name.clone());
        let client_name = settings_service.get().client_name.clone();

        let settings = Arc::new(Mutex::new(settings_service));
        let simulator = Simulator::with_demo_devices();
        let factory = DefaultTransportFactory::new(simulator.clone(), client_name, endpoint);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let service = HapticService::new(Arc::new(factory), settings.clone(), event_tx);
        let controller = service.controller().clone();
        let (haptic_tx, worker) = service.spawn();

        if let Some(choice) = options.connector {
            let _ = haptic_tx.send(HapticCommand::SetConnector(choice));
        }

        Self {
            settings,
            simulator,
            controller,
            haptic_tx,
            event_rx,
            worker,
            world: GameWorld::new(GAME_SPEED),
            feedback: HapticFeedback::new(),
            options,
            connection_status: ConnectionState::Disconnected,
            status_message: None,
            is_scanning: false,
        }
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn connection_status(&self) -> ConnectionState {
        self.connection_status
    }

    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Latest message published by the haptic worker
    pub fn status_message(&self) -> Option<&StatusMessage> {
        self.status_message.as_ref()
    }

    fn send(&self, command: HapticCommand) {
        if self.haptic_tx.send(command).is_err() {
            error!("Haptic worker is gone");
        }
    }

    fn process_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::ConnectionStatus(status) => {
                debug!("Connection status: {:?}", status);
                self.connection_status = status;
            }
            AppEvent::DevicesChanged => {
                // Pick the first vibrator until the user chooses otherwise
                if self.controller.selected_device().is_none() {
                    if let Some(device) = self.controller.devices().first() {
                        info!("Selecting device {} '{}'", device.index, device.name);
                        self.send(HapticCommand::SelectDevice(Some(device.index)));
                    }
                }
            }
            AppEvent::ScanningChanged(scanning) => {
                self.is_scanning = scanning;
            }
            AppEvent::LogMessage(msg) => {
                match msg.severity {
                    MessageSeverity::Error => error!("{}", msg.message),
                    MessageSeverity::Warning => warn!("{}", msg.message),
                    MessageSeverity::Info | MessageSeverity::Success => info!("{}", msg.message),
                }
                self.status_message = Some(msg);
            }
        }
    }

    fn step(&mut self, summary: &mut RunSummary) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.process_event(event);
        }

        let mut commands = Vec::new();
        commands.extend(self.feedback.on_tick());

        if self.world.state() == GameState::Crashed {
            // Restart once the crash buzz is over
            if !self.feedback.is_holding_crash() {
                self.world = GameWorld::new(GAME_SPEED);
            }
        } else {
            if self.world.autopilot_wants_flap() {
                if let Some(event) = self.world.flap() {
                    commands.extend(self.feedback.on_event(event));
                }
            }
            for event in self.world.tick() {
                if event == GameEvent::Crashed {
                    summary.crashes += 1;
                    info!("Crashed with score {}", self.world.score());
                }
                commands.extend(self.feedback.on_event(event));
            }
            summary.best_score = summary.best_score.max(self.world.score());
        }

        for command in commands {
            self.send(command);
        }
        summary.ticks += 1;
    }

    /// Connect, play the configured number of ticks, then shut the worker down.
    pub async fn run(mut self) -> anyhow::Result<RunSummary> {
        let connector = self
            .settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get()
            .connector;
        info!(
            "Starting Flappy Taco ({} connector, {} ticks)",
            self.options.connector.unwrap_or(connector),
            self.options.ticks
        );
        self.send(HapticCommand::Connect);
        self.send(HapticCommand::StartScan);

        let mut summary = RunSummary::default();
        let mut interval = tokio::time::interval(self.options.tick_interval);
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        while summary.ticks < self.options.ticks {
            tokio::select! {
                _ = interval.tick() => self.step(&mut summary),
                _ = &mut shutdown => {
                    info!("Interrupted");
                    break;
                }
            }
        }

        self.send(HapticCommand::StopVibration);
        self.send(HapticCommand::Disconnect);
        let Self {
            haptic_tx, worker, ..
        } = self;
        drop(haptic_tx);
        worker.await?;

        info!(
            "Finished after {} ticks: best score {}, {} crashes",
            summary.ticks, summary.best_score, summary.crashes
        );
        Ok(summary)
    }
}
