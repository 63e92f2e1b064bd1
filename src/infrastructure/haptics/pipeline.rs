//! Vibration Command Pipeline
//!
//! Holds the user-facing vibration settings and turns them into commands for
//! the selected device. A failed send never changes the stored settings.

use crate::domain::error::PipelineError;
use crate::domain::vibration::VibrationSettings;
use crate::infrastructure::haptics::connection::{ConnectionController, DeviceCommand};
use tracing::{debug, warn};

pub struct VibrationPipeline {
    controller: ConnectionController,
    settings: VibrationSettings,
}

impl VibrationPipeline {
    pub fn new(controller: ConnectionController, settings: VibrationSettings) -> Self {
        Self {
            controller,
            settings,
        }
    }

    pub fn settings(&self) -> VibrationSettings {
        self.settings
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled()
    }

    pub fn effective_intensity(&self) -> f64 {
        self.settings.effective_intensity()
    }

    pub fn set_intensity(&mut self, value: f64) {
        self.settings.set_intensity(value);
    }

    pub fn set_modifier(&mut self, value: f64) {
        self.settings.set_modifier(value);
    }

    /// Turning off stops the selected device; turning on with `start_now`
    /// vibrates it at the current effective intensity. Either dispatch is
    /// skipped silently while disconnected.
    pub async fn set_enabled(&mut self, enabled: bool, start_now: bool) -> Result<(), PipelineError> {
        self.settings.set_enabled(enabled);

        let result = if !enabled {
            self.stop().await
        } else if start_now {
            self.vibrate(None).await
        } else {
            Ok(())
        };

        match result {
            Err(PipelineError::NotConnected) => {
                debug!("Vibration toggled while disconnected");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn vibrate(&mut self, value: Option<f64>) -> Result<(), PipelineError> {
        if let Some(value) = value {
            self.set_intensity(value);
        }
        if !self.controller.is_connected() {
            return Err(PipelineError::NotConnected);
        }

        let command = if self.settings.enabled() {
            DeviceCommand::Vibrate(self.settings.effective_intensity())
        } else {
            warn!("Vibrate requested while vibration is disabled, stopping instead");
            DeviceCommand::Stop
        };
        self.controller.dispatch(command).await
    }

    pub async fn stop(&self) -> Result<(), PipelineError> {
        self.controller.dispatch(DeviceCommand::Stop).await
    }
}
