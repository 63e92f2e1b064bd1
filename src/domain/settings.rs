use crate::domain::models::ConnectorChoice;
use crate::domain::vibration::clamp_unit;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "flappy_taco".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_modifier() -> f64 {
    1.0
}
fn default_client_name() -> String {
    "Flappy Taco".to_string()
}
fn default_endpoint_name() -> String {
    "flappy_taco_haptics.sock".to_string()
}

/// Persisted user preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub connector: ConnectorChoice,
    #[serde(default = "default_true")]
    pub vibration_enabled: bool,
    #[serde(default = "default_modifier")]
    pub vibration_modifier: f64,

    // Endpoint
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_endpoint_name")]
    pub endpoint_name: String,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connector: ConnectorChoice::default(),
            vibration_enabled: default_true(),
            vibration_modifier: default_modifier(),
            client_name: default_client_name(),
            endpoint_name: default_endpoint_name(),
            log_settings: LogSettings::default(),
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::default_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    pub fn with_path(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let mut settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                debug!(
                    "Using default settings ({}): {:#}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };
        // Hand-edited files may hold anything
        settings.vibration_modifier = clamp_unit(settings.vibration_modifier);

        Self {
            settings,
            settings_path,
        }
    }

    fn default_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir().context("Could not determine config directory")?;
        path.push("FlappyTaco");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)
            .with_context(|| format!("Failed to write {}", self.settings_path.display()))?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn set_connector(&mut self, connector: ConnectorChoice) -> anyhow::Result<()> {
        self.settings.connector = connector;
        self.save()
    }

    pub fn set_vibration_enabled(&mut self, enabled: bool) -> anyhow::Result<()> {
        self.settings.vibration_enabled = enabled;
        self.save()
    }

    pub fn set_vibration_modifier(&mut self, modifier: f64) -> anyhow::Result<()> {
        let clamped = clamp_unit(modifier);
        if clamped != modifier {
            warn!("Vibration modifier {} clamped to {}", modifier, clamped);
        }
        self.settings.vibration_modifier = clamped;
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::with_path(dir.path().join("settings.json"));

        assert_eq!(service.get().connector, ConnectorChoice::External);
        assert!(service.get().vibration_enabled);
        assert_eq!(service.get().vibration_modifier, 1.0);
        assert_eq!(service.get().client_name, "Flappy Taco");
    }

    #[test]
    fn setters_write_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut service = SettingsService::with_path(&path);
        service.set_connector(ConnectorChoice::Embedded).unwrap();
        service.set_vibration_modifier(0.4).unwrap();
        service.set_vibration_enabled(false).unwrap();

        let reloaded = SettingsService::with_path(&path);
        assert_eq!(reloaded.get().connector, ConnectorChoice::Embedded);
        assert_eq!(reloaded.get().vibration_modifier, 0.4);
        assert!(!reloaded.get().vibration_enabled);
    }

    #[test]
    fn modifier_is_clamped_on_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(&path);
        service.set_vibration_modifier(3.0).unwrap();
        assert_eq!(service.get().vibration_modifier, 1.0);

        fs::write(&path, r#"{ "connector": "embedded", "vibration_modifier": -2.5 }"#).unwrap();
        let reloaded = SettingsService::with_path(&path);
        assert_eq!(reloaded.get().connector, ConnectorChoice::Embedded);
        assert_eq!(reloaded.get().vibration_modifier, 0.0);
        assert!(reloaded.get().vibration_enabled);
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::with_path(&path);
        assert_eq!(service.get().connector, ConnectorChoice::External);
    }
}
