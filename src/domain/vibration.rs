/// Clamp a raw value into the unit interval. NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// User-facing vibration state. Values are clamped on every write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibrationSettings {
    enabled: bool,
    intensity: f64,
    modifier: f64,
}

impl Default for VibrationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            intensity: 0.0,
            modifier: 1.0,
        }
    }
}

impl VibrationSettings {
    pub fn new(enabled: bool, modifier: f64) -> Self {
        let mut settings = Self::default();
        settings.set_enabled(enabled);
        settings.set_modifier(modifier);
        settings
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn modifier(&self) -> f64 {
        self.modifier
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_intensity(&mut self, value: f64) {
        self.intensity = clamp_unit(value);
    }

    pub fn set_modifier(&mut self, value: f64) {
        self.modifier = clamp_unit(value);
    }

    /// Value actually dispatched to a device
    pub fn effective_intensity(&self) -> f64 {
        self.intensity * self.modifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_clamped() {
        let mut settings = VibrationSettings::default();

        settings.set_intensity(1.5);
        assert_eq!(settings.intensity(), 1.0);
        settings.set_intensity(-0.25);
        assert_eq!(settings.intensity(), 0.0);
        settings.set_intensity(0.3);
        assert_eq!(settings.intensity(), 0.3);

        settings.set_modifier(7.0);
        assert_eq!(settings.modifier(), 1.0);
        settings.set_modifier(-1.0);
        assert_eq!(settings.modifier(), 0.0);
        settings.set_modifier(f64::NAN);
        assert_eq!(settings.modifier(), 0.0);
    }

    #[test]
    fn effective_intensity_is_product() {
        let mut settings = VibrationSettings::default();
        for &(intensity, modifier) in &[(0.5, 0.5), (1.0, 0.2), (2.0, 3.0), (-1.0, 0.7)] {
            settings.set_intensity(intensity);
            settings.set_modifier(modifier);
            let effective = settings.effective_intensity();
            assert_eq!(effective, settings.intensity() * settings.modifier());
            assert!((0.0..=1.0).contains(&effective));
        }
    }

    #[test]
    fn constructor_clamps_modifier() {
        let settings = VibrationSettings::new(false, 1.8);
        assert!(!settings.enabled());
        assert_eq!(settings.modifier(), 1.0);
        assert_eq!(settings.intensity(), 0.0);
    }
}
