use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    automation::{AutoRotateConfig, AutomationMode, DayNightConfig, SmartConfig},
    RepellerError, Result,
};

/// Lowest frequency a range may start at.
pub const MIN_FREQUENCY_HZ: f32 = 1_000.0;
/// Highest frequency a range may reach.
pub const MAX_FREQUENCY_HZ: f32 = 24_000.0;
/// Gap enforced between the bounds when a caller pushes them together.
const MIN_RANGE_GAP_HZ: f32 = 100.0;

/// Configuration specific to the audio output graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Window length of the analysis tap. Half of it is exposed as bins.
    pub fft_size: usize,
    /// Time smoothing applied to the magnitude spectrum, in [0, 1).
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Fade applied to voices before they are released.
    pub release_guard: f64,
    /// Ramp used when the master volume changes.
    pub volume_ramp: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            fft_size: 2048,
            smoothing: 0.85,
            min_decibels: -100.0,
            max_decibels: -30.0,
            release_guard: 0.05,
            volume_ramp: 0.1,
        }
    }
}

/// Oscillator shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Sawtooth,
        Waveform::Triangle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Triangle => "triangle",
        }
    }

    /// Evaluates the waveform for a phase expressed in cycles, [0, 1).
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (std::f32::consts::TAU * phase).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform::Sine
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Waveform {
    type Err = RepellerError;

    fn from_str(s: &str) -> Result<Self> {
        Waveform::ALL
            .into_iter()
            .find(|waveform| waveform.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RepellerError::invalid(format!("unknown waveform `{s}`")))
    }
}

/// Band of frequencies the patterns draw from, in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRange {
    pub min: f32,
    pub max: f32,
}

impl FrequencyRange {
    /// Builds a range from untrusted bounds. Both ends are clamped into the
    /// supported band, and a collapsed or inverted range keeps `max` and pulls
    /// `min` below it.
    pub fn new(min: f32, max: f32) -> Self {
        let max = max.clamp(MIN_FREQUENCY_HZ + MIN_RANGE_GAP_HZ, MAX_FREQUENCY_HZ);
        let mut min = min.clamp(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ);
        if min >= max {
            min = max - MIN_RANGE_GAP_HZ;
        }
        Self { min, max }
    }

    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    pub fn center(&self) -> f32 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, frequency: f32) -> bool {
        frequency >= self.min && frequency <= self.max
    }

    pub fn clamp(&self, frequency: f32) -> f32 {
        frequency.clamp(self.min, self.max)
    }
}

impl Default for FrequencyRange {
    fn default() -> Self {
        Self {
            min: 15_000.0,
            max: 20_000.0,
        }
    }
}

/// User-facing sound settings read by the engine and the patterns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Master volume in percent, [0, 100].
    pub volume: f32,
    pub frequency_range: FrequencyRange,
    pub waveform: Waveform,
}

impl EngineConfig {
    /// Settings applied when the smart schedule takes over.
    pub fn optimal() -> Self {
        Self {
            volume: 100.0,
            frequency_range: FrequencyRange {
                min: 15_000.0,
                max: 20_000.0,
            },
            waveform: Waveform::Square,
        }
    }

    /// Returns a copy that satisfies the engine's input assumptions.
    pub fn sanitized(self) -> Self {
        Self {
            volume: clamp_volume(self.volume),
            frequency_range: FrequencyRange::new(
                self.frequency_range.min,
                self.frequency_range.max,
            ),
            waveform: self.waveform,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            volume: 80.0,
            frequency_range: FrequencyRange::default(),
            waveform: Waveform::Sine,
        }
    }
}

pub(crate) fn clamp_volume(percent: f32) -> f32 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// Automation preferences. Every mode keeps its own configuration so that
/// switching back and forth does not lose what the user entered; `enabled`
/// names the single mode that is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    pub enabled: AutomationKind,
    pub auto_rotate: AutoRotateConfig,
    pub day_night: DayNightConfig,
    pub smart: SmartConfig,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            enabled: AutomationKind::None,
            auto_rotate: AutoRotateConfig::default(),
            day_night: DayNightConfig::default(),
            smart: SmartConfig::default(),
        }
    }
}

impl AutomationSettings {
    /// Builds the tagged mode for the currently enabled automation.
    pub fn mode(&self) -> AutomationMode {
        match self.enabled {
            AutomationKind::None => AutomationMode::None,
            AutomationKind::AutoRotate => AutomationMode::AutoRotate(self.auto_rotate.clone()),
            AutomationKind::DayNight => AutomationMode::DayNight(self.day_night.clone()),
            AutomationKind::Smart => AutomationMode::Smart(self.smart.clone()),
        }
    }

    /// Records `mode` as enabled, keeping its configuration for later sessions.
    pub fn record(&mut self, mode: &AutomationMode) {
        self.enabled = mode.kind();
        match mode {
            AutomationMode::None => {}
            AutomationMode::AutoRotate(config) => self.auto_rotate = config.clone(),
            AutomationMode::DayNight(config) => self.day_night = config.clone(),
            AutomationMode::Smart(config) => self.smart = config.clone(),
        }
    }
}

/// Discriminant of [`AutomationMode`] used for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutomationKind {
    #[default]
    None,
    AutoRotate,
    DayNight,
    Smart,
}

/// Persisted application state. The core never touches storage itself; it
/// only converts to and from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub pattern_index: usize,
    /// Automatic power-off after this many minutes. Zero means unlimited.
    pub timer_minutes: u32,
    /// When off, powering on applies the optimal settings and enables the
    /// smart schedule.
    pub advanced_mode: bool,
    pub automation: AutomationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            pattern_index: 0,
            timer_minutes: 0,
            advanced_mode: false,
            automation: AutomationSettings::default(),
        }
    }
}

impl Settings {
    /// Parses persisted settings. Missing keys fall back to their defaults and
    /// out-of-range values are clamped.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        Ok(settings.sanitized())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn sanitized(mut self) -> Self {
        self.engine = self.engine.sanitized();
        self.pattern_index = self.pattern_index.min(crate::PatternKind::ALL.len() - 1);
        self.automation.auto_rotate.hours = self.automation.auto_rotate.hours.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapsed_range_is_pulled_apart() {
        let range = FrequencyRange::new(20_000.0, 18_000.0);
        assert_eq!(range.max, 18_000.0);
        assert_eq!(range.min, 17_900.0);

        let range = FrequencyRange::new(500.0, 30_000.0);
        assert_eq!(range.min, MIN_FREQUENCY_HZ);
        assert_eq!(range.max, MAX_FREQUENCY_HZ);
    }

    #[test]
    fn sanitizes_volume() {
        let config = EngineConfig {
            volume: 140.0,
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(config.volume, 100.0);
        assert_eq!(clamp_volume(-3.0), 0.0);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
    }

    #[test]
    fn waveform_parses_case_insensitively() {
        assert_eq!("Square".parse::<Waveform>().unwrap(), Waveform::Square);
        assert!("noise".parse::<Waveform>().is_err());
        assert_eq!(Waveform::Triangle.sample(0.5), 1.0);
        assert_eq!(Waveform::Sawtooth.sample(0.0), -1.0);
    }

    #[test]
    fn partial_settings_fall_back_to_defaults() {
        let settings = Settings::from_json(
            r#"{ "engine": { "volume": 55, "frequency_range": { "min": 16000, "max": 19000 }, "waveform": "triangle" },
                 "automation": { "enabled": "day-night" } }"#,
        )
        .unwrap();

        assert_eq!(settings.engine.volume, 55.0);
        assert_eq!(settings.engine.waveform, Waveform::Triangle);
        assert_eq!(settings.pattern_index, 0);
        assert_eq!(settings.automation.enabled, AutomationKind::DayNight);
        assert_eq!(
            settings.automation.day_night.night_pattern,
            crate::PatternKind::FmChaos
        );
        assert!(matches!(settings.automation.mode(), AutomationMode::DayNight(_)));
    }

    #[test]
    fn settings_survive_json() {
        let mut settings = Settings::default();
        settings.pattern_index = 4;
        settings.timer_minutes = 30;
        settings.automation.enabled = AutomationKind::Smart;

        let json = settings.to_json().unwrap();
        assert_eq!(Settings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn out_of_range_indices_are_clamped() {
        let settings = Settings::from_json(r#"{ "pattern_index": 42 }"#).unwrap();
        assert_eq!(settings.pattern_index, 5);
    }
}
