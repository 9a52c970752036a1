//! Core library for the ultrasonic rodent repeller.
//!
//! Each module owns one subsystem: the virtual-time scheduler, the signal
//! engine and its voices, the six emission patterns, the analysis tap, the
//! automation schedules and the [`Repeller`] controller tying them together.
//! Nothing here talks to real audio hardware; outputs are injected through
//! [`OutputFactory`].

pub mod analysis;
pub mod audio;
pub mod automation;
pub mod config;
pub mod controller;
pub mod error;
pub mod patterns;
pub mod timeline;

pub use analysis::AnalysisTap;
pub use audio::{
    null_output, unavailable_output, AudioOutput, AudioParam, CaptureBuffer, CaptureOutput,
    NullOutput, OutputFactory, Route, SignalEngine, Voice, VoiceId,
};
pub use automation::{
    AutoRotateConfig, AutomationMode, DayNightConfig, DayPhase, ManualClock, SimulatedClock,
    SmartConfig, SystemClock, TimeOfDay, TimeWindow, WallClock,
};
pub use config::{
    AudioConfig, AutomationKind, AutomationSettings, EngineConfig, FrequencyRange, Settings,
    Waveform,
};
pub use controller::{PreSmartSettings, Repeller};
pub use error::{RepellerError, Result};
pub use patterns::{
    FmChaos, HarmonicStack, LinearSweep, Pattern, PatternKind, PredatorMimicry, PulseBurst,
    RandomJump, StepTimer,
};
pub use timeline::{PlaybackClock, ScheduledEvent, TimerId, TimerQueue};
