use std::fmt;

use crate::{audio::AudioParam, Waveform};

/// Handle to a voice owned by the [`SignalEngine`](crate::SignalEngine).
/// Handles outlive their voice safely: once the engine released it, lookups
/// through the handle simply come back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub(crate) u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice#{}", self.0)
    }
}

/// Where a voice's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Audible output through the master gain.
    Master,
    /// Added to another voice's frequency (FM).
    Frequency(VoiceId),
    /// Added to another voice's gain (tremolo).
    Gain(VoiceId),
}

/// An oscillator and the gain stage directly behind it.
#[derive(Debug, Clone)]
pub struct Voice {
    id: VoiceId,
    waveform: Waveform,
    route: Route,
    pub frequency: AudioParam,
    /// Detune in cents.
    pub detune: AudioParam,
    pub gain: AudioParam,
    phase: f32,
    start_time: f64,
    stop_time: Option<f64>,
}

impl Voice {
    pub(crate) fn new(
        id: VoiceId,
        frequency: f32,
        waveform: Waveform,
        detune_cents: f32,
        route: Route,
        now: f64,
    ) -> Self {
        Self {
            id,
            waveform,
            route,
            frequency: AudioParam::new(frequency, now),
            detune: AudioParam::new(detune_cents, now),
            gain: AudioParam::new(1.0, now),
            phase: 0.0,
            start_time: now,
            stop_time: None,
        }
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn route(&self) -> Route {
        self.route
    }

    /// Schedules the oscillator to fall silent at `time`. An earlier stop
    /// that is already scheduled wins; stopping twice is not an error.
    pub fn stop_at(&mut self, time: f64) {
        self.stop_time = Some(match self.stop_time {
            Some(existing) => existing.min(time),
            None => time,
        });
    }

    pub fn is_finished(&self, time: f64) -> bool {
        self.stop_time.map_or(false, |stop| time >= stop)
    }

    /// Fades the gain to zero over `guard` seconds and stops right after.
    pub(crate) fn fade_out(&mut self, now: f64, guard: f64) {
        if self.is_finished(now) {
            return;
        }
        self.gain.linear_ramp_from(now, 0.0, guard);
        self.stop_at(now + guard);
    }

    /// Frequency the oscillator is tuned to at `time`, ignoring modulation.
    pub fn frequency_at(&self, time: f64) -> f32 {
        self.frequency.value_at(time)
    }

    pub(crate) fn render(
        &mut self,
        time: f64,
        dt: f32,
        nyquist: f32,
        frequency_mod: f32,
        gain_mod: f32,
    ) -> f32 {
        if time < self.start_time || self.is_finished(time) {
            return 0.0;
        }

        let cents = self.detune.value_at(time);
        let frequency = (self.frequency.value_at(time) + frequency_mod)
            * (cents / 1200.0).exp2();
        let sample = self.waveform.sample(self.phase);

        self.phase = (self.phase + frequency.clamp(0.0, nyquist) * dt).fract();
        sample * (self.gain.value_at(time) + gain_mod)
    }

    pub(crate) fn prune_before(&mut self, time: f64) {
        self.frequency.prune_before(time);
        self.detune.prune_before(time);
        self.gain.prune_before(time);
    }
}

/// Scratch buffer of modulation signals produced within one frame.
#[derive(Debug, Default)]
pub(crate) struct ModulationBus {
    signals: Vec<(Route, f32)>,
}

impl ModulationBus {
    fn sum(&self, route: Route) -> f32 {
        self.signals
            .iter()
            .filter(|(target, _)| *target == route)
            .map(|(_, value)| value)
            .sum()
    }
}

/// Renders one frame of every voice. Modulators run first so the voices they
/// feed see this frame's modulation.
pub(crate) fn render_frame(
    voices: &mut [Voice],
    releasing: &mut [Voice],
    bus: &mut ModulationBus,
    time: f64,
    dt: f32,
    nyquist: f32,
) -> f32 {
    bus.signals.clear();
    for voice in voices.iter_mut().chain(releasing.iter_mut()) {
        if voice.route != Route::Master {
            let value = voice.render(time, dt, nyquist, 0.0, 0.0);
            bus.signals.push((voice.route, value));
        }
    }

    let mut mix = 0.0;
    for voice in voices.iter_mut().chain(releasing.iter_mut()) {
        if voice.route == Route::Master {
            let frequency_mod = bus.sum(Route::Frequency(voice.id));
            let gain_mod = bus.sum(Route::Gain(voice.id));
            mix += voice.render(time, dt, nyquist, frequency_mod, gain_mod);
        }
    }
    mix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_voice_is_silent() {
        let mut voice = Voice::new(VoiceId(0), 1_000.0, Waveform::Square, 0.0, Route::Master, 0.0);
        assert_eq!(voice.render(0.0, 1.0 / 48_000.0, 24_000.0, 0.0, 0.0), 1.0);

        voice.stop_at(0.5);
        voice.stop_at(0.7);
        assert!(voice.is_finished(0.5));
        assert_eq!(voice.render(0.6, 1.0 / 48_000.0, 24_000.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn tremolo_modulates_gain() {
        let carrier = Voice::new(VoiceId(0), 1_000.0, Waveform::Square, 0.0, Route::Master, 0.0);
        let mut tremolo =
            Voice::new(VoiceId(1), 0.0, Waveform::Square, 0.0, Route::Gain(VoiceId(0)), 0.0);
        tremolo.gain.set_value_at_time(0.5, 0.0);

        let mut voices = vec![carrier, tremolo];
        let mut bus = ModulationBus::default();
        let frame = render_frame(&mut voices, &mut Vec::new(), &mut bus, 0.0, 1.0 / 48_000.0, 24_000.0);
        assert!((frame - 1.5).abs() < 1e-6);
    }

    #[test]
    fn fade_out_reaches_silence() {
        let mut voice = Voice::new(VoiceId(3), 440.0, Waveform::Sine, 0.0, Route::Master, 0.0);
        voice.fade_out(1.0, 0.05);
        assert!((voice.gain.value_at(1.025) - 0.5).abs() < 1e-3);
        assert!(voice.is_finished(1.05));
    }
}
