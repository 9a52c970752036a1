use crate::{
    FrequencyRange, Pattern, PatternKind, SignalEngine, StepTimer, VoiceId, Waveform,
};

const WAVEFORMS: [Waveform; 5] = [
    Waveform::Sine,
    Waveform::Square,
    Waveform::Sawtooth,
    Waveform::Triangle,
    Waveform::Sine,
];
const DRIFT_EVERY: f64 = 3.0;
const MAX_DRIFT_HZ: f64 = 250.0;
const DRIFT_GLIDE: f64 = 1.0;

/// Five simultaneous tones spread evenly over the range. Each one drifts
/// around its home frequency, never leaving the range.
#[derive(Debug, Default)]
pub struct HarmonicStack {
    voices: Vec<(VoiceId, f32)>,
    range: Option<FrequencyRange>,
    timer: StepTimer,
}

impl HarmonicStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evenly spaced home frequencies, both bounds included.
    fn home_frequencies(range: FrequencyRange) -> impl Iterator<Item = f32> {
        let spacing = range.span() / (WAVEFORMS.len() - 1) as f32;
        (0..WAVEFORMS.len()).map(move |index| range.min + spacing * index as f32)
    }
}

impl Pattern for HarmonicStack {
    fn kind(&self) -> PatternKind {
        PatternKind::HarmonicStack
    }

    fn start(&mut self, engine: &mut SignalEngine) {
        let range = engine.config().frequency_range;
        let level = 1.0 / WAVEFORMS.len() as f32;
        let now = engine.now();

        self.range = Some(range);
        self.voices.clear();
        for (home, waveform) in Self::home_frequencies(range).zip(WAVEFORMS) {
            let id = engine.create_oscillator(home, waveform, 0.0);
            if let Some(voice) = engine.voice_mut(id) {
                voice.gain.set_value_at_time(level, now);
            }
            self.voices.push((id, home));
        }
        self.timer.arm(engine, DRIFT_EVERY);
    }

    fn step(&mut self, engine: &mut SignalEngine) {
        self.timer.fired();
        if !engine.is_playing() {
            return;
        }
        let Some(range) = self.range else {
            return;
        };

        let now = engine.now();
        for (id, home) in &self.voices {
            let drift = engine.random_between(-MAX_DRIFT_HZ, MAX_DRIFT_HZ) as f32;
            let target = range.clamp(home + drift);
            if let Some(voice) = engine.voice_mut(*id) {
                voice.frequency.linear_ramp_from(now, target, DRIFT_GLIDE);
            }
        }
        self.timer.arm(engine, DRIFT_EVERY);
    }

    fn stop(&mut self, engine: &mut SignalEngine) {
        self.timer.cancel(engine);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        patterns::tests::{engine, run},
        EngineConfig,
    };

    #[test]
    fn spreads_five_voices_across_the_range() {
        let mut engine = engine();
        engine
            .start(Box::new(HarmonicStack::new()), EngineConfig::default())
            .unwrap();

        let homes: Vec<f32> = engine.voices().iter().map(|v| v.frequency_at(0.0)).collect();
        assert_eq!(homes, vec![15_000.0, 16_250.0, 17_500.0, 18_750.0, 20_000.0]);
        let shapes: Vec<Waveform> = engine.voices().iter().map(|v| v.waveform()).collect();
        assert_eq!(shapes, WAVEFORMS.to_vec());
        assert!(engine
            .voices()
            .iter()
            .all(|v| (v.gain.value_at(0.0) - 0.2).abs() < 1e-6));
    }

    #[test]
    fn drift_is_bounded_and_clamped() {
        let mut engine = engine();
        engine
            .start(Box::new(HarmonicStack::new()), EngineConfig::default())
            .unwrap();
        let range = engine.config().frequency_range;
        let homes: Vec<f32> = HarmonicStack::home_frequencies(range).collect();

        for tick in 1..=12 {
            run(&mut engine, tick as f64 * DRIFT_EVERY + DRIFT_GLIDE + 0.01);
            let now = engine.now();
            for (voice, home) in engine.voices().iter().zip(&homes) {
                let frequency = voice.frequency_at(now);
                assert!(range.contains(frequency));
                assert!((frequency - home).abs() <= MAX_DRIFT_HZ as f32 + 1.0);
            }
        }
    }
}
