use crate::{Pattern, PatternKind, Route, SignalEngine, StepTimer, VoiceId, Waveform};

const CHECK_SECONDS: f64 = 2.0;
const INITIAL_RATE_HZ: f32 = 2.0;
const MIN_RATE_HZ: f64 = 0.5;
const MAX_RATE_HZ: f64 = 8.5;
/// Modulation depth as a share of the frequency span.
const MIN_DEPTH: f64 = 0.3;
const MAX_DEPTH: f64 = 1.0;
const GLIDE_SECONDS: f64 = 0.5;

/// A carrier at the centre of the range, frequency-modulated by a sine LFO
/// whose rate and depth wander every couple of seconds.
#[derive(Debug, Default)]
pub struct FmChaos {
    carrier: Option<VoiceId>,
    modulator: Option<VoiceId>,
    span: f32,
    timer: StepTimer,
}

impl FmChaos {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pattern for FmChaos {
    fn kind(&self) -> PatternKind {
        PatternKind::FmChaos
    }

    fn start(&mut self, engine: &mut SignalEngine) {
        let config = *engine.config();
        let range = config.frequency_range;
        self.span = range.span();

        let carrier = engine.create_oscillator(range.center(), config.waveform, 0.0);
        let modulator =
            engine.create_modulator(INITIAL_RATE_HZ, Waveform::Sine, Route::Frequency(carrier));
        let now = engine.now();
        if let Some(voice) = engine.voice_mut(modulator) {
            voice.gain.set_value_at_time(self.span / 2.0, now);
        }

        self.carrier = Some(carrier);
        self.modulator = Some(modulator);
        self.timer.arm(engine, CHECK_SECONDS);
    }

    fn step(&mut self, engine: &mut SignalEngine) {
        self.timer.fired();
        if !engine.is_playing() {
            return;
        }
        let Some(modulator) = self.modulator else {
            return;
        };

        let rate = engine.random_between(MIN_RATE_HZ, MAX_RATE_HZ) as f32;
        let depth = self.span * engine.random_between(MIN_DEPTH, MAX_DEPTH) as f32;
        let now = engine.now();
        if let Some(voice) = engine.voice_mut(modulator) {
            voice.frequency.linear_ramp_from(now, rate, GLIDE_SECONDS);
            voice.gain.linear_ramp_from(now, depth, GLIDE_SECONDS);
        }
        self.timer.arm(engine, CHECK_SECONDS);
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
    fn carrier_is_modulated_by_lfo() {
        let mut engine = engine();
        engine
            .start(Box::new(FmChaos::new()), EngineConfig::default())
            .unwrap();

        assert_eq!(engine.voice_count(), 2);
        assert_eq!(engine.current_frequency(), 17_500.0);
        let carrier = engine.voices()[0].id();
        let lfo = &engine.voices()[1];
        assert_eq!(lfo.route(), Route::Frequency(carrier));
        assert_eq!(lfo.gain.value_at(0.0), 2_500.0);
    }

    #[test]
    fn rate_and_depth_wander_within_bounds() {
        let mut engine = engine();
        engine
            .start(Box::new(FmChaos::new()), EngineConfig::default())
            .unwrap();

        for check in 1..=10 {
            let settled = check as f64 * CHECK_SECONDS + GLIDE_SECONDS + 0.01;
            run(&mut engine, settled);
            let lfo = &engine.voices()[1];
            let rate = lfo.frequency_at(engine.now());
            let depth = lfo.gain.value_at(engine.now());
            assert!((0.5..=8.5).contains(&rate));
            assert!((1_500.0..=5_000.0).contains(&depth));
        }
    }
}
