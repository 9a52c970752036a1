use crate::{FrequencyRange, Pattern, PatternKind, SignalEngine, StepTimer, VoiceId};

/// Duration of one leg (min to max, or back).
const LEG_SECONDS: f64 = 3.0;

/// One oscillator gliding linearly min → max → min, over and over.
#[derive(Debug, Default)]
pub struct LinearSweep {
    voice: Option<VoiceId>,
    range: Option<FrequencyRange>,
    timer: StepTimer,
}

impl LinearSweep {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(&mut self, engine: &mut SignalEngine) {
        if !engine.is_playing() {
            return;
        }
        let (Some(id), Some(range)) = (self.voice, self.range) else {
            return;
        };

        let now = engine.now();
        if let Some(voice) = engine.voice_mut(id) {
            voice.frequency.set_value_at_time(range.min, now);
            voice
                .frequency
                .linear_ramp_to_value_at_time(range.max, now + LEG_SECONDS);
            voice
                .frequency
                .linear_ramp_to_value_at_time(range.min, now + 2.0 * LEG_SECONDS);
        }
        self.timer.arm(engine, 2.0 * LEG_SECONDS);
    }
}

impl Pattern for LinearSweep {
    fn kind(&self) -> PatternKind {
        PatternKind::LinearSweep
    }

    fn start(&mut self, engine: &mut SignalEngine) {
        let config = *engine.config();
        let range = config.frequency_range;
        self.range = Some(range);
        self.voice = Some(engine.create_oscillator(range.min, config.waveform, 0.0));
        self.sweep(engine);
    }

    fn step(&mut self, engine: &mut SignalEngine) {
        self.timer.fired();
        self.sweep(engine);
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
    fn sweeps_up_and_back_down() {
        let mut engine = engine();
        engine
            .start(Box::new(LinearSweep::new()), EngineConfig::default())
            .unwrap();

        let close = |a: f32, b: f32| (a - b).abs() < 5.0;
        assert!(close(engine.current_frequency(), 15_000.0));
        run(&mut engine, 1.5);
        assert!(close(engine.current_frequency(), 17_500.0));
        run(&mut engine, 3.0);
        assert!(close(engine.current_frequency(), 20_000.0));
        run(&mut engine, 4.5);
        assert!(close(engine.current_frequency(), 17_500.0));
        run(&mut engine, 7.5);
        assert!(close(engine.current_frequency(), 17_500.0));
        assert_eq!(engine.voice_count(), 1);
    }
}
