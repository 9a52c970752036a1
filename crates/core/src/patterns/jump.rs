use crate::{Pattern, PatternKind, SignalEngine, StepTimer, VoiceId};

const MIN_INTERVAL: f64 = 0.15;
const MAX_INTERVAL: f64 = 0.5;
const GLIDE_SECONDS: f64 = 0.05;

/// One oscillator hopping to a new random frequency at random intervals.
#[derive(Debug, Default)]
pub struct RandomJump {
    voice: Option<VoiceId>,
    timer: StepTimer,
}

impl RandomJump {
    pub fn new() -> Self {
        Self::default()
    }

    fn schedule_next(&mut self, engine: &mut SignalEngine) {
        let interval = engine.random_between(MIN_INTERVAL, MAX_INTERVAL);
        self.timer.arm(engine, interval);
    }
}

impl Pattern for RandomJump {
    fn kind(&self) -> PatternKind {
        PatternKind::RandomJump
    }

    fn start(&mut self, engine: &mut SignalEngine) {
        let frequency = engine.random_frequency();
        let waveform = engine.config().waveform;
        self.voice = Some(engine.create_oscillator(frequency, waveform, 0.0));
        self.schedule_next(engine);
    }

    fn step(&mut self, engine: &mut SignalEngine) {
        self.timer.fired();
        if !engine.is_playing() {
            return;
        }
        let Some(id) = self.voice else {
            return;
        };

        let target = engine.random_frequency();
        let now = engine.now();
        if let Some(voice) = engine.voice_mut(id) {
            voice.frequency.exponential_ramp_from(now, target, GLIDE_SECONDS);
        }
        self.schedule_next(engine);
    }

    fn stop(&mut self, engine: &mut SignalEngine) {
        self.timer.cancel(engine);
    }
}
