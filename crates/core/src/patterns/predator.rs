use crate::{Pattern, PatternKind, Route, SignalEngine, StepTimer, Waveform};

/// Near-ultrasonic call frequencies, cycled in order.
const CALLS_HZ: [f32; 6] = [18_000.0, 19_000.0, 19_500.0, 20_000.0, 19_000.0, 18_500.0];
const MIN_TREMOLO_HZ: f64 = 30.0;
const MAX_TREMOLO_HZ: f64 = 50.0;
const TREMOLO_DEPTH: f32 = 0.3;
const PEAK_GAIN: f32 = 0.8;
const ATTACK: f64 = 0.05;
const RELEASE: f64 = 0.1;
const MIN_CALL: f64 = 0.5;
const MAX_CALL: f64 = 2.0;
const MIN_REST: f64 = 0.2;
const MAX_REST: f64 = 1.0;

/// Tremolo chirps modelled on distress calls: a sine at the next call
/// frequency, amplitude-modulated at 30-50 Hz, with random length and rest.
#[derive(Debug, Default)]
pub struct PredatorMimicry {
    call: usize,
    timer: StepTimer,
}

impl PredatorMimicry {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, engine: &mut SignalEngine) {
        if !engine.is_playing() {
            return;
        }
        engine.release_all_voices();

        let frequency = CALLS_HZ[self.call % CALLS_HZ.len()];
        let duration = engine.random_between(MIN_CALL, MAX_CALL);
        let rest = engine.random_between(MIN_REST, MAX_REST);
        let tremolo_rate = engine.random_between(MIN_TREMOLO_HZ, MAX_TREMOLO_HZ) as f32;
        let now = engine.now();

        let voice = engine.create_oscillator(frequency, Waveform::Sine, 0.0);
        let tremolo = engine.create_modulator(tremolo_rate, Waveform::Sine, Route::Gain(voice));
        if let Some(tremolo) = engine.voice_mut(tremolo) {
            tremolo.gain.set_value_at_time(TREMOLO_DEPTH, now);
        }
        if let Some(voice) = engine.voice_mut(voice) {
            voice.gain.set_value_at_time(0.0, now);
            voice.gain.linear_ramp_to_value_at_time(PEAK_GAIN, now + ATTACK);
            voice.gain.set_value_at_time(PEAK_GAIN, now + duration - RELEASE);
            voice.gain.linear_ramp_to_value_at_time(0.0, now + duration);
        }

        self.call += 1;
        self.timer.arm(engine, duration + rest);
    }
}

impl Pattern for PredatorMimicry {
    fn kind(&self) -> PatternKind {
        PatternKind::PredatorMimicry
    }

    fn start(&mut self, engine: &mut SignalEngine) {
        self.call = 0;
        self.emit(engine);
    }

    fn step(&mut self, engine: &mut SignalEngine) {
        self.timer.fired();
        self.emit(engine);
    }

    fn stop(&mut self, engine: &mut SignalEngine) {
        self.timer.cancel(engine);
    }
}
