use crate::{Pattern, PatternKind, SignalEngine, StepTimer, VoiceId};

const MIN_BURST: f64 = 0.1;
const MAX_BURST: f64 = 0.5;
const MIN_REST: f64 = 0.05;
const MAX_REST: f64 = 0.3;
const FADE_IN: f64 = 0.01;
const FADE_OUT: f64 = 0.02;
/// The oscillator keeps running this long after its envelope closed.
const STOP_MARGIN: f64 = 0.05;

/// Short bursts at random frequencies, each on a fresh oscillator, separated
/// by random rests.
#[derive(Debug, Default)]
pub struct PulseBurst {
    voice: Option<VoiceId>,
    timer: StepTimer,
}

impl PulseBurst {
    pub fn new() -> Self {
        Self::default()
    }

    fn pulse(&mut self, engine: &mut SignalEngine) {
        if !engine.is_playing() {
            return;
        }

        let frequency = engine.random_frequency();
        let waveform = engine.config().waveform;
        let burst = engine.random_between(MIN_BURST, MAX_BURST);
        let rest = engine.random_between(MIN_REST, MAX_REST);
        let id = engine.create_oscillator(frequency, waveform, 0.0);

        let now = engine.now();
        if let Some(voice) = engine.voice_mut(id) {
            voice.gain.set_value_at_time(0.0, now);
            voice.gain.linear_ramp_to_value_at_time(1.0, now + FADE_IN);
            voice.gain.set_value_at_time(1.0, now + burst - FADE_OUT);
            voice.gain.linear_ramp_to_value_at_time(0.0, now + burst);
            voice.stop_at(now + burst + STOP_MARGIN);
        }

        self.voice = Some(id);
        self.timer.arm(engine, burst + rest);
    }
}

impl Pattern for PulseBurst {
    fn kind(&self) -> PatternKind {
        PatternKind::PulseBurst
    }

    fn start(&mut self, engine: &mut SignalEngine) {
        self.pulse(engine);
    }

    fn step(&mut self, engine: &mut SignalEngine) {
        self.timer.fired();
        if !engine.is_playing() {
            return;
        }
        if let Some(spent) = self.voice.take() {
            engine.release_voice(spent);
        }
        self.pulse(engine);
    }

    fn stop(&mut self, engine: &mut SignalEngine) {
        self.timer.cancel(engine);
        self.voice = None;
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
    fn each_burst_gets_a_fresh_voice() {
        let mut engine = engine();
        engine
            .start(Box::new(PulseBurst::new()), EngineConfig::default())
            .unwrap();

        let first = engine.voices()[0].id();
        let deadline = engine.next_deadline().unwrap();
        assert!((MIN_BURST + MIN_REST..=MAX_BURST + MAX_REST).contains(&deadline));

        run(&mut engine, deadline);
        assert_eq!(engine.voice_count(), 1);
        assert_ne!(engine.voices()[0].id(), first);
        assert!(engine.voice(first).is_none());
    }

    #[test]
    fn envelope_opens_and_closes() {
        let mut engine = engine();
        engine
            .start(Box::new(PulseBurst::new()), EngineConfig::default())
            .unwrap();
        let voice = &engine.voices()[0];

        assert_eq!(voice.gain.value_at(0.0), 0.0);
        assert!((voice.gain.value_at(0.05) - 1.0).abs() < 1e-6);
        assert_eq!(voice.gain.value_at(MAX_BURST + 0.01), 0.0);
        assert!(voice.is_finished(MAX_BURST + STOP_MARGIN));
    }
}
