//! The signal engine: output graph, voices, master gain and analysis tap.
//!
//! The engine is driven cooperatively. Its owner alternates between
//! [`SignalEngine::render_until`], which produces audio up to a point in time,
//! and [`SignalEngine::fire_due_timers`], which runs the pattern steps that
//! became due. Nothing here blocks or spawns threads.

use std::fmt;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    AnalysisTap, AudioConfig, EngineConfig, FrequencyRange, Pattern, PatternKind, PlaybackClock,
    Result, TimerId, TimerQueue, Waveform,
};

pub mod output;
mod param;
mod voice;

pub use output::{
    null_output, unavailable_output, AudioOutput, CaptureBuffer, CaptureOutput, NullOutput,
    OutputFactory,
};
pub use param::AudioParam;
pub use voice::{Route, Voice, VoiceId};

use voice::{render_frame, ModulationBus};

const RENDER_BLOCK: u64 = 512;

/// Step of the pattern that was active when it got scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PatternTick {
    generation: u64,
}

struct OutputGraph {
    output: Box<dyn AudioOutput>,
    master: AudioParam,
    tap: AnalysisTap,
}

/// Owns every oscillator, the master gain and the lifecycle of the active
/// pattern.
///
/// Invariants: while stopped the voice set is empty and no pattern step is
/// pending; at most one pattern is active, and starting a pattern always
/// tears the previous one down first.
pub struct SignalEngine {
    audio: AudioConfig,
    config: EngineConfig,
    factory: OutputFactory,
    graph: Option<OutputGraph>,
    voices: Vec<Voice>,
    /// Voices fading out after release. They still sound for the guard
    /// interval but no longer belong to the active set.
    releasing: Vec<Voice>,
    next_voice: u64,
    bus: ModulationBus,
    clock: PlaybackClock,
    timers: TimerQueue<PatternTick>,
    pattern: Option<Box<dyn Pattern>>,
    generation: Option<u64>,
    next_generation: u64,
    playing: bool,
    rng: StdRng,
    block: Vec<f32>,
}

impl SignalEngine {
    /// Creates a stopped engine. The output is opened on the first `start`.
    pub fn new(audio: AudioConfig, factory: OutputFactory) -> Self {
        Self::with_rng(audio, factory, StdRng::from_entropy())
    }

    /// Engine whose random choices are reproducible.
    pub fn with_seed(audio: AudioConfig, factory: OutputFactory, seed: u64) -> Self {
        Self::with_rng(audio, factory, StdRng::seed_from_u64(seed))
    }

    fn with_rng(audio: AudioConfig, factory: OutputFactory, rng: StdRng) -> Self {
        let clock = PlaybackClock::new(audio.sample_rate);
        Self {
            audio,
            config: EngineConfig::default(),
            factory,
            graph: None,
            voices: Vec::new(),
            releasing: Vec::new(),
            next_voice: 0,
            bus: ModulationBus::default(),
            clock,
            timers: TimerQueue::new(),
            pattern: None,
            generation: None,
            next_generation: 0,
            playing: false,
            rng,
            block: Vec::with_capacity(RENDER_BLOCK as usize),
        }
    }

    /// Output graph configuration the engine was built with.
    pub fn audio_config(&self) -> &AudioConfig {
        &self.audio
    }

    /// Sound settings used by the active pattern.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Seconds of audio rendered so far.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Liveness flag every pattern step checks before acting.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether the output graph has been created.
    pub fn has_output(&self) -> bool {
        self.graph.is_some()
    }

    /// Kind of the running pattern, if any.
    pub fn active_pattern(&self) -> Option<PatternKind> {
        self.pattern.as_ref().map(|pattern| pattern.kind())
    }

    /// Number of voices in the active set, modulators included.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Active voices in creation order.
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Pattern steps waiting in the timer queue.
    pub fn pending_steps(&self) -> usize {
        self.timers.len()
    }

    /// Starts `pattern` with `config`, replacing whatever was playing.
    ///
    /// The output graph is created on first use. If that fails the engine
    /// stays stopped and the call can simply be retried later.
    pub fn start(&mut self, pattern: Box<dyn Pattern>, config: EngineConfig) -> Result<()> {
        let kind = pattern.kind();
        if let Err(err) = self.open_output() {
            tracing::warn!(%err, pattern = kind.id(), "engine stays stopped");
            return Err(err);
        }

        self.stop();
        self.config = config;

        let now = self.now();
        let ramp = self.audio.volume_ramp;
        if let Some(graph) = self.graph.as_mut() {
            graph
                .master
                .linear_ramp_from(now, config.volume / 100.0, ramp);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.generation = Some(generation);
        self.playing = true;

        tracing::info!(
            pattern = kind.id(),
            volume = config.volume,
            min_hz = config.frequency_range.min,
            max_hz = config.frequency_range.max,
            waveform = %config.waveform,
            "starting pattern"
        );

        let mut pattern = pattern;
        pattern.start(self);
        if self.generation == Some(generation) {
            self.pattern = Some(pattern);
        }
        Ok(())
    }

    /// Stops the active pattern and releases every voice. Stopping an idle
    /// engine is a no-op.
    pub fn stop(&mut self) {
        self.playing = false;
        if let Some(mut pattern) = self.pattern.take() {
            pattern.stop(self);
            tracing::debug!(pattern = pattern.kind().id(), "pattern stopped");
        }
        self.generation = None;
        self.timers.clear();
        self.release_all_voices();
    }

    /// Stops playback and closes the output graph.
    pub fn destroy(&mut self) {
        self.stop();
        self.releasing.clear();
        if let Some(mut graph) = self.graph.take() {
            graph.output.close();
            tracing::debug!(output = graph.output.name(), "output graph closed");
        }
    }

    /// Sets the master volume in percent, gliding to the new level.
    pub fn set_volume(&mut self, percent: f32) {
        self.config.volume = crate::config::clamp_volume(percent);
        let now = self.now();
        let ramp = self.audio.volume_ramp;
        if let Some(graph) = self.graph.as_mut() {
            graph
                .master
                .linear_ramp_from(now, self.config.volume / 100.0, ramp);
        }
    }

    /// Takes effect the next time a pattern starts.
    pub fn set_frequency_range(&mut self, range: FrequencyRange) {
        self.config.frequency_range = range;
    }

    /// Takes effect the next time a pattern starts.
    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.config.waveform = waveform;
    }

    /// Allocates an audible oscillator and gain pair feeding the master gain.
    pub fn create_oscillator(
        &mut self,
        frequency: f32,
        waveform: Waveform,
        detune_cents: f32,
    ) -> VoiceId {
        self.create_voice(frequency, waveform, detune_cents, Route::Master)
    }

    /// Allocates an oscillator whose output modulates a parameter of another
    /// voice instead of reaching the speakers.
    pub fn create_modulator(&mut self, frequency: f32, waveform: Waveform, route: Route) -> VoiceId {
        self.create_voice(frequency, waveform, 0.0, route)
    }

    fn create_voice(
        &mut self,
        frequency: f32,
        waveform: Waveform,
        detune_cents: f32,
        route: Route,
    ) -> VoiceId {
        let id = VoiceId(self.next_voice);
        self.next_voice += 1;
        let voice = Voice::new(id, frequency, waveform, detune_cents, route, self.now());
        self.voices.push(voice);
        id
    }

    /// Looks up an active voice.
    pub fn voice(&self, id: VoiceId) -> Option<&Voice> {
        self.voices.iter().find(|voice| voice.id() == id)
    }

    /// Mutable access for adjusting a voice's parameters. Returns `None` once
    /// the voice has been released.
    pub fn voice_mut(&mut self, id: VoiceId) -> Option<&mut Voice> {
        self.voices.iter_mut().find(|voice| voice.id() == id)
    }

    /// Fades a single voice out and drops it from the active set.
    pub fn release_voice(&mut self, id: VoiceId) {
        let Some(index) = self.voices.iter().position(|voice| voice.id() == id) else {
            tracing::trace!(%id, "voice already released");
            return;
        };
        let mut voice = self.voices.remove(index);
        voice.fade_out(self.now(), self.audio.release_guard);
        self.releasing.push(voice);
    }

    /// Fades every voice out over the guard interval and empties the active
    /// set immediately.
    pub fn release_all_voices(&mut self) {
        let now = self.now();
        let guard = self.audio.release_guard;
        for mut voice in self.voices.drain(..) {
            voice.fade_out(now, guard);
            self.releasing.push(voice);
        }
    }

    /// Uniformly random frequency within the configured range.
    pub fn random_frequency(&mut self) -> f32 {
        let FrequencyRange { min, max } = self.config.frequency_range;
        if max > min {
            self.rng.gen_range(min..=max)
        } else {
            min
        }
    }

    /// Uniformly random value in `[low, high)`.
    pub fn random_between(&mut self, low: f64, high: f64) -> f64 {
        if high > low {
            self.rng.gen_range(low..high)
        } else {
            low
        }
    }

    /// Schedules the next step of the active pattern. Returns `None` when no
    /// pattern is running, so a stopped pattern cannot reschedule itself.
    pub fn schedule_step(&mut self, delay: f64) -> Option<TimerId> {
        let generation = self.generation.filter(|_| self.playing)?;
        let deadline = self.now() + delay.max(0.0);
        Some(self.timers.schedule_at(deadline, PatternTick { generation }))
    }

    /// Cancels a pattern step. Unknown handles are ignored.
    pub fn cancel_timer(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }

    /// Time of the earliest pending pattern step.
    pub fn next_deadline(&self) -> Option<f64> {
        self.timers.next_deadline()
    }

    /// Runs every pattern step that is due. Steps scheduled by a pattern
    /// that is no longer active are discarded.
    pub fn fire_due_timers(&mut self) -> usize {
        let horizon = self.due_horizon();
        let mut fired = 0;
        while let Some(tick) = self.timers.pop_due(horizon) {
            let generation = tick.event.generation;
            if !self.playing || self.generation != Some(generation) {
                continue;
            }
            let Some(mut pattern) = self.pattern.take() else {
                continue;
            };

            pattern.step(self);
            fired += 1;

            if self.generation == Some(generation) && self.pattern.is_none() {
                self.pattern = Some(pattern);
            }
        }
        fired
    }

    /// Deadlines within half a frame of the clock count as reached.
    pub fn due_horizon(&self) -> f64 {
        self.now() + 0.5 / self.clock.sample_rate() as f64
    }

    /// Renders audio up to `time` without firing timers.
    pub fn render_until(&mut self, time: f64) {
        let mut remaining = self.clock.frames_until(time);
        while remaining > 0 {
            let frames = remaining.min(RENDER_BLOCK);
            self.render_block(frames as usize);
            remaining -= frames;
        }
    }

    fn render_block(&mut self, frames: usize) {
        let Some(graph) = self.graph.as_mut() else {
            self.clock.advance_frames(frames as u64);
            return;
        };

        let sample_rate = self.clock.sample_rate() as f64;
        let dt = (1.0 / sample_rate) as f32;
        let nyquist = (sample_rate * 0.5) as f32;
        let first = self.clock.frames();

        self.block.clear();
        if self.voices.is_empty() && self.releasing.is_empty() {
            self.block.resize(frames, 0.0);
        } else {
            for offset in 0..frames as u64 {
                let time = (first + offset) as f64 / sample_rate;
                let mix = render_frame(
                    &mut self.voices,
                    &mut self.releasing,
                    &mut self.bus,
                    time,
                    dt,
                    nyquist,
                );
                self.block.push(mix * graph.master.value_at(time));
            }
        }

        graph.output.write(&self.block);
        graph.tap.push(&self.block);
        self.clock.advance_frames(frames as u64);

        let now = self.clock.now();
        self.releasing.retain(|voice| !voice.is_finished(now));
        for voice in self.voices.iter_mut().chain(self.releasing.iter_mut()) {
            voice.prune_before(now);
        }
        graph.master.prune_before(now);
    }

    /// Latest output samples as bytes (128 is silence). Empty before the
    /// output graph exists.
    pub fn time_domain_data(&self) -> Vec<u8> {
        self.graph
            .as_ref()
            .map(|graph| graph.tap.time_domain_data())
            .unwrap_or_default()
    }

    /// Smoothed output spectrum as bytes. Empty before the output graph
    /// exists.
    pub fn frequency_data(&mut self) -> Result<Vec<u8>> {
        match self.graph.as_mut() {
            Some(graph) => graph.tap.frequency_data(),
            None => Ok(Vec::new()),
        }
    }

    /// Frequency of the first audible voice, or zero when silent.
    pub fn current_frequency(&self) -> f32 {
        let now = self.now();
        self.voices
            .iter()
            .find(|voice| voice.route() == Route::Master)
            .map(|voice| voice.frequency_at(now))
            .unwrap_or(0.0)
    }

    /// Current master gain, [0, 1].
    pub fn master_gain(&self) -> f32 {
        self.graph
            .as_ref()
            .map(|graph| graph.master.value_at(self.now()))
            .unwrap_or(0.0)
    }

    fn open_output(&mut self) -> Result<()> {
        if self.graph.is_none() {
            let output = (self.factory)(&self.audio)?;
            tracing::info!(
                output = output.name(),
                sample_rate = self.audio.sample_rate,
                "output graph created"
            );
            self.graph = Some(OutputGraph {
                output,
                master: AudioParam::new(self.config.volume / 100.0, self.now()),
                tap: AnalysisTap::new(&self.audio),
            });
        }

        if let Some(graph) = self.graph.as_mut() {
            if graph.output.is_suspended() {
                graph.output.resume()?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SignalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalEngine")
            .field("config", &self.config)
            .field("playing", &self.playing)
            .field("pattern", &self.active_pattern())
            .field("voices", &self.voices.len())
            .field("releasing", &self.releasing.len())
            .field("pending_steps", &self.timers.len())
            .field("has_output", &self.graph.is_some())
            .field("now", &self.now())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use crate::{RepellerError, StepTimer};

    fn engine() -> SignalEngine {
        SignalEngine::with_seed(AudioConfig::default(), null_output(), 7)
    }

    /// Emits one tone per step and records which steps ran.
    #[derive(Debug)]
    struct Beacon {
        timer: StepTimer,
        steps: Rc<Cell<u32>>,
    }

    impl Beacon {
        fn new(steps: Rc<Cell<u32>>) -> Self {
            Self {
                timer: StepTimer::default(),
                steps,
            }
        }
    }

    impl Pattern for Beacon {
        fn kind(&self) -> PatternKind {
            PatternKind::LinearSweep
        }

        fn start(&mut self, engine: &mut SignalEngine) {
            engine.create_oscillator(16_000.0, Waveform::Sine, 0.0);
            self.timer.arm(engine, 0.1);
        }

        fn step(&mut self, engine: &mut SignalEngine) {
            self.timer.fired();
            if !engine.is_playing() {
                return;
            }
            self.steps.set(self.steps.get() + 1);
            self.timer.arm(engine, 0.1);
        }

        fn stop(&mut self, engine: &mut SignalEngine) {
            self.timer.cancel(engine);
        }
    }

    fn run(engine: &mut SignalEngine, until: f64) {
        while let Some(deadline) = engine.next_deadline().filter(|d| *d <= until) {
            engine.render_until(deadline);
            engine.fire_due_timers();
        }
        engine.render_until(until);
    }

    #[test]
    fn start_plays_and_stop_clears() {
        let mut engine = engine();
        let steps = Rc::new(Cell::new(0));
        engine
            .start(Box::new(Beacon::new(steps.clone())), EngineConfig::default())
            .unwrap();
        assert!(engine.is_playing());
        assert_eq!(engine.voice_count(), 1);

        run(&mut engine, 0.35);
        assert_eq!(steps.get(), 3);

        engine.stop();
        assert!(!engine.is_playing());
        assert_eq!(engine.voice_count(), 0);
        assert_eq!(engine.pending_steps(), 0);
        assert_eq!(engine.active_pattern(), None);

        run(&mut engine, 2.0);
        assert_eq!(steps.get(), 3);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut engine = engine();
        engine
            .start(PatternKind::HarmonicStack.build(), EngineConfig::default())
            .unwrap();
        run(&mut engine, 1.0);

        engine.stop();
        let voices = engine.voice_count();
        let pending = engine.pending_steps();
        engine.stop();

        assert_eq!(voices, 0);
        assert_eq!(pending, 0);
        assert_eq!(engine.voice_count(), voices);
        assert_eq!(engine.pending_steps(), pending);
    }

    #[test]
    fn restart_supersedes_previous_pattern() {
        let mut engine = engine();
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));

        engine
            .start(Box::new(Beacon::new(first.clone())), EngineConfig::default())
            .unwrap();
        run(&mut engine, 0.15);
        engine
            .start(Box::new(Beacon::new(second.clone())), EngineConfig::default())
            .unwrap();
        assert_eq!(engine.pending_steps(), 1);
        assert_eq!(engine.voice_count(), 1);

        run(&mut engine, 1.0);
        assert_eq!(first.get(), 1);
        assert!(second.get() >= 8);
    }

    #[test]
    fn released_voices_fade_before_they_go() {
        let buffer = CaptureBuffer::new();
        let mut engine = SignalEngine::with_seed(AudioConfig::default(), buffer.factory(), 1);
        engine
            .start(Box::new(Beacon::new(Rc::default())), EngineConfig::default())
            .unwrap();
        run(&mut engine, 0.05);
        engine.stop();
        run(&mut engine, 0.2);

        let samples = buffer.samples().unwrap();
        let fade_end = (0.1 * 48_000.0) as usize;
        let tail = &samples[fade_end + 10..];
        assert!(tail.iter().all(|sample| *sample == 0.0));

        let guard_start = (0.05 * 48_000.0) as usize;
        let midway = &samples[guard_start + 1_150..guard_start + 1_250];
        let peak = midway.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        assert!(peak > 0.0 && peak < 0.8);
    }

    #[test]
    fn fading_voices_forget_passed_automation() {
        let mut engine = engine();
        engine
            .start(Box::new(Beacon::new(Rc::default())), EngineConfig::default())
            .unwrap();
        engine.render_until(0.1);

        let id = engine.voices()[0].id();
        engine.release_voice(id);
        assert_eq!(engine.releasing[0].gain.pending_events(), 2);

        engine.render_until(0.125);
        assert_eq!(engine.releasing.len(), 1);
        assert_eq!(engine.releasing[0].gain.pending_events(), 1);
    }

    #[test]
    fn unavailable_output_leaves_engine_stopped_and_retryable() {
        let available = Rc::new(Cell::new(false));
        let gate = available.clone();
        let factory: OutputFactory = Box::new(move |_| {
            if gate.get() {
                Ok(Box::new(NullOutput) as Box<dyn AudioOutput>)
            } else {
                Err(RepellerError::OutputUnavailable("no gesture yet".into()))
            }
        });
        let mut engine = SignalEngine::with_seed(AudioConfig::default(), factory, 3);

        let err = engine
            .start(PatternKind::RandomJump.build(), EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, RepellerError::OutputUnavailable(_)));
        assert!(!engine.is_playing());
        assert_eq!(engine.voice_count(), 0);
        assert!(engine.time_domain_data().is_empty());

        available.set(true);
        engine
            .start(PatternKind::RandomJump.build(), EngineConfig::default())
            .unwrap();
        assert!(engine.is_playing());
        assert_eq!(engine.time_domain_data().len(), 1024);
    }

    #[test]
    fn random_frequency_stays_in_range() {
        let mut engine = engine();
        for (min, max) in [(1_000.0, 1_100.0), (15_000.0, 20_000.0), (23_900.0, 24_000.0)] {
            engine.set_frequency_range(FrequencyRange { min, max });
            for _ in 0..2_000 {
                let frequency = engine.random_frequency();
                assert!((min..=max).contains(&frequency));
            }
        }
    }

    #[test]
    fn volume_glides_instead_of_jumping() {
        let mut engine = engine();
        engine
            .start(Box::new(Beacon::new(Rc::default())), EngineConfig::default())
            .unwrap();
        run(&mut engine, 0.5);
        assert!((engine.master_gain() - 0.8).abs() < 1e-4);

        engine.set_volume(140.0);
        assert_eq!(engine.config().volume, 100.0);
        run(&mut engine, 0.55);
        let gain = engine.master_gain();
        assert!(gain > 0.8 && gain < 1.0);
        run(&mut engine, 0.7);
        assert!((engine.master_gain() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn introspection_does_not_disturb_playback() {
        let mut engine = engine();
        engine
            .start(PatternKind::LinearSweep.build(), EngineConfig::default())
            .unwrap();
        run(&mut engine, 1.5);

        let frequency = engine.current_frequency();
        assert!(frequency > 15_000.0 && frequency < 20_000.0);
        let waveform = engine.time_domain_data();
        let spectrum = engine.frequency_data().unwrap();
        assert_eq!(waveform.len(), 1024);
        assert_eq!(spectrum.len(), 1024);
        assert!(waveform.iter().any(|byte| *byte != 128));

        assert!(engine.is_playing());
        assert_eq!(engine.voice_count(), 1);
        assert_eq!(engine.current_frequency(), frequency);
    }

    #[test]
    fn destroy_closes_the_graph() {
        let mut engine = engine();
        engine
            .start(PatternKind::PulseBurst.build(), EngineConfig::default())
            .unwrap();
        engine.destroy();
        assert!(!engine.has_output());
        assert!(!engine.is_playing());
        assert_eq!(engine.current_frequency(), 0.0);
    }
}
