//! The fixed catalog of anti-habituation patterns.
//!
//! Every pattern is a self-rescheduling loop: `start` produces the first
//! sound and arms a single [`StepTimer`], each `step` re-checks that the
//! engine is still playing before touching audio or rearming, and `stop`
//! cancels the one pending timer.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{RepellerError, Result, SignalEngine, TimerId};

mod fm;
mod harmonic;
mod jump;
mod predator;
mod pulse;
mod sweep;

pub use fm::FmChaos;
pub use harmonic::HarmonicStack;
pub use jump::RandomJump;
pub use predator::PredatorMimicry;
pub use pulse::PulseBurst;
pub use sweep::LinearSweep;

/// Capability shared by all signal-generation strategies.
pub trait Pattern: fmt::Debug {
    fn kind(&self) -> PatternKind;

    /// Begins sound generation and returns immediately.
    fn start(&mut self, engine: &mut SignalEngine);

    /// Scheduled continuation, invoked when this pattern's timer fires.
    fn step(&mut self, engine: &mut SignalEngine);

    /// Cancels pending work. No further engine mutation happens afterwards.
    fn stop(&mut self, engine: &mut SignalEngine);
}

/// The single outstanding timer a pattern is allowed to hold.
#[derive(Debug, Default)]
pub struct StepTimer {
    pending: Option<TimerId>,
}

impl StepTimer {
    /// Schedules the next step, replacing any step that is still pending.
    pub fn arm(&mut self, engine: &mut SignalEngine, delay: f64) {
        self.cancel(engine);
        self.pending = engine.schedule_step(delay);
    }

    /// Marks the pending step as delivered.
    pub fn fired(&mut self) {
        self.pending = None;
    }

    pub fn cancel(&mut self, engine: &mut SignalEngine) {
        if let Some(id) = self.pending.take() {
            engine.cancel_timer(id);
        }
    }

    pub fn pending(&self) -> Option<TimerId> {
        self.pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    LinearSweep,
    RandomJump,
    PulseBurst,
    FmChaos,
    HarmonicStack,
    PredatorMimicry,
}

impl PatternKind {
    /// Catalog order. Indices into this array are what settings persist.
    pub const ALL: [PatternKind; 6] = [
        PatternKind::LinearSweep,
        PatternKind::RandomJump,
        PatternKind::PulseBurst,
        PatternKind::FmChaos,
        PatternKind::HarmonicStack,
        PatternKind::PredatorMimicry,
    ];

    pub fn index(self) -> usize {
        match self {
            PatternKind::LinearSweep => 0,
            PatternKind::RandomJump => 1,
            PatternKind::PulseBurst => 2,
            PatternKind::FmChaos => 3,
            PatternKind::HarmonicStack => 4,
            PatternKind::PredatorMimicry => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Successor in catalog order, wrapping after the last pattern.
    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    /// Stable identifier.
    pub fn id(self) -> &'static str {
        match self {
            PatternKind::LinearSweep => "linear-sweep",
            PatternKind::RandomJump => "random-jump",
            PatternKind::PulseBurst => "pulse-burst",
            PatternKind::FmChaos => "fm-chaos",
            PatternKind::HarmonicStack => "harmonic-stack",
            PatternKind::PredatorMimicry => "predator-mimicry",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PatternKind::LinearSweep => "Linear Sweep",
            PatternKind::RandomJump => "Random Jump",
            PatternKind::PulseBurst => "Pulse Burst",
            PatternKind::FmChaos => "FM Chaos",
            PatternKind::HarmonicStack => "Harmonic Stack",
            PatternKind::PredatorMimicry => "Predator Mimicry",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PatternKind::LinearSweep => {
                "Sweeps continuously from the lowest to the highest frequency and back."
            }
            PatternKind::RandomJump => "Jumps between random frequencies at random intervals.",
            PatternKind::PulseBurst => "Short bursts of sound separated by random pauses.",
            PatternKind::FmChaos => {
                "A carrier frequency-modulated by a wandering low-frequency oscillator."
            }
            PatternKind::HarmonicStack => {
                "Five simultaneous tones spread across the range, drifting slowly."
            }
            PatternKind::PredatorMimicry => {
                "Tremolo chirps around 18-20 kHz modelled on rodent distress calls."
            }
        }
    }

    /// Fresh instance with no scheduling state.
    pub fn build(self) -> Box<dyn Pattern> {
        match self {
            PatternKind::LinearSweep => Box::new(LinearSweep::new()),
            PatternKind::RandomJump => Box::new(RandomJump::new()),
            PatternKind::PulseBurst => Box::new(PulseBurst::new()),
            PatternKind::FmChaos => Box::new(FmChaos::new()),
            PatternKind::HarmonicStack => Box::new(HarmonicStack::new()),
            PatternKind::PredatorMimicry => Box::new(PredatorMimicry::new()),
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PatternKind {
    type Err = RepellerError;

    /// Accepts either a stable id or a catalog index.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        s.parse::<usize>()
            .ok()
            .and_then(Self::from_index)
            .or_else(|| Self::from_id(s))
            .ok_or_else(|| RepellerError::invalid(format!("unknown pattern `{s}`")))
    }
}
