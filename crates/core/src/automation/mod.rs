//! Time-of-day automation policies.
//!
//! Three mutually exclusive modes decide, without user input, which pattern
//! and settings should be active. This module holds their configuration and
//! the time arithmetic; [`Repeller`](crate::Repeller) owns the timers and
//! applies the decisions.

use std::{
    cell::Cell,
    fmt,
    rc::Rc,
    str::FromStr,
};

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::{PatternKind, RepellerError, Result};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Wall-clock time with minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    minutes: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour >= 24 || minute >= 60 {
            return Err(RepellerError::invalid(format!(
                "{hour:02}:{minute:02} is not a time of day"
            )));
        }
        Ok(Self {
            minutes: hour * 60 + minute,
        })
    }

    /// Minutes after midnight, wrapped into a single day.
    pub fn from_minutes(minutes: u32) -> Self {
        Self {
            minutes: minutes % MINUTES_PER_DAY,
        }
    }

    pub fn minutes(self) -> u32 {
        self.minutes
    }

    pub fn hour(self) -> u32 {
        self.minutes / 60
    }

    pub fn minute(self) -> u32 {
        self.minutes % 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = RepellerError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || RepellerError::invalid(format!("`{s}` is not an HH:MM time"));
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = RepellerError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Half-open daily window `[start, end)`. A start later than the end wraps
/// past midnight; equal bounds describe an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeWindow {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    pub fn crosses_midnight(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, now: TimeOfDay) -> bool {
        if self.crosses_midnight() {
            now >= self.start || now < self.end
        } else {
            now >= self.start && now < self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRotateConfig {
    /// Hours between pattern changes.
    pub hours: u32,
}

impl AutoRotateConfig {
    pub fn period_seconds(&self) -> f64 {
        self.hours.max(1) as f64 * 3600.0
    }
}

impl Default for AutoRotateConfig {
    fn default() -> Self {
        Self { hours: 1 }
    }
}

/// Which half of the day/night schedule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPhase {
    Day,
    Night,
}

impl DayPhase {
    pub fn label(self) -> &'static str {
        match self {
            DayPhase::Day => "Day",
            DayPhase::Night => "Night",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayNightConfig {
    pub day_pattern: PatternKind,
    pub night_pattern: PatternKind,
    pub night_start: TimeOfDay,
    pub day_start: TimeOfDay,
}

impl DayNightConfig {
    pub fn phase_at(&self, now: TimeOfDay) -> DayPhase {
        if TimeWindow::new(self.night_start, self.day_start).contains(now) {
            DayPhase::Night
        } else {
            DayPhase::Day
        }
    }

    pub fn pattern_for(&self, phase: DayPhase) -> PatternKind {
        match phase {
            DayPhase::Day => self.day_pattern,
            DayPhase::Night => self.night_pattern,
        }
    }
}

impl Default for DayNightConfig {
    fn default() -> Self {
        Self {
            day_pattern: PatternKind::LinearSweep,
            night_pattern: PatternKind::FmChaos,
            night_start: TimeOfDay { minutes: 22 * 60 },
            day_start: TimeOfDay { minutes: 6 * 60 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartConfig {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl SmartConfig {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }
}

impl Default for SmartConfig {
    fn default() -> Self {
        Self {
            start: TimeOfDay { minutes: 19 * 60 },
            end: TimeOfDay {
                minutes: 5 * 60 + 30,
            },
        }
    }
}

/// The automation policy in charge. At most one runs at a time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AutomationMode {
    #[default]
    None,
    AutoRotate(AutoRotateConfig),
    DayNight(DayNightConfig),
    Smart(SmartConfig),
}

impl AutomationMode {
    pub fn kind(&self) -> crate::AutomationKind {
        use crate::AutomationKind;

        match self {
            AutomationMode::None => AutomationKind::None,
            AutomationMode::AutoRotate(_) => AutomationKind::AutoRotate,
            AutomationMode::DayNight(_) => AutomationKind::DayNight,
            AutomationMode::Smart(_) => AutomationKind::Smart,
        }
    }

    /// Interval of the mode's recurring check, if it has one.
    pub fn poll_interval(&self) -> Option<f64> {
        match self {
            AutomationMode::None => None,
            AutomationMode::AutoRotate(config) => Some(config.period_seconds()),
            AutomationMode::DayNight(_) | AutomationMode::Smart(_) => Some(60.0),
        }
    }
}

/// Source of local time of day for the schedules.
pub trait WallClock {
    /// `elapsed` is the controller's monotonic time in seconds. Real clocks
    /// ignore it; simulated ones derive the time of day from it.
    fn time_of_day(&self, elapsed: f64) -> TimeOfDay;
}

/// The machine's local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn time_of_day(&self, _elapsed: f64) -> TimeOfDay {
        let now = chrono::Local::now();
        TimeOfDay::from_minutes(now.hour() * 60 + now.minute())
    }
}

/// Time of day that starts at `origin` and moves with the controller's
/// virtual time.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedClock {
    pub origin: TimeOfDay,
}

impl WallClock for SimulatedClock {
    fn time_of_day(&self, elapsed: f64) -> TimeOfDay {
        let minutes = (elapsed.max(0.0) / 60.0).floor() as u64;
        let minutes = (self.origin.minutes() as u64 + minutes) % MINUTES_PER_DAY as u64;
        TimeOfDay::from_minutes(minutes as u32)
    }
}

/// Clock set by hand. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    minutes: Rc<Cell<u32>>,
}

impl ManualClock {
    pub fn new(time: TimeOfDay) -> Self {
        Self {
            minutes: Rc::new(Cell::new(time.minutes())),
        }
    }

    pub fn set(&self, time: TimeOfDay) {
        self.minutes.set(time.minutes());
    }
}

impl WallClock for ManualClock {
    fn time_of_day(&self, _elapsed: f64) -> TimeOfDay {
        TimeOfDay::from_minutes(self.minutes.get())
    }
}
