//! Application-level owner of the engine, the user's settings and the
//! automation policies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    automation::{AutomationMode, DayNightConfig, SmartConfig, WallClock},
    EngineConfig, FrequencyRange, PatternKind, RepellerError, Result, Settings, SignalEngine,
    TimerId, TimerQueue, Waveform,
};

const COUNTDOWN_TICK: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlEvent {
    AutomationPoll,
    Countdown,
}

/// User settings saved when the smart schedule overrides them, restored
/// exactly once when the override ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreSmartSettings {
    pub engine: EngineConfig,
    pub pattern_index: usize,
}

/// Drives a [`SignalEngine`] on behalf of the user and the automation
/// schedules. Single-threaded: every change happens either in a method call
/// or inside [`Repeller::advance`] when a timer comes due.
pub struct Repeller {
    engine: SignalEngine,
    settings: Settings,
    active: bool,
    automation: AutomationMode,
    automation_timer: Option<TimerId>,
    automation_status: Option<String>,
    pre_smart: Option<PreSmartSettings>,
    smart_auto_activated: bool,
    countdown_timer: Option<TimerId>,
    countdown_remaining: u32,
    timers: TimerQueue<ControlEvent>,
    clock: Box<dyn WallClock>,
}

impl Repeller {
    /// Builds the controller and resumes whichever automation the settings
    /// have enabled. Sound is not started here unless that automation asks
    /// for it.
    pub fn new(settings: Settings, engine: SignalEngine, clock: Box<dyn WallClock>) -> Self {
        let settings = settings.sanitized();
        let mut repeller = Self {
            engine,
            settings,
            active: false,
            automation: AutomationMode::None,
            automation_timer: None,
            automation_status: None,
            pre_smart: None,
            smart_auto_activated: false,
            countdown_timer: None,
            countdown_remaining: 0,
            timers: TimerQueue::new(),
            clock,
        };
        repeller.push_engine_config();

        let mode = repeller.settings.automation.mode();
        repeller.set_automation(mode);
        repeller
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    pub fn selected_pattern(&self) -> PatternKind {
        PatternKind::from_index(self.settings.pattern_index).unwrap_or(PatternKind::LinearSweep)
    }

    pub fn automation(&self) -> &AutomationMode {
        &self.automation
    }

    /// Status line of the running automation, e.g. `Night: FM Chaos`.
    pub fn automation_status(&self) -> Option<&str> {
        self.automation_status.as_deref()
    }

    pub fn pre_smart_settings(&self) -> Option<&PreSmartSettings> {
        self.pre_smart.as_ref()
    }

    /// Whether the current playback was switched on by the smart schedule.
    pub fn smart_session_active(&self) -> bool {
        self.smart_auto_activated
    }

    /// Seconds left before automatic power-off.
    pub fn timer_remaining(&self) -> Option<u32> {
        self.countdown_timer.map(|_| self.countdown_remaining)
    }

    pub fn timer_label(&self) -> Option<String> {
        self.timer_remaining()
            .map(|seconds| format!("{}:{:02} remaining", seconds / 60, seconds % 60))
    }

    /// Controller time in seconds.
    pub fn now(&self) -> f64 {
        self.engine.now()
    }

    pub fn current_frequency(&self) -> f32 {
        self.engine.current_frequency()
    }

    pub fn time_domain_data(&self) -> Vec<u8> {
        self.engine.time_domain_data()
    }

    pub fn frequency_data(&mut self) -> Result<Vec<u8>> {
        self.engine.frequency_data()
    }

    /// Power button.
    pub fn toggle_power(&mut self) -> Result<()> {
        if self.active {
            self.deactivate();
            Ok(())
        } else {
            self.activate()
        }
    }

    /// Switches sound on. Outside advanced mode the first activation applies
    /// the optimal settings and turns the smart schedule on.
    ///
    /// If the output cannot be opened the repeller stays inactive, whatever
    /// this call changed is rolled back and the error is returned; calling
    /// again later is fine.
    pub fn activate(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }

        let optimize = !self.settings.advanced_mode && self.pre_smart.is_none();
        let mut replaced_automation = None;
        if optimize {
            self.apply_optimal_settings();
            if !matches!(self.automation, AutomationMode::Smart(_)) {
                replaced_automation = Some(self.automation.clone());
                let smart = self.settings.automation.smart.clone();
                self.set_automation(AutomationMode::Smart(smart));
                if self.active {
                    return Ok(());
                }
            }
        }

        let pattern = self.selected_pattern();
        if let Err(err) = self.engine.start(pattern.build(), self.settings.engine) {
            tracing::warn!(%err, pattern = pattern.id(), "power-on failed");
            if optimize {
                self.restore_pre_smart_settings();
            }
            if let Some(previous) = replaced_automation {
                self.set_automation(previous);
            }
            return Err(err);
        }
        self.active = true;
        tracing::info!(pattern = pattern.id(), "repeller active");

        if self.settings.timer_minutes > 0 {
            self.start_countdown(self.settings.timer_minutes * 60);
        }
        Ok(())
    }

    /// Switches sound off. Ends a smart session, restoring the settings it
    /// replaced.
    pub fn deactivate(&mut self) {
        self.power_off();
        self.smart_auto_activated = false;
        self.restore_pre_smart_settings();
    }

    fn power_off(&mut self) {
        if self.active {
            tracing::info!("repeller inactive");
        }
        self.active = false;
        self.engine.stop();
        self.stop_countdown();
    }

    /// Restarts the selected pattern with the current settings.
    pub fn restart(&mut self) {
        if !self.active {
            return;
        }
        let pattern = self.selected_pattern();
        if let Err(err) = self.engine.start(pattern.build(), self.settings.engine) {
            tracing::warn!(%err, pattern = pattern.id(), "restart failed, powering off");
            self.deactivate();
        }
    }

    pub fn select_pattern(&mut self, index: usize) -> Result<()> {
        let kind = PatternKind::from_index(index)
            .ok_or_else(|| RepellerError::invalid(format!("no pattern with index {index}")))?;
        self.switch_pattern(kind);
        Ok(())
    }

    fn switch_pattern(&mut self, kind: PatternKind) {
        self.settings.pattern_index = kind.index();
        if self.active {
            self.restart();
        }
    }

    pub fn set_volume(&mut self, percent: f32) {
        self.engine.set_volume(percent);
        self.settings.engine.volume = self.engine.config().volume;
    }

    /// Applies a new range after clamping it into shape. Takes effect the
    /// next time a pattern starts.
    pub fn set_frequency_range(&mut self, min: f32, max: f32) -> FrequencyRange {
        let range = FrequencyRange::new(min, max);
        self.settings.engine.frequency_range = range;
        self.engine.set_frequency_range(range);
        range
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.settings.engine.waveform = waveform;
        self.engine.set_waveform(waveform);
        self.restart();
    }

    /// Power-off timer for future activations. Zero disables it.
    pub fn set_timer_minutes(&mut self, minutes: u32) {
        self.settings.timer_minutes = minutes;
    }

    pub fn set_advanced_mode(&mut self, advanced: bool) {
        self.settings.advanced_mode = advanced;
    }

    /// Switches automation policy. The previous policy is torn down first:
    /// its timer is cancelled and a smart session it started is ended.
    pub fn set_automation(&mut self, mode: AutomationMode) {
        self.teardown_automation();

        self.settings.automation.record(&mode);
        self.automation = mode;
        if self.automation != AutomationMode::None {
            tracing::info!(mode = ?self.automation.kind(), "automation enabled");
        }

        if let Some(interval) = self.automation.poll_interval() {
            self.arm_automation(interval);
        }
        self.evaluate_automation(false);
    }

    pub fn set_auto_rotate_hours(&mut self, hours: u32) {
        self.settings.automation.auto_rotate.hours = hours.max(1);
        if matches!(self.automation, AutomationMode::AutoRotate(_)) {
            let config = self.settings.automation.auto_rotate.clone();
            self.set_automation(AutomationMode::AutoRotate(config));
        }
    }

    pub fn set_day_night(&mut self, config: DayNightConfig) {
        self.settings.automation.day_night = config.clone();
        if matches!(self.automation, AutomationMode::DayNight(_)) {
            self.automation = AutomationMode::DayNight(config);
            self.evaluate_automation(false);
        }
    }

    pub fn set_smart_window(&mut self, config: SmartConfig) {
        self.settings.automation.smart = config.clone();
        if matches!(self.automation, AutomationMode::Smart(_)) {
            self.automation = AutomationMode::Smart(config);
            self.evaluate_automation(false);
        }
    }

    /// Moves time forward, rendering audio and running every engine and
    /// controller timer that falls due, in chronological order.
    pub fn advance(&mut self, seconds: f64) {
        let target = self.now() + seconds.max(0.0);
        loop {
            let next = match (self.engine.next_deadline(), self.timers.next_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let Some(deadline) = next.filter(|deadline| *deadline <= target) else {
                break;
            };

            self.engine.render_until(deadline);
            self.engine.fire_due_timers();
            self.fire_control_timers();
        }
        self.engine.render_until(target);
    }

    fn fire_control_timers(&mut self) {
        while let Some(fired) = self.timers.pop_due(self.engine.due_horizon()) {
            match fired.event {
                ControlEvent::AutomationPoll if self.automation_timer == Some(fired.id) => {
                    self.automation_timer = None;
                    if let Some(interval) = self.automation.poll_interval() {
                        self.arm_automation(interval);
                    }
                    self.evaluate_automation(true);
                }
                ControlEvent::Countdown if self.countdown_timer == Some(fired.id) => {
                    self.countdown_timer = None;
                    self.tick_countdown();
                }
                _ => {}
            }
        }
    }

    fn arm_automation(&mut self, interval: f64) {
        if let Some(id) = self.automation_timer.take() {
            self.timers.cancel(id);
        }
        let deadline = self.now() + interval;
        self.automation_timer = Some(self.timers.schedule_at(deadline, ControlEvent::AutomationPoll));
    }

    fn teardown_automation(&mut self) {
        if let Some(id) = self.automation_timer.take() {
            self.timers.cancel(id);
        }
        if matches!(self.automation, AutomationMode::Smart(_))
            && self.smart_auto_activated
            && self.active
        {
            self.deactivate();
        }
        if self.automation != AutomationMode::None {
            tracing::info!(mode = ?self.automation.kind(), "automation disabled");
        }
        self.automation = AutomationMode::None;
        self.automation_status = None;
    }

    /// Runs the active policy's check. `tick` is true when called from the
    /// recurring timer rather than right after a configuration change.
    fn evaluate_automation(&mut self, tick: bool) {
        match self.automation.clone() {
            AutomationMode::None => {}
            AutomationMode::AutoRotate(config) => {
                if tick && self.active {
                    let next = self.selected_pattern().next();
                    tracing::info!(pattern = next.id(), "auto-rotating");
                    self.switch_pattern(next);
                }
                self.automation_status = Some(format!(
                    "Every {}h, next: {}",
                    config.hours,
                    self.selected_pattern().next().name()
                ));
            }
            AutomationMode::DayNight(config) => self.apply_day_night(&config),
            AutomationMode::Smart(config) => self.apply_smart_schedule(&config),
        }
    }

    fn apply_day_night(&mut self, config: &DayNightConfig) {
        let now = self.clock.time_of_day(self.now());
        let phase = config.phase_at(now);
        let target = config.pattern_for(phase);
        self.automation_status = Some(format!("{}: {}", phase.label(), target.name()));

        if target != self.selected_pattern() {
            tracing::info!(phase = phase.label(), pattern = target.id(), %now, "day/night switch");
            self.switch_pattern(target);
        }
    }

    fn apply_smart_schedule(&mut self, config: &SmartConfig) {
        let now = self.clock.time_of_day(self.now());
        let inside = config.window().contains(now);
        let waiting = format!("Waiting, starts at {}", config.start);

        if inside && !self.active {
            self.apply_optimal_settings();
            match self.activate() {
                Ok(()) => {
                    tracing::info!(%now, "smart schedule activated");
                    self.smart_auto_activated = true;
                    self.automation_status = Some("Active, optimized".to_string());
                }
                Err(err) => {
                    tracing::warn!(%err, %now, "smart schedule could not start sound");
                    self.restore_pre_smart_settings();
                    self.automation_status = Some(waiting);
                }
            }
        } else if inside {
            self.automation_status = Some("Active, optimized".to_string());
        } else {
            if self.active && self.smart_auto_activated {
                tracing::info!(%now, "smart schedule window closed");
                self.deactivate();
            }
            self.automation_status = Some(waiting);
        }
    }

    /// Snapshots the user's settings (unless a snapshot already exists) and
    /// switches to the configuration used by the smart schedule.
    fn apply_optimal_settings(&mut self) {
        if self.pre_smart.is_none() {
            self.pre_smart = Some(PreSmartSettings {
                engine: self.settings.engine,
                pattern_index: self.settings.pattern_index,
            });
        }
        self.settings.engine = EngineConfig::optimal();
        self.push_engine_config();
        self.switch_pattern(PatternKind::FmChaos);
    }

    fn restore_pre_smart_settings(&mut self) {
        let Some(saved) = self.pre_smart.take() else {
            return;
        };
        self.settings.engine = saved.engine;
        self.push_engine_config();
        if let Some(kind) = PatternKind::from_index(saved.pattern_index) {
            self.switch_pattern(kind);
        }
        tracing::debug!(pattern = saved.pattern_index, "restored pre-smart settings");
    }

    fn push_engine_config(&mut self) {
        let config = self.settings.engine;
        self.engine.set_volume(config.volume);
        self.engine.set_frequency_range(config.frequency_range);
        self.engine.set_waveform(config.waveform);
    }

    fn start_countdown(&mut self, seconds: u32) {
        self.stop_countdown();
        self.countdown_remaining = seconds;
        let deadline = self.now() + COUNTDOWN_TICK;
        self.countdown_timer = Some(self.timers.schedule_at(deadline, ControlEvent::Countdown));
    }

    fn stop_countdown(&mut self) {
        if let Some(id) = self.countdown_timer.take() {
            self.timers.cancel(id);
        }
        self.countdown_remaining = 0;
    }

    fn tick_countdown(&mut self) {
        self.countdown_remaining = self.countdown_remaining.saturating_sub(1);
        if self.countdown_remaining == 0 {
            tracing::info!("power-off timer elapsed");
            self.deactivate();
            return;
        }
        let deadline = self.now() + COUNTDOWN_TICK;
        self.countdown_timer = Some(self.timers.schedule_at(deadline, ControlEvent::Countdown));
    }
}

impl fmt::Debug for Repeller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repeller")
            .field("active", &self.active)
            .field("settings", &self.settings)
            .field("automation", &self.automation)
            .field("automation_status", &self.automation_status)
            .field("pre_smart", &self.pre_smart)
            .field("smart_auto_activated", &self.smart_auto_activated)
            .field("engine", &self.engine)
            .finish()
    }
}
