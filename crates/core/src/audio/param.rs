//! Sample-accurate parameter automation.

#[derive(Debug, Clone, Copy, PartialEq)]
enum Curve {
    /// Jump to the value at the event time.
    Step,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ParamEvent {
    time: f64,
    value: f32,
    curve: Curve,
}

/// A scalar (frequency, gain, detune) whose value follows a timeline of
/// scheduled events. Ramps run from the previous event, or from the value the
/// parameter was created with, to their own time and value.
#[derive(Debug, Clone)]
pub struct AudioParam {
    initial: f32,
    created_at: f64,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    pub fn new(value: f32, created_at: f64) -> Self {
        Self {
            initial: value,
            created_at,
            events: Vec::new(),
        }
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent {
            time,
            value,
            curve: Curve::Step,
        });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent {
            time,
            value,
            curve: Curve::Linear,
        });
    }

    pub fn exponential_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent {
            time,
            value,
            curve: Curve::Exponential,
        });
    }

    /// Drops every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|event| event.time < time);
    }

    /// Freezes the parameter at its current value and cancels whatever was
    /// scheduled from `now` on. Ramps added afterwards start from here.
    pub fn hold_at(&mut self, now: f64) {
        let value = self.value_at(now);
        self.cancel_scheduled_values(now);
        self.set_value_at_time(value, now);
    }

    /// Linear ramp starting from the value held at `now`.
    pub fn linear_ramp_from(&mut self, now: f64, value: f32, duration: f64) {
        self.hold_at(now);
        self.linear_ramp_to_value_at_time(value, now + duration);
    }

    /// Exponential ramp starting from the value held at `now`.
    pub fn exponential_ramp_from(&mut self, now: f64, value: f32, duration: f64) {
        self.hold_at(now);
        self.exponential_ramp_to_value_at_time(value, now + duration);
    }

    pub fn value_at(&self, time: f64) -> f32 {
        let next = self.events.partition_point(|event| event.time <= time);
        let (start_time, start_value) = match next.checked_sub(1) {
            Some(index) => (self.events[index].time, self.events[index].value),
            None => (self.created_at, self.initial),
        };

        let Some(target) = self.events.get(next) else {
            return start_value;
        };

        let span = target.time - start_time;
        if span <= 0.0 {
            return start_value;
        }
        let progress = ((time - start_time) / span).clamp(0.0, 1.0) as f32;

        match target.curve {
            Curve::Step => start_value,
            Curve::Linear => start_value + (target.value - start_value) * progress,
            Curve::Exponential => {
                if start_value == 0.0 || start_value.signum() != target.value.signum() {
                    start_value
                } else {
                    start_value * (target.value / start_value).powf(progress)
                }
            }
        }
    }

    /// Forgets events that can no longer influence values at or after `time`.
    pub fn prune_before(&mut self, time: f64) {
        let passed = self.events.partition_point(|event| event.time <= time);
        if passed > 0 {
            let anchor = self.events[passed - 1];
            self.events.drain(..passed);
            self.initial = anchor.value;
            self.created_at = anchor.time;
        }
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn insert(&mut self, event: ParamEvent) {
        let position = self
            .events
            .partition_point(|existing| existing.time <= event.time);
        self.events.insert(position, event);
    }
}
