//! Virtual time and cancellable timers.
//!
//! Everything that happens "later" in the repeller goes through a
//! [`TimerQueue`]: pattern steps, automation polls and the power-off
//! countdown. Queues never look at the system clock; their owner decides what
//! `now` is, which keeps the whole core deterministic under test.

use std::fmt;

/// Monotonic clock measured in rendered sample frames.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    frames: u64,
    sample_rate: u32,
}

impl PlaybackClock {
    /// Clock at frame zero. A zero sample rate is treated as one.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: 0,
            sample_rate: sample_rate.max(1),
        }
    }

    /// Frames per second.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current time in seconds.
    pub fn now(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Number of whole frames that have to be rendered to reach `time`.
    /// Rounding noise below a millionth of a frame is ignored.
    pub fn frames_until(&self, time: f64) -> u64 {
        let target = (time * self.sample_rate as f64 - 1e-6).ceil();
        if target <= self.frames as f64 {
            0
        } else {
            target as u64 - self.frames
        }
    }

    /// Records that `frames` more frames were rendered.
    pub fn advance_frames(&mut self, frames: u64) {
        self.frames += frames;
    }
}

/// Handle to a pending timer. Cancelling a handle that already fired or was
/// cancelled before is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledEvent<E> {
    pub id: TimerId,
    pub deadline: f64,
    pub event: E,
}

/// Deadline-ordered set of pending events. Events sharing a deadline fire in
/// the order they were scheduled.
#[derive(Debug)]
pub struct TimerQueue<E> {
    events: Vec<ScheduledEvent<E>>,
    next_id: u64,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            next_id: 0,
        }
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `event` for `deadline` and returns its cancellation handle.
    pub fn schedule_at(&mut self, deadline: f64, event: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let position = self
            .events
            .partition_point(|pending| pending.deadline <= deadline);
        self.events.insert(
            position,
            ScheduledEvent {
                id,
                deadline,
                event,
            },
        );
        id
    }

    /// Removes the timer and returns whether it was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.events.iter().position(|pending| pending.id == id) {
            Some(index) => {
                self.events.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether the timer has neither fired nor been cancelled.
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.events.iter().any(|pending| pending.id == id)
    }

    /// Deadline of the earliest pending event.
    pub fn next_deadline(&self) -> Option<f64> {
        self.events.first().map(|pending| pending.deadline)
    }

    /// Pops the earliest event whose deadline is not after `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<ScheduledEvent<E>> {
        match self.events.first() {
            Some(pending) if pending.deadline <= now => Some(self.events.remove(0)),
            _ => None,
        }
    }

    /// Drops every pending event.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_deadline_order() {
        let mut queue = TimerQueue::new();
        queue.schedule_at(2.0, "late");
        queue.schedule_at(1.0, "early");
        queue.schedule_at(1.0, "early-second");

        assert_eq!(queue.next_deadline(), Some(1.0));
        assert!(queue.pop_due(0.5).is_none());
        assert_eq!(queue.pop_due(1.0).unwrap().event, "early");
        assert_eq!(queue.pop_due(1.0).unwrap().event, "early-second");
        assert!(queue.pop_due(1.5).is_none());
        assert_eq!(queue.pop_due(5.0).unwrap().event, "late");
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut queue = TimerQueue::new();
        let id = queue.schedule_at(1.0, ());
        assert!(queue.is_pending(id));
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(queue.pop_due(10.0).is_none());
    }

    #[test]
    fn clock_counts_frames() {
        let mut clock = PlaybackClock::new(100);
        assert_eq!(clock.frames_until(0.5), 50);
        clock.advance_frames(50);
        assert_eq!(clock.now(), 0.5);
        assert_eq!(clock.frames_until(0.25), 0);
        assert_eq!(clock.frames_until(0.505), 1);
    }
}
