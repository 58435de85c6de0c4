//! Periodic task scheduling
//!
//! Intervals are anchored to their first firing, so a late tick does not
//! push later deadlines back. Periods that were missed entirely are skipped
//! rather than replayed.

use swarmlink_core::{TimingConfig, Timestamp};

/// Fixed-period timer polled with the current time
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    period_ms: u64,
    next_due: Option<Timestamp>,
}

impl IntervalTimer {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(1),
            next_due: None,
        }
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }

    /// Whether the timer fires at `now`. The first poll always fires.
    pub fn poll(&mut self, now: Timestamp) -> bool {
        match self.next_due {
            None => {
                self.next_due = Some(now + self.period_ms);
                true
            }
            Some(due) if now >= due => {
                let missed = (now - due) / self.period_ms;
                self.next_due = Some(due + (missed + 1) * self.period_ms);
                true
            }
            Some(_) => false,
        }
    }
}

/// Periodic node tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    ModeCheck,
    Prune,
    Expire,
    Discovery,
    Positioning,
    RelayCheck,
    Status,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    timers: Vec<(Task, IntervalTimer)>,
}

impl Scheduler {
    pub fn new(timing: &TimingConfig) -> Self {
        // Mode first so sends in the same tick see the current mode
        let timers = vec![
            (Task::ModeCheck, IntervalTimer::new(timing.mode_check_interval_ms)),
            (Task::Prune, IntervalTimer::new(timing.prune_interval_ms)),
            (Task::Expire, IntervalTimer::new(timing.expire_interval_ms)),
            (Task::Discovery, IntervalTimer::new(timing.discovery_interval_ms)),
            (Task::Positioning, IntervalTimer::new(timing.positioning_interval_ms)),
            (Task::RelayCheck, IntervalTimer::new(timing.relay_check_interval_ms)),
            (Task::Status, IntervalTimer::new(timing.status_interval_ms)),
        ];
        Self { timers }
    }

    /// Tasks due at `now`, in execution order
    pub fn due(&mut self, now: Timestamp) -> Vec<Task> {
        self.timers
            .iter_mut()
            .filter_map(|(task, timer)| timer.poll(now).then_some(*task))
            .collect()
    }
}
