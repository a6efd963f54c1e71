//! Deadline-ordered wake-ups.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use log::trace;

use crate::runtime::control::{Ctl, ReadyQueue};
use crate::runtime::event_queue::{EventQueue, NextWake};

/// Min-heap of `(deadline, control block)` entries.
///
/// Routed requests are plain [`Instant`]s: the deadline the task sleeps
/// until. A task is never woken before its deadline; it is woken by the first
/// poll whose `now` is at or past it. Entries sharing a deadline may wake in
/// any order.
pub struct TimerQueue {
    timers: BinaryHeap<Timer>,
}

struct Timer {
    deadline: Instant,
    ctl: Ctl,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; inverting the comparison makes the
        // earliest deadline surface first.
        other.deadline.cmp(&self.deadline)
    }
}

impl TimerQueue {
    pub fn new() -> Self {
        TimerQueue {
            timers: BinaryHeap::new(),
        }
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue for TimerQueue {
    type Input = Instant;

    fn add(&mut self, deadline: Instant, ctl: Ctl) {
        trace!("timer armed for {deadline:?}");
        self.timers.push(Timer { deadline, ctl });
    }

    fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    fn poll(&mut self, ready: &mut ReadyQueue, now: Instant) -> NextWake {
        let mut produced = false;
        while let Some(timer) = self.timers.peek() {
            if timer.deadline > now {
                break;
            }

            if let Some(timer) = self.timers.pop() {
                trace!("timer due, waking task");
                ready.push_back(timer.ctl);
                produced = true;
            }
        }

        if produced {
            NextWake::Ready
        } else {
            match self.timers.peek() {
                Some(timer) => NextWake::At(timer.deadline),
                None => NextWake::Idle,
            }
        }
    }
}
