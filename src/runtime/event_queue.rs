//! Contracts that classify event queues, and the queue set a scheduler drives.
//!
//! An event queue is a source of readiness: awaiters deposit a request plus
//! the task's control block, and the scheduler polls the queue to move tasks
//! whose event arrived onto the ready queue. Queues are identified by their
//! [`EventQueue::Input`] type, so a scheduler routes an await request to the
//! matching queue without knowing the queue's concrete type.

use std::any::{Any, TypeId};
use std::io;
use std::time::Instant;

use crate::runtime::control::{Ctl, ReadyQueue};

/// What the scheduler should do next, as reported by a queue's poll.
///
/// The variant order is meaningful: `Ready` sorts before any deadline and
/// `Idle` after all of them, so the earliest wake-up across a set of queues
/// is a plain `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NextWake {
    /// At least one task was moved to the ready queue; don't block.
    Ready,
    /// Nothing became ready; the earliest pending deadline.
    At(Instant),
    /// The queue has no deadline to report.
    Idle,
}

/// A pluggable source of readiness.
pub trait EventQueue {
    /// The await-request type routed to this queue.
    type Input: 'static;

    /// Registers a request; `ctl` is pushed to the ready queue once the
    /// request completes.
    fn add(&mut self, input: Self::Input, ctl: Ctl);

    /// Whether the queue has no outstanding registrations.
    fn is_empty(&self) -> bool;

    /// Non-blocking poll: moves due entries onto `ready` and reports when this
    /// queue next needs attention.
    ///
    /// A queue with pending entries must either report a deadline here or
    /// offer a blocking poll, otherwise the scheduler has nothing to wait on.
    fn poll(&mut self, ready: &mut ReadyQueue, now: Instant) -> NextWake;

    /// The blocking poll surface, for the one queue per set that has one.
    fn as_blocking(&mut self) -> Option<&mut dyn BlockingQueue> {
        None
    }
}

/// The queue the scheduler parks on when no task is ready.
pub trait BlockingQueue {
    /// Waits for registered events, but not past `not_later_than`:
    /// [`NextWake::Ready`] means a zero timeout, [`NextWake::Idle`] no timeout
    /// at all. Transient multiplexer failures are retried internally; an
    /// error returned here is terminal for the scheduler.
    fn poll_blocking(
        &mut self,
        ready: &mut ReadyQueue,
        now: Instant,
        not_later_than: NextWake,
    ) -> io::Result<()>;
}

/// A scheduler's full complement of event queues.
///
/// Implemented for tuples of up to four [`EventQueue`]s. Await requests are
/// routed by input type, so every queue in a set must have a distinct
/// [`EventQueue::Input`] and at most one queue may be blocking;
/// [`QueueSet::validate`] asserts both when the scheduler is built.
pub trait QueueSet: 'static {
    /// Routes `request` (an `Option<Input>` behind `dyn Any`) to the queue
    /// whose input type matches. Returns false if no queue accepted it.
    fn route(&mut self, request: &mut dyn Any, ctl: &Ctl) -> bool;

    /// Non-blocking poll over every queue; the earliest [`NextWake`] wins.
    fn poll(&mut self, ready: &mut ReadyQueue, now: Instant) -> NextWake;

    /// Blocking poll on the set's blocking queue, or [`None`] if it has none.
    fn poll_blocking(
        &mut self,
        ready: &mut ReadyQueue,
        now: Instant,
        not_later_than: NextWake,
    ) -> Option<io::Result<()>>;

    /// Whether every queue in the set is empty.
    fn is_empty(&self) -> bool;

    /// Asserts the set's structural rules: distinct input types, at most one
    /// blocking queue.
    fn validate(&mut self);
}

macro_rules! impl_queue_set {
    ($($queue:ident => $index:tt),+) => {
        impl<$($queue: EventQueue + 'static),+> QueueSet for ($($queue,)+) {
            fn route(&mut self, request: &mut dyn Any, ctl: &Ctl) -> bool {
                $(
                    if let Some(slot) = request.downcast_mut::<Option<$queue::Input>>() {
                        let input = slot.take().expect("await request was already routed");
                        self.$index.add(input, ctl.clone());
                        return true;
                    }
                )+
                false
            }

            fn poll(&mut self, ready: &mut ReadyQueue, now: Instant) -> NextWake {
                let mut next = NextWake::Idle;
                $( next = next.min(self.$index.poll(ready, now)); )+
                next
            }

            fn poll_blocking(
                &mut self,
                ready: &mut ReadyQueue,
                now: Instant,
                not_later_than: NextWake,
            ) -> Option<io::Result<()>> {
                $(
                    if let Some(blocking) = self.$index.as_blocking() {
                        return Some(blocking.poll_blocking(ready, now, not_later_than));
                    }
                )+
                None
            }

            fn is_empty(&self) -> bool {
                true $(&& self.$index.is_empty())+
            }

            fn validate(&mut self) {
                let inputs = [$(TypeId::of::<$queue::Input>()),+];
                for (checked, input) in inputs.iter().enumerate() {
                    assert!(
                        !inputs[..checked].contains(input),
                        "two event queues share the same input type",
                    );
                }

                let blocking = 0 $(+ usize::from(self.$index.as_blocking().is_some()))+;
                assert!(
                    blocking <= 1,
                    "an event queue set may have at most one blocking queue",
                );
            }
        }
    };
}

impl_queue_set!(Q0 => 0);
impl_queue_set!(Q0 => 0, Q1 => 1);
impl_queue_set!(Q0 => 0, Q1 => 1, Q2 => 2);
impl_queue_set!(Q0 => 0, Q1 => 1, Q2 => 2, Q3 => 3);
