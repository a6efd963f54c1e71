//! The scheduler: a ready queue, a set of event queues, and the loop that
//! drives tasks over them.
//!
//! Tasks are plain futures. Handing one to [`Scheduler::start`] (or the free
//! [`start`]) registers it, runs the event loop until every task is done, and
//! returns its output:
//!
//! ```
//! use std::time::Duration;
//!
//! let answer = coloop::runtime::start(async {
//!     coloop::time::sleep(Duration::from_millis(1)).await;
//!     42
//! });
//!
//! assert_eq!(answer, 42);
//! ```
//!
//! Each loop iteration resumes at most one task; a resumed task runs
//! uninterrupted until its next await point, and a directly awaited child
//! runs inline on the parent's stack. Readiness flows exclusively through the
//! scheduler's event queues: tasks are polled with a no-op waker, so a
//! future woken by some other thread's [`std::task::Waker`] will never be
//! re-polled here.

use std::any::Any;
use std::cell::RefCell;
use std::future::Future;
use std::io;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Instant;

use log::trace;

pub mod control;
pub mod event_queue;
pub mod io_queue;
pub mod timer_queue;

mod task;
pub(crate) mod tls;

pub use task::{catch_unwind, CatchUnwind, TaskHandle};

use control::{ControlBlock, Ctl, ReadyQueue};
use event_queue::{NextWake, QueueSet};
use io_queue::SelectQueue;
use task::TaskFuture;
use timer_queue::TimerQueue;

/// The queue set a scheduler is built with by default: timers plus
/// select-based fd readiness.
pub type DefaultQueues = (TimerQueue, SelectQueue);

/// Terminal failure of the scheduler loop.
///
/// Task panics are not errors at this level; they are captured per task and
/// surface through [`TaskHandle::get`].
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    /// The blocking event queue failed in a way that isn't transient.
    #[error("event queue poll failed: {0}")]
    Poll(#[from] io::Error),

    /// Tasks are pending but no event source is able to wake them.
    #[error("scheduler stalled: tasks are pending but no event source can wake them")]
    Stalled,
}

/// Surface awaiters and `spawn` reach through thread-local storage while a
/// task is being resumed.
pub(crate) trait PushContext {
    fn push_to_queue(&mut self, request: &mut dyn Any, ctl: &Ctl);
    fn push_ready(&mut self, ctl: Ctl);
}

struct Shared<Qs> {
    queues: Qs,
    ready: ReadyQueue,
}

impl<Qs: QueueSet> PushContext for Shared<Qs> {
    fn push_to_queue(&mut self, request: &mut dyn Any, ctl: &Ctl) {
        assert!(
            self.queues.route(request, ctl),
            "no event queue accepts this await request type",
        );
    }

    fn push_ready(&mut self, ctl: Ctl) {
        self.ready.push_back(ctl);
    }
}

/// Single-threaded cooperative scheduler over a set of event queues.
pub struct Scheduler<Qs: QueueSet = DefaultQueues> {
    shared: Rc<RefCell<Shared<Qs>>>,
}

impl Scheduler {
    /// A scheduler with the [`DefaultQueues`].
    pub fn new() -> Self {
        Self::with_queues((TimerQueue::new(), SelectQueue::new()))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl<Qs: QueueSet> Scheduler<Qs> {
    /// Builds a scheduler around a custom queue set.
    ///
    /// Panics if two queues share an input type, or more than one queue is
    /// blocking.
    pub fn with_queues(mut queues: Qs) -> Self {
        queues.validate();
        Scheduler {
            shared: Rc::new(RefCell::new(Shared {
                queues,
                ready: ReadyQueue::new(),
            })),
        }
    }

    /// Another handle to the same scheduler.
    pub(crate) fn alias(&self) -> Self {
        Scheduler {
            shared: Rc::clone(&self.shared),
        }
    }

    /// Registers a task to be driven by the next [`run`](Self::run).
    ///
    /// The task starts suspended; nothing executes until the scheduler is
    /// driven. If the task panics and its handle was dropped, the panic is
    /// swallowed, same as ignoring a spawned task's return value.
    pub fn spawn<F>(&self, future: F) -> TaskHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        spawn_onto(&mut *self.shared.borrow_mut(), future)
    }

    /// Executes one scheduler iteration, resuming at most one task.
    ///
    /// Returns `Ok(false)` once the ready queue and every event queue are
    /// empty.
    pub fn step(&self) -> Result<bool, RunError> {
        assert!(
            !tls::is_running(),
            "the scheduler may not be driven from inside a running task",
        );

        {
            let shared = self.shared.borrow();
            if shared.ready.is_empty() && shared.queues.is_empty() {
                return Ok(false);
            }
        }

        // Collect due events from every queue, then wait on the blocking one:
        // until the earliest deadline if nothing is ready yet, not at all
        // otherwise.
        let now = Instant::now();
        let (waited, next) = {
            let shared = &mut *self.shared.borrow_mut();
            let next = shared.queues.poll(&mut shared.ready, now);
            let deadline = if shared.ready.is_empty() { next } else { NextWake::Ready };

            match shared.queues.poll_blocking(&mut shared.ready, now, deadline) {
                Some(outcome) => {
                    outcome?;
                    (true, next)
                }
                None => (false, deadline),
            }
        };

        if !waited {
            // no blocking queue in the set: idle cooperatively
            match next {
                NextWake::Ready => {}
                NextWake::At(deadline) => {
                    thread::sleep(deadline.saturating_duration_since(Instant::now()));
                }
                NextWake::Idle => return Err(RunError::Stalled),
            }
        }

        let resumable = self.shared.borrow_mut().ready.pop_front();
        if let Some(ctl) = resumable {
            self.resume(ctl);
        }

        Ok(true)
    }

    /// Drives tasks until the ready queue and every event queue are empty.
    pub fn run(&self) -> Result<(), RunError> {
        trace!("scheduler loop starting");
        while self.step()? {}
        trace!("scheduler loop finished");
        Ok(())
    }

    /// Spawns `future`, runs the scheduler to completion, and returns the
    /// task's output; equivalent to `spawn`, `run`, `get`.
    ///
    /// A panic inside the task is resumed here.
    pub fn start<F>(&self, future: F) -> F::Output
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let handle = self.spawn(future);
        self.run().expect("scheduler failed while driving the task");
        handle.get()
    }

    fn resume(&self, ctl: Ctl) {
        let Some(mut root) = ctl.take_root() else {
            return;
        };

        let context: Rc<RefCell<dyn PushContext>> = self.shared.clone();
        let _guard = tls::enter(tls::CurrentTask {
            context,
            ctl: ctl.clone(),
        });

        let waker = noop_waker::noop_waker();
        let mut cx = Context::from_waker(&waker);

        trace!("resuming task");
        match root.as_mut().poll(&mut cx) {
            Poll::Pending => ctl.put_back(root),
            Poll::Ready(()) => trace!("task finished"),
        }
    }
}

fn spawn_onto<F>(context: &mut dyn PushContext, future: F) -> TaskHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    let (task, output) = TaskFuture::new(future);
    let ctl = ControlBlock::new(Box::pin(task));
    context.push_ready(ctl.clone());
    TaskHandle::new(ctl, output)
}

/// Spawns a task onto the scheduler running on this thread, or onto the
/// thread's default scheduler when called outside of one.
///
/// Same panic-swallowing caveat as [`Scheduler::spawn`]: drop the handle and
/// a failure in the task goes unobserved.
pub fn spawn<F>(future: F) -> TaskHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    match tls::with_running(|task| task.context.clone()) {
        Some(context) => spawn_onto(&mut *context.borrow_mut(), future),
        None => tls::facade().spawn(future),
    }
}

/// Runs `future` to completion on this thread's default scheduler and
/// returns its output.
pub fn start<F>(future: F) -> F::Output
where
    F: Future + 'static,
    F::Output: 'static,
{
    assert!(
        !tls::is_running(),
        "cannot start a scheduler from inside a running task, spawn the future instead",
    );
    tls::facade().start(future)
}

/// Drives this thread's default scheduler until it is idle.
///
/// Useful after [`spawn`]ing from outside any task.
pub fn run() -> Result<(), RunError> {
    assert!(
        !tls::is_running(),
        "cannot run a scheduler from inside a running task",
    );
    tls::facade().run()
}
