//! Task output plumbing: the root-future harness and the spawn handle.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::thread;

use crate::runtime::control::Ctl;

/// Where a root task's value, or the payload of its panic, ends up.
pub(crate) type OutputSlot<T> = Rc<RefCell<Option<thread::Result<T>>>>;

/// Adapter that runs a root future and captures its outcome.
///
/// The scheduler only ever sees a `Future<Output = ()>`; the typed value (or
/// the panic payload of a task that unwound) lands in the slot shared with
/// the task's [`TaskHandle`].
pub(crate) struct TaskFuture<F: Future> {
    future: CatchUnwind<F>,
    output: OutputSlot<F::Output>,
}

impl<F: Future> TaskFuture<F> {
    pub(crate) fn new(future: F) -> (Self, OutputSlot<F::Output>) {
        let output = Rc::new(RefCell::new(None));
        let task = TaskFuture {
            future: catch_unwind(future),
            output: output.clone(),
        };
        (task, output)
    }
}

impl<F: Future> Future for TaskFuture<F> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // Safety: future is structurally pinned and never moved out; the slot is Unpin.
        let this = unsafe { self.get_unchecked_mut() };
        let future = unsafe { Pin::new_unchecked(&mut this.future) };

        match future.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(outcome) => {
                *this.output.borrow_mut() = Some(outcome);
                Poll::Ready(())
            }
        }
    }
}

/// Awaitable counterpart of [`std::panic::catch_unwind`].
///
/// Resolves to `Err(payload)` if `future` panicked, letting a parent observe
/// a child's failure without failing itself:
///
/// ```
/// let outcome = coloop::runtime::start(async {
///     match coloop::runtime::catch_unwind(async { panic!("boom") }).await {
///         Ok(()) => "finished",
///         Err(_) => "panicked",
///     }
/// });
/// assert_eq!(outcome, "panicked");
/// ```
pub fn catch_unwind<F: Future>(future: F) -> CatchUnwind<F> {
    CatchUnwind(future)
}

/// Future returned by [`catch_unwind`].
pub struct CatchUnwind<F>(F);

impl<F: Future> Future for CatchUnwind<F> {
    type Output = thread::Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: the inner future is structurally pinned.
        let future = unsafe { self.map_unchecked_mut(|this| &mut this.0) };

        match panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

/// Owner of a spawned task's eventual result.
///
/// Returned by [`spawn`](crate::runtime::spawn); shares the task's control
/// block, so the handle outlives the scheduler's interest in the task.
pub struct TaskHandle<T> {
    ctl: Ctl,
    output: OutputSlot<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(ctl: Ctl, output: OutputSlot<T>) -> Self {
        TaskHandle { ctl, output }
    }

    /// Whether the task has run to completion (or panicked).
    pub fn is_finished(&self) -> bool {
        self.output.borrow().is_some()
    }

    /// Consumes the handle and returns the task's value.
    ///
    /// If the task panicked, the payload is resumed here. Panics if the task
    /// hasn't finished yet; drive the scheduler first.
    pub fn get(self) -> T {
        match self.output.borrow_mut().take() {
            Some(Ok(value)) => value,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => panic!("task result is not ready, drive the scheduler before calling get"),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task", &self.ctl)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::control::ControlBlock;
    use crate::utils;

    mod task_future {
        use super::*;

        #[test]
        fn value_lands_in_slot() {
            let (mut task, output) = TaskFuture::new(async { 123 });

            assert!(utils::poll_once(&mut task).is_ready());

            assert_eq!(output.borrow_mut().take().unwrap().unwrap(), 123);
        }

        #[test]
        fn panic_payload_lands_in_slot() {
            let (mut task, output) = TaskFuture::new(async { panic!("boom") });

            assert!(utils::poll_once(&mut task).is_ready());

            let outcome = output.borrow_mut().take().unwrap();
            let payload = outcome.unwrap_err();
            assert_eq!(*payload.downcast::<&str>().unwrap(), "boom");
        }
    }

    mod catch_unwind {
        use super::*;

        #[test]
        fn value_passes_through() {
            let mut future = super::super::catch_unwind(async { 123 });

            let outcome = utils::poll_once(&mut future);

            assert!(matches!(outcome, Poll::Ready(Ok(123))));
        }

        #[test]
        fn panic_becomes_err() {
            let mut future = super::super::catch_unwind(async { panic!("boom") });

            let Poll::Ready(outcome) = utils::poll_once(&mut future) else {
                panic!("future should have resolved");
            };

            assert_eq!(*outcome.unwrap_err().downcast::<&str>().unwrap(), "boom");
        }
    }

    mod task_handle {
        use super::*;

        fn handle_with<T>(outcome: Option<thread::Result<T>>) -> TaskHandle<T> {
            let ctl = ControlBlock::new(Box::pin(async {}));
            TaskHandle::new(ctl, Rc::new(RefCell::new(outcome)))
        }

        #[test]
        fn returns_stored_value() {
            let handle = handle_with(Some(Ok(123)));

            assert!(handle.is_finished());
            assert_eq!(handle.get(), 123);
        }

        #[test]
        #[should_panic(expected = "boom")]
        fn resumes_stored_panic() {
            let handle = handle_with::<i32>(Some(Err(Box::new("boom"))));

            handle.get();
        }

        #[test]
        #[should_panic(expected = "not ready")]
        fn get_before_completion_is_an_error() {
            let handle = handle_with::<i32>(None);

            assert!(!handle.is_finished());
            handle.get();
        }

        #[test]
        fn trait_implementations() {
            use impls::impls;
            use std::fmt::Debug;

            assert!(impls!(TaskHandle<i32>: Debug & !Send & !Sync & !Clone));
        }
    }
}
