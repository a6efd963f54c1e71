use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Drives `future` through a single poll with a no-op waker.
///
/// Handy for exercising a future's state machine without a scheduler.
pub fn poll_once<F: Future>(future: &mut F) -> Poll<F::Output> {
    let waker = noop_waker::noop_waker();
    let mut context = Context::from_waker(&waker);

    // Safety: the caller's &mut keeps the future in place for the call
    let future = unsafe { Pin::new_unchecked(future) };

    future.poll(&mut context)
}
