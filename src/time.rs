//! Timeouts and delays.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::runtime::tls;

/// Waits until `duration` has elapsed.
///
/// ```
/// use std::time::{Duration, Instant};
///
/// coloop::runtime::start(async {
///     let before = Instant::now();
///
///     coloop::time::sleep(Duration::from_millis(5)).await;
///
///     assert!(before.elapsed() >= Duration::from_millis(5));
/// });
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

/// Waits until `deadline`.
///
/// A deadline in the past resolves on the scheduler's next timer poll.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        armed: false,
    }
}

/// Future returned by [`sleep`] and [`sleep_until`].
///
/// Must be awaited from a task driven by a scheduler whose queue set handles
/// timers; polling it anywhere else panics.
#[derive(Debug)]
pub struct Sleep {
    deadline: Instant,
    armed: bool,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if !self.armed {
            let mut request = Some(self.deadline);
            tls::push_request(&mut request);
            self.armed = true;
            return Poll::Pending;
        }

        // The timer queue holds the registration until the deadline, so an
        // early poll can stay pending without re-arming.
        if Instant::now() >= self.deadline {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
