//! Fd readiness awaiters.
//!
//! The I/O surface is deliberately thin: a raw fd plus an interest. The fd is
//! expected to be non-blocking, since readiness only says a read or write
//! won't block *right now*, and a blocking fd would stall the scheduler
//! thread the moment the task acts on it. Readiness is level-triggered: an undrained fd
//! reports ready again on its next registration.
//!
//! Errors travel in-band: the awaiter resolves to an [`io::Result`] instead
//! of unwinding, so a closed peer is an ordinary value to match on.

use std::cell::Cell;
use std::future::Future;
use std::io;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::runtime::io_queue::{ErrorSlot, IoRegistration, PENDING};
use crate::runtime::tls;

/// Readiness kind awaited on an fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// A single fd readiness request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoWait {
    pub interest: Interest,
    pub fd: RawFd,
}

/// Waits until `fd` is readable.
///
/// Resolves to `Err` with `EINVAL` for an fd the multiplexer can't watch and
/// `EBADF` for an fd closed while registered; the fd is not validated
/// eagerly.
pub fn readable(fd: RawFd) -> Readiness {
    Readiness::new(Interest::Read, fd)
}

/// Waits until `fd` is writable.
///
/// Same error contract as [`readable`].
pub fn writable(fd: RawFd) -> Readiness {
    Readiness::new(Interest::Write, fd)
}

/// Future returned by [`readable`] and [`writable`].
///
/// Must be awaited from a task driven by a scheduler whose queue set handles
/// fd readiness; polling it anywhere else panics.
#[derive(Debug)]
pub struct Readiness {
    wait: IoWait,
    error: ErrorSlot,
    armed: bool,
}

impl Readiness {
    fn new(interest: Interest, fd: RawFd) -> Self {
        Readiness {
            wait: IoWait { interest, fd },
            error: Rc::new(Cell::new(PENDING)),
            armed: false,
        }
    }
}

impl Future for Readiness {
    type Output = io::Result<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.armed {
            let mut request = Some(IoRegistration {
                wait: self.wait,
                error: self.error.clone(),
            });
            tls::push_request(&mut request);
            self.armed = true;
            return Poll::Pending;
        }

        match self.error.get() {
            PENDING => Poll::Pending,
            0 => Poll::Ready(Ok(())),
            errno => Poll::Ready(Err(io::Error::from_raw_os_error(errno))),
        }
    }
}
