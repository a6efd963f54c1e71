//! Level-triggered fd readiness backed by `select(2)`.

use std::cell::Cell;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::trace;
use slab::Slab;

use crate::io::{Interest, IoWait};
use crate::runtime::control::{Ctl, ReadyQueue};
use crate::runtime::event_queue::{BlockingQueue, EventQueue, NextWake};

/// Errno slot shared between a registration and its awaiter.
///
/// Holds [`PENDING`] until the registration completes, then `0` for success
/// or the errno describing why the fd will never become ready.
pub type ErrorSlot = Rc<Cell<libc::c_int>>;

/// Sentinel value of an [`ErrorSlot`] whose registration hasn't completed.
pub const PENDING: libc::c_int = -1;

/// An fd readiness request, as routed to the [`SelectQueue`].
#[derive(Debug, Clone)]
pub struct IoRegistration {
    pub wait: IoWait,
    pub error: ErrorSlot,
}

/// Readiness queue multiplexing over `select(2)`.
///
/// Readiness is level-triggered: completing a registration removes it from
/// the queue, but an undrained fd fires again the moment it is re-registered.
/// Duplicate registrations for the same fd are independent entries. A
/// registration is never silently dropped; it stays queued, completes with
/// success, or completes with an errno in its slot:
///
/// - `EINVAL` for fds `select` can never watch (negative, or at or beyond
///   `FD_SETSIZE`),
/// - `EBADF` for fds that were closed while registered,
/// - `0` once the fd is readable/writable.
pub struct SelectQueue {
    entries: Slab<Entry>,
}

struct Entry {
    wait: IoWait,
    error: ErrorSlot,
    ctl: Ctl,
}

impl SelectQueue {
    const RESERVED_REGISTRATIONS: usize = 16;

    pub fn new() -> Self {
        SelectQueue {
            entries: Slab::with_capacity(Self::RESERVED_REGISTRATIONS),
        }
    }

    /// Completes registrations `select` can never watch with `EINVAL`.
    fn complete_invalid(&mut self, ready: &mut ReadyQueue) -> bool {
        let mut produced = false;
        self.entries.retain(|_, entry| {
            let fd = entry.wait.fd;
            if fd >= 0 && (fd as usize) < libc::FD_SETSIZE {
                return true;
            }

            trace!("fd {fd} can't be watched, completing with EINVAL");
            entry.error.set(libc::EINVAL);
            ready.push_back(entry.ctl.clone());
            produced = true;
            false
        });
        produced
    }

    /// `select` reported `EBADF`: probe every registered fd and complete the
    /// closed ones. O(N), but only runs on that failure.
    fn expel_closed(&mut self, ready: &mut ReadyQueue) {
        self.entries.retain(|_, entry| {
            if unsafe { libc::fcntl(entry.wait.fd, libc::F_GETFD) } != -1 {
                return true;
            }

            trace!("fd {} was closed while registered, completing with EBADF", entry.wait.fd);
            entry.error.set(libc::EBADF);
            ready.push_back(entry.ctl.clone());
            false
        });
    }
}

impl Default for SelectQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue for SelectQueue {
    type Input = IoRegistration;

    fn add(&mut self, input: IoRegistration, ctl: Ctl) {
        trace!("watching fd {} for {:?}", input.wait.fd, input.wait.interest);
        self.entries.insert(Entry {
            wait: input.wait,
            error: input.error,
            ctl,
        });
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn poll(&mut self, ready: &mut ReadyQueue, _now: Instant) -> NextWake {
        // The non-blocking pass completes only what needs no syscall; actual
        // readiness is gathered by the blocking poll.
        if self.complete_invalid(ready) {
            NextWake::Ready
        } else {
            NextWake::Idle
        }
    }

    fn as_blocking(&mut self) -> Option<&mut dyn BlockingQueue> {
        Some(self)
    }
}

impl BlockingQueue for SelectQueue {
    fn poll_blocking(
        &mut self,
        ready: &mut ReadyQueue,
        now: Instant,
        not_later_than: NextWake,
    ) -> io::Result<()> {
        let mut now = now;
        let mut deadline = not_later_than;
        if self.complete_invalid(ready) {
            deadline = NextWake::Ready;
        }

        loop {
            if self.entries.is_empty() && deadline == NextWake::Idle {
                // nothing registered and no deadline: nothing to wait for
                return Ok(());
            }

            let mut read_set = empty_fd_set();
            let mut write_set = empty_fd_set();
            let mut max_fd: RawFd = -1;
            for (_, entry) in self.entries.iter() {
                let set = match entry.wait.interest {
                    Interest::Read => &mut read_set,
                    Interest::Write => &mut write_set,
                };
                unsafe { libc::FD_SET(entry.wait.fd, set) };
                max_fd = max_fd.max(entry.wait.fd);
            }

            let mut timeout = match deadline {
                NextWake::Ready => Some(as_timeval(Duration::ZERO)),
                NextWake::At(at) => Some(as_timeval(at.saturating_duration_since(now))),
                NextWake::Idle => None,
            };
            let timeout_ptr = timeout
                .as_mut()
                .map_or(ptr::null_mut(), |tv| tv as *mut libc::timeval);

            trace!("select on {} registrations, deadline {deadline:?}", self.entries.len());
            let count = unsafe {
                libc::select(
                    max_fd + 1,
                    &mut read_set,
                    &mut write_set,
                    ptr::null_mut(),
                    timeout_ptr,
                )
            };

            if count < 0 {
                let error = io::Error::last_os_error();
                match error.raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EAGAIN) => {
                        now = Instant::now();
                        continue;
                    }
                    Some(libc::EBADF) => {
                        self.expel_closed(ready);
                        // the survivors get one more look, without waiting
                        deadline = NextWake::Ready;
                        now = Instant::now();
                        continue;
                    }
                    _ => return Err(error),
                }
            }

            trace!("select reported {count} ready fds");
            self.entries.retain(|_, entry| {
                let set = match entry.wait.interest {
                    Interest::Read => &read_set,
                    Interest::Write => &write_set,
                };
                if unsafe { libc::FD_ISSET(entry.wait.fd, set) } {
                    entry.error.set(0);
                    ready.push_back(entry.ctl.clone());
                    false
                } else {
                    true
                }
            });
            return Ok(());
        }
    }
}

fn empty_fd_set() -> libc::fd_set {
    let mut set = unsafe { mem::zeroed::<libc::fd_set>() };
    unsafe { libc::FD_ZERO(&mut set) };
    set
}

fn as_timeval(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}
