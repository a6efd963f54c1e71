//! A simple single-threaded cooperative async runtime based on `select`.
//!
//! Tasks are plain futures driven to completion on one thread by a
//! [`runtime::Scheduler`]: an event loop over pluggable event queues. The
//! default queue set provides timers ([`time::sleep`]) and level-triggered fd
//! readiness ([`io::readable`], [`io::writable`]); new suspension sources
//! plug in through [`runtime::event_queue::EventQueue`].
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
//! There is no preemption and no work stealing: a task runs until it awaits,
//! and a directly awaited child runs inline on its parent's stack. Blocking
//! syscalls inside a task stall every other task on the scheduler.

pub mod io;
pub mod runtime;
pub mod time;
pub mod utils;
