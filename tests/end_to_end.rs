//! End-to-end scenarios driving the whole runtime: timers, fd readiness,
//! panic propagation, and the scheduler loop working together.

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

use coloop::runtime::{self, Scheduler};
use coloop::{io, time};

async fn faulty_task() -> i32 {
    time::sleep(Duration::from_millis(5)).await;
    panic!("Simulated task error");
}

fn payload_message(payload: &(dyn std::any::Any + Send)) -> &str {
    *payload
        .downcast_ref::<&str>()
        .expect("panic payload should be a str message")
}

fn eventfd() -> RawFd {
    let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };
    assert_ne!(fd, -1);
    fd
}

fn write_eventfd(fd: RawFd, value: u64) {
    let written = unsafe { libc::write(fd, &value as *const u64 as *const libc::c_void, 8) };
    assert_eq!(written, 8);
}

fn close(fd: RawFd) {
    assert_eq!(unsafe { libc::close(fd) }, 0);
}

#[test]
fn blink_returns_after_ten_waits() {
    let scheduler = Scheduler::new();
    let before = Instant::now();

    let output = scheduler.start(async {
        for blink in 0..10 {
            println!("blink {blink}");
            time::sleep(Duration::from_millis(5)).await;
        }
        42
    });

    assert_eq!(output, 42);
    assert!(before.elapsed() >= Duration::from_millis(50));
    assert!(!scheduler.step().unwrap(), "nothing should remain queued");
}

#[test]
fn start_rethrows_task_panic() {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        Scheduler::new().start(faulty_task())
    }));

    let payload = outcome.unwrap_err();
    assert_eq!(payload_message(payload.as_ref()), "Simulated task error");
}

#[test]
fn parent_catches_child_panic() {
    let output = Scheduler::new().start(async {
        match runtime::catch_unwind(faulty_task()).await {
            Ok(value) => value,
            Err(payload) => {
                assert_eq!(payload_message(payload.as_ref()), "Simulated task error");
                -1
            }
        }
    });

    assert_eq!(output, -1);
}

#[test]
fn grandparent_catches_child_panic() {
    let output = Scheduler::new().start(async {
        let inner = async { faulty_task().await };
        match runtime::catch_unwind(inner).await {
            Ok(value) => value,
            Err(_) => -1,
        }
    });

    assert_eq!(output, -1);
}

#[test]
fn spawned_task_panic_surfaces_through_handle() {
    let output = Scheduler::new().start(async {
        let handle = runtime::spawn(faulty_task());
        time::sleep(Duration::from_millis(20)).await;

        assert!(handle.is_finished());
        match panic::catch_unwind(AssertUnwindSafe(|| handle.get())) {
            Ok(value) => value,
            Err(payload) => {
                assert_eq!(payload_message(payload.as_ref()), "Simulated task error");
                -1
            }
        }
    });

    assert_eq!(output, -1);
}

#[test]
fn discarded_handle_swallows_panic() {
    let output = Scheduler::new().start(async {
        let _ = runtime::spawn(faulty_task());
        time::sleep(Duration::from_millis(20)).await;
        0
    });

    assert_eq!(output, 0);
}

#[test]
fn readiness_fans_in_one_fd_at_a_time() {
    let (first, second) = (eventfd(), eventfd());
    let order = Rc::new(RefCell::new(Vec::new()));

    Scheduler::new().start({
        let order = order.clone();
        async move {
            runtime::spawn({
                let order = order.clone();
                async move {
                    io::readable(first).await.unwrap();
                    order.borrow_mut().push("first");
                }
            });
            runtime::spawn({
                let order = order.clone();
                async move {
                    io::readable(second).await.unwrap();
                    order.borrow_mut().push("second");
                }
            });

            time::sleep(Duration::from_millis(2)).await;
            write_eventfd(second, 21);
            time::sleep(Duration::from_millis(2)).await;
            write_eventfd(first, 42);
        }
    });

    // delivery tracks fd readiness, not registration order
    assert_eq!(*order.borrow(), ["second", "first"]);

    close(first);
    close(second);
}

#[test]
fn closing_a_registered_fd_delivers_bad_file_descriptor() {
    let fd = eventfd();

    let error = Scheduler::new().start(async move {
        runtime::spawn(async move {
            close(fd);
        });

        io::readable(fd).await.unwrap_err()
    });

    assert_eq!(error.raw_os_error(), Some(libc::EBADF));
}

#[test]
fn timers_fire_in_deadline_order() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let start = Instant::now();

    Scheduler::new().start({
        let order = order.clone();
        async move {
            for delay in [30u64, 10, 20] {
                runtime::spawn({
                    let order = order.clone();
                    async move {
                        time::sleep_until(start + Duration::from_millis(delay)).await;
                        order.borrow_mut().push(delay);
                    }
                });
            }

            time::sleep(Duration::from_millis(50)).await;
        }
    });

    assert_eq!(*order.borrow(), [10, 20, 30]);
}

#[test]
fn start_is_spawn_run_get() {
    let scheduler = Scheduler::new();

    let handle = scheduler.spawn(async {
        time::sleep(Duration::from_millis(1)).await;
        42
    });
    scheduler.run().unwrap();
    let spawned = handle.get();

    let started = Scheduler::new().start(async {
        time::sleep(Duration::from_millis(1)).await;
        42
    });

    assert_eq!(spawned, started);
}

#[test]
fn sibling_tasks_interleave_on_timers() {
    let order = Rc::new(RefCell::new(Vec::new()));

    Scheduler::new().start({
        let order = order.clone();
        async move {
            runtime::spawn({
                let order = order.clone();
                async move {
                    for _ in 0..3 {
                        time::sleep(Duration::from_millis(4)).await;
                        order.borrow_mut().push("slow");
                    }
                }
            });

            for _ in 0..3 {
                time::sleep(Duration::from_millis(2)).await;
                order.borrow_mut().push("fast");
            }

            time::sleep(Duration::from_millis(20)).await;
        }
    });

    assert_eq!(order.borrow().iter().filter(|task| **task == "fast").count(), 3);
    assert_eq!(order.borrow().iter().filter(|task| **task == "slow").count(), 3);
    assert_eq!(order.borrow().first(), Some(&"fast"));
}

#[test]
fn wait_then_clock_read_is_past_deadline() {
    Scheduler::new().start(async {
        let deadline = Instant::now() + Duration::from_millis(10);

        time::sleep_until(deadline).await;

        assert!(Instant::now() >= deadline);
    });
}

#[test]
fn facade_spawn_then_run_drives_the_task() {
    let handle = runtime::spawn(async {
        time::sleep(Duration::from_millis(1)).await;
        123
    });

    assert!(!handle.is_finished());
    runtime::run().unwrap();

    assert_eq!(handle.get(), 123);
}
