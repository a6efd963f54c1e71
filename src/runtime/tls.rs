//! Thread-local plumbing.
//!
//! Two pieces of state live here: the resume context awaiters route their
//! requests through (set for the duration of each task resume), and the
//! lazily-created scheduler backing the free `spawn`/`start`/`run` functions.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::control::Ctl;
use crate::runtime::{PushContext, Scheduler};

/// The task currently being resumed and the scheduler resuming it.
pub(crate) struct CurrentTask {
    pub(crate) context: Rc<RefCell<dyn PushContext>>,
    pub(crate) ctl: Ctl,
}

thread_local! {
    /// Set while the scheduler resumes a task; cleared when the resume ends.
    static CURRENT: RefCell<Option<CurrentTask>> = RefCell::new(None);

    /// Scheduler behind the free functions, created on first use.
    static FACADE: RefCell<Option<Scheduler>> = RefCell::new(None);
}

/// Marks `task` as the one being resumed until the returned guard drops.
pub(crate) fn enter(task: CurrentTask) -> ResumeGuard {
    CURRENT.with(|current| {
        let mut slot = current.borrow_mut();
        assert!(slot.is_none(), "a task is already being resumed on this thread");
        *slot = Some(task);
    });
    ResumeGuard
}

pub(crate) struct ResumeGuard;

impl Drop for ResumeGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| current.borrow_mut().take());
    }
}

/// Whether this thread is currently inside a task resume.
pub(crate) fn is_running() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// Runs `f` against the running task, if any.
pub(crate) fn with_running<T>(f: impl FnOnce(&CurrentTask) -> T) -> Option<T> {
    CURRENT.with(|current| current.borrow().as_ref().map(f))
}

/// Routes an await request from the running task to its matching event queue.
pub(crate) fn push_request(request: &mut dyn Any) {
    CURRENT.with(|current| {
        let slot = current.borrow();
        let task = slot.as_ref().expect(
            "there is no scheduler running on this thread, drive the task with runtime::start",
        );
        task.context.borrow_mut().push_to_queue(request, &task.ctl);
    });
}

/// A handle to this thread's default scheduler, creating it on first use.
pub(crate) fn facade() -> Scheduler {
    FACADE.with(|cell| {
        let mut slot = cell.borrow_mut();
        slot.get_or_insert_with(Scheduler::new).alias()
    })
}
