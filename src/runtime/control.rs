//! Control blocks: the unit of scheduling shared between the ready queue,
//! the event queues, and task handles.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

pub(crate) type RootFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Per-task-tree record owning the root future.
///
/// Everything a task tree suspends on is reachable from its root future, so
/// owning the root owns the whole chain of pending await points. The block is
/// shared through [`Ctl`]: the event queue holding a suspended task keeps it
/// alive, and so does the task's [`TaskHandle`](crate::runtime::TaskHandle).
/// Dropping the last reference drops the root future and with it every
/// suspended child below it.
pub struct ControlBlock {
    root: RefCell<Option<RootFuture>>,
}

impl ControlBlock {
    pub(crate) fn new(root: RootFuture) -> Ctl {
        Rc::new(ControlBlock {
            root: RefCell::new(Some(root)),
        })
    }

    /// Takes the root future out for polling.
    ///
    /// Returns [`None`] once the task has run to completion.
    pub(crate) fn take_root(&self) -> Option<RootFuture> {
        self.root.borrow_mut().take()
    }

    /// Puts a still-pending root future back after polling.
    pub(crate) fn put_back(&self, root: RootFuture) {
        *self.root.borrow_mut() = Some(root);
    }

    fn is_finished(&self) -> bool {
        self.root.borrow().is_none()
    }
}

impl fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Shared handle to a [`ControlBlock`].
pub type Ctl = Rc<ControlBlock>;

/// FIFO of control blocks awaiting resumption.
///
/// The scheduler pops from the front; event queues push ready tasks onto the
/// back, so readiness order is preserved downstream.
pub type ReadyQueue = VecDeque<Ctl>;
