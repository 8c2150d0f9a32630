//! Dealer subsystem: routes decoded frames to user handlers.
//!
//! Three independent routers — events, requests, responses — each own a
//! registration table behind a reader/writer lock and one inbound
//! channel fed by the connection's read pump. Each runs its own
//! dispatch loop; handler invocations are spawned fire-and-forget so a
//! slow handler never stalls delivery of subsequent frames.

mod event;
mod request;
mod response;

pub(crate) use event::EventDealer;
pub(crate) use request::{RequestDealer, RequestDispatch};
pub(crate) use response::ResponseDealer;

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::api::{Event, Request, Response};

pub(crate) type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type RequestHandler =
    Arc<dyn Fn(Request, Response) -> BoxFuture<'static, ()> + Send + Sync>;
pub(crate) type ResponseHandler = Arc<dyn Fn(Response) -> BoxFuture<'static, ()> + Send + Sync>;

/// Counts outstanding handler tasks for one connection so shutdown can
/// wait for them instead of leaking ungoverned tasks.
pub(crate) struct TaskTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl TaskTracker {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            idle: Notify::new(),
        })
    }

    /// Spawn a tracked handler task. The count is released on drop, so
    /// aborted tasks are accounted for as well.
    pub(crate) fn spawn<F>(self: &Arc<Self>, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.guard();
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        })
    }

    /// Acquire a unit of tracked work without spawning.
    pub(crate) fn guard(self: &Arc<Self>) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveGuard(Arc::clone(self))
    }

    /// Number of handler tasks currently running.
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait until no handler task is running.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// RAII counter for one running handler task.
pub(crate) struct ActiveGuard(Arc<TaskTracker>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}
