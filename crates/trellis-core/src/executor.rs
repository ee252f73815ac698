//! Single-threaded executor for component async work.
//!
//! Futures run on the UI thread when the host drains the runtime. Wakers
//! are thread-safe and only enqueue the task id and ask the scheduler for a
//! frame. Cancellation is cooperative: the future is dropped at its next
//! turn, and callbacks registered through [`AsyncScope::on_cancel`] run.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_task::ArcWake;

use crate::collections::map::HashMap;
use crate::platform::RuntimeScheduler;
use crate::runtime::RuntimeHandle;

pub(crate) type LocalBoxFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Completed,
    Cancelled,
    /// The future panicked; the panic was logged and suppressed.
    Failed,
}

struct TaskShared {
    state: Cell<TaskState>,
    cancel_requested: Cell<bool>,
    on_cancel: RefCell<Vec<Box<dyn FnOnce()>>>,
    on_finish: RefCell<Vec<Box<dyn FnOnce(TaskState)>>>,
}

impl TaskShared {
    fn new() -> Self {
        Self {
            state: Cell::new(TaskState::Pending),
            cancel_requested: Cell::new(false),
            on_cancel: RefCell::new(Vec::new()),
            on_finish: RefCell::new(Vec::new()),
        }
    }
}

/// Ids of tasks ready to be polled. Shared with wakers, which may be
/// invoked from any thread.
pub(crate) struct ReadyQueue {
    queue: Mutex<VecDeque<TaskId>>,
    scheduler: Arc<dyn RuntimeScheduler>,
}

impl ReadyQueue {
    fn push(&self, id: TaskId) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(id);
        }
        self.scheduler.schedule_frame();
    }

    fn pop(&self) -> Option<TaskId> {
        self.queue.lock().ok().and_then(|mut queue| queue.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.queue.lock().map(|queue| queue.is_empty()).unwrap_or(true)
    }
}

struct TaskWaker {
    id: TaskId,
    ready: Arc<ReadyQueue>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.ready.push(arc_self.id);
    }
}

/// Handle to a spawned task.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    shared: Rc<TaskShared>,
    ready: Arc<ReadyQueue>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.shared.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.state() != TaskState::Pending
    }

    /// Requests cancellation. Idempotent; the future is dropped the next
    /// time the executor drains.
    pub fn cancel(&self) {
        if self.is_finished() || self.shared.cancel_requested.replace(true) {
            return;
        }
        self.ready.push(self.id);
    }

    pub(crate) fn on_finish(&self, callback: impl FnOnce(TaskState) + 'static) {
        if self.is_finished() {
            callback(self.state());
        } else {
            self.shared.on_finish.borrow_mut().push(Box::new(callback));
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Passed to async work so it can observe its own cancellation.
#[derive(Clone)]
pub struct AsyncScope {
    shared: Rc<TaskShared>,
    runtime: RuntimeHandle,
}

impl AsyncScope {
    /// `false` once cancellation was requested or the task finished.
    pub fn is_active(&self) -> bool {
        !self.shared.cancel_requested.get() && self.shared.state.get() == TaskState::Pending
    }

    /// Registers a callback run when the task is cancelled. Runs
    /// immediately if cancellation already happened.
    pub fn on_cancel(&self, callback: impl FnOnce() + 'static) {
        if self.shared.state.get() == TaskState::Cancelled {
            callback();
        } else {
            self.shared.on_cancel.borrow_mut().push(Box::new(callback));
        }
    }

    pub fn runtime(&self) -> RuntimeHandle {
        self.runtime.clone()
    }
}

struct TaskEntry {
    future: Option<LocalBoxFuture>,
    shared: Rc<TaskShared>,
}

pub(crate) struct Executor {
    next_id: Cell<u64>,
    tasks: RefCell<HashMap<TaskId, TaskEntry>>,
    ready: Arc<ReadyQueue>,
}

impl Executor {
    pub(crate) fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            next_id: Cell::new(1),
            tasks: RefCell::new(HashMap::default()),
            ready: Arc::new(ReadyQueue {
                queue: Mutex::new(VecDeque::new()),
                scheduler,
            }),
        }
    }

    pub(crate) fn spawn(
        &self,
        runtime: RuntimeHandle,
        factory: impl FnOnce(AsyncScope) -> LocalBoxFuture,
    ) -> TaskHandle {
        let id = TaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let shared = Rc::new(TaskShared::new());
        let handle = TaskHandle {
            id,
            shared: shared.clone(),
            ready: self.ready.clone(),
        };
        let scope = AsyncScope {
            shared: shared.clone(),
            runtime,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| factory(scope))) {
            Ok(future) => {
                self.tasks.borrow_mut().insert(
                    id,
                    TaskEntry {
                        future: Some(future),
                        shared,
                    },
                );
                self.ready.push(id);
                log::trace!("spawned {id}");
            }
            Err(payload) => {
                log::warn!("async factory for {id} panicked: {}", panic_message(&*payload));
                shared.state.set(TaskState::Failed);
            }
        }
        handle
    }

    /// Polls every ready task until the ready queue is empty. Returns the
    /// number of polls performed.
    pub(crate) fn drain(&self) -> usize {
        let mut polls = 0;
        while let Some(id) = self.ready.pop() {
            let taken = {
                let mut tasks = self.tasks.borrow_mut();
                tasks
                    .get_mut(&id)
                    .and_then(|entry| entry.future.take().map(|future| (future, entry.shared.clone())))
            };
            let Some((mut future, shared)) = taken else {
                continue;
            };
            if shared.cancel_requested.get() {
                drop(future);
                self.finish(id, &shared, TaskState::Cancelled);
                continue;
            }
            polls += 1;
            let waker = futures_task::waker(Arc::new(TaskWaker {
                id,
                ready: self.ready.clone(),
            }));
            let mut cx = Context::from_waker(&waker);
            match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
                Ok(Poll::Ready(())) => {
                    drop(future);
                    self.finish(id, &shared, TaskState::Completed);
                }
                Ok(Poll::Pending) if shared.cancel_requested.get() => {
                    drop(future);
                    self.finish(id, &shared, TaskState::Cancelled);
                }
                Ok(Poll::Pending) => {
                    if let Some(entry) = self.tasks.borrow_mut().get_mut(&id) {
                        entry.future = Some(future);
                    }
                }
                Err(payload) => {
                    log::warn!("{id} panicked: {}", panic_message(&*payload));
                    drop(future);
                    self.finish(id, &shared, TaskState::Failed);
                }
            }
        }
        polls
    }

    fn finish(&self, id: TaskId, shared: &TaskShared, state: TaskState) {
        let entry = self.tasks.borrow_mut().remove(&id);
        drop(entry);
        shared.state.set(state);
        if state == TaskState::Cancelled {
            let callbacks = std::mem::take(&mut *shared.on_cancel.borrow_mut());
            for callback in callbacks {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                    log::warn!("cancel callback of {id} panicked: {}", panic_message(&*payload));
                }
            }
        } else {
            shared.on_cancel.borrow_mut().clear();
        }
        log::trace!("{id} finished as {state:?}");
        let callbacks = std::mem::take(&mut *shared.on_finish.borrow_mut());
        for callback in callbacks {
            callback(state);
        }
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub(crate) fn live_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub(crate) fn cancel_all(&self) {
        let handles: Vec<(TaskId, Rc<TaskShared>)> = self
            .tasks
            .borrow()
            .iter()
            .map(|(id, entry)| (*id, entry.shared.clone()))
            .collect();
        for (id, shared) in handles {
            if !shared.cancel_requested.replace(true) {
                self.ready.push(id);
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
