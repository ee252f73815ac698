use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::context::{ContextId, ContextRegistry};
use crate::executor::{AsyncScope, Executor, LocalBoxFuture, TaskHandle};
use crate::frame_clock::FrameClock;
use crate::hooks::SlotRef;
use crate::platform::RuntimeScheduler;
use crate::FrameCallbackId;

/// Computes the next value of a state cell from its current one. Returns
/// `None` when the value would not change.
pub(crate) type UpdateFn = Box<dyn FnOnce(&dyn Any) -> Option<Box<dyn Any>>>;

pub(crate) enum PendingUpdate {
    State { target: SlotRef, apply: UpdateFn },
    Context { context: ContextId, apply: UpdateFn },
    /// Re-selects every subscriber of `context` against its current value.
    Refresh { context: ContextId },
}

struct FrameCallbackEntry {
    id: FrameCallbackId,
    callback: Option<Box<dyn FnOnce(u64) + 'static>>,
}

struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    needs_render: Cell<bool>,
    render_in_progress: Cell<bool>,
    updates: RefCell<VecDeque<PendingUpdate>>,
    frame_callbacks: RefCell<VecDeque<FrameCallbackEntry>>,
    next_frame_callback_id: Cell<u64>,
    executor: Executor,
    contexts: RefCell<ContextRegistry>,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            executor: Executor::new(scheduler.clone()),
            scheduler,
            needs_render: Cell::new(false),
            render_in_progress: Cell::new(false),
            updates: RefCell::new(VecDeque::new()),
            frame_callbacks: RefCell::new(VecDeque::new()),
            next_frame_callback_id: Cell::new(1),
            contexts: RefCell::new(ContextRegistry::default()),
        }
    }

    /// Requests one render. Repeated requests before the render runs
    /// coalesce; requests made while a pass is running are deferred until
    /// it ends.
    fn request_render(&self) {
        if self.needs_render.replace(true) {
            return;
        }
        if !self.render_in_progress.get() {
            self.scheduler.schedule_frame();
        }
    }

    fn enqueue_update(&self, update: PendingUpdate) {
        self.updates.borrow_mut().push_back(update);
        self.request_render();
    }

    fn take_updates(&self) -> Vec<PendingUpdate> {
        self.updates.borrow_mut().drain(..).collect()
    }

    fn has_updates(&self) -> bool {
        !self.updates.borrow().is_empty()
    }

    fn begin_render(&self) -> bool {
        if self.render_in_progress.replace(true) {
            return false;
        }
        self.needs_render.set(false);
        true
    }

    fn end_render(&self) {
        self.render_in_progress.set(false);
        if self.needs_render.get() {
            self.scheduler.schedule_frame();
        }
    }

    fn has_frame_callbacks(&self) -> bool {
        !self.frame_callbacks.borrow().is_empty()
    }

    fn register_frame_callback(&self, callback: Box<dyn FnOnce(u64) + 'static>) -> FrameCallbackId {
        let id = self.next_frame_callback_id.get();
        self.next_frame_callback_id.set(id + 1);
        self.frame_callbacks
            .borrow_mut()
            .push_back(FrameCallbackEntry {
                id,
                callback: Some(callback),
            });
        self.scheduler.schedule_frame();
        id
    }

    fn cancel_frame_callback(&self, id: FrameCallbackId) {
        let mut callbacks = self.frame_callbacks.borrow_mut();
        if let Some(index) = callbacks.iter().position(|entry| entry.id == id) {
            callbacks.remove(index);
        }
    }

    fn drain_frame_callbacks(&self, frame_time_nanos: u64) {
        let mut callbacks = self.frame_callbacks.borrow_mut();
        let mut pending: Vec<Box<dyn FnOnce(u64) + 'static>> = Vec::with_capacity(callbacks.len());
        while let Some(mut entry) = callbacks.pop_front() {
            if let Some(callback) = entry.callback.take() {
                pending.push(callback);
            }
        }
        drop(callbacks);
        for callback in pending {
            callback(frame_time_nanos);
        }
    }
}

/// Owner of the per-root runtime services: the update queue, the async
/// executor, frame callbacks and the context registry.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(scheduler)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    pub fn has_updates(&self) -> bool {
        self.inner.has_updates()
    }

    /// Whether a render was requested and has not run yet.
    pub fn needs_render(&self) -> bool {
        self.inner.needs_render.get()
    }

    pub fn frame_clock(&self) -> FrameClock {
        FrameClock::new(self.handle())
    }

    pub(crate) fn with_contexts<R>(&self, f: impl FnOnce(&mut ContextRegistry) -> R) -> R {
        f(&mut self.inner.contexts.borrow_mut())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Arc::new(DefaultScheduler))
    }
}

/// Scheduler for hosts that pump the runtime themselves.
#[derive(Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn schedule_frame(&self) {}
}

/// Weak handle to a [`Runtime`]. Every operation is a no-op once the
/// runtime is dropped.
#[derive(Clone)]
pub struct RuntimeHandle(pub(crate) Weak<RuntimeInner>);

impl RuntimeHandle {
    /// Requests a render pass from the host.
    pub fn schedule(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.request_render();
        }
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn needs_render(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.needs_render.get())
            .unwrap_or(false)
    }

    pub fn has_updates(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_updates())
            .unwrap_or(false)
    }

    pub(crate) fn enqueue_update(&self, update: PendingUpdate) {
        match self.0.upgrade() {
            Some(inner) => inner.enqueue_update(update),
            None => log::trace!("dropping state update for a dropped runtime"),
        }
    }

    pub(crate) fn take_updates(&self) -> Vec<PendingUpdate> {
        self.0
            .upgrade()
            .map(|inner| inner.take_updates())
            .unwrap_or_default()
    }

    /// Marks a render pass as running. Returns `false` if one already is.
    pub(crate) fn begin_render(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.begin_render())
            .unwrap_or(true)
    }

    pub(crate) fn end_render(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.end_render();
        }
    }

    pub(crate) fn with_contexts<R>(&self, f: impl FnOnce(&mut ContextRegistry) -> R) -> Option<R> {
        self.0
            .upgrade()
            .map(|inner| f(&mut inner.contexts.borrow_mut()))
    }

    /// Spawns a future on the runtime's executor. The future first runs
    /// the next time the host drains tasks.
    pub fn spawn_local<F, Fut>(&self, factory: F) -> Option<TaskHandle>
    where
        F: FnOnce(AsyncScope) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let inner = self.0.upgrade()?;
        let handle = inner
            .executor
            .spawn(self.clone(), move |scope| Box::pin(factory(scope)) as LocalBoxFuture);
        Some(handle)
    }

    /// Polls every ready task. Returns the number of polls performed.
    pub fn drain_tasks(&self) -> usize {
        self.0
            .upgrade()
            .map(|inner| inner.executor.drain())
            .unwrap_or(0)
    }

    pub fn has_ready_tasks(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.executor.has_ready())
            .unwrap_or(false)
    }

    pub fn live_tasks(&self) -> usize {
        self.0
            .upgrade()
            .map(|inner| inner.executor.live_tasks())
            .unwrap_or(0)
    }

    pub fn cancel_all_tasks(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.executor.cancel_all();
        }
    }

    pub fn register_frame_callback(
        &self,
        callback: impl FnOnce(u64) + 'static,
    ) -> Option<FrameCallbackId> {
        self.0
            .upgrade()
            .map(|inner| inner.register_frame_callback(Box::new(callback)))
    }

    pub fn cancel_frame_callback(&self, id: FrameCallbackId) {
        if let Some(inner) = self.0.upgrade() {
            inner.cancel_frame_callback(id);
        }
    }

    pub fn drain_frame_callbacks(&self, frame_time_nanos: u64) {
        if let Some(inner) = self.0.upgrade() {
            inner.drain_frame_callbacks(frame_time_nanos);
        }
    }

    pub fn has_frame_callbacks(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_frame_callbacks())
            .unwrap_or(false)
    }

    pub fn frame_clock(&self) -> FrameClock {
        FrameClock::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingScheduler(AtomicUsize);

    impl RuntimeScheduler for CountingScheduler {
        fn schedule_frame(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn requests_during_a_pass_schedule_once_when_it_ends() {
        let scheduler = Arc::new(CountingScheduler::default());
        let runtime = Runtime::new(scheduler.clone());
        let handle = runtime.handle();

        assert!(handle.begin_render());
        handle.schedule();
        handle.schedule();
        assert_eq!(scheduler.0.load(Ordering::SeqCst), 0);
        handle.end_render();
        assert_eq!(scheduler.0.load(Ordering::SeqCst), 1);

        handle.schedule();
        assert_eq!(scheduler.0.load(Ordering::SeqCst), 1);
        assert!(runtime.needs_render());
    }

    #[test]
    fn nested_pass_is_refused() {
        let runtime = Runtime::default();
        let handle = runtime.handle();
        assert!(handle.begin_render());
        assert!(!handle.begin_render());
        handle.end_render();
        assert!(handle.begin_render());
    }

    #[test]
    fn frame_callbacks_run_once_with_frame_time() {
        let runtime = Runtime::default();
        let handle = runtime.handle();
        let seen = Rc::new(Cell::new(0));
        let id = {
            let seen = seen.clone();
            handle.register_frame_callback(move |time| seen.set(time))
        };
        assert!(id.is_some());
        handle.drain_frame_callbacks(42);
        handle.drain_frame_callbacks(43);
        assert_eq!(seen.get(), 42);
    }
}
