use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::runtime::RuntimeHandle;
use crate::FrameCallbackId;

/// Frame timing source for async work and animations.
#[derive(Clone)]
pub struct FrameClock {
    runtime: RuntimeHandle,
}

impl FrameClock {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self { runtime }
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.clone()
    }

    pub fn with_frame_nanos(
        &self,
        callback: impl FnOnce(u64) + 'static,
    ) -> FrameCallbackRegistration {
        let runtime = self.runtime.clone();
        match runtime.register_frame_callback(callback) {
            Some(id) => FrameCallbackRegistration::new(runtime, id),
            None => FrameCallbackRegistration::inactive(runtime),
        }
    }

    pub fn with_frame_millis(
        &self,
        callback: impl FnOnce(u64) + 'static,
    ) -> FrameCallbackRegistration {
        self.with_frame_nanos(move |nanos| callback(nanos / 1_000_000))
    }

    /// Resolves with the frame time, in nanoseconds, of the next frame the
    /// host drains.
    pub fn next_frame(&self) -> NextFrame {
        NextFrame {
            clock: self.clone(),
            state: Rc::new(RefCell::new(NextFrameState::default())),
            registration: None,
        }
    }
}

/// Keeps a frame callback registered. Dropping it cancels the callback.
pub struct FrameCallbackRegistration {
    runtime: RuntimeHandle,
    id: Option<FrameCallbackId>,
}

impl FrameCallbackRegistration {
    fn new(runtime: RuntimeHandle, id: FrameCallbackId) -> Self {
        Self {
            runtime,
            id: Some(id),
        }
    }

    fn inactive(runtime: RuntimeHandle) -> Self {
        Self { runtime, id: None }
    }

    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    pub fn cancel(mut self) {
        if let Some(id) = self.id.take() {
            self.runtime.cancel_frame_callback(id);
        }
    }
}

impl Drop for FrameCallbackRegistration {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.runtime.cancel_frame_callback(id);
        }
    }
}

#[derive(Default)]
struct NextFrameState {
    time: Option<u64>,
    waker: Option<Waker>,
}

/// Future returned by [`FrameClock::next_frame`].
pub struct NextFrame {
    clock: FrameClock,
    state: Rc<RefCell<NextFrameState>>,
    registration: Option<FrameCallbackRegistration>,
}

impl Future for NextFrame {
    type Output = u64;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u64> {
        let this = self.get_mut();
        let ready = this.state.borrow().time;
        if let Some(time) = ready {
            return Poll::Ready(time);
        }
        this.state.borrow_mut().waker = Some(cx.waker().clone());
        if this.registration.is_none() {
            let state = this.state.clone();
            this.registration = Some(this.clock.with_frame_nanos(move |time| {
                let waker = {
                    let mut state = state.borrow_mut();
                    state.time = Some(time);
                    state.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            }));
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::runtime::Runtime;

    #[test]
    fn dropped_registration_never_fires() {
        let runtime = Runtime::default();
        let clock = runtime.frame_clock();
        let fired = Rc::new(Cell::new(false));
        let registration = {
            let fired = fired.clone();
            clock.with_frame_millis(move |_| fired.set(true))
        };
        drop(registration);
        runtime.handle().drain_frame_callbacks(1_000_000);
        assert!(!fired.get());
    }

    #[test]
    fn next_frame_resolves_with_frame_time() {
        let runtime = Runtime::default();
        let handle = runtime.handle();
        let clock = runtime.frame_clock();
        let seen = Rc::new(Cell::new(None));
        {
            let seen = seen.clone();
            handle.spawn_local(move |_scope| async move {
                let time = clock.next_frame().await;
                seen.set(Some(time));
            });
        }
        handle.drain_tasks();
        assert_eq!(seen.get(), None);
        handle.drain_frame_callbacks(16_000_000);
        handle.drain_tasks();
        assert_eq!(seen.get(), Some(16_000_000));
    }
}
