//! Platform abstraction traits for Trellis runtime services.
//!
//! These traits let the runtime delegate frame scheduling and timing to
//! the host, so the core never touches threads or wall clocks directly.

/// Schedules work for the Trellis runtime.
///
/// The runtime calls [`schedule_frame`](RuntimeScheduler::schedule_frame)
/// whenever a render pass, a frame callback, or a woken async task needs
/// the host to come back and pump it. Implementations must be safe to call
/// from any thread because task wakers may fire off the UI thread.
pub trait RuntimeScheduler: Send + Sync {
    /// Request that the host schedule a new frame.
    fn schedule_frame(&self);
}

/// Provides timing information for the runtime.
pub trait Clock: Send + Sync {
    /// Instant type produced by this clock implementation.
    type Instant: Copy + Send + Sync;

    /// Returns the current instant.
    fn now(&self) -> Self::Instant;

    /// Returns the number of nanoseconds elapsed since `since`.
    fn elapsed_nanos(&self, since: Self::Instant) -> u64;
}
