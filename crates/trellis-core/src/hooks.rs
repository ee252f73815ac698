//! Hook-state store.
//!
//! Each component instance owns an ordered list of hook slots. While a
//! component renders, its slots sit in a thread-local render frame and each
//! hook call claims the next slot by position. The first render fixes the
//! slot count; later renders must call the same hooks in the same order.
//!
//! Hooks never mutate committed state directly. Slot appends and value
//! replacements are recorded in the frame's log so a failed pass can undo
//! them, and state setters only enqueue updates for the next pass.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexSet;

use crate::commit_log::{Field, LogEntry, Owner, Previous};
use crate::context::{ContextEntry, ContextId, ContextKey};
use crate::element::Element;
use crate::error::HookError;
use crate::executor::{panic_message, AsyncScope, LocalBoxFuture, TaskHandle, TaskState};
use crate::runtime::{PendingUpdate, RuntimeHandle, UpdateFn};
use crate::NodeId;

/// Address of one hook slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub node: NodeId,
    pub index: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotTag {
    State,
    Effect,
    Async,
    ContextSub,
    ContextProvider,
    Ref,
    Memo,
}

impl fmt::Display for SlotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SlotTag::State => "use_state",
            SlotTag::Effect => "use_effect",
            SlotTag::Async => "use_async",
            SlotTag::ContextSub => "use_context",
            SlotTag::ContextProvider => "provide_context",
            SlotTag::Ref => "use_ref",
            SlotTag::Memo => "use_memo",
        })
    }
}

pub(crate) type Selector = Rc<dyn Fn(&dyn Any) -> Option<Box<dyn Any>>>;
pub(crate) type SameFn = fn(&dyn Any, &dyn Any) -> bool;
pub(crate) type AsyncFactory = Box<dyn FnOnce(AsyncScope) -> LocalBoxFuture>;

pub(crate) enum HookSlot {
    State(StateSlot),
    Effect(EffectSlot),
    Async(AsyncSlot),
    ContextSub(ContextSubSlot),
    ContextProvider(ContextId),
    Ref(Rc<dyn Any>),
    Memo(MemoSlot),
}

impl HookSlot {
    pub(crate) fn tag(&self) -> SlotTag {
        match self {
            HookSlot::State(_) => SlotTag::State,
            HookSlot::Effect(_) => SlotTag::Effect,
            HookSlot::Async(_) => SlotTag::Async,
            HookSlot::ContextSub(_) => SlotTag::ContextSub,
            HookSlot::ContextProvider(_) => SlotTag::ContextProvider,
            HookSlot::Ref(_) => SlotTag::Ref,
            HookSlot::Memo(_) => SlotTag::Memo,
        }
    }
}

pub(crate) struct StateSlot {
    pub(crate) value: Box<dyn Any>,
}

pub(crate) struct EffectSlot {
    pub(crate) deps: Option<Box<dyn Any>>,
    pub(crate) cleanup: Option<Cleanup>,
}

impl Drop for EffectSlot {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            guarded("effect cleanup", || cleanup.run());
        }
    }
}

pub(crate) struct AsyncSlot {
    pub(crate) deps: Option<Box<dyn Any>>,
    pub(crate) cell: Rc<RefCell<AsyncCell>>,
}

impl Drop for AsyncSlot {
    fn drop(&mut self) {
        AsyncCell::cancel(&self.cell);
    }
}

pub(crate) struct ContextSubSlot {
    pub(crate) context: ContextId,
    pub(crate) selected: Box<dyn Any>,
    pub(crate) selector: Selector,
    pub(crate) same: SameFn,
}

pub(crate) struct MemoSlot {
    pub(crate) deps: Box<dyn Any>,
    pub(crate) value: Box<dyn Any>,
}

fn same_value<S: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<S>(), b.downcast_ref::<S>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Runs `f`, logging and suppressing any panic.
pub(crate) fn guarded(what: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        log::warn!("{what} panicked: {}", panic_message(&*payload));
    }
}

/// Teardown returned from an effect setup.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(cleanup: impl FnOnce() + 'static) -> Self {
        Cleanup(Box::new(cleanup))
    }

    pub(crate) fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup(..)")
    }
}

/// Values an effect setup may return.
///
/// A failed `Result` is logged and registers no cleanup.
pub trait IntoCleanup {
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Option<Cleanup> {
        None
    }
}

impl IntoCleanup for Cleanup {
    fn into_cleanup(self) -> Option<Cleanup> {
        Some(self)
    }
}

impl IntoCleanup for Option<Cleanup> {
    fn into_cleanup(self) -> Option<Cleanup> {
        self
    }
}

impl<T: IntoCleanup, E: fmt::Display> IntoCleanup for Result<T, E> {
    fn into_cleanup(self) -> Option<Cleanup> {
        match self {
            Ok(value) => value.into_cleanup(),
            Err(err) => {
                log::warn!("effect setup failed: {err}");
                None
            }
        }
    }
}

/// The live task of a `use_async` slot and the factory queued behind it.
///
/// At most one task per slot runs. A restart while a task is live cancels
/// it and queues the new factory; only the most recent queued factory
/// survives and it is spawned once the cancelled task has finished.
#[derive(Default)]
pub(crate) struct AsyncCell {
    current: Option<TaskHandle>,
    queued: Option<AsyncFactory>,
}

impl AsyncCell {
    pub(crate) fn restart(cell: &Rc<RefCell<AsyncCell>>, runtime: &RuntimeHandle, factory: AsyncFactory) {
        let live = cell
            .borrow()
            .current
            .as_ref()
            .filter(|task| !task.is_finished())
            .cloned();
        match live {
            Some(task) => {
                if cell.borrow_mut().queued.replace(factory).is_some() {
                    log::trace!("dropping superseded async work queued behind {}", task.id());
                }
                task.cancel();
            }
            None => AsyncCell::spawn(cell, runtime, factory),
        }
    }

    fn spawn(cell: &Rc<RefCell<AsyncCell>>, runtime: &RuntimeHandle, factory: AsyncFactory) {
        let Some(task) = runtime.spawn_local(factory) else {
            return;
        };
        let weak = Rc::downgrade(cell);
        let runtime = runtime.clone();
        cell.borrow_mut().current = Some(task.clone());
        task.on_finish(move |_| {
            let Some(cell) = weak.upgrade() else {
                return;
            };
            let next = cell.borrow_mut().queued.take();
            if let Some(next) = next {
                AsyncCell::spawn(&cell, &runtime, next);
            }
        });
    }

    pub(crate) fn cancel(cell: &Rc<RefCell<AsyncCell>>) {
        let current = {
            let mut cell = cell.borrow_mut();
            cell.queued = None;
            cell.current.clone()
        };
        if let Some(task) = current {
            task.cancel();
        }
    }
}

/// Handle returned by [`use_async`] for manual cancellation.
#[derive(Clone)]
pub struct AsyncHandle {
    cell: Rc<RefCell<AsyncCell>>,
}

impl AsyncHandle {
    /// Cancels the running task and drops any queued restart.
    pub fn cancel(&self) {
        AsyncCell::cancel(&self.cell);
    }

    pub fn state(&self) -> Option<TaskState> {
        self.cell.borrow().current.as_ref().map(TaskHandle::state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == Some(TaskState::Pending)
    }
}

pub(crate) struct PendingEffect {
    pub(crate) target: SlotRef,
    pub(crate) setup: Box<dyn FnOnce() -> Option<Cleanup>>,
}

pub(crate) struct PendingTask {
    pub(crate) cell: Rc<RefCell<AsyncCell>>,
    pub(crate) factory: AsyncFactory,
}

/// Per-render scratch state of the component being rendered.
pub(crate) struct RenderFrame {
    pub(crate) node: NodeId,
    pub(crate) runtime: RuntimeHandle,
    pub(crate) slots: Vec<HookSlot>,
    pub(crate) cursor: usize,
    /// Set once the node has completed a render; the slot count is fixed.
    pub(crate) sealed: bool,
    pub(crate) log: Vec<LogEntry>,
    pub(crate) effects: Vec<PendingEffect>,
    pub(crate) tasks: Vec<PendingTask>,
    pub(crate) children: Vec<Element>,
}

enum Claim {
    Existing(usize),
    Fresh(usize),
}

impl Claim {
    fn index(&self) -> usize {
        match self {
            Claim::Existing(index) | Claim::Fresh(index) => *index,
        }
    }
}

impl RenderFrame {
    pub(crate) fn new(
        node: NodeId,
        runtime: RuntimeHandle,
        slots: Vec<HookSlot>,
        sealed: bool,
        children: Vec<Element>,
    ) -> Self {
        Self {
            node,
            runtime,
            slots,
            cursor: 0,
            sealed,
            log: Vec::new(),
            effects: Vec::new(),
            tasks: Vec::new(),
            children,
        }
    }

    fn claim(&mut self, tag: SlotTag) -> Result<Claim, HookError> {
        let index = self.cursor;
        self.cursor += 1;
        match self.slots.get(index) {
            Some(slot) if slot.tag() == tag => Ok(Claim::Existing(index)),
            Some(slot) => Err(HookError::OrderMismatch {
                node: self.node,
                index,
                expected: slot.tag(),
                found: tag,
            }),
            None if self.sealed => Err(HookError::Overrun {
                node: self.node,
                index,
                previous: self.slots.len(),
            }),
            None => Ok(Claim::Fresh(index)),
        }
    }

    fn push_slot(&mut self, index: usize, slot: HookSlot) -> Result<(), HookError> {
        if self.slots.len() != index {
            return Err(HookError::Nested {
                node: self.node,
                index,
            });
        }
        self.slots.push(slot);
        self.record(Owner::Node(self.node), Field::Slot(index), None);
        Ok(())
    }

    fn record(&mut self, owner: Owner, field: Field, previous: Option<Previous>) {
        self.log.push(LogEntry::new(owner, field, previous));
    }

    fn slot_ref(&self, index: usize) -> SlotRef {
        SlotRef {
            node: self.node,
            index,
        }
    }

    fn type_error<T>(&self, index: usize) -> HookError {
        HookError::StateType {
            node: self.node,
            index,
            expected: std::any::type_name::<T>(),
        }
    }

    fn state_value<T: Clone + 'static>(&self, index: usize) -> Result<T, HookError> {
        match &self.slots[index] {
            HookSlot::State(slot) => slot
                .value
                .downcast_ref::<T>()
                .cloned()
                .ok_or_else(|| self.type_error::<T>(index)),
            _ => Err(self.type_error::<T>(index)),
        }
    }

    /// Stores new deps for an effect or async slot when they changed.
    /// Returns whether the slot should run. `None` deps always run.
    fn refresh_deps<D: PartialEq + 'static>(
        &mut self,
        index: usize,
        deps: Option<D>,
    ) -> Result<bool, HookError> {
        let node = self.node;
        let stored = match &mut self.slots[index] {
            HookSlot::Effect(slot) => &mut slot.deps,
            HookSlot::Async(slot) => &mut slot.deps,
            _ => {
                return Err(HookError::StateType {
                    node,
                    index,
                    expected: std::any::type_name::<D>(),
                })
            }
        };
        let changed = match (&deps, stored.as_ref()) {
            (Some(new), Some(old)) => old.downcast_ref::<D>() != Some(new),
            _ => true,
        };
        if changed {
            let previous = std::mem::replace(stored, deps.map(|deps| Box::new(deps) as Box<dyn Any>));
            self.log.push(LogEntry::new(
                Owner::Node(node),
                Field::Slot(index),
                Some(Previous::Deps(previous)),
            ));
        }
        Ok(changed)
    }

    fn refresh_selection<S: Clone + PartialEq + 'static>(
        &mut self,
        index: usize,
        selected: &S,
        selector: Selector,
    ) -> Result<(), HookError> {
        let node = self.node;
        let HookSlot::ContextSub(slot) = &mut self.slots[index] else {
            return Err(self.type_error::<S>(index));
        };
        let mut previous = Vec::with_capacity(2);
        if slot.selected.downcast_ref::<S>() != Some(selected) {
            let old = std::mem::replace(&mut slot.selected, clone_box(selected));
            previous.push(Previous::Selected(old));
        }
        previous.push(Previous::Selector(std::mem::replace(&mut slot.selector, selector)));
        for previous in previous {
            self.log.push(LogEntry::new(
                Owner::Node(node),
                Field::Slot(index),
                Some(previous),
            ));
        }
        Ok(())
    }
}

fn clone_box<S: Clone + 'static>(value: &S) -> Box<dyn Any> {
    Box::new(value.clone())
}

thread_local! {
    static RENDER_STACK: RefCell<Vec<RenderFrame>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a render frame installed. Dropping it without
/// [`finish`](FrameGuard::finish) discards the frame.
pub(crate) struct FrameGuard {
    depth: usize,
    finished: bool,
}

pub(crate) fn enter(frame: RenderFrame) -> FrameGuard {
    let depth = RENDER_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(frame);
        stack.len()
    });
    FrameGuard {
        depth,
        finished: false,
    }
}

impl FrameGuard {
    pub(crate) fn finish(mut self) -> Option<RenderFrame> {
        self.finished = true;
        RENDER_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() == self.depth {
                stack.pop()
            } else {
                None
            }
        })
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if !self.finished {
            let _ = RENDER_STACK.try_with(|stack| {
                if let Ok(mut stack) = stack.try_borrow_mut() {
                    stack.truncate(self.depth - 1);
                }
            });
        }
    }
}

fn with_frame<R>(f: impl FnOnce(&mut RenderFrame) -> Result<R, HookError>) -> Result<R, HookError> {
    RENDER_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let frame = stack.last_mut().ok_or(HookError::OutsideRender)?;
        f(frame)
    })
}

/// How a state setter computes the next value.
pub enum StateUpdate<T> {
    Value(T),
    /// Applied to the value current when the update is processed, so
    /// several updaters queued in one turn compose.
    Updater(Box<dyn FnOnce(&T) -> T>),
}

fn update_fn<T: PartialEq + 'static>(update: StateUpdate<T>) -> UpdateFn {
    Box::new(move |current: &dyn Any| {
        let current = current.downcast_ref::<T>()?;
        let next = match update {
            StateUpdate::Value(value) => value,
            StateUpdate::Updater(updater) => updater(current),
        };
        if next == *current {
            None
        } else {
            Some(Box::new(next) as Box<dyn Any>)
        }
    })
}

/// Setter returned by [`use_state`].
///
/// Updates are queued and applied at the start of the next render pass.
/// Setting a value equal to the current one does not re-render. Setters of
/// unmounted components are ignored.
pub struct Setter<T> {
    target: SlotRef,
    runtime: RuntimeHandle,
    _marker: PhantomData<fn(T)>,
}

impl<T: PartialEq + 'static> Setter<T> {
    pub fn set(&self, value: T) {
        self.apply(StateUpdate::Value(value));
    }

    pub fn update(&self, updater: impl FnOnce(&T) -> T + 'static) {
        self.apply(StateUpdate::Updater(Box::new(updater)));
    }

    pub fn apply(&self, update: StateUpdate<T>) {
        self.runtime.enqueue_update(PendingUpdate::State {
            target: self.target,
            apply: update_fn(update),
        });
    }
}

impl<T> Setter<T> {
    pub fn target(&self) -> SlotRef {
        self.target
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            runtime: self.runtime.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Setter<T> {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl<T> fmt::Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter").field("target", &self.target).finish()
    }
}

/// Setter returned by [`provide_context`]. Changing the value re-renders
/// the provider and every subscriber whose selection changed.
pub struct ContextSetter<T> {
    context: ContextId,
    runtime: RuntimeHandle,
    _marker: PhantomData<fn(T)>,
}

impl<T: PartialEq + 'static> ContextSetter<T> {
    pub fn set(&self, value: T) {
        self.apply(StateUpdate::Value(value));
    }

    pub fn update(&self, updater: impl FnOnce(&T) -> T + 'static) {
        self.apply(StateUpdate::Updater(Box::new(updater)));
    }

    pub fn apply(&self, update: StateUpdate<T>) {
        self.runtime.enqueue_update(PendingUpdate::Context {
            context: self.context,
            apply: update_fn(update),
        });
    }
}

impl<T> Clone for ContextSetter<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context,
            runtime: self.runtime.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for ContextSetter<T> {
    fn eq(&self, other: &Self) -> bool {
        self.context == other.context
    }
}

impl<T> fmt::Debug for ContextSetter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSetter")
            .field("context", &self.context)
            .finish()
    }
}

/// Declares a state cell. `initial` runs only on the first render.
pub fn use_state<T>(initial: impl FnOnce() -> T) -> Result<(T, Setter<T>), HookError>
where
    T: Clone + PartialEq + 'static,
{
    let (target, runtime, existing) = with_frame(|frame| {
        let claim = frame.claim(SlotTag::State)?;
        let existing = match claim {
            Claim::Existing(index) => Some(frame.state_value::<T>(index)?),
            Claim::Fresh(_) => None,
        };
        Ok((frame.slot_ref(claim.index()), frame.runtime.clone(), existing))
    })?;
    let value = match existing {
        Some(value) => value,
        None => {
            let value = initial();
            let stored: Box<dyn Any> = Box::new(value.clone());
            with_frame(|frame| frame.push_slot(target.index, HookSlot::State(StateSlot { value: stored })))?;
            value
        }
    };
    Ok((
        value,
        Setter {
            target,
            runtime,
            _marker: PhantomData,
        },
    ))
}

/// A mutable cell that persists across renders without triggering them.
pub fn use_ref<T: 'static>(initial: impl FnOnce() -> T) -> Result<Rc<RefCell<T>>, HookError> {
    let (index, existing) = with_frame(|frame| {
        let claim = frame.claim(SlotTag::Ref)?;
        let existing = match claim {
            Claim::Existing(index) => match &frame.slots[index] {
                HookSlot::Ref(cell) => Some(
                    cell.clone()
                        .downcast::<RefCell<T>>()
                        .map_err(|_| frame.type_error::<T>(index))?,
                ),
                _ => return Err(frame.type_error::<T>(index)),
            },
            Claim::Fresh(_) => None,
        };
        Ok((claim.index(), existing))
    })?;
    match existing {
        Some(cell) => Ok(cell),
        None => {
            let cell = Rc::new(RefCell::new(initial()));
            let stored: Rc<dyn Any> = cell.clone();
            with_frame(|frame| frame.push_slot(index, HookSlot::Ref(stored)))?;
            Ok(cell)
        }
    }
}

/// Caches `compute()` until `deps` changes.
pub fn use_memo<D, T>(deps: D, compute: impl FnOnce() -> T) -> Result<T, HookError>
where
    D: PartialEq + 'static,
    T: Clone + 'static,
{
    enum Lookup<T> {
        Hit(T),
        Stale(usize),
        Fresh(usize),
    }

    let lookup = with_frame(|frame| {
        let claim = frame.claim(SlotTag::Memo)?;
        match claim {
            Claim::Fresh(index) => Ok(Lookup::Fresh(index)),
            Claim::Existing(index) => {
                let HookSlot::Memo(slot) = &frame.slots[index] else {
                    return Err(frame.type_error::<T>(index));
                };
                if slot.deps.downcast_ref::<D>() == Some(&deps) {
                    let value = slot
                        .value
                        .downcast_ref::<T>()
                        .cloned()
                        .ok_or_else(|| frame.type_error::<T>(index))?;
                    Ok(Lookup::Hit(value))
                } else {
                    Ok(Lookup::Stale(index))
                }
            }
        }
    })?;
    let (index, fresh) = match lookup {
        Lookup::Hit(value) => return Ok(value),
        Lookup::Stale(index) => (index, false),
        Lookup::Fresh(index) => (index, true),
    };
    let value = compute();
    let stored: Box<dyn Any> = Box::new(value.clone());
    let deps: Box<dyn Any> = Box::new(deps);
    with_frame(|frame| {
        if fresh {
            return frame.push_slot(index, HookSlot::Memo(MemoSlot { deps, value: stored }));
        }
        let node = frame.node;
        let HookSlot::Memo(slot) = &mut frame.slots[index] else {
            return Err(frame.type_error::<T>(index));
        };
        let previous = Previous::Memo {
            deps: std::mem::replace(&mut slot.deps, deps),
            value: std::mem::replace(&mut slot.value, stored),
        };
        frame.record(Owner::Node(node), Field::Slot(index), Some(previous));
        Ok(())
    })?;
    Ok(value)
}

/// Schedules `setup` to run after commit whenever `deps` differ from the
/// previous render's. `None` deps run after every render. The cleanup
/// returned by a setup runs before the next setup and on unmount.
pub fn use_effect<D, R>(deps: Option<D>, setup: impl FnOnce() -> R + 'static) -> Result<(), HookError>
where
    D: PartialEq + 'static,
    R: IntoCleanup,
{
    with_frame(|frame| {
        let claim = frame.claim(SlotTag::Effect)?;
        let run = match claim {
            Claim::Fresh(index) => {
                frame.push_slot(
                    index,
                    HookSlot::Effect(EffectSlot {
                        deps: deps.map(|deps| Box::new(deps) as Box<dyn Any>),
                        cleanup: None,
                    }),
                )?;
                true
            }
            Claim::Existing(index) => frame.refresh_deps(index, deps)?,
        };
        if run {
            let target = frame.slot_ref(claim.index());
            frame.effects.push(PendingEffect {
                target,
                setup: Box::new(move || setup().into_cleanup()),
            });
        }
        Ok(())
    })
}

/// Runs `cleanup` once, when the component unmounts.
pub fn use_effect_final(cleanup: impl FnOnce() + 'static) -> Result<(), HookError> {
    use_effect(Some(()), move || Cleanup::new(cleanup))
}

/// Starts async work after commit whenever `deps` change, cancelling the
/// previous run first. Work still running at unmount is cancelled.
pub fn use_async<D, F, Fut>(deps: Option<D>, factory: F) -> Result<AsyncHandle, HookError>
where
    D: PartialEq + 'static,
    F: FnOnce(AsyncScope) -> Fut + 'static,
    Fut: Future<Output = ()> + 'static,
{
    with_frame(|frame| {
        let claim = frame.claim(SlotTag::Async)?;
        let (start, cell) = match claim {
            Claim::Fresh(index) => {
                let cell = Rc::new(RefCell::new(AsyncCell::default()));
                frame.push_slot(
                    index,
                    HookSlot::Async(AsyncSlot {
                        deps: deps.map(|deps| Box::new(deps) as Box<dyn Any>),
                        cell: cell.clone(),
                    }),
                )?;
                (true, cell)
            }
            Claim::Existing(index) => {
                let start = frame.refresh_deps(index, deps)?;
                let HookSlot::Async(slot) = &frame.slots[index] else {
                    return Err(frame.type_error::<F>(index));
                };
                (start, slot.cell.clone())
            }
        };
        if start {
            frame.tasks.push(PendingTask {
                cell: cell.clone(),
                factory: Box::new(move |scope| Box::pin(factory(scope)) as LocalBoxFuture),
            });
        }
        Ok(AsyncHandle { cell })
    })
}

/// Provides a context value to this component's subtree. The provider owns
/// the value; `initial` runs only on the first render.
pub fn provide_context<T>(
    key: &ContextKey<T>,
    initial: impl FnOnce() -> T,
) -> Result<(T, ContextSetter<T>), HookError>
where
    T: Clone + PartialEq + 'static,
{
    let id = key.id();
    let (claim, node, runtime) =
        with_frame(|frame| Ok((frame.claim(SlotTag::ContextProvider)?, frame.node, frame.runtime.clone())))?;
    let setter = ContextSetter {
        context: id,
        runtime: runtime.clone(),
        _marker: PhantomData,
    };
    match claim {
        Claim::Existing(_) => {
            let value = runtime
                .with_contexts(|contexts| {
                    contexts
                        .provided(&id)
                        .and_then(|entry| entry.value.downcast_ref::<T>().cloned())
                })
                .flatten()
                .ok_or(HookError::MissingContext { name: key.name() })?;
            Ok((value, setter))
        }
        Claim::Fresh(index) => {
            let existing = runtime
                .with_contexts(|contexts| contexts.get(&id).cloned())
                .flatten();
            let vacant = match existing {
                Some(entry) if entry.provider.is_some() => {
                    return Err(HookError::DuplicateProvider { name: key.name() });
                }
                vacant => vacant,
            };
            let value = initial();
            with_frame(|frame| {
                frame.push_slot(index, HookSlot::ContextProvider(id))?;
                frame.record(
                    Owner::Context(id),
                    Field::Provider,
                    vacant.clone().map(Previous::ContextEntry),
                );
                Ok(())
            })?;
            let subscribers = vacant.map(|entry| entry.subscribers).unwrap_or_default();
            let adopted = subscribers.len();
            let stored: Rc<dyn Any> = Rc::new(value.clone());
            runtime.with_contexts(|contexts| {
                contexts.insert(
                    id,
                    ContextEntry {
                        provider: Some(node),
                        value: stored,
                        subscribers,
                    },
                )
            });
            if adopted > 0 {
                log::trace!("{node} adopts {adopted} subscribers of {id}");
                runtime.enqueue_update(PendingUpdate::Refresh { context: id });
            }
            Ok((value, setter))
        }
    }
}

/// Reads a context value provided by an ancestor and re-renders when it
/// changes.
pub fn use_context<T>(key: &ContextKey<T>) -> Result<T, HookError>
where
    T: Clone + PartialEq + 'static,
{
    use_context_select(key, T::clone)
}

/// Reads a projection of a context value. The component only re-renders
/// for context changes that change the projection.
pub fn use_context_select<T, S>(
    key: &ContextKey<T>,
    selector: impl Fn(&T) -> S + 'static,
) -> Result<S, HookError>
where
    T: 'static,
    S: Clone + PartialEq + 'static,
{
    let id = key.id();
    let missing = HookError::MissingContext { name: key.name() };
    let (claim, node, runtime) =
        with_frame(|frame| Ok((frame.claim(SlotTag::ContextSub)?, frame.node, frame.runtime.clone())))?;
    let current = runtime
        .with_contexts(|contexts| contexts.provided(&id).map(|entry| entry.value.clone()))
        .flatten()
        .ok_or_else(|| missing.clone())?;
    let value = current.downcast_ref::<T>().ok_or(missing)?;
    let selected = selector(value);
    let selector: Selector = Rc::new(move |value: &dyn Any| {
        value
            .downcast_ref::<T>()
            .map(|value| Box::new(selector(value)) as Box<dyn Any>)
    });
    match claim {
        Claim::Fresh(index) => {
            let target = SlotRef { node, index };
            with_frame(|frame| {
                frame.push_slot(
                    index,
                    HookSlot::ContextSub(ContextSubSlot {
                        context: id,
                        selected: clone_box(&selected),
                        selector,
                        same: same_value::<S>,
                    }),
                )?;
                frame.record(Owner::Context(id), Field::Subscriber(target), None);
                Ok(())
            })?;
            runtime.with_contexts(|contexts| {
                if let Some(entry) = contexts.get_mut(&id) {
                    entry.subscribers.insert(target);
                }
            });
        }
        Claim::Existing(index) => {
            with_frame(|frame| frame.refresh_selection(index, &selected, selector))?;
        }
    }
    Ok(selected)
}

/// The children declared for the rendering component by its parent.
pub fn use_children() -> Result<Vec<Element>, HookError> {
    with_frame(|frame| Ok(frame.children.clone()))
}

/// The id of the rendering component.
pub fn use_node() -> Result<NodeId, HookError> {
    with_frame(|frame| Ok(frame.node))
}

#[cfg(test)]
#[path = "tests/hooks_tests.rs"]
mod tests;
