//! Core runtime for Trellis, a retained-mode UI runtime built on keyed
//! reconciliation.
//!
//! Components render into [`Element`] trees through an ambient builder,
//! keep per-instance state in ordered hook slots, and are diffed against
//! the committed tree by the [`Reconciler`]. Every mutation of the committed
//! tree during a pass is recorded in a [`CommitLog`] so a failing pass can be
//! rolled back to the exact pre-pass state. Successful passes produce a list
//! of [`Command`]s that a [`Backend`] applies to real widgets.

extern crate self as trellis_core;

pub mod backend;
pub mod builder;
pub mod collections;
pub mod commit_log;
pub mod config;
pub mod context;
pub mod element;
pub mod error;
pub mod executor;
pub mod frame_clock;
pub mod hooks;
pub mod platform;
pub mod props;
pub mod reconciler;
pub mod root;
pub mod runtime;
mod tree;

use std::fmt;

pub use backend::{Backend, Command, MemoryBackend, MemoryWidget, WidgetId};
pub use builder::{capture, capture_root};
pub use commit_log::{CommitLog, Field, LogEntry, Owner};
pub use config::RenderConfig;
pub use context::{ContextId, ContextKey};
pub use element::{
    component, default_update_commands, host, AnyComponent, Component, Element, ElementBuilder,
    ElementKind, HostType, Key, Lifecycle, TypeTag,
};
pub use error::{BackendError, BuildError, HookError, RenderError, RenderResult};
pub use executor::{AsyncScope, TaskHandle, TaskId, TaskState};
pub use frame_clock::{FrameCallbackRegistration, FrameClock, NextFrame};
pub use hooks::{
    provide_context, use_async, use_children, use_context, use_context_select, use_effect,
    use_effect_final, use_memo, use_node, use_ref, use_state, AsyncHandle, Cleanup,
    ContextSetter, IntoCleanup, Setter, SlotRef, SlotTag, StateUpdate,
};
pub use platform::{Clock, RuntimeScheduler};
pub use props::{Handler, PropKind, PropName, PropSpec, PropValue, Props, PropsDiff};
pub use reconciler::{NodeView, Reconciler, RenderOutcome, TreeDelta};
pub use root::Root;
pub use runtime::{DefaultScheduler, Runtime, RuntimeHandle};

pub type FrameCallbackId = u64;

/// Identity of a committed node. Ids are never reused, so a stale handle
/// can never alias a node mounted later.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
