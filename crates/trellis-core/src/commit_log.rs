//! Transactional log of committed-tree mutations.
//!
//! Every mutation made during a render pass records the field's previous
//! value here before it happens. Committing discards the log; rolling back
//! replays it in reverse, restoring each field. Entries with no previous
//! value mark something that did not exist before the pass, and undoing
//! them deletes it.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::backend::WidgetId;
use crate::context::{ContextEntry, ContextId};
use crate::element::{Element, Key};
use crate::hooks::{Selector, SlotRef};
use crate::tree::CommittedNode;
use crate::NodeId;

/// What a log entry belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Owner {
    /// The node arena and the root pointer.
    Tree,
    Node(NodeId),
    Context(ContextId),
}

/// Which field of the owner changed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Field {
    /// An arena entry.
    Node(NodeId),
    Root,
    Key,
    Element,
    Children,
    Widget,
    Slot(usize),
    Provider,
    Value,
    Subscriber(SlotRef),
}

pub(crate) enum Previous {
    Node(Box<CommittedNode>),
    Root(Option<NodeId>),
    Key(Key),
    Element(Element),
    Children(Vec<NodeId>),
    Widget(Option<WidgetId>),
    State(Box<dyn Any>),
    Deps(Option<Box<dyn Any>>),
    Memo {
        deps: Box<dyn Any>,
        value: Box<dyn Any>,
    },
    Selected(Box<dyn Any>),
    Selector(Selector),
    ContextEntry(ContextEntry),
    ContextValue(Rc<dyn Any>),
    Subscribed,
}

impl Previous {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Previous::Node(_) => "node",
            Previous::Root(_) => "root",
            Previous::Key(_) => "key",
            Previous::Element(_) => "element",
            Previous::Children(_) => "children",
            Previous::Widget(_) => "widget",
            Previous::State(_) => "state",
            Previous::Deps(_) => "deps",
            Previous::Memo { .. } => "memo",
            Previous::Selected(_) => "selected",
            Previous::Selector(_) => "selector",
            Previous::ContextEntry(_) => "context",
            Previous::ContextValue(_) => "context value",
            Previous::Subscribed => "subscribed",
        }
    }
}

pub struct LogEntry {
    owner: Owner,
    field: Field,
    pub(crate) previous: Option<Previous>,
}

impl LogEntry {
    pub(crate) fn new(owner: Owner, field: Field, previous: Option<Previous>) -> Self {
        Self {
            owner,
            field,
            previous,
        }
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn field(&self) -> Field {
        self.field
    }

    /// `false` when the field did not exist before the pass.
    pub fn had_previous(&self) -> bool {
        self.previous.is_some()
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogEntry")
            .field("owner", &self.owner)
            .field("field", &self.field)
            .field("previous", &self.previous.as_ref().map(Previous::label))
            .finish()
    }
}

/// Log of one render pass.
#[derive(Default, Debug)]
pub struct CommitLog {
    entries: Vec<LogEntry>,
}

impl CommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub(crate) fn record(&mut self, owner: Owner, field: Field, previous: Option<Previous>) {
        self.entries.push(LogEntry::new(owner, field, previous));
    }

    pub(crate) fn extend(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        self.entries.extend(entries);
    }

    /// Commits the pass. Returns the nodes removed during it, in removal
    /// order, so their teardown can run.
    pub(crate) fn commit(self) -> Vec<CommittedNode> {
        self.entries
            .into_iter()
            .filter_map(|entry| match (entry.owner, entry.previous) {
                (Owner::Tree, Some(Previous::Node(node))) => Some(*node),
                _ => None,
            })
            .collect()
    }

    /// Entries newest first, for rollback.
    pub(crate) fn into_undo_order(self) -> impl Iterator<Item = LogEntry> {
        self.entries.into_iter().rev()
    }
}

#[cfg(test)]
#[path = "tests/rollback_tests.rs"]
mod tests;
