//! Committed node arena.
//!
//! All mutations during a render pass go through the logged setters here,
//! so the arena can be restored from a [`CommitLog`] when a pass fails.

use std::any::Any;
use std::fmt;
use std::fmt::Write as _;
use std::rc::Rc;

use crate::backend::WidgetId;
use crate::collections::map::HashMap;
use crate::commit_log::{CommitLog, Field, LogEntry, Owner, Previous};
use crate::context::ContextRegistry;
use crate::element::{AnyComponent, Element, ElementKind, HostType, Key, TypeTag};
use crate::hooks::{HookSlot, SlotRef, SlotTag};
use crate::props::Props;
use crate::NodeId;

pub(crate) struct CommittedNode {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) depth: usize,
    pub(crate) key: Key,
    /// Latest element. Host elements are stored without their children,
    /// which live on as child nodes.
    pub(crate) element: Element,
    pub(crate) children: Vec<NodeId>,
    pub(crate) slots: Vec<HookSlot>,
    pub(crate) sealed: bool,
    pub(crate) widget: Option<WidgetId>,
}

impl CommittedNode {
    pub(crate) fn new(id: NodeId, parent: Option<NodeId>, depth: usize, key: Key, element: Element) -> Self {
        Self {
            id,
            parent,
            depth,
            key,
            element,
            children: Vec::new(),
            slots: Vec::new(),
            sealed: false,
            widget: None,
        }
    }

    pub(crate) fn component(&self) -> Option<&Rc<dyn AnyComponent>> {
        match &self.element.kind {
            ElementKind::Component(component) => Some(component),
            ElementKind::Host { .. } => None,
        }
    }

    pub(crate) fn host_type(&self) -> Option<&'static dyn HostType> {
        match &self.element.kind {
            ElementKind::Host { ty, .. } => Some(*ty),
            ElementKind::Component(_) => None,
        }
    }

    pub(crate) fn is_component(&self) -> bool {
        self.component().is_some()
    }
}

#[derive(Default)]
pub(crate) struct Tree {
    nodes: HashMap<NodeId, CommittedNode>,
    root: Option<NodeId>,
    next_node: u64,
    next_widget: u64,
}

impl Tree {
    pub(crate) fn allocate_node(&mut self) -> NodeId {
        self.next_node += 1;
        NodeId(self.next_node)
    }

    pub(crate) fn allocate_widget(&mut self) -> WidgetId {
        self.next_widget += 1;
        WidgetId(self.next_widget)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&CommittedNode> {
        self.nodes.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut CommittedNode> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub(crate) fn depth(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map(|node| node.depth).unwrap_or(0)
    }

    pub(crate) fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn type_tag(&self, id: NodeId) -> Option<TypeTag> {
        self.nodes.get(&id).map(|node| node.element.type_tag())
    }

    pub(crate) fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// The widget a node contributes to its host parent: its own for a host
    /// node, its rendered child's for a component.
    pub(crate) fn host_widget(&self, mut id: NodeId) -> Option<WidgetId> {
        loop {
            let node = self.nodes.get(&id)?;
            if !node.is_component() {
                return node.widget;
            }
            id = *node.children.first()?;
        }
    }

    pub(crate) fn child_widgets(&self, id: NodeId) -> Vec<WidgetId> {
        self.children(id)
            .iter()
            .filter_map(|child| self.host_widget(*child))
            .collect()
    }

    /// Nearest host ancestor of `id`.
    pub(crate) fn host_ancestor(&self, id: NodeId) -> Option<NodeId> {
        let mut parent = self.nodes.get(&id)?.parent;
        while let Some(candidate) = parent {
            let node = self.nodes.get(&candidate)?;
            if !node.is_component() {
                return Some(candidate);
            }
            parent = node.parent;
        }
        None
    }

    pub(crate) fn insert(&mut self, node: CommittedNode, log: &mut CommitLog) {
        log.record(Owner::Tree, Field::Node(node.id), None);
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn remove(&mut self, id: NodeId, log: &mut CommitLog) {
        if let Some(node) = self.nodes.remove(&id) {
            log.record(Owner::Tree, Field::Node(id), Some(Previous::Node(Box::new(node))));
        }
    }

    pub(crate) fn set_root(&mut self, root: Option<NodeId>, log: &mut CommitLog) {
        if self.root != root {
            let previous = std::mem::replace(&mut self.root, root);
            log.record(Owner::Tree, Field::Root, Some(Previous::Root(previous)));
        }
    }

    pub(crate) fn set_key(&mut self, id: NodeId, key: Key, log: &mut CommitLog) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if node.key != key {
                let previous = std::mem::replace(&mut node.key, key);
                log.record(Owner::Node(id), Field::Key, Some(Previous::Key(previous)));
            }
        }
    }

    pub(crate) fn set_element(&mut self, id: NodeId, element: Element, log: &mut CommitLog) {
        if let Some(node) = self.nodes.get_mut(&id) {
            let previous = std::mem::replace(&mut node.element, element);
            log.record(Owner::Node(id), Field::Element, Some(Previous::Element(previous)));
        }
    }

    pub(crate) fn set_children(&mut self, id: NodeId, children: Vec<NodeId>, log: &mut CommitLog) {
        if let Some(node) = self.nodes.get_mut(&id) {
            if node.children != children {
                let previous = std::mem::replace(&mut node.children, children);
                log.record(Owner::Node(id), Field::Children, Some(Previous::Children(previous)));
            }
        }
    }

    pub(crate) fn set_widget(&mut self, id: NodeId, widget: Option<WidgetId>, log: &mut CommitLog) {
        if let Some(node) = self.nodes.get_mut(&id) {
            let previous = std::mem::replace(&mut node.widget, widget);
            log.record(Owner::Node(id), Field::Widget, Some(Previous::Widget(previous)));
        }
    }

    /// Reads a state slot. Used to feed queued updates.
    pub(crate) fn state(&self, target: SlotRef) -> Option<&dyn Any> {
        match self.nodes.get(&target.node)?.slots.get(target.index)? {
            HookSlot::State(slot) => Some(&*slot.value),
            _ => None,
        }
    }

    pub(crate) fn replace_state(&mut self, target: SlotRef, value: Box<dyn Any>, log: &mut CommitLog) {
        let Some(node) = self.nodes.get_mut(&target.node) else {
            return;
        };
        if let Some(HookSlot::State(slot)) = node.slots.get_mut(target.index) {
            let previous = std::mem::replace(&mut slot.value, value);
            log.record(
                Owner::Node(target.node),
                Field::Slot(target.index),
                Some(Previous::State(previous)),
            );
        }
    }

    /// Re-runs a subscriber's selector against a new context value. Returns
    /// whether the selection changed.
    pub(crate) fn refresh_selection(&mut self, target: SlotRef, value: &dyn Any, log: &mut CommitLog) -> bool {
        let Some(node) = self.nodes.get_mut(&target.node) else {
            return false;
        };
        let Some(HookSlot::ContextSub(slot)) = node.slots.get_mut(target.index) else {
            return false;
        };
        let Some(selected) = (slot.selector)(value) else {
            return false;
        };
        if (slot.same)(&*slot.selected, &*selected) {
            return false;
        }
        let previous = std::mem::replace(&mut slot.selected, selected);
        log.record(
            Owner::Node(target.node),
            Field::Slot(target.index),
            Some(Previous::Selected(previous)),
        );
        true
    }

    pub(crate) fn state_value<T: Clone + 'static>(&self, node: NodeId, index: usize) -> Option<T> {
        match self.nodes.get(&node)?.slots.get(index)? {
            HookSlot::State(slot) => slot.value.downcast_ref::<T>().cloned(),
            _ => None,
        }
    }

    /// Undoes every entry of `log`, newest first.
    pub(crate) fn rollback(&mut self, log: CommitLog, contexts: &mut ContextRegistry) {
        for entry in log.into_undo_order() {
            self.undo(entry, contexts);
        }
    }

    fn undo(&mut self, entry: LogEntry, contexts: &mut ContextRegistry) {
        let (owner, field) = (entry.owner(), entry.field());
        match (owner, field, entry.previous) {
            (Owner::Tree, Field::Node(id), None) => {
                self.nodes.remove(&id);
            }
            (Owner::Tree, Field::Node(id), Some(Previous::Node(node))) => {
                self.nodes.insert(id, *node);
            }
            (Owner::Tree, Field::Root, Some(Previous::Root(root))) => self.root = root,
            (Owner::Node(id), field, previous) => {
                let Some(node) = self.nodes.get_mut(&id) else {
                    log::warn!("rollback found no node {id} for {field:?}");
                    return;
                };
                match (field, previous) {
                    (Field::Key, Some(Previous::Key(key))) => node.key = key,
                    (Field::Element, Some(Previous::Element(element))) => node.element = element,
                    (Field::Children, Some(Previous::Children(children))) => node.children = children,
                    (Field::Widget, Some(Previous::Widget(widget))) => node.widget = widget,
                    (Field::Slot(index), None) => node.slots.truncate(index),
                    (Field::Slot(index), Some(previous)) => undo_slot(node.slots.get_mut(index), previous),
                    (field, _) => log::warn!("cannot undo {field:?} of node {id}"),
                }
            }
            (Owner::Context(id), Field::Provider, None) => {
                contexts.remove(&id);
            }
            (Owner::Context(id), Field::Provider, Some(Previous::ContextEntry(entry))) => {
                contexts.insert(id, entry);
            }
            (Owner::Context(id), Field::Value, Some(Previous::ContextValue(value))) => {
                if let Some(entry) = contexts.get_mut(&id) {
                    entry.value = value;
                }
            }
            (Owner::Context(id), Field::Subscriber(target), None) => {
                if let Some(entry) = contexts.get_mut(&id) {
                    entry.subscribers.shift_remove(&target);
                }
            }
            (Owner::Context(id), Field::Subscriber(target), Some(Previous::Subscribed)) => {
                if let Some(entry) = contexts.get_mut(&id) {
                    entry.subscribers.insert(target);
                }
            }
            (owner, field, _) => log::warn!("cannot undo {field:?} of {owner:?}"),
        }
    }

    pub(crate) fn dump(&self) -> String {
        let mut output = String::new();
        match self.root {
            Some(root) => self.dump_node(root, 0, &mut output),
            None => output.push_str("(empty)\n"),
        }
        output
    }

    fn dump_node(&self, id: NodeId, depth: usize, output: &mut String) {
        let indent = "  ".repeat(depth);
        let Some(node) = self.nodes.get(&id) else {
            let _ = writeln!(output, "{indent}<missing {id}>");
            return;
        };
        let _ = write!(output, "{indent}{} {id}", node.element.name());
        if !matches!(node.key, Key::Index(_)) {
            let _ = write!(output, " key={}", node.key);
        }
        if let Some(props) = node.element.props() {
            for (name, value) in props {
                let _ = write!(output, " {name}={value}");
            }
        }
        if let Some(widget) = node.widget {
            let _ = write!(output, " -> {widget}");
        }
        output.push('\n');
        for child in &node.children {
            self.dump_node(*child, depth + 1, output);
        }
    }
}

fn undo_slot(slot: Option<&mut HookSlot>, previous: Previous) {
    match (slot, previous) {
        (Some(HookSlot::State(slot)), Previous::State(value)) => slot.value = value,
        (Some(HookSlot::Effect(slot)), Previous::Deps(deps)) => slot.deps = deps,
        (Some(HookSlot::Async(slot)), Previous::Deps(deps)) => slot.deps = deps,
        (Some(HookSlot::Memo(slot)), Previous::Memo { deps, value }) => {
            slot.deps = deps;
            slot.value = value;
        }
        (Some(HookSlot::ContextSub(slot)), Previous::Selected(selected)) => slot.selected = selected,
        (Some(HookSlot::ContextSub(slot)), Previous::Selector(selector)) => slot.selector = selector,
        (_, previous) => log::warn!("slot does not match logged {}", previous.label()),
    }
}

/// Read-only view of a committed node.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    node: &'a CommittedNode,
}

impl<'a> NodeView<'a> {
    pub(crate) fn new(node: &'a CommittedNode) -> Self {
        Self { node }
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.node.parent
    }

    pub fn depth(&self) -> usize {
        self.node.depth
    }

    pub fn key(&self) -> &'a Key {
        &self.node.key
    }

    pub fn element(&self) -> &'a Element {
        &self.node.element
    }

    pub fn type_tag(&self) -> TypeTag {
        self.node.element.type_tag()
    }

    pub fn name(&self) -> &'static str {
        self.node.element.name()
    }

    pub fn is_component(&self) -> bool {
        self.node.is_component()
    }

    pub fn props(&self) -> Option<&'a Props> {
        self.node.element.props()
    }

    pub fn children(&self) -> &'a [NodeId] {
        &self.node.children
    }

    pub fn widget(&self) -> Option<WidgetId> {
        self.node.widget
    }

    pub fn slot_tags(&self) -> Vec<SlotTag> {
        self.node.slots.iter().map(HookSlot::tag).collect()
    }
}

impl fmt::Debug for NodeView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeView")
            .field("id", &self.node.id)
            .field("type", &self.name())
            .field("key", &self.node.key)
            .field("children", &self.node.children)
            .field("widget", &self.node.widget)
            .finish()
    }
}
