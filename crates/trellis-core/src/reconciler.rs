//! Keyed reconciliation of declared element trees against the committed
//! tree.
//!
//! A render pass applies queued state updates, reconciles whatever the
//! caller asked for, then re-renders every component left dirty, shallowest
//! first. All mutations go through the [`CommitLog`]; if anything fails the
//! pass is rolled back and nothing it produced escapes. A successful pass
//! returns the backend commands in application order and queues the
//! post-commit work (teardown, lifecycle callbacks, effects, async starts)
//! that the host runs once the commands are applied.

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::backend::{Command, WidgetId};
use crate::builder;
use crate::collections::map::{HashMap, HashSet};
use crate::commit_log::{CommitLog, Field, Owner, Previous};
use crate::config::RenderConfig;
use crate::context::ContextId;
use crate::element::{Element, ElementKind, Key, Lifecycle};
use crate::error::{HookError, RenderError, RenderResult};
use crate::executor::panic_message;
use crate::hooks::{self, guarded, AsyncCell, HookSlot, PendingEffect, PendingTask, RenderFrame, SlotRef};
use crate::props::{Handler, Props, PropsDiff};
use crate::runtime::{PendingUpdate, Runtime};
use crate::tree::{CommittedNode, Tree};
use crate::NodeId;

pub use crate::tree::NodeView;

/// Nodes touched by a committed pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeDelta {
    pub mounted: Vec<NodeId>,
    /// Components that re-rendered and hosts whose props changed.
    pub updated: Vec<NodeId>,
    pub unmounted: Vec<NodeId>,
}

impl TreeDelta {
    pub fn is_empty(&self) -> bool {
        self.mounted.is_empty() && self.updated.is_empty() && self.unmounted.is_empty()
    }
}

/// Result of a committed render pass.
#[derive(Debug, Default)]
pub struct RenderOutcome {
    pub delta: TreeDelta,
    /// Backend commands, in the order they must be applied.
    pub commands: Vec<Command>,
}

impl RenderOutcome {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

struct Rendered {
    child: Element,
    effects: Vec<PendingEffect>,
    tasks: Vec<PendingTask>,
}

/// Post-commit work of one component.
struct NodeWork {
    node: NodeId,
    event: Lifecycle,
    effects: Vec<PendingEffect>,
    tasks: Vec<PendingTask>,
}

#[derive(Default)]
struct PostCommit {
    teardown: Vec<CommittedNode>,
    work: Vec<NodeWork>,
}

#[derive(Default)]
struct Pass {
    log: CommitLog,
    commands: Vec<Command>,
    removals: Vec<Command>,
    destroys: Vec<Command>,
    dirty: HashSet<NodeId>,
    delta: TreeDelta,
    work: Vec<NodeWork>,
}

pub struct Reconciler {
    tree: Tree,
    runtime: Runtime,
    config: RenderConfig,
    pending: PostCommit,
}

impl Reconciler {
    pub fn new(runtime: Runtime) -> Self {
        Self::with_config(runtime, RenderConfig::default())
    }

    pub fn with_config(runtime: Runtime, config: RenderConfig) -> Self {
        Self {
            tree: Tree::default(),
            runtime,
            config,
            pending: PostCommit::default(),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Reconciles `element` against the committed root.
    pub fn render(&mut self, element: Element) -> Result<RenderOutcome, RenderError> {
        self.run_pass(move |this, pass| {
            let old: Vec<NodeId> = this.tree.root().into_iter().collect();
            let roots = this.reconcile_children(pass, None, &old, vec![element])?;
            this.tree.set_root(roots.first().copied(), &mut pass.log);
            Ok(())
        })
    }

    /// Runs a pass that applies queued updates and re-renders `nodes`. Host
    /// nodes re-render through their nearest component ancestor.
    pub fn request_rerender(&mut self, nodes: &[NodeId]) -> Result<RenderOutcome, RenderError> {
        let mut targets = Vec::with_capacity(nodes.len());
        for &node in nodes {
            if !self.tree.contains(node) {
                return Err(RenderError::UnknownNode { node });
            }
            if let Some(target) = self.component_at_or_above(node) {
                targets.push(target);
            }
        }
        self.run_pass(move |_, pass| {
            pass.dirty.extend(targets);
            Ok(())
        })
    }

    /// Replaces the element of a mounted component and re-renders it. The
    /// node keeps its key and hook slots. On failure the previous element
    /// and children are restored.
    pub fn hot_swap(&mut self, node: NodeId, mut replacement: Element) -> Result<RenderOutcome, RenderError> {
        let current = self.tree.get(node).ok_or(RenderError::UnknownNode { node })?;
        if !current.is_component() || replacement.is_host() {
            return Err(RenderError::NotComponent { node });
        }
        replacement.key = current.element.key.clone();
        log::debug!("hot swap {node}: {} -> {}", current.element.name(), replacement.name());
        self.run_pass(move |this, pass| {
            this.tree.set_element(node, replacement, &mut pass.log);
            this.rerender(pass, node)
        })
    }

    /// Unmounts the whole tree in one pass.
    pub fn unmount_all(&mut self) -> Result<RenderOutcome, RenderError> {
        self.run_pass(|this, pass| {
            if let Some(root) = this.tree.root() {
                this.unmount(pass, root);
                this.tree.set_root(None, &mut pass.log);
            }
            Ok(())
        })
    }

    /// Whether queued updates or a render request are waiting.
    pub fn needs_render(&self) -> bool {
        self.runtime.needs_render() || self.runtime.has_updates()
    }

    pub fn has_post_commit(&self) -> bool {
        !self.pending.teardown.is_empty() || !self.pending.work.is_empty()
    }

    /// Runs teardown for nodes removed by committed passes: `will_unmount`,
    /// then every effect cleanup and async cancellation of their slots.
    pub fn run_teardown(&mut self) {
        for mut node in std::mem::take(&mut self.pending.teardown) {
            log::trace!("teardown {} {}", node.element.name(), node.id);
            if let Some(component) = node.component() {
                guarded("will_unmount", || component.lifecycle(Lifecycle::Unmounting));
            }
            for slot in node.slots.drain(..) {
                drop(slot);
            }
        }
    }

    /// Runs lifecycle callbacks, effects and async starts queued by committed
    /// passes, in commit order. Call after the pass's commands were applied.
    pub fn run_effects(&mut self) {
        let runtime = self.runtime.handle();
        for work in std::mem::take(&mut self.pending.work) {
            let Some(node) = self.tree.get(work.node) else {
                log::trace!("skipping post-commit work of unmounted {}", work.node);
                continue;
            };
            if let Some(component) = node.component().cloned() {
                guarded("lifecycle callback", || component.lifecycle(work.event));
            }
            for effect in work.effects {
                self.run_effect(effect);
            }
            for task in work.tasks {
                AsyncCell::restart(&task.cell, &runtime, task.factory);
            }
        }
    }

    /// Drops the queued effects and async starts of committed passes, for
    /// hosts whose backend rejected the commands. Teardown still runs.
    pub fn discard_post_commit(&mut self) {
        self.run_teardown();
        let dropped = std::mem::take(&mut self.pending.work);
        if !dropped.is_empty() {
            log::warn!("discarding post-commit work of {} components", dropped.len());
        }
    }

    fn run_effect(&mut self, effect: PendingEffect) {
        let target = effect.target;
        let previous = match self.effect_slot(target) {
            Some(slot) => slot.cleanup.take(),
            None => {
                log::trace!("effect slot {}:{} is gone", target.node, target.index);
                return;
            }
        };
        if let Some(cleanup) = previous {
            guarded("effect cleanup", || cleanup.run());
        }
        match panic::catch_unwind(AssertUnwindSafe(effect.setup)) {
            Ok(cleanup) => {
                if let Some(slot) = self.effect_slot(target) {
                    slot.cleanup = cleanup;
                }
            }
            Err(payload) => {
                log::warn!("effect setup of {} panicked: {}", target.node, panic_message(&*payload));
            }
        }
    }

    fn effect_slot(&mut self, target: SlotRef) -> Option<&mut hooks::EffectSlot> {
        match self.tree.get_mut(target.node)?.slots.get_mut(target.index)? {
            HookSlot::Effect(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.tree.root()
    }

    pub fn node(&self, id: NodeId) -> Option<NodeView<'_>> {
        self.tree.get(id).map(NodeView::new)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.len() == 0
    }

    pub fn dump_tree(&self) -> String {
        self.tree.dump()
    }

    /// Committed value of a `use_state` slot.
    pub fn state_value<T: Clone + 'static>(&self, node: NodeId, slot: usize) -> Option<T> {
        self.tree.state_value(node, slot)
    }

    /// The host node currently bound to `widget`.
    pub fn node_for_widget(&self, widget: WidgetId) -> Option<NodeId> {
        self.tree
            .node_ids()
            .find(|id| self.tree.get(*id).and_then(|node| node.widget) == Some(widget))
    }

    /// The latest handler declared for `prop` on the host bound to `widget`.
    pub fn handler(&self, widget: WidgetId, prop: &str) -> Option<Handler> {
        let node = self.tree.get(self.node_for_widget(widget)?)?;
        node.element.prop(prop)?.as_handler().cloned()
    }

    /// First node in tree order matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&NodeView<'_>) -> bool) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = self.tree.root().into_iter().collect();
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            if predicate(&node) {
                return Some(id);
            }
            stack.extend(node.children().iter().rev().copied());
        }
        None
    }

    fn component_at_or_above(&self, mut id: NodeId) -> Option<NodeId> {
        loop {
            let node = self.tree.get(id)?;
            if node.is_component() {
                return Some(id);
            }
            id = node.parent?;
        }
    }

    fn root_widget(&self) -> Option<WidgetId> {
        self.tree.root().and_then(|root| self.tree.host_widget(root))
    }

    fn run_pass(
        &mut self,
        body: impl FnOnce(&mut Self, &mut Pass) -> RenderResult,
    ) -> Result<RenderOutcome, RenderError> {
        let handle = self.runtime.handle();
        if !handle.begin_render() {
            return Err(RenderError::Reentrant);
        }
        log::debug!("render pass begin ({} nodes)", self.tree.len());
        let mut pass = Pass::default();
        let root_widget = self.root_widget();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.apply_updates(&mut pass);
            body(self, &mut pass)?;
            self.flush_dirty(&mut pass)
        }))
        .unwrap_or_else(|payload| {
            Err(RenderError::Panicked {
                node: None,
                message: panic_message(&*payload),
            })
        });
        let outcome = match result {
            Ok(()) => Ok(self.commit(pass, root_widget)),
            Err(err) => {
                log::warn!("render pass failed, rolling back {} mutations: {err}", pass.log.len());
                let tree = &mut self.tree;
                self.runtime.with_contexts(|contexts| tree.rollback(pass.log, contexts));
                Err(err)
            }
        };
        handle.end_render();
        outcome
    }

    fn commit(&mut self, mut pass: Pass, root_widget: Option<WidgetId>) -> RenderOutcome {
        let new_root = self.root_widget();
        if new_root != root_widget {
            pass.commands.push(Command::SetRoot { widget: new_root });
        }
        let mut commands = pass.commands;
        commands.append(&mut pass.removals);
        commands.append(&mut pass.destroys);
        log::debug!(
            "render pass committed: {} mounted, {} updated, {} unmounted, {} commands",
            pass.delta.mounted.len(),
            pass.delta.updated.len(),
            pass.delta.unmounted.len(),
            commands.len()
        );
        self.pending.teardown.extend(pass.log.commit());
        self.pending.work.extend(pass.work);
        RenderOutcome {
            delta: pass.delta,
            commands,
        }
    }

    fn apply_updates(&mut self, pass: &mut Pass) {
        for update in self.runtime.handle().take_updates() {
            match update {
                PendingUpdate::State { target, apply } => {
                    let Some(current) = self.tree.state(target) else {
                        log::trace!("dropping state update for unmounted {}", target.node);
                        continue;
                    };
                    if let Some(next) = apply(current) {
                        self.tree.replace_state(target, next, &mut pass.log);
                        pass.dirty.insert(target.node);
                    }
                }
                PendingUpdate::Context { context, apply } => self.apply_context_update(pass, context, apply),
                PendingUpdate::Refresh { context } => self.refresh_subscribers(pass, context),
            }
        }
    }

    fn apply_context_update(&mut self, pass: &mut Pass, context: ContextId, apply: crate::runtime::UpdateFn) {
        let changed = self.runtime.with_contexts(|contexts| {
            let entry = contexts.get_mut(&context)?;
            let provider = entry.provider?;
            let next = apply(&*entry.value)?;
            let previous = std::mem::replace(&mut entry.value, Rc::from(next));
            let subscribers: Vec<SlotRef> = entry.subscribers.iter().copied().collect();
            Some((previous, provider, entry.value.clone(), subscribers))
        });
        let Some((previous, provider, value, subscribers)) = changed else {
            return;
        };
        pass.log
            .record(Owner::Context(context), Field::Value, Some(Previous::ContextValue(previous)));
        pass.dirty.insert(provider);
        self.mark_subscribers(pass, &*value, subscribers);
        log::trace!("context {context} changed, provider {provider}");
    }

    fn refresh_subscribers(&mut self, pass: &mut Pass, context: ContextId) {
        let current = self.runtime.with_contexts(|contexts| {
            contexts
                .provided(&context)
                .map(|entry| (entry.value.clone(), entry.subscribers.iter().copied().collect::<Vec<_>>()))
        });
        if let Some((value, subscribers)) = current {
            self.mark_subscribers(pass, &*value, subscribers);
        }
    }

    fn mark_subscribers(&mut self, pass: &mut Pass, value: &dyn std::any::Any, subscribers: Vec<SlotRef>) {
        for target in subscribers {
            if self.tree.refresh_selection(target, value, &mut pass.log) {
                pass.dirty.insert(target.node);
            }
        }
    }

    fn flush_dirty(&mut self, pass: &mut Pass) -> RenderResult {
        loop {
            let tree = &self.tree;
            pass.dirty.retain(|id| tree.contains(*id));
            let next = pass
                .dirty
                .iter()
                .copied()
                .min_by_key(|id| (tree.depth(*id), *id));
            match next {
                Some(id) => self.rerender(pass, id)?,
                None => return Ok(()),
            }
        }
    }

    /// Re-renders a component in place, then re-syncs the child placement
    /// of its nearest host ancestor if the component now contributes a
    /// different widget.
    fn rerender(&mut self, pass: &mut Pass, id: NodeId) -> RenderResult {
        let ancestor = self.tree.host_ancestor(id);
        let before = ancestor
            .map(|ancestor| self.tree.child_widgets(ancestor))
            .unwrap_or_default();
        self.render_subtree(pass, id, Lifecycle::Rendered)?;
        if let Some(ancestor) = ancestor {
            let after = self.tree.child_widgets(ancestor);
            if after != before {
                let widget = self.tree.get(ancestor).and_then(|node| node.widget);
                emit_placement(pass, widget, &before, &after);
            }
        }
        Ok(())
    }

    fn reconcile_children(
        &mut self,
        pass: &mut Pass,
        parent: Option<NodeId>,
        old: &[NodeId],
        mut new: Vec<Element>,
    ) -> Result<Vec<NodeId>, RenderError> {
        let depth = parent.map(|parent| self.tree.depth(parent) + 1).unwrap_or(0);

        if let ([only], 1) = (old, new.len()) {
            if self.tree.type_tag(*only) == Some(new[0].type_tag()) {
                let element = new.remove(0);
                let key = element.key.clone().unwrap_or(Key::Index(0));
                self.update(pass, *only, key, element)?;
                return Ok(vec![*only]);
            }
        }

        let mut table: IndexMap<Key, NodeId> = old
            .iter()
            .filter_map(|id| self.tree.get(*id).map(|node| (node.key.clone(), *id)))
            .collect();
        // Siblings that no new element reuses give up their contexts before
        // anything mounts, so replacements can provide the same keys.
        let consumed: HashSet<NodeId> = new
            .iter()
            .enumerate()
            .filter_map(|(index, element)| {
                let key = element.key.clone().unwrap_or(Key::Index(index));
                let id = *table.get(&key)?;
                (self.tree.type_tag(id) == Some(element.type_tag())).then_some(id)
            })
            .collect();
        for id in table.values() {
            if !consumed.contains(id) {
                self.release_providers(pass, *id);
            }
        }
        let mut seen: HashSet<Key> = HashSet::default();
        let mut children = Vec::with_capacity(new.len());
        for (index, element) in new.into_iter().enumerate() {
            let key = element.key.clone().unwrap_or(Key::Index(index));
            if !seen.insert(key.clone()) {
                return Err(RenderError::DuplicateKey { parent, key });
            }
            let reusable = table
                .get(&key)
                .is_some_and(|id| self.tree.type_tag(*id) == Some(element.type_tag()));
            let id = match reusable.then(|| table.shift_remove(&key)).flatten() {
                Some(id) => {
                    self.update(pass, id, key, element)?;
                    id
                }
                None => self.mount(pass, parent, depth, key, element)?,
            };
            children.push(id);
        }
        for (_, id) in table {
            self.unmount(pass, id);
        }
        Ok(children)
    }

    fn update(&mut self, pass: &mut Pass, id: NodeId, key: Key, element: Element) -> RenderResult {
        self.tree.set_key(id, key, &mut pass.log);
        if element.is_host() {
            self.update_host(pass, id, element)
        } else {
            self.update_component(pass, id, element)
        }
    }

    fn update_host(&mut self, pass: &mut Pass, id: NodeId, mut element: Element) -> RenderResult {
        let declared = element.take_children();
        let node = self.tree.get(id).ok_or(RenderError::UnknownNode { node: id })?;
        let diff = match (node.element.props(), element.props()) {
            (Some(old), Some(new)) => PropsDiff::between(old, new),
            _ => PropsDiff::default(),
        };
        let ty = node.host_type();
        let widget = node.widget;
        let old_children = node.children.clone();
        let old_widgets = self.tree.child_widgets(id);

        let children = self.reconcile_children(pass, Some(id), &old_children, declared)?;
        self.tree.set_children(id, children, &mut pass.log);
        self.tree.set_element(id, element, &mut pass.log);

        if let (Some(ty), Some(widget)) = (ty, widget) {
            if !diff.is_empty() {
                log::trace!("update {} {id}: {} props changed", ty.name(), diff.len());
                ty.update_commands(widget, &diff, &mut pass.commands);
                pass.delta.updated.push(id);
            }
        }
        let new_widgets = self.tree.child_widgets(id);
        if new_widgets != old_widgets {
            emit_placement(pass, widget, &old_widgets, &new_widgets);
        }
        Ok(())
    }

    fn update_component(&mut self, pass: &mut Pass, id: NodeId, element: Element) -> RenderResult {
        let node = self.tree.get(id).ok_or(RenderError::UnknownNode { node: id })?;
        let needed = pass.dirty.contains(&id)
            || !element.children.is_empty()
            || !node.element.children.is_empty()
            || match (&element.kind, node.component()) {
                (ElementKind::Component(next), Some(previous)) => {
                    next.should_update_erased(&**previous)
                }
                _ => true,
            };
        self.tree.set_element(id, element, &mut pass.log);
        if needed {
            self.render_subtree(pass, id, Lifecycle::Rendered)
        } else {
            log::trace!("skip {id}: props unchanged");
            Ok(())
        }
    }

    fn mount(
        &mut self,
        pass: &mut Pass,
        parent: Option<NodeId>,
        depth: usize,
        key: Key,
        mut element: Element,
    ) -> Result<NodeId, RenderError> {
        let id = self.tree.allocate_node();
        log::trace!("mount {} {id}", element.name());
        let host = match &element.kind {
            ElementKind::Host { ty, props } => Some((*ty, PropsDiff::between(&Props::new(), props))),
            ElementKind::Component(_) => None,
        };
        match host {
            Some((ty, initial)) => {
                let declared = element.take_children();
                self.tree
                    .insert(CommittedNode::new(id, parent, depth, key, element), &mut pass.log);
                let children = self.reconcile_children(pass, Some(id), &[], declared)?;
                self.tree.set_children(id, children, &mut pass.log);

                let widget = self.tree.allocate_widget();
                pass.commands.push(Command::Create {
                    widget,
                    kind: ty.name(),
                });
                ty.update_commands(widget, &initial, &mut pass.commands);
                for child in self.tree.child_widgets(id) {
                    pass.commands.push(Command::Insert {
                        parent: widget,
                        child,
                        before: None,
                    });
                }
                self.tree.set_widget(id, Some(widget), &mut pass.log);
            }
            None => {
                self.tree
                    .insert(CommittedNode::new(id, parent, depth, key, element), &mut pass.log);
                self.render_subtree(pass, id, Lifecycle::Mounted)?;
            }
        }
        pass.delta.mounted.push(id);
        Ok(id)
    }

    /// Renders a component and reconciles its single child.
    fn render_subtree(&mut self, pass: &mut Pass, id: NodeId, event: Lifecycle) -> RenderResult {
        pass.dirty.remove(&id);
        let element = self
            .tree
            .get(id)
            .map(|node| node.element.clone())
            .ok_or(RenderError::UnknownNode { node: id })?;
        let rendered = self.render_component(pass, id, &element)?;
        let old = self.tree.children(id).to_vec();
        let children = self.reconcile_children(pass, Some(id), &old, vec![rendered.child])?;
        self.tree.set_children(id, children, &mut pass.log);
        if event == Lifecycle::Rendered {
            pass.delta.updated.push(id);
        }
        pass.work.push(NodeWork {
            node: id,
            event,
            effects: rendered.effects,
            tasks: rendered.tasks,
        });
        Ok(())
    }

    fn render_component(&mut self, pass: &mut Pass, id: NodeId, element: &Element) -> Result<Rendered, RenderError> {
        let ElementKind::Component(component) = &element.kind else {
            return Err(RenderError::NotComponent { node: id });
        };
        let node = self.tree.get_mut(id).ok_or(RenderError::UnknownNode { node: id })?;
        let sealed = node.sealed;
        let slots = std::mem::take(&mut node.slots);
        log::trace!("render {} {id}", component.component_name());

        let frame = RenderFrame::new(id, self.runtime.handle(), slots, sealed, element.children.clone());
        let guard = hooks::enter(frame);
        let capture = builder::open();
        let result = panic::catch_unwind(AssertUnwindSafe(|| component.render_erased()));
        let emitted = capture.close();
        let frame = guard.finish();

        let node = self.tree.get_mut(id).ok_or(RenderError::UnknownNode { node: id })?;
        let Some(frame) = frame else {
            return Err(RenderError::Panicked {
                node: Some(id),
                message: "render frame stack was unbalanced".to_string(),
            });
        };
        node.slots = frame.slots;
        pass.log.extend(frame.log);
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err.at_node(id)),
            Err(payload) => {
                return Err(RenderError::Panicked {
                    node: Some(id),
                    message: panic_message(&*payload),
                })
            }
        }
        if sealed && frame.cursor < node.slots.len() {
            return Err(HookError::Underrun {
                node: id,
                used: frame.cursor,
                previous: node.slots.len(),
            }
            .into());
        }
        node.sealed = true;
        let child = builder::single_root(emitted)?;
        Ok(Rendered {
            child,
            effects: frame.effects,
            tasks: frame.tasks,
        })
    }

    /// Unmounts a subtree, children first. Backend handles are destroyed
    /// after every other command of the pass.
    fn unmount(&mut self, pass: &mut Pass, id: NodeId) {
        for child in self.tree.children(id).to_vec() {
            self.unmount(pass, child);
        }
        let Some(node) = self.tree.get(id) else {
            return;
        };
        log::trace!("unmount {} {id}", node.element.name());
        let detached: Vec<(ContextId, Option<SlotRef>)> = node
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                HookSlot::ContextProvider(context) => Some((*context, None)),
                HookSlot::ContextSub(sub) => Some((sub.context, Some(SlotRef { node: id, index }))),
                _ => None,
            })
            .collect();
        let widget = node.widget;
        for (context, subscriber) in detached {
            self.detach_context(pass, id, context, subscriber);
        }
        if let Some(widget) = widget {
            pass.destroys.push(Command::Destroy { widget });
        }
        self.tree.remove(id, &mut pass.log);
        pass.dirty.remove(&id);
        pass.delta.unmounted.push(id);
    }

    /// Gives up the contexts provided anywhere in a subtree that is about to
    /// unmount.
    fn release_providers(&self, pass: &mut Pass, id: NodeId) {
        let Some(node) = self.tree.get(id) else {
            return;
        };
        let provided: Vec<ContextId> = node
            .slots
            .iter()
            .filter_map(|slot| match slot {
                HookSlot::ContextProvider(context) => Some(*context),
                _ => None,
            })
            .collect();
        for context in provided {
            log::trace!("release {context} provided by {id}");
            self.detach_context(pass, id, context, None);
        }
        for child in self.tree.children(id).to_vec() {
            self.release_providers(pass, child);
        }
    }

    fn detach_context(&self, pass: &mut Pass, node: NodeId, context: ContextId, subscriber: Option<SlotRef>) {
        match subscriber {
            Some(target) => {
                let (removed, dropped) = self
                    .runtime
                    .with_contexts(|contexts| {
                        let Some(entry) = contexts.get_mut(&context) else {
                            return (false, None);
                        };
                        let removed = entry.subscribers.shift_remove(&target);
                        if entry.provider.is_none() && entry.subscribers.is_empty() {
                            (removed, contexts.remove(&context))
                        } else {
                            (removed, None)
                        }
                    });
                if removed {
                    pass.log
                        .record(Owner::Context(context), Field::Subscriber(target), Some(Previous::Subscribed));
                }
                if let Some(entry) = dropped {
                    pass.log
                        .record(Owner::Context(context), Field::Provider, Some(Previous::ContextEntry(entry)));
                }
            }
            None => {
                let released = self.runtime.with_contexts(|contexts| {
                    let entry = contexts.get_mut(&context).filter(|entry| entry.provider == Some(node))?;
                    let previous = entry.clone();
                    if entry.subscribers.is_empty() {
                        contexts.remove(&context);
                    } else {
                        entry.provider = None;
                    }
                    Some(previous)
                });
                if let Some(entry) = released {
                    pass.log
                        .record(Owner::Context(context), Field::Provider, Some(Previous::ContextEntry(entry)));
                }
            }
        }
    }
}

/// Emits the commands that turn `old` into `new` under `parent`. Widgets on
/// the longest run that keeps its relative order stay put; the rest move or
/// are inserted, walking backwards so every anchor is already in place.
fn emit_placement(pass: &mut Pass, parent: Option<WidgetId>, old: &[WidgetId], new: &[WidgetId]) {
    let Some(parent) = parent else {
        return;
    };
    let old_positions: HashMap<WidgetId, usize> =
        old.iter().enumerate().map(|(index, widget)| (*widget, index)).collect();
    let positions: Vec<Option<usize>> = new
        .iter()
        .map(|widget| old_positions.get(widget).copied())
        .collect();
    let stable = stable_positions(&positions);

    let mut before = None;
    for (index, widget) in new.iter().enumerate().rev() {
        let child = *widget;
        match positions[index] {
            Some(_) if stable[index] => {}
            Some(_) => pass.commands.push(Command::Move { parent, child, before }),
            None => pass.commands.push(Command::Insert { parent, child, before }),
        }
        before = Some(child);
    }

    let kept: HashSet<WidgetId> = new.iter().copied().collect();
    for widget in old {
        if !kept.contains(widget) {
            pass.removals.push(Command::Remove {
                parent,
                child: *widget,
            });
        }
    }
}

/// Marks the entries of a longest increasing subsequence of `positions`.
fn stable_positions(positions: &[Option<usize>]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; positions.len()];
    for (index, position) in positions.iter().enumerate() {
        let Some(position) = *position else {
            continue;
        };
        let slot = tails.partition_point(|tail| matches!(positions[*tail], Some(value) if value < position));
        if slot > 0 {
            previous[index] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(index);
        } else {
            tails[slot] = index;
        }
    }
    let mut stable = vec![false; positions.len()];
    let mut cursor = tails.last().copied();
    while let Some(index) = cursor {
        stable[index] = true;
        cursor = previous[index];
    }
    stable
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
