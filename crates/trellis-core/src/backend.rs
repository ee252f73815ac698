//! Widget commands and the backends that apply them.

use std::fmt;
use std::fmt::Write as _;

use crate::collections::map::HashMap;
use crate::error::BackendError;
use crate::props::{PropName, PropValue, Props};

/// Identity of a backend widget. Allocated by the reconciler when a host
/// node is first committed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId(pub(crate) u64);

impl WidgetId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// A deferred backend mutation produced by a render pass.
///
/// Commands reference widgets by id only; they are applied in order after
/// the pass commits.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create {
        widget: WidgetId,
        kind: &'static str,
    },
    SetProp {
        widget: WidgetId,
        name: PropName,
        value: PropValue,
    },
    UnsetProp {
        widget: WidgetId,
        name: PropName,
    },
    /// Inserts `child` under `parent` before `before`, or at the end.
    Insert {
        parent: WidgetId,
        child: WidgetId,
        before: Option<WidgetId>,
    },
    /// Repositions an existing child of `parent` before `before`, or at the end.
    Move {
        parent: WidgetId,
        child: WidgetId,
        before: Option<WidgetId>,
    },
    Remove {
        parent: WidgetId,
        child: WidgetId,
    },
    Destroy {
        widget: WidgetId,
    },
    /// Sets the top-level widget shown by the backend.
    SetRoot {
        widget: Option<WidgetId>,
    },
    /// Invokes a backend method with arguments.
    Call {
        widget: WidgetId,
        method: &'static str,
        args: Vec<PropValue>,
    },
}

impl Command {
    /// The widget the command primarily acts on.
    pub fn widget(&self) -> Option<WidgetId> {
        match self {
            Command::Create { widget, .. }
            | Command::SetProp { widget, .. }
            | Command::UnsetProp { widget, .. }
            | Command::Destroy { widget }
            | Command::Call { widget, .. } => Some(*widget),
            Command::Insert { child, .. }
            | Command::Move { child, .. }
            | Command::Remove { child, .. } => Some(*child),
            Command::SetRoot { widget } => *widget,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Command::Create { .. })
    }

    pub fn is_move(&self) -> bool {
        matches!(self, Command::Move { .. })
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Command::Remove { .. } | Command::Destroy { .. })
    }
}

/// Applies commands to concrete widgets.
pub trait Backend {
    fn apply(&mut self, command: &Command) -> Result<(), BackendError>;
}

/// Records commands without applying them.
impl Backend for Vec<Command> {
    fn apply(&mut self, command: &Command) -> Result<(), BackendError> {
        self.push(command.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryWidget {
    pub kind: &'static str,
    pub props: Props,
    pub children: Vec<WidgetId>,
    pub parent: Option<WidgetId>,
    pub calls: Vec<(&'static str, Vec<PropValue>)>,
}

impl MemoryWidget {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            props: Props::new(),
            children: Vec::new(),
            parent: None,
            calls: Vec::new(),
        }
    }
}

/// Backend that keeps widgets in memory. Used by tests and headless hosts.
#[derive(Default)]
pub struct MemoryBackend {
    widgets: HashMap<WidgetId, MemoryWidget>,
    root: Option<WidgetId>,
    applied: Vec<Command>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn widget(&self, id: WidgetId) -> Option<&MemoryWidget> {
        self.widgets.get(&id)
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    pub fn root(&self) -> Option<WidgetId> {
        self.root
    }

    pub fn children_of(&self, id: WidgetId) -> &[WidgetId] {
        self.widgets
            .get(&id)
            .map(|widget| widget.children.as_slice())
            .unwrap_or(&[])
    }

    /// Every command applied so far, in order.
    pub fn applied(&self) -> &[Command] {
        &self.applied
    }

    pub fn take_applied(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.applied)
    }

    /// Renders the widget tree below the root as indented text.
    pub fn dump_tree(&self) -> String {
        let mut output = String::new();
        match self.root {
            Some(root) => self.dump_widget(root, 0, &mut output),
            None => output.push_str("(empty)\n"),
        }
        output
    }

    fn dump_widget(&self, id: WidgetId, depth: usize, output: &mut String) {
        let indent = "  ".repeat(depth);
        let Some(widget) = self.widgets.get(&id) else {
            let _ = writeln!(output, "{indent}<missing {id}>");
            return;
        };
        let _ = write!(output, "{indent}{}", widget.kind);
        for (name, value) in &widget.props {
            let _ = write!(output, " {name}={value}");
        }
        output.push('\n');
        for child in &widget.children {
            self.dump_widget(*child, depth + 1, output);
        }
    }

    fn widget_mut(&mut self, id: WidgetId) -> Result<&mut MemoryWidget, BackendError> {
        self.widgets
            .get_mut(&id)
            .ok_or(BackendError::Missing { widget: id })
    }

    fn position_of(&self, parent: WidgetId, anchor: Option<WidgetId>) -> Result<usize, BackendError> {
        let children = &self
            .widgets
            .get(&parent)
            .ok_or(BackendError::Missing { widget: parent })?
            .children;
        match anchor {
            None => Ok(children.len()),
            Some(anchor) => children
                .iter()
                .position(|child| *child == anchor)
                .ok_or_else(|| {
                    BackendError::rejected(parent, format!("anchor {anchor} is not a child"))
                }),
        }
    }

    fn detach(&mut self, parent: WidgetId, child: WidgetId) -> Result<(), BackendError> {
        let widget = self.widget_mut(parent)?;
        let index = widget
            .children
            .iter()
            .position(|existing| *existing == child)
            .ok_or_else(|| BackendError::rejected(parent, format!("{child} is not a child")))?;
        widget.children.remove(index);
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn apply(&mut self, command: &Command) -> Result<(), BackendError> {
        match command {
            Command::Create { widget, kind } => {
                if self.widgets.contains_key(widget) {
                    return Err(BackendError::rejected(*widget, "already created"));
                }
                self.widgets.insert(*widget, MemoryWidget::new(*kind));
            }
            Command::SetProp {
                widget,
                name,
                value,
            } => {
                self.widget_mut(*widget)?.props.insert(*name, value.clone());
            }
            Command::UnsetProp { widget, name } => {
                self.widget_mut(*widget)?.props.shift_remove(name);
            }
            Command::Insert {
                parent,
                child,
                before,
            } => {
                let existing_parent = self.widget_mut(*child)?.parent;
                if let Some(existing_parent) = existing_parent {
                    return Err(BackendError::rejected(
                        *child,
                        format!("already attached to {existing_parent}"),
                    ));
                }
                let index = self.position_of(*parent, *before)?;
                self.widget_mut(*parent)?.children.insert(index, *child);
                self.widget_mut(*child)?.parent = Some(*parent);
            }
            Command::Move {
                parent,
                child,
                before,
            } => {
                self.detach(*parent, *child)?;
                let index = self.position_of(*parent, *before)?;
                self.widget_mut(*parent)?.children.insert(index, *child);
            }
            Command::Remove { parent, child } => {
                self.detach(*parent, *child)?;
                self.widget_mut(*child)?.parent = None;
            }
            Command::Destroy { widget } => {
                let removed = self
                    .widgets
                    .remove(widget)
                    .ok_or(BackendError::Missing { widget: *widget })?;
                if let Some(parent) = removed.parent {
                    if let Some(parent) = self.widgets.get_mut(&parent) {
                        parent.children.retain(|child| child != widget);
                    }
                }
                if self.root == Some(*widget) {
                    self.root = None;
                }
            }
            Command::SetRoot { widget } => {
                self.root = *widget;
            }
            Command::Call {
                widget,
                method,
                args,
            } => {
                self.widget_mut(*widget)?.calls.push((*method, args.clone()));
            }
        }
        self.applied.push(command.clone());
        Ok(())
    }
}
