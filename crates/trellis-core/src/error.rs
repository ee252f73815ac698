use std::error::Error;
use std::fmt;

use crate::backend::WidgetId;
use crate::element::Key;
use crate::hooks::SlotTag;
use crate::props::{PropKind, PropName};
use crate::NodeId;

/// Result type returned by component render functions and render passes.
pub type RenderResult = Result<(), RenderError>;

/// Errors raised while declaring elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// An element was emitted with no capture frame open.
    NoCaptureScope,
    /// A render or root capture produced no element.
    EmptyRoot,
    /// A render or root capture produced more than one top-level element.
    MultipleRoots { count: usize },
    UnknownProp {
        element: &'static str,
        prop: PropName,
    },
    PropKind {
        element: &'static str,
        prop: PropName,
        expected: PropKind,
        found: PropKind,
    },
    MissingProp {
        element: &'static str,
        prop: PropName,
    },
    ChildrenNotAllowed { element: &'static str },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::NoCaptureScope => write!(f, "element emitted outside of a capture frame"),
            BuildError::EmptyRoot => write!(f, "render produced no element"),
            BuildError::MultipleRoots { count } => {
                write!(f, "render produced {count} root elements; expected exactly one")
            }
            BuildError::UnknownProp { element, prop } => {
                write!(f, "{element} has no prop named `{prop}`")
            }
            BuildError::PropKind {
                element,
                prop,
                expected,
                found,
            } => write!(
                f,
                "{element}.{prop} expects {expected:?} but was given {found:?}"
            ),
            BuildError::MissingProp { element, prop } => {
                write!(f, "{element} requires prop `{prop}`")
            }
            BuildError::ChildrenNotAllowed { element } => {
                write!(f, "{element} does not accept children")
            }
        }
    }
}

impl Error for BuildError {}

/// Errors raised by hook calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    /// A hook was called while no component was rendering.
    OutsideRender,
    /// The hook at `index` is a different kind than on the previous render.
    OrderMismatch {
        node: NodeId,
        index: usize,
        expected: SlotTag,
        found: SlotTag,
    },
    /// More hooks were called than on the first render.
    Overrun {
        node: NodeId,
        index: usize,
        previous: usize,
    },
    /// Fewer hooks were called than on the first render.
    Underrun {
        node: NodeId,
        used: usize,
        previous: usize,
    },
    /// A hook was called from inside another hook's initializer.
    Nested { node: NodeId, index: usize },
    /// The stored state has a different type than requested.
    StateType {
        node: NodeId,
        index: usize,
        expected: &'static str,
    },
    MissingContext { name: &'static str },
    DuplicateProvider { name: &'static str },
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::OutsideRender => write!(f, "hook called outside of a component render"),
            HookError::OrderMismatch {
                node,
                index,
                expected,
                found,
            } => write!(
                f,
                "hook {index} of node {node} was {expected} on the previous render but is now {found}"
            ),
            HookError::Overrun {
                node,
                index,
                previous,
            } => write!(
                f,
                "node {node} called hook {index} but only {previous} hooks existed on the first render"
            ),
            HookError::Underrun {
                node,
                used,
                previous,
            } => write!(
                f,
                "node {node} called {used} hooks but {previous} were called on the first render"
            ),
            HookError::Nested { node, index } => {
                write!(f, "hook {index} of node {node} was called inside another hook")
            }
            HookError::StateType {
                node,
                index,
                expected,
            } => write!(f, "hook {index} of node {node} does not hold a {expected}"),
            HookError::MissingContext { name } => write!(f, "no provider for context `{name}`"),
            HookError::DuplicateProvider { name } => {
                write!(f, "context `{name}` already has a provider")
            }
        }
    }
}

impl Error for HookError {}

/// Errors raised by a render backend while applying commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    Missing { widget: WidgetId },
    Rejected {
        widget: Option<WidgetId>,
        reason: String,
    },
}

impl BackendError {
    pub fn rejected(widget: impl Into<Option<WidgetId>>, reason: impl Into<String>) -> Self {
        BackendError::Rejected {
            widget: widget.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Missing { widget } => write!(f, "widget {widget} missing"),
            BackendError::Rejected {
                widget: Some(widget),
                reason,
            } => write!(f, "widget {widget} rejected command: {reason}"),
            BackendError::Rejected {
                widget: None,
                reason,
            } => write!(f, "command rejected: {reason}"),
        }
    }
}

impl Error for BackendError {}

/// Errors that abort a render pass.
///
/// Any error returned before commit rolls the pass back; the committed tree
/// is left exactly as it was before the pass started.
#[derive(Debug)]
pub enum RenderError {
    Build(BuildError),
    Hook(HookError),
    DuplicateKey {
        parent: Option<NodeId>,
        key: Key,
    },
    /// A render pass was started while another was running.
    Reentrant,
    UnknownNode { node: NodeId },
    NotComponent { node: NodeId },
    /// A component's render returned an application error.
    Component {
        node: Option<NodeId>,
        source: Box<dyn Error + 'static>,
    },
    Panicked {
        node: Option<NodeId>,
        message: String,
    },
    Backend(BackendError),
    /// Renders kept scheduling more renders past the configured limit.
    Runaway { passes: usize },
}

impl RenderError {
    /// Wraps an application error raised from a component's render.
    pub fn component(source: impl Into<Box<dyn Error + 'static>>) -> Self {
        RenderError::Component {
            node: None,
            source: source.into(),
        }
    }

    /// The node whose render failed, when known.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            RenderError::Component { node, .. } | RenderError::Panicked { node, .. } => *node,
            RenderError::DuplicateKey { parent, .. } => *parent,
            RenderError::UnknownNode { node } | RenderError::NotComponent { node } => Some(*node),
            RenderError::Hook(HookError::OrderMismatch { node, .. })
            | RenderError::Hook(HookError::Overrun { node, .. })
            | RenderError::Hook(HookError::Underrun { node, .. })
            | RenderError::Hook(HookError::Nested { node, .. })
            | RenderError::Hook(HookError::StateType { node, .. }) => Some(*node),
            _ => None,
        }
    }

    pub(crate) fn at_node(self, id: NodeId) -> Self {
        match self {
            RenderError::Component { node: None, source } => RenderError::Component {
                node: Some(id),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Build(err) => write!(f, "{err}"),
            RenderError::Hook(err) => write!(f, "{err}"),
            RenderError::DuplicateKey {
                parent: Some(parent),
                key,
            } => write!(f, "duplicate key `{key}` among children of node {parent}"),
            RenderError::DuplicateKey { parent: None, key } => {
                write!(f, "duplicate key `{key}` at the root")
            }
            RenderError::Reentrant => write!(f, "render pass started while another is running"),
            RenderError::UnknownNode { node } => write!(f, "node {node} is not mounted"),
            RenderError::NotComponent { node } => write!(f, "node {node} is not a component"),
            RenderError::Component {
                node: Some(node),
                source,
            } => write!(f, "render of node {node} failed: {source}"),
            RenderError::Component { node: None, source } => write!(f, "render failed: {source}"),
            RenderError::Panicked {
                node: Some(node),
                message,
            } => write!(f, "render of node {node} panicked: {message}"),
            RenderError::Panicked { node: None, message } => {
                write!(f, "render pass panicked: {message}")
            }
            RenderError::Backend(err) => write!(f, "backend error: {err}"),
            RenderError::Runaway { passes } => {
                write!(f, "render did not settle after {passes} passes")
            }
        }
    }
}

impl Error for RenderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RenderError::Build(err) => Some(err),
            RenderError::Hook(err) => Some(err),
            RenderError::Backend(err) => Some(err),
            RenderError::Component { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<BuildError> for RenderError {
    fn from(err: BuildError) -> Self {
        RenderError::Build(err)
    }
}

impl From<HookError> for RenderError {
    fn from(err: HookError) -> Self {
        RenderError::Hook(err)
    }
}

impl From<BackendError> for RenderError {
    fn from(err: BackendError) -> Self {
        RenderError::Backend(err)
    }
}
