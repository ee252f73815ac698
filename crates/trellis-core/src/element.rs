//! Element descriptions produced by component renders.

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

use crate::backend::{Command, WidgetId};
use crate::builder;
use crate::error::{BuildError, RenderResult};
use crate::props::{validate_props, PropName, PropSpec, PropValue, Props, PropsDiff};

/// Identity of a child among its siblings.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Str(Rc<str>),
    Int(i64),
    /// Positional default assigned to unkeyed children.
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Str(value) => f.write_str(value),
            Key::Int(value) => write!(f, "{value}"),
            Key::Index(index) => write!(f, "@{index}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(Rc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(Rc::from(value))
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(value.into())
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Int(value.into())
    }
}

/// A kind of backend widget.
///
/// Host types are usually unit structs referenced as `&'static dyn HostType`.
/// Identity is the [`name`](HostType::name), so two host types must never
/// share one.
pub trait HostType: 'static {
    fn name(&self) -> &'static str;

    fn schema(&self) -> &'static [PropSpec] {
        &[]
    }

    fn accepts_children(&self) -> bool {
        false
    }

    /// Translates a prop diff into backend commands. The default maps each
    /// change onto `SetProp` or `UnsetProp`.
    fn update_commands(&self, widget: WidgetId, diff: &PropsDiff, commands: &mut Vec<Command>) {
        default_update_commands(widget, diff, commands);
    }
}

pub fn default_update_commands(widget: WidgetId, diff: &PropsDiff, commands: &mut Vec<Command>) {
    for (name, _, new) in diff.iter() {
        commands.push(match new {
            Some(value) => Command::SetProp {
                widget,
                name,
                value: value.clone(),
            },
            None => Command::UnsetProp { widget, name },
        });
    }
}

/// Component lifecycle notifications delivered after commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Mounted,
    Rendered,
    Unmounting,
}

/// A user-defined element whose render produces exactly one child element.
///
/// The component value itself is its props. Renders emit elements through
/// the ambient builder and read state through hooks.
pub trait Component: PartialEq + 'static {
    fn render(&self) -> RenderResult;

    /// Whether a render is needed when the parent re-declares this
    /// component. Defaults to prop inequality.
    fn should_update(&self, previous: &Self) -> bool {
        self != previous
    }

    fn did_mount(&self) {}

    fn did_render(&self) {}

    fn will_unmount(&self) {}
}

/// Object-safe view of a [`Component`].
pub trait AnyComponent {
    fn component_type(&self) -> TypeId;
    fn component_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn render_erased(&self) -> RenderResult;
    /// Returns `true` when `previous` is of a different type.
    fn should_update_erased(&self, previous: &dyn AnyComponent) -> bool;
    fn lifecycle(&self, event: Lifecycle);
}

impl<C: Component> AnyComponent for C {
    fn component_type(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn component_name(&self) -> &'static str {
        short_type_name::<C>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn render_erased(&self) -> RenderResult {
        Component::render(self)
    }

    fn should_update_erased(&self, previous: &dyn AnyComponent) -> bool {
        match previous.as_any().downcast_ref::<C>() {
            Some(previous) => Component::should_update(self, previous),
            None => true,
        }
    }

    fn lifecycle(&self, event: Lifecycle) {
        match event {
            Lifecycle::Mounted => self.did_mount(),
            Lifecycle::Rendered => self.did_render(),
            Lifecycle::Unmounting => self.will_unmount(),
        }
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Element type identity used for reuse decisions.
#[derive(Clone, Copy, Debug)]
pub enum TypeTag {
    Host(&'static str),
    Component { id: TypeId, name: &'static str },
}

impl TypeTag {
    pub fn name(&self) -> &'static str {
        match self {
            TypeTag::Host(name) => *name,
            TypeTag::Component { name, .. } => *name,
        }
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeTag::Host(a), TypeTag::Host(b)) => a == b,
            (TypeTag::Component { id: a, .. }, TypeTag::Component { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for TypeTag {}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone)]
pub enum ElementKind {
    Host {
        ty: &'static dyn HostType,
        props: Props,
    },
    Component(Rc<dyn AnyComponent>),
}

/// An immutable description of one node and its declared children.
#[derive(Clone)]
pub struct Element {
    pub(crate) kind: ElementKind,
    pub(crate) key: Option<Key>,
    pub(crate) children: Vec<Element>,
}

impl Element {
    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    pub fn type_tag(&self) -> TypeTag {
        match &self.kind {
            ElementKind::Host { ty, .. } => TypeTag::Host(ty.name()),
            ElementKind::Component(component) => TypeTag::Component {
                id: component.component_type(),
                name: component.component_name(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.type_tag().name()
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn is_host(&self) -> bool {
        matches!(self.kind, ElementKind::Host { .. })
    }

    pub fn props(&self) -> Option<&Props> {
        match &self.kind {
            ElementKind::Host { props, .. } => Some(props),
            ElementKind::Component(_) => None,
        }
    }

    pub fn prop(&self, name: &str) -> Option<&PropValue> {
        self.props().and_then(|props| props.get(name))
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Downcasts a component element to its concrete props.
    pub fn component<C: Component>(&self) -> Option<&C> {
        match &self.kind {
            ElementKind::Component(component) => component.as_any().downcast_ref::<C>(),
            ElementKind::Host { .. } => None,
        }
    }

    pub(crate) fn take_children(&mut self) -> Vec<Element> {
        std::mem::take(&mut self.children)
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Element");
        debug.field("type", &self.name());
        if let Some(key) = &self.key {
            debug.field("key", key);
        }
        if let Some(props) = self.props() {
            debug.field("props", props);
        }
        debug.field("children", &self.children).finish()
    }
}

/// Builds an [`Element`].
///
/// Inside a render, [`emit`](ElementBuilder::emit) hands the element to the
/// innermost capture frame. [`emit_with`](ElementBuilder::emit_with) opens a
/// new frame, runs the content, and adopts everything emitted there as
/// children.
pub struct ElementBuilder {
    kind: ElementKind,
    key: Option<Key>,
    children: Vec<Element>,
    stray_prop: Option<PropName>,
}

pub fn host(ty: &'static dyn HostType) -> ElementBuilder {
    ElementBuilder::host(ty)
}

pub fn component<C: Component>(component: C) -> ElementBuilder {
    ElementBuilder::component(component)
}

impl ElementBuilder {
    pub fn host(ty: &'static dyn HostType) -> Self {
        Self {
            kind: ElementKind::Host {
                ty,
                props: Props::new(),
            },
            key: None,
            children: Vec::new(),
            stray_prop: None,
        }
    }

    pub fn component<C: Component>(component: C) -> Self {
        Self {
            kind: ElementKind::Component(Rc::new(component)),
            key: None,
            children: Vec::new(),
            stray_prop: None,
        }
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets a host prop. Components take their props as struct fields, so
    /// setting one here fails at build time.
    pub fn prop(mut self, name: PropName, value: impl Into<PropValue>) -> Self {
        match &mut self.kind {
            ElementKind::Host { props, .. } => {
                props.insert(name, value.into());
            }
            ElementKind::Component(_) => {
                self.stray_prop.get_or_insert(name);
            }
        }
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn build(self) -> Result<Element, BuildError> {
        let element = Element {
            kind: self.kind,
            key: self.key,
            children: self.children,
        };
        match &element.kind {
            ElementKind::Host { ty, props } => {
                validate_props(ty.name(), ty.schema(), props)?;
                if !element.children.is_empty() && !ty.accepts_children() {
                    return Err(BuildError::ChildrenNotAllowed { element: ty.name() });
                }
            }
            ElementKind::Component(component) => {
                if let Some(prop) = self.stray_prop {
                    return Err(BuildError::UnknownProp {
                        element: component.component_name(),
                        prop,
                    });
                }
            }
        }
        Ok(element)
    }

    /// Builds the element and registers it with the innermost capture frame.
    pub fn emit(self) -> Result<(), BuildError> {
        builder::register(self.build()?)
    }

    /// Runs `content` in a fresh capture frame, adopts what it emitted as
    /// children, then emits this element.
    pub fn emit_with(mut self, content: impl FnOnce() -> RenderResult) -> RenderResult {
        let children = builder::capture(content)?;
        self.children.extend(children);
        self.emit()?;
        Ok(())
    }
}
