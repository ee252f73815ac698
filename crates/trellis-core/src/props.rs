//! Host element props: values, schemas and diffs.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::BuildError;

pub type PropName = &'static str;

/// Props of a host element, kept in declaration order.
pub type Props = IndexMap<PropName, PropValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropKind {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    List,
    Handler,
    /// Schema-only: accepts any value.
    Any,
}

/// Event handler stored as a prop.
///
/// Handlers are recreated on every render, so two handlers always compare
/// equal. A changed handler never produces a prop update; the reconciler
/// still keeps the latest one on the committed node for dispatch.
#[derive(Clone)]
pub struct Handler(Rc<dyn Fn(&[PropValue])>);

impl Handler {
    pub fn new(callback: impl Fn() + 'static) -> Self {
        Handler(Rc::new(move |_: &[PropValue]| callback()))
    }

    pub fn with_args(callback: impl Fn(&[PropValue]) + 'static) -> Self {
        Handler(Rc::new(callback))
    }

    pub fn call(&self, args: &[PropValue]) {
        (self.0)(args)
    }
}

impl PartialEq for Handler {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

#[derive(Debug, Clone)]
pub enum PropValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<[PropValue]>),
    Handler(Handler),
}

impl PropValue {
    pub fn kind(&self) -> PropKind {
        match self {
            PropValue::Unit => PropKind::Unit,
            PropValue::Bool(_) => PropKind::Bool,
            PropValue::Int(_) => PropKind::Int,
            PropValue::Float(_) => PropKind::Float,
            PropValue::Str(_) => PropKind::Str,
            PropValue::List(_) => PropKind::List,
            PropValue::Handler(_) => PropKind::Handler,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(value) => Some(&**value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[PropValue]> {
        match self {
            PropValue::List(values) => Some(&**values),
            _ => None,
        }
    }

    pub fn as_handler(&self) -> Option<&Handler> {
        match self {
            PropValue::Handler(handler) => Some(handler),
            _ => None,
        }
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Unit, PropValue::Unit) => true,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            // Bitwise so that NaN props do not re-send on every render.
            (PropValue::Float(a), PropValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::List(a), PropValue::List(b)) => a == b,
            (PropValue::Handler(_), PropValue::Handler(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Unit => f.write_str("()"),
            PropValue::Bool(value) => write!(f, "{value}"),
            PropValue::Int(value) => write!(f, "{value}"),
            PropValue::Float(value) => write!(f, "{value}"),
            PropValue::Str(value) => write!(f, "{:?}", &**value),
            PropValue::List(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            PropValue::Handler(_) => f.write_str("<handler>"),
        }
    }
}

impl From<()> for PropValue {
    fn from(_: ()) -> Self {
        PropValue::Unit
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(value.into())
    }
}

impl From<u32> for PropValue {
    fn from(value: u32) -> Self {
        PropValue::Int(value.into())
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<f32> for PropValue {
    fn from(value: f32) -> Self {
        PropValue::Float(value.into())
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for PropValue {
    fn from(value: Rc<str>) -> Self {
        PropValue::Str(value)
    }
}

impl From<Vec<PropValue>> for PropValue {
    fn from(values: Vec<PropValue>) -> Self {
        PropValue::List(Rc::from(values))
    }
}

impl From<Handler> for PropValue {
    fn from(handler: Handler) -> Self {
        PropValue::Handler(handler)
    }
}

/// One entry of a host type's prop schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropSpec {
    pub name: PropName,
    pub kind: PropKind,
    pub required: bool,
}

impl PropSpec {
    pub const fn optional(name: PropName, kind: PropKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }

    pub const fn required(name: PropName, kind: PropKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    fn accepts(&self, value: &PropValue) -> bool {
        self.kind == PropKind::Any || self.kind == value.kind()
    }
}

/// Checks `props` against `schema`. Unknown names, mismatched kinds and
/// absent required props are rejected.
pub fn validate_props(
    element: &'static str,
    schema: &[PropSpec],
    props: &Props,
) -> Result<(), BuildError> {
    for (name, value) in props {
        let spec = schema
            .iter()
            .find(|spec| spec.name == *name)
            .ok_or(BuildError::UnknownProp {
                element,
                prop: *name,
            })?;
        if !spec.accepts(value) {
            return Err(BuildError::PropKind {
                element,
                prop: *name,
                expected: spec.kind,
                found: value.kind(),
            });
        }
    }
    if let Some(missing) = schema
        .iter()
        .find(|spec| spec.required && !props.contains_key(spec.name))
    {
        return Err(BuildError::MissingProp {
            element,
            prop: missing.name,
        });
    }
    Ok(())
}

/// Prop changes between two renders of the same host node, keyed by name.
/// Each entry holds the old and new value; `None` on either side marks an
/// added or removed prop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropsDiff {
    changes: IndexMap<PropName, (Option<PropValue>, Option<PropValue>)>,
}

impl PropsDiff {
    pub fn between(old: &Props, new: &Props) -> Self {
        let mut changes = IndexMap::new();
        for (name, value) in new {
            match old.get(name) {
                Some(previous) if previous == value => {}
                previous => {
                    changes.insert(*name, (previous.cloned(), Some(value.clone())));
                }
            }
        }
        for (name, value) in old {
            if !new.contains_key(name) {
                changes.insert(*name, (Some(value.clone()), None));
            }
        }
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.changes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&(Option<PropValue>, Option<PropValue>)> {
        self.changes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropName, &Option<PropValue>, &Option<PropValue>)> {
        self.changes
            .iter()
            .map(|(name, (old, new))| (*name, old, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(entries: &[(PropName, PropValue)]) -> Props {
        entries.iter().cloned().collect()
    }

    #[test]
    fn diff_reports_changed_added_and_removed_props() {
        let old = props(&[("text", "a".into()), ("size", 1.into())]);
        let new = props(&[("text", "b".into()), ("color", "red".into())]);
        let diff = PropsDiff::between(&old, &new);

        assert_eq!(diff.len(), 3);
        assert_eq!(
            diff.get("text"),
            Some(&(Some("a".into()), Some("b".into())))
        );
        assert_eq!(diff.get("color"), Some(&(None, Some("red".into()))));
        assert_eq!(diff.get("size"), Some(&(Some(1.into()), None)));
    }

    #[test]
    fn handlers_never_produce_changes() {
        let old = props(&[("on_click", Handler::new(|| {}).into())]);
        let new = props(&[("on_click", Handler::new(|| println!("other")).into())]);
        assert!(PropsDiff::between(&old, &new).is_empty());
    }

    #[test]
    fn validation_rejects_unknown_and_mistyped_props() {
        const SCHEMA: &[PropSpec] = &[
            PropSpec::required("text", PropKind::Str),
            PropSpec::optional("size", PropKind::Int),
        ];

        assert_eq!(
            validate_props("Label", SCHEMA, &props(&[("text", "x".into())])),
            Ok(())
        );
        assert_eq!(
            validate_props(
                "Label",
                SCHEMA,
                &props(&[("text", "x".into()), ("bogus", 1.into())])
            ),
            Err(BuildError::UnknownProp {
                element: "Label",
                prop: "bogus"
            })
        );
        assert_eq!(
            validate_props(
                "Label",
                SCHEMA,
                &props(&[("text", "x".into()), ("size", "big".into())])
            ),
            Err(BuildError::PropKind {
                element: "Label",
                prop: "size",
                expected: PropKind::Int,
                found: PropKind::Str,
            })
        );
        assert_eq!(
            validate_props("Label", SCHEMA, &Props::new()),
            Err(BuildError::MissingProp {
                element: "Label",
                prop: "text"
            })
        );
    }
}
