//! Typed context keys and the provider registry.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use indexmap::IndexSet;

use crate::collections::map::HashMap;
use crate::hooks::SlotRef;
use crate::NodeId;

/// Typed token naming a context value.
///
/// Two keys are the same context when both the name and the value type
/// match, so keys can be declared as constants:
///
/// ```
/// use trellis_core::ContextKey;
///
/// const THEME: ContextKey<&'static str> = ContextKey::new("theme");
/// assert_eq!(THEME.name(), "theme");
/// ```
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: 'static> ContextKey<T> {
    pub fn id(&self) -> ContextId {
        ContextId {
            name: self.name,
            type_id: TypeId::of::<T>(),
        }
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContextId {
    name: &'static str,
    type_id: TypeId,
}

impl ContextId {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A provided context: the owning node, its current value, and the hook
/// slots subscribed to it.
///
/// An entry whose provider unmounted while subscribers outside its subtree
/// remain is vacant (`provider` is `None`). Reads of a vacant entry fail;
/// the next provider of the same key adopts its subscribers.
#[derive(Clone)]
pub(crate) struct ContextEntry {
    pub(crate) provider: Option<NodeId>,
    pub(crate) value: Rc<dyn Any>,
    pub(crate) subscribers: IndexSet<SlotRef>,
}

#[derive(Default)]
pub(crate) struct ContextRegistry {
    entries: HashMap<ContextId, ContextEntry>,
}

impl ContextRegistry {
    pub(crate) fn get(&self, id: &ContextId) -> Option<&ContextEntry> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ContextId) -> Option<&mut ContextEntry> {
        self.entries.get_mut(id)
    }

    pub(crate) fn insert(&mut self, id: ContextId, entry: ContextEntry) {
        self.entries.insert(id, entry);
    }

    pub(crate) fn remove(&mut self, id: &ContextId) -> Option<ContextEntry> {
        self.entries.remove(id)
    }

    /// The entry, if a provider currently owns it.
    pub(crate) fn provided(&self, id: &ContextId) -> Option<&ContextEntry> {
        self.entries.get(id).filter(|entry| entry.provider.is_some())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
