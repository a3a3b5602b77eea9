use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use slotmap::new_key_type;

use crate::{Key, TypeTag};

new_key_type! {
    /// Stable handle to an [`EntryList`] inside a [`Cache`](crate::Cache).
    pub struct ListId;
}

pub(crate) type Teardown = Box<dyn FnOnce()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Plain nesting; slot count is fixed across passes.
    Derived,
    /// At most one branch per pass, stored as slot 0.
    Conditional,
    /// Slot count may grow or shrink between passes.
    Array,
    /// Children addressed by [`Key`] instead of position.
    Keyed,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockKind::Derived => "derived",
            BlockKind::Conditional => "conditional",
            BlockKind::Array => "array",
            BlockKind::Keyed => "keyed",
        })
    }
}

/// Lifecycle of a block. Ordered: `Present < Detached < Destroyed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RemovalLevel {
    #[default]
    Present,
    Detached,
    Destroyed,
}

impl fmt::Display for RemovalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemovalLevel::Present => "present",
            RemovalLevel::Detached => "detached",
            RemovalLevel::Destroyed => "destroyed",
        })
    }
}

/// What happens to a child that was not visited this pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SweepPolicy {
    /// Keep the child's state; it resumes when visited again.
    #[default]
    Detach,
    /// Run teardowns and free the child.
    Destroy,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub(crate) struct ListFlags: u8 {
        const REACHABLE = 1 << 0;
        const REENTERING = 1 << 1;
        const COMPLETED = 1 << 2;
    }
}

pub(crate) enum Payload {
    Vacant,
    Value(Box<dyn Any>),
    Block(ListId),
}

/// One typed slot.
pub struct Entry {
    pub(crate) tag: TypeTag,
    pub(crate) payload: Payload,
}

impl Entry {
    pub(crate) fn new(tag: TypeTag) -> Self {
        Self {
            tag,
            payload: Payload::Vacant,
        }
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn is_vacant(&self) -> bool {
        matches!(self.payload, Payload::Vacant)
    }

    /// The nested block stored here, if any.
    pub fn child(&self) -> Option<ListId> {
        match self.payload {
            Payload::Block(id) => Some(id),
            _ => None,
        }
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        match &self.payload {
            Payload::Value(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        match &mut self.payload {
            Payload::Value(v) => v.downcast_mut::<T>(),
            _ => None,
        }
    }

    pub fn set<T: 'static>(&mut self, value: T) {
        self.payload = Payload::Value(Box::new(value));
    }
}

pub(crate) struct KeyedChild {
    pub(crate) list: ListId,
    pub(crate) rendered_this_pass: bool,
}

pub(crate) struct BlockContext {
    pub(crate) tag: TypeTag,
    pub(crate) value: Box<dyn Any>,
}

/// The ordered slots of one block, plus its per-pass bookkeeping.
pub struct EntryList {
    pub(crate) kind: BlockKind,
    pub(crate) slots: Vec<Entry>,
    pub(crate) cursor: usize,
    pub(crate) last_cursor: usize,
    pub(crate) removal: RemovalLevel,
    pub(crate) flags: ListFlags,
    pub(crate) policy: SweepPolicy,
    pub(crate) teardowns: Option<Vec<Teardown>>,
    pub(crate) keyed: Option<BTreeMap<Key, KeyedChild>>,
    pub(crate) context: Option<BlockContext>,
    pub(crate) key: Option<Key>,
}

impl EntryList {
    pub(crate) fn new(kind: BlockKind) -> Self {
        let policy = match kind {
            BlockKind::Conditional => SweepPolicy::Destroy,
            _ => SweepPolicy::Detach,
        };
        Self {
            kind,
            slots: Vec::new(),
            cursor: 0,
            last_cursor: 0,
            removal: RemovalLevel::Present,
            flags: ListFlags::empty(),
            policy,
            teardowns: None,
            keyed: (kind == BlockKind::Keyed).then(BTreeMap::new),
            context: None,
            key: None,
        }
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn removal_level(&self) -> RemovalLevel {
        self.removal
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_cursor(&self) -> usize {
        self.last_cursor
    }

    pub fn is_reachable(&self) -> bool {
        self.flags.contains(ListFlags::REACHABLE)
    }

    /// True for the single pass in which the block became reachable again.
    pub fn started_reentering(&self) -> bool {
        self.flags.contains(ListFlags::REENTERING)
    }

    pub fn has_completed_pass(&self) -> bool {
        self.flags.contains(ListFlags::COMPLETED)
    }

    pub fn policy(&self) -> SweepPolicy {
        self.policy
    }

    /// Key under which this block lives in a keyed parent.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn keyed_children(&self) -> impl Iterator<Item = (&Key, ListId)> + '_ {
        self.keyed
            .iter()
            .flat_map(|m| m.iter().map(|(k, c)| (k, c.list)))
    }

    pub fn teardown_count(&self) -> usize {
        self.teardowns.as_ref().map_or(0, Vec::len)
    }

    /// Every nested block reachable from this one, positional then keyed.
    pub(crate) fn push_children(&self, out: &mut Vec<ListId>) {
        out.extend(self.slots.iter().filter_map(Entry::child));
        if let Some(keyed) = &self.keyed {
            out.extend(keyed.values().map(|c| c.list));
        }
    }
}
