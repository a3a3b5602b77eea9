use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::BlockKind;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum TagId {
    Type(TypeId),
    Token(u64),
    Memo(TypeId),
    Block(BlockKind),
    Branch(u32),
    Item,
    Try,
}

/// Identity token checked every time a slot is revisited.
///
/// Two tags are equal when they name the same supplier; the label only feeds
/// diagnostics.
#[derive(Clone, Copy, Debug)]
pub struct TypeTag {
    id: TagId,
    label: &'static str,
}

impl TypeTag {
    /// Tag derived from a Rust type. Used by `remember`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TagId::Type(TypeId::of::<T>()),
            label: type_name::<T>(),
        }
    }

    /// A fresh opaque token. Create one per supplier (e.g. in a `thread_local!`
    /// or a `LazyLock`) and reuse it; every call yields a distinct tag.
    pub fn token(label: &'static str) -> Self {
        Self {
            id: TagId::Token(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)),
            label,
        }
    }

    pub(crate) fn memo<T: 'static>() -> Self {
        Self {
            id: TagId::Memo(TypeId::of::<T>()),
            label: "memo",
        }
    }

    pub(crate) fn block(kind: BlockKind) -> Self {
        let label = match kind {
            BlockKind::Derived => "block:derived",
            BlockKind::Conditional => "block:conditional",
            BlockKind::Array => "block:array",
            BlockKind::Keyed => "block:keyed",
        };
        Self {
            id: TagId::Block(kind),
            label,
        }
    }

    pub(crate) fn branch(index: u32) -> Self {
        Self {
            id: TagId::Branch(index),
            label: "branch",
        }
    }

    pub(crate) fn item() -> Self {
        Self {
            id: TagId::Item,
            label: "item",
        }
    }

    pub(crate) fn try_boundary() -> Self {
        Self {
            id: TagId::Try,
            label: "try",
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            TagId::Branch(i) => write!(f, "{}#{}", self.label, i),
            _ => f.write_str(self.label),
        }
    }
}
