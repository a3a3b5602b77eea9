use std::collections::BTreeMap;

use crate::cache::Frame;
use crate::entry::{BlockContext, KeyedChild, ListFlags, Payload};
use crate::{
    BlockKind, Cache, EngineError, EntryList, Key, ListId, RemovalLevel, Result, SweepPolicy,
    TypeTag,
};

impl Cache {
    /// Pushes an existing block and rewinds it for this pass.
    pub(crate) fn enter(&mut self, id: ListId, kind: BlockKind, boundary: bool) -> Result<ListId> {
        let Some(list) = self.lists.get_mut(id) else {
            return self.fail(EngineError::StaleBlock);
        };
        list.cursor = 0;
        list.removal = RemovalLevel::Present;
        if let Some(keyed) = list.keyed.as_mut() {
            for child in keyed.values_mut() {
                child.rendered_this_pass = false;
            }
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.stack.push(Frame {
            list: id,
            kind,
            generation,
            boundary,
        });
        log::trace!("open {kind} block at depth {}", self.stack.len());
        Ok(id)
    }

    /// Opens the block stored at the next address, creating it on first visit.
    pub(crate) fn open_child(
        &mut self,
        kind: BlockKind,
        tag: TypeTag,
        boundary: bool,
        context: impl FnOnce() -> Option<BlockContext>,
    ) -> Result<ListId> {
        let (parent, index) = self.next_entry(tag)?;
        let entry = self.entry_mut(parent, index);
        let (existing, occupied) = (entry.child(), !entry.is_vacant());
        let id = match existing {
            Some(id) => match self.lists.get(id).map(|l| l.kind) {
                Some(stored) if stored == kind => id,
                Some(stored) => {
                    return self.fail(EngineError::PositionalMismatch {
                        index,
                        expected: TypeTag::block(stored),
                        found: TypeTag::block(kind),
                    });
                }
                None => return self.fail(EngineError::StaleBlock),
            },
            None if occupied => {
                return self.fail(EngineError::PayloadType {
                    tag,
                    expected: "block",
                });
            }
            None => {
                let mut list = EntryList::new(kind);
                list.context = context();
                let id = self.lists.insert(list);
                self.entry_mut(parent, index).payload = Payload::Block(id);
                id
            }
        };
        self.enter(id, kind, boundary)
    }

    pub fn open_block(&mut self, kind: BlockKind) -> Result<ListId> {
        self.open_child(kind, TypeTag::block(kind), false, || None)
    }

    /// Like `open_block`, and sets the policy for children swept at close.
    pub fn open_block_with_policy(
        &mut self,
        kind: BlockKind,
        policy: SweepPolicy,
    ) -> Result<ListId> {
        let id = self.open_block(kind)?;
        if let Some(list) = self.lists.get_mut(id) {
            list.policy = policy;
        }
        Ok(id)
    }

    /// Opens a block tagged with a supplier identity and carrying a value that
    /// descendants find through `nearest_ancestor`. `init` runs on creation only.
    pub fn open_block_with<T: 'static>(
        &mut self,
        kind: BlockKind,
        tag: TypeTag,
        init: impl FnOnce() -> T,
    ) -> Result<ListId> {
        self.open_child(kind, tag, false, || {
            Some(BlockContext {
                tag,
                value: Box::new(init()),
            })
        })
    }

    pub fn close_block(&mut self, kind: BlockKind) -> Result<()> {
        self.close_frame(kind, false, false)
    }

    pub(crate) fn close_frame(
        &mut self,
        kind: BlockKind,
        boundary: bool,
        allow_root: bool,
    ) -> Result<()> {
        self.ensure_queries()?;
        let frame = self.top_frame()?;
        if self.stack.len() == 1 && !allow_root {
            return self.fail(EngineError::unbalanced("the root block cannot be closed"));
        }
        if frame.boundary != boundary {
            let message = if frame.boundary {
                "innermost open block is a try boundary; close it with close_try"
            } else {
                "close_try called but the innermost open block is not a try boundary"
            };
            return self.fail(EngineError::unbalanced(message));
        }
        if frame.kind != kind {
            return self.fail(EngineError::unbalanced(format!(
                "closing a {kind} block but the innermost open block is {}",
                frame.kind
            )));
        }

        self.sweep_unvisited_keyed(frame.list);
        self.settle_cursor(frame.list, kind)?;
        self.stack.pop();
        log::trace!("close {kind} block at depth {}", self.stack.len() + 1);
        Ok(())
    }

    /// Checks the slot count against the previous pass, sweeping whatever an
    /// array or conditional block no longer reaches.
    fn settle_cursor(&mut self, id: ListId, kind: BlockKind) -> Result<()> {
        let Some(list) = self.lists.get_mut(id) else {
            return self.fail(EngineError::StaleBlock);
        };
        let cursor = list.cursor;
        let mut destroy = Vec::new();
        let mut detach = Vec::new();

        match kind {
            BlockKind::Conditional if cursor == 0 && !list.slots.is_empty() => {
                match list.policy {
                    SweepPolicy::Destroy => {
                        destroy.extend(list.slots.drain(..).filter_map(|e| e.child()))
                    }
                    SweepPolicy::Detach => {
                        detach.extend(list.slots.iter().filter_map(|e| e.child()))
                    }
                }
            }
            BlockKind::Conditional | BlockKind::Array => {
                if cursor < list.slots.len() {
                    destroy.extend(list.slots.drain(cursor..).filter_map(|e| e.child()));
                }
            }
            BlockKind::Derived | BlockKind::Keyed => {
                if list.flags.contains(ListFlags::COMPLETED) && cursor != list.last_cursor {
                    let expected = list.last_cursor;
                    return self.fail(EngineError::ArityMismatch {
                        kind,
                        expected,
                        found: cursor,
                    });
                }
            }
        }

        if list.last_cursor != cursor && !destroy.is_empty() {
            log::debug!(
                "{kind} block shrank from {} to {cursor} slots",
                list.last_cursor
            );
        }
        list.last_cursor = cursor;
        list.flags.insert(ListFlags::COMPLETED);

        for child in detach {
            self.detach_subtree(child);
        }
        for child in destroy {
            self.destroy_subtree(child);
        }
        Ok(())
    }

    fn sweep_unvisited_keyed(&mut self, id: ListId) {
        let Some(list) = self.lists.get_mut(id) else {
            return;
        };
        let policy = list.policy;
        let Some(keyed) = list.keyed.as_mut() else {
            return;
        };
        let stale: Vec<(Key, ListId)> = keyed
            .iter()
            .filter(|(_, c)| !c.rendered_this_pass)
            .map(|(k, c)| (k.clone(), c.list))
            .collect();
        if policy == SweepPolicy::Destroy {
            for (key, _) in &stale {
                keyed.remove(key);
            }
        }

        for (key, child) in stale {
            let swept = match policy {
                SweepPolicy::Detach => self.detach_subtree(child),
                SweepPolicy::Destroy => self.destroy_subtree(child),
            };
            if swept {
                log::debug!("keyed child `{key}` swept ({policy:?})");
            }
        }
    }

    /// Opens the child stored under `key` in the innermost keyed block.
    pub fn open_keyed(&mut self, key: impl Into<Key>) -> Result<ListId> {
        self.ensure_queries()?;
        let key = key.into();
        let frame = self.top_frame()?;
        if frame.kind != BlockKind::Keyed {
            return self.fail(EngineError::unbalanced(format!(
                "keyed lookup of `{key}` inside a {} block",
                frame.kind
            )));
        }
        let Some(parent) = self.lists.get_mut(frame.list) else {
            return self.fail(EngineError::StaleBlock);
        };

        let found = parent
            .keyed
            .get_or_insert_with(BTreeMap::new)
            .get_mut(&key)
            .map(|child| {
                let seen = child.rendered_this_pass;
                child.rendered_this_pass = true;
                (child.list, seen)
            });
        let id = match found {
            Some((_, true)) => return self.fail(EngineError::DuplicateKey { key }),
            Some((id, false)) => id,
            None => {
                let mut child = EntryList::new(BlockKind::Derived);
                child.key = Some(key.clone());
                let id = self.lists.insert(child);
                if let Some(keyed) = self.lists.get_mut(frame.list).and_then(|p| p.keyed.as_mut()) {
                    keyed.insert(
                        key,
                        KeyedChild {
                            list: id,
                            rendered_this_pass: true,
                        },
                    );
                }
                id
            }
        };
        self.enter(id, BlockKind::Derived, false)
    }

    pub fn close_keyed(&mut self) -> Result<()> {
        let parent_kind = self
            .stack
            .len()
            .checked_sub(2)
            .and_then(|i| self.stack.get(i))
            .map(|f| f.kind);
        if parent_kind != Some(BlockKind::Keyed) {
            return self.fail(EngineError::unbalanced(
                "close_keyed called outside a keyed child",
            ));
        }
        self.close_block(BlockKind::Derived)
    }

    /// Enters branch `branch` of the innermost conditional block. A branch
    /// different from the one stored last pass replaces it, destroying the old
    /// one.
    pub fn open_branch(&mut self, branch: u32) -> Result<ListId> {
        self.ensure_queries()?;
        let frame = self.top_frame()?;
        if frame.kind != BlockKind::Conditional {
            return self.fail(EngineError::unbalanced(format!(
                "branch opened inside a {} block",
                frame.kind
            )));
        }
        let tag = TypeTag::branch(branch);
        let Some(list) = self.lists.get_mut(frame.list) else {
            return self.fail(EngineError::StaleBlock);
        };
        if list.cursor > 0 {
            return self.fail(EngineError::MultipleBranches);
        }

        let replaced = match list.slots.first_mut() {
            Some(entry) if entry.tag != tag => {
                log::debug!("conditional switched from {} to {tag}", entry.tag);
                entry.tag = tag;
                std::mem::replace(&mut entry.payload, Payload::Vacant)
            }
            _ => Payload::Vacant,
        };
        if let Payload::Block(old) = replaced {
            self.destroy_subtree(old);
        }
        self.open_child(BlockKind::Derived, tag, false, || None)
    }

    pub fn close_branch(&mut self) -> Result<()> {
        self.close_block(BlockKind::Derived)
    }
}
