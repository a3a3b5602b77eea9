use std::cell::RefCell;
use std::rc::Rc;

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::entry::ListFlags;
use crate::runtime::{PassState, RerenderHandle};
use crate::{BlockKind, EngineError, Entry, EntryList, ListId, RemovalLevel, Result, TypeTag};

#[derive(Clone, Copy, Debug)]
pub(crate) struct Frame {
    pub(crate) list: ListId,
    pub(crate) kind: BlockKind,
    pub(crate) generation: u64,
    pub(crate) boundary: bool,
}

/// The traversal state of one independent tree.
///
/// A pass is `begin_pass`, a sequence of slot and block calls mirroring the
/// caller's call tree, then `end_pass`. The same calls in the same order must
/// be made on every pass; only the block constructs may change shape.
pub struct Cache {
    pub(crate) lists: SlotMap<ListId, EntryList>,
    root: ListId,
    pub(crate) stack: SmallVec<[Frame; 16]>,
    pub(crate) shared: Rc<PassState>,
    pub(crate) next_generation: u64,
    /// Generation of the try boundary whose catch disabled state queries.
    pub(crate) suspended: Option<u64>,
    pub(crate) fault: Option<EngineError>,
    last_slot: Option<(ListId, usize)>,
    passes: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        let mut lists = SlotMap::with_key();
        let root = lists.insert(EntryList::new(BlockKind::Derived));
        Self {
            lists,
            root,
            stack: SmallVec::new(),
            shared: Rc::new(PassState::default()),
            next_generation: 1,
            suspended: None,
            fault: None,
            last_slot: None,
            passes: 0,
        }
    }

    pub fn root(&self) -> ListId {
        self.root
    }

    /// Innermost open block.
    pub fn current(&self) -> Option<ListId> {
        self.stack.last().map(|f| f.list)
    }

    /// Number of open blocks, root included.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn pass_count(&self) -> u64 {
        self.passes
    }

    pub fn is_rendering(&self) -> bool {
        self.shared.is_rendering.get()
    }

    pub fn needs_rerender(&self) -> bool {
        self.shared.needs_rerender.get()
    }

    pub fn request_rerender(&self) {
        self.rerender_handle().request();
    }

    pub fn rerender_handle(&self) -> RerenderHandle {
        RerenderHandle::new(self.shared.clone())
    }

    pub fn list(&self, id: ListId) -> Option<&EntryList> {
        self.lists.get(id)
    }

    /// Freed blocks report `Destroyed`.
    pub fn removal_level(&self, id: ListId) -> RemovalLevel {
        self.lists
            .get(id)
            .map_or(RemovalLevel::Destroyed, |l| l.removal)
    }

    pub fn live_blocks(&self) -> usize {
        self.lists.len()
    }

    pub fn begin_pass(&mut self) -> Result<()> {
        if self.shared.is_rendering.get() {
            return Err(EngineError::ReentrantPass);
        }
        self.shared.is_rendering.set(true);
        self.shared.needs_rerender.set(false);
        self.fault = None;
        self.suspended = None;
        self.last_slot = None;
        self.stack.clear();
        self.passes += 1;
        log::debug!("pass {} begin", self.passes);
        let root = self.root;
        self.enter(root, BlockKind::Derived, false).map(|_| ())
    }

    pub fn end_pass(&mut self) -> Result<()> {
        if !self.shared.is_rendering.get() {
            return Err(EngineError::NotRendering);
        }
        if let Some(fault) = self.fault.clone() {
            self.abort_pass();
            return Err(fault);
        }
        if self.suspended.is_some() || self.stack.len() != 1 {
            let open = self.stack.len().saturating_sub(1);
            let result = self.fail(EngineError::unbalanced(format!(
                "{open} block(s) still open at the end of pass {}",
                self.passes
            )));
            self.abort_pass();
            return result;
        }
        let result = self.close_frame(BlockKind::Derived, false, true);
        self.stack.clear();
        self.shared.is_rendering.set(false);
        if result.is_ok() {
            log::debug!(
                "pass {} end ({} live blocks)",
                self.passes,
                self.lists.len()
            );
        }
        result
    }

    /// Drop every open frame and release the rendering latch.
    pub fn abort_pass(&mut self) {
        if self.shared.is_rendering.get() {
            log::debug!("pass {} aborted at depth {}", self.passes, self.stack.len());
        }
        self.stack.clear();
        self.suspended = None;
        self.last_slot = None;
        self.shared.is_rendering.set(false);
    }

    /// Runs one full pass over `f`. Any error aborts the pass.
    pub fn run_pass<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Cache) -> Result<()>,
    {
        self.begin_pass()?;
        if let Err(err) = f(self) {
            if self.fault.is_none() {
                log::error!("pass {} failed: {err}", self.passes);
            }
            self.abort_pass();
            return Err(err);
        }
        self.end_pass()
    }

    /// Records `err` as the pass fault and returns it.
    pub(crate) fn fail<T>(&mut self, err: EngineError) -> Result<T> {
        if self.fault.is_none() {
            log::error!("pass {}: {err}", self.passes);
            self.fault = Some(err.clone());
        }
        Err(err)
    }

    pub(crate) fn ensure_queries(&mut self) -> Result<()> {
        if !self.shared.is_rendering.get() {
            return Err(EngineError::NotRendering);
        }
        if self.suspended.is_some() {
            return self.fail(EngineError::QueriesSuspended);
        }
        Ok(())
    }

    pub(crate) fn top_frame(&mut self) -> Result<Frame> {
        match self.stack.last() {
            Some(frame) => Ok(*frame),
            None => self.fail(EngineError::unbalanced("no block is open")),
        }
    }

    pub(crate) fn entry_mut(&mut self, list: ListId, index: usize) -> &mut Entry {
        &mut self.lists[list].slots[index]
    }

    /// Advances the innermost block's cursor to the next address.
    pub(crate) fn next_entry(&mut self, tag: TypeTag) -> Result<(ListId, usize)> {
        self.ensure_queries()?;
        let frame = self.top_frame()?;
        let Some(list) = self.lists.get_mut(frame.list) else {
            return self.fail(EngineError::StaleBlock);
        };

        if list.cursor == 0 {
            let was_reachable = list.flags.contains(ListFlags::REACHABLE);
            list.flags.set(ListFlags::REENTERING, !was_reachable);
            list.flags.insert(ListFlags::REACHABLE);
            list.removal = RemovalLevel::Present;
            if !was_reachable && list.flags.contains(ListFlags::COMPLETED) {
                log::trace!("{} block re-entered", list.kind);
            }
        }

        let index = list.cursor;
        list.cursor += 1;
        if index == list.slots.len() {
            list.slots.push(Entry::new(tag));
        } else if list.slots[index].tag != tag {
            let expected = list.slots[index].tag;
            return self.fail(EngineError::PositionalMismatch {
                index,
                expected,
                found: tag,
            });
        }
        Ok((frame.list, index))
    }

    /// The entry at the next address of the innermost block.
    pub fn get_or_create_slot(&mut self, tag: TypeTag) -> Result<&mut Entry> {
        let (list, index) = self.next_entry(tag)?;
        if self.entry_mut(list, index).child().is_some() {
            return self.fail(EngineError::PayloadType {
                tag,
                expected: "value",
            });
        }
        self.last_slot = Some((list, index));
        Ok(self.entry_mut(list, index))
    }

    /// Writes into the slot last returned by `get_or_create_slot`.
    pub fn set_slot<T: 'static>(&mut self, value: T) -> Result<()> {
        self.ensure_queries()?;
        let current = self.current();
        match self.last_slot {
            Some((list, index)) if Some(list) == current => {
                self.entry_mut(list, index).set(value);
                Ok(())
            }
            _ => self.fail(EngineError::unbalanced(
                "set_slot called without a slot visited in the current block",
            )),
        }
    }

    /// Typed slot at the next address, initialised on first visit.
    pub fn slot<T: 'static>(&mut self, tag: TypeTag, init: impl FnOnce() -> T) -> Result<&mut T> {
        let (list, index) = self.next_entry(tag)?;
        let holds_t = {
            let entry = self.entry_mut(list, index);
            if entry.is_vacant() {
                entry.set(init());
            }
            entry.get::<T>().is_some()
        };
        if !holds_t {
            return self.fail(EngineError::PayloadType {
                tag,
                expected: std::any::type_name::<T>(),
            });
        }
        self.last_slot = Some((list, index));
        self.entry_mut(list, index)
            .get_mut::<T>()
            .ok_or(EngineError::PayloadType {
                tag,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Slot-based remember: the Nth call in a block always returns the Nth value.
    pub fn remember<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Result<Rc<T>> {
        self.slot(TypeTag::of::<Rc<T>>(), || Rc::new(init()))
            .map(|rc| rc.clone())
    }

    pub fn remember_state<T: 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<Rc<RefCell<T>>> {
        self.remember(|| RefCell::new(init()))
    }

    /// Value attached to the nearest open block created with `tag`.
    pub fn nearest_ancestor<T: 'static>(&self, tag: TypeTag) -> Option<&T> {
        self.stack
            .iter()
            .rev()
            .filter_map(|f| self.lists.get(f.list))
            .find_map(|l| l.context.as_ref().filter(|c| c.tag == tag))
            .and_then(|c| c.value.downcast_ref::<T>())
    }

    pub fn nearest_ancestor_mut<T: 'static>(&mut self, tag: TypeTag) -> Option<&mut T> {
        let id = self.stack.iter().rev().map(|f| f.list).find(|id| {
            self.lists
                .get(*id)
                .and_then(|l| l.context.as_ref())
                .is_some_and(|c| c.tag == tag)
        })?;
        self.lists
            .get_mut(id)?
            .context
            .as_mut()
            .and_then(|c| c.value.downcast_mut::<T>())
    }

    /// Registers `f` to run once when the innermost block is destroyed.
    ///
    /// Registration is not deduplicated; guard it with `memo` or use
    /// `disposable_effect`.
    pub fn on_teardown(&mut self, f: impl FnOnce() + 'static) -> Result<()> {
        self.ensure_queries()?;
        let frame = self.top_frame()?;
        let Some(list) = self.lists.get_mut(frame.list) else {
            return self.fail(EngineError::StaleBlock);
        };
        list.teardowns.get_or_insert_with(Vec::new).push(Box::new(f));
        Ok(())
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        let root = self.root;
        self.destroy_subtree(root);
    }
}
