//! Control flow built on the block protocol.
//!
//! - `if_` / `else_if` / `else_`: a conditional block holding at most one
//!   branch. The untaken branch is destroyed unless the chain was opened with
//!   `SweepPolicy::Detach`.
//! - `switch`: a keyed block holding the child for the current key; other
//!   children are detached and resume without re-initialising.
//! - `for_each` / `while_`: an array block with one derived block per
//!   iteration; shrinking destroys the tail.
//! - `for_each_keyed`: a keyed block with one child per item identity.

use crate::{BlockKind, Cache, Key, Result, SweepPolicy, TypeTag};

#[must_use = "finish the chain with `else_` or `end_if`"]
pub struct IfChain<'c> {
    cache: &'c mut Cache,
    next_branch: u32,
    taken: bool,
}

impl IfChain<'_> {
    fn arm(&mut self, cond: bool, body: impl FnOnce(&mut Cache) -> Result<()>) -> Result<()> {
        let branch = self.next_branch;
        self.next_branch += 1;
        if self.taken || !cond {
            return Ok(());
        }
        self.taken = true;
        self.cache.open_branch(branch)?;
        body(self.cache)?;
        self.cache.close_branch()
    }

    pub fn else_if(
        mut self,
        cond: bool,
        body: impl FnOnce(&mut Cache) -> Result<()>,
    ) -> Result<Self> {
        self.arm(cond, body)?;
        Ok(self)
    }

    pub fn else_(mut self, body: impl FnOnce(&mut Cache) -> Result<()>) -> Result<()> {
        self.arm(true, body)?;
        self.end_if()
    }

    /// Whether a branch has run so far.
    pub fn taken(&self) -> bool {
        self.taken
    }

    pub fn end_if(self) -> Result<()> {
        self.cache.close_block(BlockKind::Conditional)
    }
}

impl Cache {
    pub fn if_(
        &mut self,
        cond: bool,
        body: impl FnOnce(&mut Cache) -> Result<()>,
    ) -> Result<IfChain<'_>> {
        self.if_with_policy(SweepPolicy::Destroy, cond, body)
    }

    pub fn if_with_policy(
        &mut self,
        policy: SweepPolicy,
        cond: bool,
        body: impl FnOnce(&mut Cache) -> Result<()>,
    ) -> Result<IfChain<'_>> {
        self.open_block_with_policy(BlockKind::Conditional, policy)?;
        let mut chain = IfChain {
            cache: self,
            next_branch: 0,
            taken: false,
        };
        chain.arm(cond, body)?;
        Ok(chain)
    }

    pub fn switch<R>(
        &mut self,
        key: impl Into<Key>,
        body: impl FnOnce(&mut Cache) -> Result<R>,
    ) -> Result<R> {
        self.switch_with_policy(SweepPolicy::Detach, key, body)
    }

    pub fn switch_with_policy<R>(
        &mut self,
        policy: SweepPolicy,
        key: impl Into<Key>,
        body: impl FnOnce(&mut Cache) -> Result<R>,
    ) -> Result<R> {
        self.open_block_with_policy(BlockKind::Keyed, policy)?;
        self.open_keyed(key)?;
        let out = body(self)?;
        self.close_keyed()?;
        self.close_block(BlockKind::Keyed)?;
        Ok(out)
    }

    pub fn for_each<T>(
        &mut self,
        items: impl IntoIterator<Item = T>,
        mut body: impl FnMut(&mut Cache, T) -> Result<()>,
    ) -> Result<()> {
        self.open_block(BlockKind::Array)?;
        for item in items {
            self.open_child(BlockKind::Derived, TypeTag::item(), false, || None)?;
            body(self, item)?;
            self.close_block(BlockKind::Derived)?;
        }
        self.close_block(BlockKind::Array)
    }

    pub fn while_(
        &mut self,
        mut cond: impl FnMut() -> bool,
        mut body: impl FnMut(&mut Cache) -> Result<()>,
    ) -> Result<()> {
        self.open_block(BlockKind::Array)?;
        while cond() {
            self.open_child(BlockKind::Derived, TypeTag::item(), false, || None)?;
            body(self)?;
            self.close_block(BlockKind::Derived)?;
        }
        self.close_block(BlockKind::Array)
    }

    /// Items keep their state across reorders; removed items are destroyed.
    pub fn for_each_keyed<T, K: Into<Key>>(
        &mut self,
        items: impl IntoIterator<Item = T>,
        mut key_of: impl FnMut(&T) -> K,
        mut body: impl FnMut(&mut Cache, T) -> Result<()>,
    ) -> Result<()> {
        self.open_block_with_policy(BlockKind::Keyed, SweepPolicy::Destroy)?;
        for item in items {
            self.open_keyed(key_of(&item))?;
            body(self, item)?;
            self.close_keyed()?;
        }
        self.close_block(BlockKind::Keyed)
    }

    /// Plain nested scope.
    pub fn block<R>(&mut self, body: impl FnOnce(&mut Cache) -> Result<R>) -> Result<R> {
        self.open_block(BlockKind::Derived)?;
        let out = body(self)?;
        self.close_block(BlockKind::Derived)?;
        Ok(out)
    }

    /// Nested scope carrying a value for `nearest_ancestor(tag)`.
    pub fn with_context<T: 'static, R>(
        &mut self,
        tag: TypeTag,
        init: impl FnOnce() -> T,
        body: impl FnOnce(&mut Cache) -> Result<R>,
    ) -> Result<R> {
        self.open_block_with(BlockKind::Derived, tag, init)?;
        let out = body(self)?;
        self.close_block(BlockKind::Derived)?;
        Ok(out)
    }
}
