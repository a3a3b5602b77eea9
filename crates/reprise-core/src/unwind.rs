//! Try/Catch boundaries.
//!
//! A boundary is a derived block remembered by a [`TryHandle`]. When caller
//! code inside it fails, `catch_and_unwind` truncates the block stack back to
//! the boundary in O(1) and suspends state queries until `close_try`, so the
//! half-finished body cannot touch cursor-addressed state out of order.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::{BlockKind, Cache, EngineError, ListId, Result, TypeTag};

/// Ties a catch to the boundary it was opened with.
///
/// `depth` is the stack height right after the boundary was pushed;
/// `generation` identifies that exact push, so a handle from an earlier pass
/// or a boundary that was already unwound past is rejected.
#[derive(Debug)]
#[must_use = "a try boundary must be closed with close_try"]
pub struct TryHandle {
    list: ListId,
    depth: usize,
    generation: u64,
}

impl TryHandle {
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn list(&self) -> ListId {
        self.list
    }
}

/// What a boundary caught.
#[derive(Debug)]
pub enum Caught<E> {
    Error(E),
    Panic(String),
}

impl<E: fmt::Display> fmt::Display for Caught<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caught::Error(e) => write!(f, "{e}"),
            Caught::Panic(msg) => write!(f, "panic: {msg}"),
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

impl Cache {
    pub fn open_try(&mut self) -> Result<TryHandle> {
        let list = self.open_child(BlockKind::Derived, TypeTag::try_boundary(), true, || None)?;
        let generation = self.top_frame()?.generation;
        Ok(TryHandle {
            list,
            depth: self.stack.len(),
            generation,
        })
    }

    /// Rewinds to `handle`'s boundary after caller code failed inside it.
    ///
    /// Refuses (returning the fault) when an engine error was already raised
    /// this pass: structural errors are never recoverable.
    pub fn catch_and_unwind(&mut self, handle: &TryHandle, error: &dyn fmt::Display) -> Result<()> {
        if let Some(fault) = self.fault.clone() {
            return Err(fault);
        }
        self.shared.needs_rerender.set(true);

        let on_stack = handle
            .depth
            .checked_sub(1)
            .and_then(|i| self.stack.get(i))
            .is_some_and(|f| f.generation == handle.generation && f.list == handle.list);
        if !on_stack {
            return self.fail(EngineError::UnwindTargetNotFound {
                depth: handle.depth,
            });
        }

        let unwound = self.stack.len() - handle.depth;
        self.stack.truncate(handle.depth);
        self.suspended = Some(handle.generation);
        log::warn!("caught at try boundary (depth {}, {unwound} frame(s) unwound): {error}", handle.depth);
        Ok(())
    }

    pub fn close_try(&mut self, handle: TryHandle) -> Result<()> {
        let matches = self.stack.len() == handle.depth
            && self
                .stack
                .last()
                .is_some_and(|f| f.generation == handle.generation);
        if !matches {
            return self.fail(EngineError::unbalanced(format!(
                "close_try for the boundary at depth {} but the stack is {} deep",
                handle.depth,
                self.stack.len()
            )));
        }

        if self.suspended == Some(handle.generation) {
            // The body never finished, so its slot count proves nothing.
            self.suspended = None;
            self.stack.pop();
            return Ok(());
        }
        self.close_frame(BlockKind::Derived, true, false)
    }

    /// Runs `body` inside a try boundary. An `Err` or a panic from `body` is
    /// unwound and handed to `recover`, and another pass is requested.
    pub fn try_catch<R, E: fmt::Display>(
        &mut self,
        body: impl FnOnce(&mut Cache) -> Result<R, E>,
        recover: impl FnOnce(Caught<E>) -> R,
    ) -> Result<R> {
        let handle = self.open_try()?;
        let caught = match catch_unwind(AssertUnwindSafe(|| body(self))) {
            Ok(Ok(value)) => {
                self.close_try(handle)?;
                return Ok(value);
            }
            Ok(Err(err)) => Caught::Error(err),
            Err(panic) => Caught::Panic(panic_message(&*panic)),
        };
        self.catch_and_unwind(&handle, &caught)?;
        self.close_try(handle)?;
        Ok(recover(caught))
    }
}
