//! # Positional state
//!
//! Reprise lets a tree of plain functions, re-run in full on every tick, keep
//! state between runs without diffing anything. Identity comes from call
//! order: the Nth slot requested inside a block on one pass is the Nth slot
//! on the next, and a [`TypeTag`] stored with it catches callers that change
//! order behind the engine's back.
//!
//! ```rust
//! use reprise_core::*;
//!
//! let mut cache = Cache::new();
//! for expected in 1..=3 {
//!     cache
//!         .run_pass(|c| {
//!             let clicks = c.remember_state(|| 0)?;
//!             *clicks.borrow_mut() += 1;
//!             assert_eq!(*clicks.borrow(), expected);
//!             Ok(())
//!         })
//!         .unwrap();
//! }
//! ```
//!
//! ## Blocks
//!
//! Shape changes go through blocks, each stored in one slot of its parent:
//!
//! - derived: plain nesting, same slot count every pass;
//! - conditional (`if_` / `else_if` / `else_`): at most one branch;
//! - array (`for_each`, `while_`): slot count may change;
//! - keyed (`switch`, `for_each_keyed`): children addressed by [`Key`].
//!
//! A block that stops being visited is swept: detached (state kept, resumes
//! later) or destroyed (teardowns run once, slot freed).
//!
//! ```rust
//! use reprise_core::*;
//!
//! let mut cache = Cache::new();
//! for tab in ["inbox", "sent", "inbox"] {
//!     cache
//!         .run_pass(|c| {
//!             c.switch(tab, |c| {
//!                 let opened = c.remember_state(|| 0)?;
//!                 *opened.borrow_mut() += 1;
//!                 Ok(())
//!             })
//!         })
//!         .unwrap();
//! }
//! ```
//!
//! ## Errors
//!
//! Structural mistakes ([`EngineError`]) fail fast and abort the pass.
//! Caller failures inside `try_catch` are unwound to the boundary and a new
//! pass is requested:
//!
//! ```rust
//! use reprise_core::*;
//!
//! let mut cache = Cache::new();
//! cache
//!     .run_pass(|c| {
//!         let shown = c.try_catch(
//!             |c| -> Result<&'static str, String> {
//!                 c.open_block(BlockKind::Derived).map_err(|e| e.to_string())?;
//!                 Err("network down".to_string())
//!             },
//!             |caught| {
//!                 assert_eq!(caught.to_string(), "network down");
//!                 "fallback"
//!             },
//!         )?;
//!         assert_eq!(shown, "fallback");
//!         Ok(())
//!     })
//!     .unwrap();
//! assert!(cache.needs_rerender());
//! ```

pub mod block;
pub mod cache;
pub mod control;
pub mod effects;
pub mod entry;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod memo;
pub mod runtime;
pub mod tag;
pub mod unwind;

#[cfg(test)]
mod tests;

pub use cache::*;
pub use control::*;
pub use effects::*;
pub use entry::*;
pub use error::*;
pub use key::*;
pub use memo::*;
pub use runtime::*;
pub use tag::*;
pub use unwind::*;
