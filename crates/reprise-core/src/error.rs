use thiserror::Error;

use crate::{BlockKind, Key, TypeTag};

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Structural errors raised by the engine.
///
/// Every variant describes a bug in the calling code. None of them is
/// swallowed by a try boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("positional mismatch at slot {index}: previous pass stored `{expected}`, this pass asked for `{found}`")]
    PositionalMismatch {
        index: usize,
        expected: TypeTag,
        found: TypeTag,
    },
    #[error("{kind} block closed after {found} slots but the previous pass closed after {expected}")]
    ArityMismatch {
        kind: BlockKind,
        expected: usize,
        found: usize,
    },
    #[error("key `{key}` was looked up twice in one pass")]
    DuplicateKey { key: Key },
    #[error("unbalanced block stack: {message}")]
    UnbalancedStack { message: String },
    #[error("try boundary at depth {depth} is no longer on the stack")]
    UnwindTargetNotFound { depth: usize },
    #[error("a pass is already in progress")]
    ReentrantPass,
    #[error("no pass is in progress")]
    NotRendering,
    #[error("state queries are suspended until the enclosing try closes")]
    QueriesSuspended,
    #[error("conditional block already entered a branch this pass")]
    MultipleBranches,
    #[error("slot `{tag}` does not hold a `{expected}`")]
    PayloadType {
        tag: TypeTag,
        expected: &'static str,
    },
    #[error("block was destroyed and cannot be visited again")]
    StaleBlock,
}

impl EngineError {
    pub(crate) fn unbalanced(message: impl Into<String>) -> Self {
        EngineError::UnbalancedStack {
            message: message.into(),
        }
    }
}
