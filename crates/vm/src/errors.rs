//! Error types for schedule construction and validation.

use thiserror::Error;

/// Failure of a preprocessing run. No partial schedule is produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// A statically-known jump targets a byte that is not a JUMPDEST.
    /// Every runtime attempt would fault, so preprocessing fails eagerly.
    #[error("invalid static jump from pc {from_pc} to pc {target_pc}")]
    InvalidStaticJump { from_pc: u64, target_pc: u64 },

    /// The configured iterator-step quota was exhausted.
    #[error("iteration quota of {limit} steps exceeded")]
    QuotaExceeded { limit: u64 },

    /// Reserving the item or constant buffers failed.
    #[error("allocation of {requested} schedule slots failed")]
    OutOfMemory { requested: usize },

    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

/// Bugs in the preprocessor itself, surfaced instead of panicking.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("slot index out of bounds during resolution")]
    SlotOutOfBounds,

    #[error("value does not fit the target width")]
    NarrowingOverflow,

    #[error("schedule failed post-build validation: {0}")]
    Validation(#[from] ValidationError),
}

/// Structural defects found by re-walking a schedule against the
/// per-opcode metadata arities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("item {index} carries unknown op tag {tag}")]
    UnknownTag { index: usize, tag: u16 },

    #[error("handler at {index} is missing {missing} metadata slot(s)")]
    MissingMetadata { index: usize, missing: usize },

    #[error("static jump at {index} targets {target}, not a JUMPDEST handler")]
    BadStaticJump { index: usize, target: usize },

    #[error("push pointer at {index} references constant {reference} of {len}")]
    BadConstRef {
        index: usize,
        reference: u32,
        len: usize,
    },

    #[error("schedule does not end in two STOP sentinels")]
    MissingSentinel,

    #[error("jump table PCs are not strictly increasing at entry {entry}")]
    JumpTableOrder { entry: usize },

    #[error("jump table entry for pc {pc} points at {position}, not a JUMPDEST handler")]
    JumpTableTarget { pc: u64, position: usize },

    #[error("JUMPDEST handler at {index} is missing from the jump table")]
    UnlistedJumpDest { index: usize },
}
