//! Limits and schedule sizing constants.

/// EVM operand stack capacity. Block-entry admission
/// ([`BlockMeta::admits`](crate::BlockMeta::admits)) measures the entry
/// depth plus the block's peak growth against this bound.
pub const STACK_LIMIT: usize = 1024;

/// Default iterator-step quota for one preprocessing run. Generous enough
/// for any deployable contract (EIP-170 caps code at 24576 bytes) while
/// still bounding adversarial inputs.
pub const DEFAULT_LOOP_QUOTA: u64 = 1 << 24;

/// Upper bound on dispatch items emitted per bytecode byte. Every event
/// covers at least one byte and emits at most a handler plus one metadata
/// slot; wider emissions (multi-push, function dispatch) always cover more
/// bytes than items.
pub const MAX_ITEMS_PER_BYTE: usize = 2;

/// Items appended regardless of input: the optional entry-block metadata
/// slot and the two sentinel STOP handlers.
pub const FIXED_ITEM_OVERHEAD: usize = 3;

/// Number of sentinel STOP handlers terminating every schedule.
pub const SENTINEL_STOPS: usize = 2;
