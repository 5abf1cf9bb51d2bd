//! The 8-byte dispatch item.
//!
//! Every schedule slot is one 64-bit word. Which variant a slot holds is
//! implicit: it is determined by the position of the slot relative to the
//! preceding handler and that handler's opcode, exactly as the builder
//! emitted it. Nothing in the bits identifies the variant, so readers must
//! only use the accessor matching the slot they know they are looking at;
//! the debug validator re-walks schedules to check these positional rules.

use core::fmt;

use crate::Pc;
use crate::analysis::BlockInfo;
use crate::constant_pool::ConstRef;
use crate::constants::STACK_LIMIT;
use crate::synthetic::OpTag;

/// One slot of the dispatch schedule. Exactly 8 bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ScheduleItem(u64);

const META_GAS_SHIFT: u32 = 32;
const META_MIN_SHIFT: u32 = 16;
const LOW_16_MASK: u64 = 0xffff;
const LOW_32_MASK: u64 = 0xffff_ffff;

impl ScheduleItem {
    /// Handler slot carrying the unified opcode tag.
    pub fn handler(tag: OpTag) -> Self {
        Self(u64::from(tag.raw()))
    }

    /// Inline 64-bit push operand.
    pub fn push_inline(value: u64) -> Self {
        Self(value)
    }

    /// Reference to an interned wide operand.
    pub fn push_pointer(reference: ConstRef) -> Self {
        Self(u64::from(reference.index()))
    }

    /// Original byte offset of a PC opcode.
    pub fn pc_value(pc: Pc) -> Self {
        Self(u64::from(pc))
    }

    /// Block gas and stack bounds, packed `gas:32 | min:16 | max:16`.
    pub fn block_meta(meta: BlockMeta) -> Self {
        Self(
            u64::from(meta.gas) << META_GAS_SHIFT
                | u64::from(meta.min_stack) << META_MIN_SHIFT
                | u64::from(meta.max_stack),
        )
    }

    /// Resolved static-jump destination: a schedule position.
    pub fn jump_target(position: usize) -> Self {
        Self(u64::try_from(position).unwrap_or(u64::MAX))
    }

    /// Placeholder written where a static jump awaits resolution; always
    /// overwritten before the schedule is returned.
    pub(crate) fn unresolved_jump() -> Self {
        Self(u64::MAX)
    }

    /// Raw bits of the slot.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Read as a handler tag. Meaningful only at handler positions.
    pub fn as_tag(self) -> Option<OpTag> {
        OpTag::from_raw(u16::try_from(self.0).ok()?)
    }

    /// Read as an inline push operand.
    pub const fn as_inline(self) -> u64 {
        self.0
    }

    /// Read as a constant-pool reference.
    pub fn as_pointer(self) -> ConstRef {
        ConstRef::new(u32::try_from(self.0 & LOW_32_MASK).unwrap_or(u32::MAX))
    }

    /// Read as an original program counter.
    pub fn as_pc(self) -> Pc {
        u32::try_from(self.0 & LOW_32_MASK).unwrap_or(u32::MAX)
    }

    /// Read as packed block metadata.
    pub fn as_block_meta(self) -> BlockMeta {
        BlockMeta {
            gas: u32::try_from(self.0 >> META_GAS_SHIFT).unwrap_or(u32::MAX),
            min_stack: u16::try_from(self.0 >> META_MIN_SHIFT & LOW_16_MASK).unwrap_or(u16::MAX),
            max_stack: u16::try_from(self.0 & LOW_16_MASK).unwrap_or(u16::MAX),
        }
    }

    /// Read as a resolved static-jump position.
    pub fn as_jump_target(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl fmt::Debug for ScheduleItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScheduleItem({:#018x})", self.0)
    }
}

/// Block gas cost and stack bounds as stored in `jump_dest_meta` and
/// `first_block_gas` slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockMeta {
    /// Static gas of the block, saturated to 32 bits.
    pub gas: u32,
    /// Entry stack depth required to not underflow.
    pub min_stack: u16,
    /// Peak stack growth over the entry depth.
    pub max_stack: u16,
}

impl BlockMeta {
    /// Block-entry admission check: whether a stack of `depth` items
    /// satisfies the block's minimum and stays within [`STACK_LIMIT`]
    /// at its peak. Charged handlers call this once per block instead
    /// of bounds-checking every operation.
    pub fn admits(&self, depth: usize) -> bool {
        depth >= usize::from(self.min_stack)
            && depth.saturating_add(usize::from(self.max_stack)) <= STACK_LIMIT
    }
}

impl From<BlockInfo> for BlockMeta {
    fn from(info: BlockInfo) -> Self {
        Self {
            gas: u32::try_from(info.gas).unwrap_or(u32::MAX),
            min_stack: info.min_stack,
            max_stack: info.max_stack,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::opcodes;

    #[test]
    fn item_is_eight_bytes() {
        assert_eq!(core::mem::size_of::<ScheduleItem>(), 8);
        assert_eq!(core::mem::size_of::<Option<ScheduleItem>>(), 16);
    }

    #[test]
    fn block_meta_round_trip() {
        let meta = BlockMeta {
            gas: 123_456,
            min_stack: 7,
            max_stack: 1024,
        };
        assert_eq!(ScheduleItem::block_meta(meta).as_block_meta(), meta);
    }

    #[test]
    fn meta_saturates_wide_gas() {
        let info = BlockInfo {
            gas: u64::MAX,
            min_stack: 1,
            max_stack: 2,
        };
        let meta = BlockMeta::from(info);
        assert_eq!(meta.gas, u32::MAX);
    }

    #[test]
    fn tag_round_trip() {
        let tag = crate::OpTag::regular(opcodes::JUMPDEST);
        assert_eq!(ScheduleItem::handler(tag).as_tag(), Some(tag));
        // A full-width payload is not a tag.
        assert!(ScheduleItem::push_inline(u64::MAX).as_tag().is_none());
    }

    #[test]
    fn pc_and_target_round_trip() {
        assert_eq!(ScheduleItem::pc_value(77).as_pc(), 77);
        assert_eq!(ScheduleItem::jump_target(12).as_jump_target(), 12);
    }

    #[test]
    fn block_entry_admission() {
        let meta = BlockMeta {
            gas: 9,
            min_stack: 2,
            max_stack: 4,
        };
        // Too shallow to satisfy the block's minimum depth.
        assert!(!meta.admits(1));
        assert!(meta.admits(2));
        // Peak growth must stay within the stack capacity.
        assert!(meta.admits(STACK_LIMIT - 4));
        assert!(!meta.admits(STACK_LIMIT - 3));
        assert!(!meta.admits(STACK_LIMIT));
    }
}
