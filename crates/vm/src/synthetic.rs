//! Synthetic opcodes introduced by pattern fusion, and the unified tag
//! addressing both them and the 256 regular opcodes.
//!
//! Value-carrying fusions exist in an inline and a pointer flavor so that
//! the variant of every metadata slot stays statically known to the
//! handler consuming it; the tag alone determines the slot layout.

use strum::{Display, EnumCount, EnumIter, FromRepr, IntoStaticStr};

use crate::opcodes::{self, OpCode};

/// A fused multi-instruction operation.
///
/// The discriminant is stable: it is stored (offset by 256) inside
/// [`handler` items](crate::ScheduleItem) and indexes the synthetic half
/// of the handler table.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumCount, EnumIter, FromRepr, IntoStaticStr,
)]
#[repr(u16)]
pub enum SyntheticOp {
    PushAddInline,
    PushAddPointer,
    PushMulInline,
    PushMulPointer,
    PushSubInline,
    PushSubPointer,
    PushDivInline,
    PushDivPointer,
    PushAndInline,
    PushAndPointer,
    PushOrInline,
    PushOrPointer,
    PushXorInline,
    PushXorPointer,
    PushMloadInline,
    PushMloadPointer,
    PushMstoreInline,
    PushMstorePointer,
    PushMstore8Inline,
    PushMstore8Pointer,
    PushJump,
    PushJumpi,
    IszeroJumpi,
    MultiPush2,
    MultiPush3,
    MultiPop,
    Dup2MstorePushInline,
    Dup2MstorePushPointer,
    Dup3AddMstore,
    Swap1Dup2Add,
    PushDup3AddInline,
    PushDup3AddPointer,
    PushAddDup1Inline,
    PushAddDup1Pointer,
    MloadSwap1Dup2,
    FunctionDispatch,
    CallvalueCheck,
    Push0Revert,
}

impl SyntheticOp {
    /// Metadata slots following this handler in the schedule.
    pub const fn metadata_arity(self) -> usize {
        match self {
            Self::Dup3AddMstore
            | Self::Swap1Dup2Add
            | Self::MloadSwap1Dup2
            | Self::CallvalueCheck
            | Self::Push0Revert => 0,
            Self::MultiPush2 => 2,
            Self::MultiPush3 => 3,
            Self::FunctionDispatch => 2,
            _ => 1,
        }
    }

    /// Representative source opcodes of the fused window, in order. The
    /// concrete push width in the bytecode may differ, which never changes
    /// gas or stack behavior; MULTI_PUSH and MULTI_POP repeat their single
    /// listed opcode.
    pub const fn source_opcodes(self) -> &'static [u8] {
        use crate::opcodes::*;
        match self {
            Self::PushAddInline | Self::PushAddPointer => &[PUSH1, ADD],
            Self::PushMulInline | Self::PushMulPointer => &[PUSH1, MUL],
            Self::PushSubInline | Self::PushSubPointer => &[PUSH1, SUB],
            Self::PushDivInline | Self::PushDivPointer => &[PUSH1, DIV],
            Self::PushAndInline | Self::PushAndPointer => &[PUSH1, AND],
            Self::PushOrInline | Self::PushOrPointer => &[PUSH1, OR],
            Self::PushXorInline | Self::PushXorPointer => &[PUSH1, XOR],
            Self::PushMloadInline | Self::PushMloadPointer => &[PUSH1, MLOAD],
            Self::PushMstoreInline | Self::PushMstorePointer => &[PUSH1, MSTORE],
            Self::PushMstore8Inline | Self::PushMstore8Pointer => &[PUSH1, MSTORE8],
            Self::PushJump => &[PUSH1, JUMP],
            Self::PushJumpi => &[PUSH1, JUMPI],
            Self::IszeroJumpi => &[ISZERO, PUSH1, JUMPI],
            Self::MultiPush2 | Self::MultiPush3 => &[PUSH1],
            Self::MultiPop => &[POP],
            Self::Dup2MstorePushInline | Self::Dup2MstorePushPointer => &[DUP2, MSTORE, PUSH1],
            Self::Dup3AddMstore => &[DUP3, ADD, MSTORE],
            Self::Swap1Dup2Add => &[SWAP1, DUP2, ADD],
            Self::PushDup3AddInline | Self::PushDup3AddPointer => &[PUSH1, DUP3, ADD],
            Self::PushAddDup1Inline | Self::PushAddDup1Pointer => &[PUSH1, ADD, DUP1],
            Self::MloadSwap1Dup2 => &[MLOAD, SWAP1, DUP2],
            Self::FunctionDispatch => &[DUP1, PUSH4, EQ, PUSH2, JUMPI],
            Self::CallvalueCheck => &[CALLVALUE, DUP1, ISZERO],
            Self::Push0Revert => &[PUSH0, PUSH0, REVERT],
        }
    }

    /// Summed static gas of the representative source window.
    pub fn source_gas(self) -> u64 {
        self.source_opcodes()
            .iter()
            .map(|byte| u64::from(opcodes::opcode_info(*byte).gas))
            .sum()
    }

    /// Whether this operation ends a basic block (its final source opcode
    /// is a jump, halt or fault).
    pub const fn terminates_block(self) -> bool {
        matches!(
            self,
            Self::PushJump
                | Self::PushJumpi
                | Self::IszeroJumpi
                | Self::Push0Revert
                | Self::FunctionDispatch
        )
    }

    #[allow(clippy::as_conversions)]
    const fn repr(self) -> u16 {
        self as u16
    }
}

/// Unified opcode tag: regular opcodes occupy `0..=255`, synthetic ones
/// `256..`. This is the value stored in `handler` dispatch items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpTag(u16);

const SYNTHETIC_BASE: u16 = 256;

impl OpTag {
    /// Tag of a regular opcode byte (defined or not).
    #[allow(clippy::as_conversions)]
    pub const fn regular(byte: u8) -> Self {
        Self(byte as u16)
    }

    /// Tag of a synthetic opcode.
    #[allow(clippy::arithmetic_side_effects)]
    pub const fn fused(op: SyntheticOp) -> Self {
        // The synthetic range is far below u16::MAX.
        Self(SYNTHETIC_BASE + op.repr())
    }

    /// Raw tag value as stored in the schedule.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Reconstruct from a raw tag; `None` if the synthetic range is
    /// exceeded.
    pub fn from_raw(raw: u16) -> Option<Self> {
        if raw < SYNTHETIC_BASE {
            Some(Self(raw))
        } else {
            SyntheticOp::from_repr(raw.checked_sub(SYNTHETIC_BASE)?).map(Self::fused)
        }
    }

    /// The regular opcode byte, if this is not a synthetic tag.
    pub fn byte(self) -> Option<u8> {
        u8::try_from(self.0).ok()
    }

    /// The synthetic opcode, if any.
    pub fn synthetic(self) -> Option<SyntheticOp> {
        SyntheticOp::from_repr(self.0.checked_sub(SYNTHETIC_BASE)?)
    }

    /// Metadata slots that follow this handler. JUMPDEST, PC and every
    /// push carry one slot; synthetics define their own arity.
    pub fn metadata_arity(self) -> usize {
        match self.byte() {
            Some(byte) => match byte {
                opcodes::JUMPDEST | opcodes::PC => 1,
                b if OpCode::new(b).is_some_and(OpCode::is_push) => 1,
                _ => 0,
            },
            None => self
                .synthetic()
                .map(SyntheticOp::metadata_arity)
                .unwrap_or(0),
        }
    }

    /// Display name: the opcode table name or the synthetic variant name.
    pub fn name(self) -> &'static str {
        match self.byte() {
            Some(byte) => opcodes::opcode_name(byte),
            None => self.synthetic().map(<&'static str>::from).unwrap_or("??"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn tag_round_trip() {
        for op in SyntheticOp::iter() {
            let tag = OpTag::fused(op);
            assert_eq!(OpTag::from_raw(tag.raw()), Some(tag));
            assert_eq!(tag.synthetic(), Some(op));
            assert_eq!(tag.byte(), None);
        }
        let add = OpTag::regular(crate::opcodes::ADD);
        assert_eq!(add.byte(), Some(crate::opcodes::ADD));
        assert_eq!(add.synthetic(), None);
        assert_eq!(add.metadata_arity(), 0);
    }

    #[test]
    fn arities() {
        assert_eq!(OpTag::regular(crate::opcodes::PUSH32).metadata_arity(), 1);
        assert_eq!(OpTag::regular(crate::opcodes::PUSH0).metadata_arity(), 1);
        assert_eq!(OpTag::regular(crate::opcodes::JUMPDEST).metadata_arity(), 1);
        assert_eq!(OpTag::regular(crate::opcodes::PC).metadata_arity(), 1);
        assert_eq!(OpTag::fused(SyntheticOp::MultiPush3).metadata_arity(), 3);
        assert_eq!(OpTag::fused(SyntheticOp::FunctionDispatch).metadata_arity(), 2);
        assert_eq!(OpTag::fused(SyntheticOp::CallvalueCheck).metadata_arity(), 0);
    }

    #[test]
    fn synthetic_gas_sums() {
        assert_eq!(SyntheticOp::PushAddInline.source_gas(), 6);
        assert_eq!(SyntheticOp::PushJump.source_gas(), 11);
        assert_eq!(SyntheticOp::IszeroJumpi.source_gas(), 16);
        assert_eq!(SyntheticOp::FunctionDispatch.source_gas(), 22);
        assert_eq!(SyntheticOp::CallvalueCheck.source_gas(), 8);
        assert_eq!(SyntheticOp::Push0Revert.source_gas(), 4);
    }

    #[test]
    fn beyond_range_is_rejected() {
        let last = u16::try_from(SyntheticOp::iter().count()).unwrap();
        assert!(OpTag::from_raw(SYNTHETIC_BASE + last).is_none());
    }
}
