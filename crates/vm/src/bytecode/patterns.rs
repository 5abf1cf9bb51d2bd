//! Fusion-pattern recognition over the instruction stream.
//!
//! A sliding lookahead window is matched against a fixed rule set; on a
//! match one fused instruction replaces the whole window. Rules apply
//! greedily and never overlap: once a window is consumed the next
//! instruction begins strictly after it. No rule window contains a
//! JUMPDEST, so fusion can never swallow a legal jump target, and a rule
//! only matches when every instruction of its window exists (fusion never
//! crosses end-of-bytecode).

use std::collections::VecDeque;

use crate::Word;
use crate::bytecode::{BytecodeIterator, EventKind, InstructionEvent};
use crate::config::FusionSet;
use crate::opcodes;

/// Longest rule window, in instructions (DUP1 PUSH4 EQ PUSH JUMPI).
const MAX_WINDOW: usize = 5;

/// Push sizes eligible for MULTI_PUSH: the value always fits an inline
/// 64-bit metadata slot.
const SHORT_PUSH_MAX: u8 = 8;

/// One recognizer output: either a single instruction passed through or a
/// fused window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FusedInstruction {
    /// Offset of the first source byte.
    pub pc: usize,
    /// Source bytes covered, immediates included.
    pub byte_len: usize,
    pub op: FusedOp,
}

/// The operation an emitted instruction performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FusedOp {
    /// Unfused single instruction.
    Plain(EventKind),
    /// PUSH value + one arithmetic/memory opcode.
    PushOp { kind: PushFuseKind, value: Word },
    /// PUSH target + JUMP; resolved to a direct schedule position.
    PushJump { target: Word },
    /// PUSH target + JUMPI.
    PushJumpi { target: Word },
    /// ISZERO + PUSH target + JUMPI.
    IszeroJumpi { target: Word },
    /// Two or three consecutive short pushes; `values[..count]` are the
    /// operands in source order.
    MultiPush { values: [u64; 3], count: u8 },
    /// A run of consecutive POPs.
    MultiPop { count: u64 },
    /// DUP2 + MSTORE + PUSH value.
    Dup2MstorePush { value: Word },
    /// DUP3 + ADD + MSTORE.
    Dup3AddMstore,
    /// SWAP1 + DUP2 + ADD.
    Swap1Dup2Add,
    /// PUSH value + DUP3 + ADD.
    PushDup3Add { value: Word },
    /// PUSH value + ADD + DUP1.
    PushAddDup1 { value: Word },
    /// MLOAD + SWAP1 + DUP2.
    MloadSwap1Dup2,
    /// DUP1 + PUSH4 selector + EQ + PUSH target + JUMPI: one arm of a
    /// Solidity-style function selector ladder.
    FunctionDispatch { selector: u32, target: Word },
    /// CALLVALUE + DUP1 + ISZERO: the non-payable prologue prefix.
    CallvalueCheck,
    /// PUSH0 + PUSH0 + REVERT.
    Push0Revert,
}

/// The second opcode of a PUSH+op fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFuseKind {
    Add,
    Mul,
    Sub,
    Div,
    And,
    Or,
    Xor,
    Mload,
    Mstore,
    Mstore8,
}

impl PushFuseKind {
    fn from_byte(byte: u8, enabled: FusionSet) -> Option<(Self, FusionSet)> {
        let (kind, rule) = match byte {
            opcodes::ADD => (Self::Add, FusionSet::PUSH_ADD),
            opcodes::MUL => (Self::Mul, FusionSet::PUSH_MUL),
            opcodes::SUB => (Self::Sub, FusionSet::PUSH_SUB),
            opcodes::DIV => (Self::Div, FusionSet::PUSH_DIV),
            opcodes::AND => (Self::And, FusionSet::PUSH_AND),
            opcodes::OR => (Self::Or, FusionSet::PUSH_OR),
            opcodes::XOR => (Self::Xor, FusionSet::PUSH_XOR),
            opcodes::MLOAD => (Self::Mload, FusionSet::PUSH_MLOAD),
            opcodes::MSTORE => (Self::Mstore, FusionSet::PUSH_MSTORE),
            opcodes::MSTORE8 => (Self::Mstore8, FusionSet::PUSH_MSTORE8),
            _ => return None,
        };
        enabled.contains(rule).then_some((kind, rule))
    }
}

/// Lookahead filter wrapping [`BytecodeIterator`].
#[derive(Debug, Clone)]
pub struct PatternRecognizer<'a> {
    inner: BytecodeIterator<'a>,
    window: VecDeque<InstructionEvent>,
    fusions: FusionSet,
}

impl<'a> PatternRecognizer<'a> {
    pub fn new(code: &'a [u8], fusions: FusionSet) -> Self {
        Self::from_offset(code, 0, fusions)
    }

    /// Start recognition at `pc`, which must be an instruction boundary.
    pub fn from_offset(code: &'a [u8], pc: usize, fusions: FusionSet) -> Self {
        Self {
            inner: BytecodeIterator::from_offset(code, pc),
            window: VecDeque::with_capacity(MAX_WINDOW),
            fusions,
        }
    }

    /// Raw instructions decoded so far, for quota accounting.
    pub fn raw_steps(&self) -> u64 {
        self.inner.steps()
    }

    /// Next fused instruction, or `None` at end of bytecode.
    pub fn advance(&mut self) -> Option<FusedInstruction> {
        self.fill(MAX_WINDOW);
        let first = self.window.front()?;
        let pc = first.pc;

        if let Some((op, len)) = self.match_window() {
            let byte_len = self.consume(len, pc);
            return Some(FusedInstruction { pc, byte_len, op });
        }

        // Pass-through: emit the first instruction unchanged.
        let ev = self.window.pop_front()?;
        Some(FusedInstruction {
            pc: ev.pc,
            byte_len: event_byte_len(&ev),
            op: FusedOp::Plain(ev.kind),
        })
    }

    /// Top up the lookahead window to `n` instructions if available.
    fn fill(&mut self, n: usize) {
        while self.window.len() < n {
            match self.inner.advance() {
                Some(ev) => self.window.push_back(ev),
                None => break,
            }
        }
    }

    /// Drop `count` instructions from the window and return the number of
    /// source bytes they covered.
    fn consume(&mut self, count: usize, start_pc: usize) -> usize {
        let mut end = start_pc;
        for _ in 0..count {
            if let Some(ev) = self.window.pop_front() {
                end = ev.pc.saturating_add(event_byte_len(&ev));
            }
        }
        end.saturating_sub(start_pc)
    }

    /// Try every enabled rule against the current window, longest first.
    /// Returns the fused operation and the window length in instructions.
    fn match_window(&mut self) -> Option<(FusedOp, usize)> {
        let first = self.window.front()?.kind.clone();
        match first {
            EventKind::Push { size, value } if size > 0 => self.match_push_window(value),
            EventKind::Push { .. } => self.match_push0_revert(),
            EventKind::Regular(op) => self.match_regular_window(op.get()),
            _ => None,
        }
    }

    fn match_push_window(&mut self, value: Word) -> Option<(FusedOp, usize)> {
        // Three-instruction rules take precedence over two-instruction
        // ones so a longer window is never split by a shorter match.
        if self.enabled(FusionSet::MULTI_PUSH) {
            if let Some(op) = self.match_multi_push() {
                return Some(op);
            }
        }
        if self.enabled(FusionSet::PUSH_DUP3_ADD)
            && self.regular_at(1, opcodes::DUP3)
            && self.regular_at(2, opcodes::ADD)
        {
            return Some((FusedOp::PushDup3Add { value }, 3));
        }
        if self.enabled(FusionSet::PUSH_ADD_DUP1)
            && self.regular_at(1, opcodes::ADD)
            && self.regular_at(2, opcodes::DUP1)
        {
            return Some((FusedOp::PushAddDup1 { value }, 3));
        }
        if self.enabled(FusionSet::PUSH_JUMP) && self.regular_at(1, opcodes::JUMP) {
            return Some((FusedOp::PushJump { target: value }, 2));
        }
        if self.enabled(FusionSet::PUSH_JUMPI) && self.regular_at(1, opcodes::JUMPI) {
            return Some((FusedOp::PushJumpi { target: value }, 2));
        }
        if let EventKind::Regular(op) = &self.window.get(1)?.kind {
            if let Some((kind, _)) = PushFuseKind::from_byte(op.get(), self.fusions) {
                return Some((FusedOp::PushOp { kind, value }, 2));
            }
        }
        None
    }

    /// MULTI_PUSH_3 or MULTI_PUSH_2 over consecutive short pushes.
    fn match_multi_push(&self) -> Option<(FusedOp, usize)> {
        let mut values = [0u64; 3];
        let mut count = 0usize;
        for slot in 0..3 {
            match self.short_push_at(slot) {
                Some(v) => {
                    if let Some(dst) = values.get_mut(slot) {
                        *dst = v;
                    }
                    count = slot.saturating_add(1);
                }
                None => break,
            }
        }
        if count >= 2 {
            Some((
                FusedOp::MultiPush {
                    values,
                    count: u8::try_from(count).unwrap_or(3),
                },
                count,
            ))
        } else {
            None
        }
    }

    fn match_push0_revert(&self) -> Option<(FusedOp, usize)> {
        if self.enabled(FusionSet::PUSH0_REVERT)
            && self.push0_at(1)
            && self.regular_at(2, opcodes::REVERT)
        {
            return Some((FusedOp::Push0Revert, 3));
        }
        None
    }

    fn match_regular_window(&mut self, first: u8) -> Option<(FusedOp, usize)> {
        match first {
            opcodes::DUP1 if self.enabled(FusionSet::FUNCTION_DISPATCH) => {
                let selector = self.selector_at(1)?;
                if !self.regular_at(2, opcodes::EQ) {
                    return None;
                }
                let target = self.pc_sized_push_at(3)?;
                if !self.regular_at(4, opcodes::JUMPI) {
                    return None;
                }
                Some((FusedOp::FunctionDispatch { selector, target }, 5))
            }
            opcodes::ISZERO if self.enabled(FusionSet::ISZERO_JUMPI) => {
                let target = self.pc_sized_push_at(1)?;
                if !self.regular_at(2, opcodes::JUMPI) {
                    return None;
                }
                Some((FusedOp::IszeroJumpi { target }, 3))
            }
            opcodes::DUP2 if self.enabled(FusionSet::DUP2_MSTORE_PUSH) => {
                if !self.regular_at(1, opcodes::MSTORE) {
                    return None;
                }
                let value = self.push_value_at(2)?;
                Some((FusedOp::Dup2MstorePush { value }, 3))
            }
            opcodes::DUP3
                if self.enabled(FusionSet::DUP3_ADD_MSTORE)
                    && self.regular_at(1, opcodes::ADD)
                    && self.regular_at(2, opcodes::MSTORE) =>
            {
                Some((FusedOp::Dup3AddMstore, 3))
            }
            opcodes::SWAP1
                if self.enabled(FusionSet::SWAP1_DUP2_ADD)
                    && self.regular_at(1, opcodes::DUP2)
                    && self.regular_at(2, opcodes::ADD) =>
            {
                Some((FusedOp::Swap1Dup2Add, 3))
            }
            opcodes::MLOAD
                if self.enabled(FusionSet::MLOAD_SWAP1_DUP2)
                    && self.regular_at(1, opcodes::SWAP1)
                    && self.regular_at(2, opcodes::DUP2) =>
            {
                Some((FusedOp::MloadSwap1Dup2, 3))
            }
            opcodes::CALLVALUE
                if self.enabled(FusionSet::CALLVALUE_CHECK)
                    && self.regular_at(1, opcodes::DUP1)
                    && self.regular_at(2, opcodes::ISZERO) =>
            {
                Some((FusedOp::CallvalueCheck, 3))
            }
            opcodes::POP if self.enabled(FusionSet::MULTI_POP) => self.match_multi_pop(),
            _ => None,
        }
    }

    /// A run of two or more POPs; the window refills so the run may exceed
    /// the rule lookahead.
    fn match_multi_pop(&mut self) -> Option<(FusedOp, usize)> {
        let mut count = 0usize;
        loop {
            if count == self.window.len() {
                self.fill(count.saturating_add(1));
            }
            if self.regular_at(count, opcodes::POP) {
                count = count.saturating_add(1);
            } else {
                break;
            }
        }
        (count >= 2).then(|| {
            (
                FusedOp::MultiPop {
                    count: u64::try_from(count).unwrap_or(u64::MAX),
                },
                count,
            )
        })
    }

    fn enabled(&self, rule: FusionSet) -> bool {
        self.fusions.contains(rule)
    }

    fn regular_at(&self, slot: usize, byte: u8) -> bool {
        matches!(
            self.window.get(slot).map(|ev| &ev.kind),
            Some(EventKind::Regular(op)) if op.get() == byte
        )
    }

    fn push0_at(&self, slot: usize) -> bool {
        matches!(
            self.window.get(slot).map(|ev| &ev.kind),
            Some(EventKind::Push { size: 0, .. })
        )
    }

    /// Value of a PUSH1..PUSH32 at `slot`.
    fn push_value_at(&self, slot: usize) -> Option<Word> {
        match self.window.get(slot).map(|ev| &ev.kind) {
            Some(EventKind::Push { size, value }) if *size > 0 => Some(*value),
            _ => None,
        }
    }

    /// Value of a PUSH1..PUSH8 at `slot`, guaranteed to fit 64 bits.
    fn short_push_at(&self, slot: usize) -> Option<u64> {
        match self.window.get(slot).map(|ev| &ev.kind) {
            Some(EventKind::Push { size, value }) if *size > 0 && *size <= SHORT_PUSH_MAX => {
                Some(value.low_u64())
            }
            _ => None,
        }
    }

    /// A PUSH4 selector at `slot`.
    fn selector_at(&self, slot: usize) -> Option<u32> {
        match self.window.get(slot).map(|ev| &ev.kind) {
            Some(EventKind::Push { size: 4, value }) => u32::try_from(value.low_u64()).ok(),
            _ => None,
        }
    }

    /// A pushed jump target at `slot` that fits the program-counter type;
    /// wider targets are left unfused so the PUSH+JUMPI path can degrade
    /// them deterministically.
    fn pc_sized_push_at(&self, slot: usize) -> Option<Word> {
        let value = self.push_value_at(slot)?;
        (value <= Word::from(u32::MAX)).then_some(value)
    }
}

impl Iterator for PatternRecognizer<'_> {
    type Item = FusedInstruction;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance()
    }
}

/// Source bytes an instruction covers, immediate included.
pub(crate) fn event_byte_len(ev: &InstructionEvent) -> usize {
    match &ev.kind {
        EventKind::Push { size, .. } => usize::from(*size).saturating_add(1),
        _ => 1,
    }
}

impl FusedOp {
    /// Opcode bytes of the source window, used for gas and stack-effect
    /// accounting. `Repeat` covers the variable-length fusions.
    pub(crate) fn constituents(&self) -> Constituents {
        match self {
            FusedOp::Plain(kind) => Constituents::Single(kind.opcode_byte()),
            FusedOp::PushOp { kind, .. } => Constituents::Fixed(match kind {
                PushFuseKind::Add => &[opcodes::PUSH1, opcodes::ADD],
                PushFuseKind::Mul => &[opcodes::PUSH1, opcodes::MUL],
                PushFuseKind::Sub => &[opcodes::PUSH1, opcodes::SUB],
                PushFuseKind::Div => &[opcodes::PUSH1, opcodes::DIV],
                PushFuseKind::And => &[opcodes::PUSH1, opcodes::AND],
                PushFuseKind::Or => &[opcodes::PUSH1, opcodes::OR],
                PushFuseKind::Xor => &[opcodes::PUSH1, opcodes::XOR],
                PushFuseKind::Mload => &[opcodes::PUSH1, opcodes::MLOAD],
                PushFuseKind::Mstore => &[opcodes::PUSH1, opcodes::MSTORE],
                PushFuseKind::Mstore8 => &[opcodes::PUSH1, opcodes::MSTORE8],
            }),
            FusedOp::PushJump { .. } => Constituents::Fixed(&[opcodes::PUSH1, opcodes::JUMP]),
            FusedOp::PushJumpi { .. } => Constituents::Fixed(&[opcodes::PUSH1, opcodes::JUMPI]),
            FusedOp::IszeroJumpi { .. } => {
                Constituents::Fixed(&[opcodes::ISZERO, opcodes::PUSH1, opcodes::JUMPI])
            }
            FusedOp::MultiPush { count, .. } => {
                Constituents::Repeat(opcodes::PUSH1, u64::from(*count))
            }
            FusedOp::MultiPop { count } => Constituents::Repeat(opcodes::POP, *count),
            FusedOp::Dup2MstorePush { .. } => {
                Constituents::Fixed(&[opcodes::DUP2, opcodes::MSTORE, opcodes::PUSH1])
            }
            FusedOp::Dup3AddMstore => {
                Constituents::Fixed(&[opcodes::DUP3, opcodes::ADD, opcodes::MSTORE])
            }
            FusedOp::Swap1Dup2Add => {
                Constituents::Fixed(&[opcodes::SWAP1, opcodes::DUP2, opcodes::ADD])
            }
            FusedOp::PushDup3Add { .. } => {
                Constituents::Fixed(&[opcodes::PUSH1, opcodes::DUP3, opcodes::ADD])
            }
            FusedOp::PushAddDup1 { .. } => {
                Constituents::Fixed(&[opcodes::PUSH1, opcodes::ADD, opcodes::DUP1])
            }
            FusedOp::MloadSwap1Dup2 => {
                Constituents::Fixed(&[opcodes::MLOAD, opcodes::SWAP1, opcodes::DUP2])
            }
            FusedOp::FunctionDispatch { .. } => Constituents::Fixed(&[
                opcodes::DUP1,
                opcodes::PUSH4,
                opcodes::EQ,
                opcodes::PUSH2,
                opcodes::JUMPI,
            ]),
            FusedOp::CallvalueCheck => {
                Constituents::Fixed(&[opcodes::CALLVALUE, opcodes::DUP1, opcodes::ISZERO])
            }
            FusedOp::Push0Revert => {
                Constituents::Fixed(&[opcodes::PUSH0, opcodes::PUSH0, opcodes::REVERT])
            }
        }
    }

    /// Whether this instruction ends a basic block.
    pub(crate) fn terminates_block(&self) -> bool {
        match self.constituents() {
            Constituents::Single(byte) | Constituents::Repeat(byte, _) => {
                opcodes::is_block_terminator(byte)
            }
            Constituents::Fixed(bytes) => bytes
                .last()
                .is_some_and(|byte| opcodes::is_block_terminator(*byte)),
        }
    }
}

/// Source-opcode shape of a fused instruction.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Constituents {
    Single(u8),
    Fixed(&'static [u8]),
    Repeat(u8, u64),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fused(code: &[u8]) -> Vec<FusedOp> {
        PatternRecognizer::new(code, FusionSet::ALL)
            .map(|i| i.op)
            .collect()
    }

    #[test]
    fn push_add_fuses() {
        // PUSH1 0x05 ADD STOP
        let ops = fused(&[0x60, 0x05, 0x01, 0x00]);
        assert_eq!(
            ops,
            vec![
                FusedOp::PushOp {
                    kind: PushFuseKind::Add,
                    value: Word::from(5)
                },
                FusedOp::Plain(EventKind::Stop),
            ]
        );
    }

    #[test]
    fn fusion_does_not_cross_jumpdest() {
        // PUSH1 0x05 JUMPDEST ADD: the push window would have to swallow
        // the JUMPDEST, so nothing fuses.
        let ops = fused(&[0x60, 0x05, 0x5b, 0x01]);
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], FusedOp::Plain(EventKind::Push { .. })));
        assert!(matches!(ops[1], FusedOp::Plain(EventKind::JumpDest)));
    }

    #[test]
    fn fusion_does_not_cross_end_of_code() {
        // A trailing PUSH with no successor stays plain.
        let ops = fused(&[0x60, 0x05]);
        assert_eq!(ops, vec![FusedOp::Plain(EventKind::Push {
            size: 1,
            value: Word::from(5)
        })]);
    }

    #[test]
    fn three_pushes_become_multi_push() {
        // PUSH1 1 PUSH1 2 PUSH1 3
        let ops = fused(&[0x60, 0x01, 0x60, 0x02, 0x60, 0x03]);
        assert_eq!(
            ops,
            vec![FusedOp::MultiPush {
                values: [1, 2, 3],
                count: 3
            }]
        );
    }

    #[test]
    fn two_pushes_before_add_become_multi_push_2() {
        // Greedy matching takes the two pushes first; ADD stays plain.
        let ops = fused(&[0x60, 0x01, 0x60, 0x02, 0x01]);
        assert_eq!(ops.len(), 2);
        assert_eq!(
            ops[0],
            FusedOp::MultiPush {
                values: [1, 2, 0],
                count: 2
            }
        );
    }

    #[test]
    fn wide_push_is_not_multi_push() {
        // PUSH9 cannot carry its value inline.
        let code = [
            0x68, 1, 2, 3, 4, 5, 6, 7, 8, 9, // PUSH9
            0x60, 0x01, // PUSH1
        ];
        let ops = fused(&code);
        assert!(matches!(ops[0], FusedOp::Plain(EventKind::Push { size: 9, .. })));
    }

    #[test]
    fn static_jump_fusions() {
        // PUSH1 0x04 JUMP JUMPDEST STOP
        let ops = fused(&[0x60, 0x04, 0x56, 0x5b, 0x00]);
        assert_eq!(ops[0], FusedOp::PushJump {
            target: Word::from(4)
        });
        // ISZERO PUSH1 0x07 JUMPI
        let ops = fused(&[0x15, 0x60, 0x07, 0x57]);
        assert_eq!(ops, vec![FusedOp::IszeroJumpi {
            target: Word::from(7)
        }]);
    }

    #[test]
    fn function_dispatch_arm() {
        // DUP1 PUSH4 0xaabbccdd EQ PUSH2 0x0010 JUMPI
        let code = [0x80, 0x63, 0xaa, 0xbb, 0xcc, 0xdd, 0x14, 0x61, 0x00, 0x10, 0x57];
        let ops = fused(&code);
        assert_eq!(
            ops,
            vec![FusedOp::FunctionDispatch {
                selector: 0xaabb_ccdd,
                target: Word::from(0x10)
            }]
        );
    }

    #[test]
    fn callvalue_prologue_splits_cleanly() {
        // CALLVALUE DUP1 ISZERO PUSH1 0x08 JUMPI
        let ops = fused(&[0x34, 0x80, 0x15, 0x60, 0x08, 0x57]);
        assert_eq!(ops, vec![
            FusedOp::CallvalueCheck,
            FusedOp::PushJumpi {
                target: Word::from(8)
            }
        ]);
    }

    #[test]
    fn pop_runs_collapse() {
        let ops = fused(&[0x50, 0x50, 0x50, 0x50, 0x01]);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], FusedOp::MultiPop { count: 4 });
    }

    #[test]
    fn single_pop_stays_plain() {
        let ops = fused(&[0x50, 0x01]);
        assert!(matches!(ops[0], FusedOp::Plain(EventKind::Regular(_))));
    }

    #[test]
    fn push0_revert_epilogue() {
        let ops = fused(&[0x5f, 0x5f, 0xfd]);
        assert_eq!(ops, vec![FusedOp::Push0Revert]);
    }

    #[test]
    fn pc_opcode_is_never_fused() {
        // PC ADD: PC must keep its own slot so its offset survives.
        let ops = fused(&[0x58, 0x01]);
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let set = FusionSet::ALL.without(FusionSet::PUSH_ADD);
        let ops: Vec<FusedOp> = PatternRecognizer::new(&[0x60, 0x05, 0x01], set)
            .map(|i| i.op)
            .collect();
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn byte_lengths_cover_immediates() {
        // PUSH2 0x0102 ADD fuses into one 4-byte instruction.
        let mut rec = PatternRecognizer::new(&[0x61, 0x01, 0x02, 0x01], FusionSet::ALL);
        let ins = rec.advance().unwrap();
        assert_eq!(ins.pc, 0);
        assert_eq!(ins.byte_len, 4);
        assert!(rec.advance().is_none());
    }
}
