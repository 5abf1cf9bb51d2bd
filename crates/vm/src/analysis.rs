//! Basic-block gas and stack-bound analysis.
//!
//! A block is walked once, at the granularity of the fused instruction
//! stream, accumulating the static gas of every source opcode and the
//! running stack effect. The block's terminator (jump, halt, fault) is not
//! part of the block: its gas and stack traffic belong to its own handler.
//! The walk decomposes fused instructions back into their source opcodes,
//! so fusion never changes what a block charges or requires.

use crate::bytecode::{Constituents, EventKind, FusedOp, PatternRecognizer};
use crate::config::FusionSet;
use crate::opcodes::opcode_info;

/// Result of analyzing one basic block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockInfo {
    /// Saturating sum of static gas costs up to, not including, the
    /// block terminator.
    pub gas: u64,
    /// Stack depth the block requires on entry to not underflow.
    pub min_stack: u16,
    /// Peak stack growth over the entry depth; entry depth plus this must
    /// stay within the stack capacity.
    pub max_stack: u16,
}

impl BlockInfo {
    /// Whether the block charges nothing and has no stack requirement, in
    /// which case its metadata slot can be omitted at the schedule entry.
    pub fn is_trivial(&self) -> bool {
        self.gas == 0 && self.min_stack == 0 && self.max_stack == 0
    }
}

#[derive(Default)]
struct Accumulator {
    gas: u64,
    depth: i64,
    required: i64,
    peak: i64,
}

impl Accumulator {
    fn apply(&mut self, byte: u8) {
        let info = opcode_info(byte);
        self.gas = self.gas.saturating_add(u64::from(info.gas));
        let inputs = i64::from(info.inputs);
        let outputs = i64::from(info.outputs);
        self.required = self.required.max(inputs.saturating_sub(self.depth));
        self.depth = self
            .depth
            .saturating_add(outputs.saturating_sub(inputs));
        self.peak = self.peak.max(self.depth);
    }

    fn finish(self) -> BlockInfo {
        BlockInfo {
            gas: self.gas,
            min_stack: u16::try_from(self.required.max(0)).unwrap_or(u16::MAX),
            max_stack: u16::try_from(self.peak.max(0)).unwrap_or(u16::MAX),
        }
    }
}

/// Analyze the basic block starting at `start_pc`, which must be an
/// instruction boundary. The walk stops at the block terminator, at the
/// next JUMPDEST, or at end-of-bytecode. A JUMPDEST beginning the block is
/// the caller's concern: pass the offset after it and fold its gas in.
pub fn analyze_block(code: &[u8], start_pc: usize, fusions: FusionSet) -> BlockInfo {
    let mut stream = PatternRecognizer::from_offset(code, start_pc, fusions);
    let mut acc = Accumulator::default();

    while let Some(ins) = stream.advance() {
        if matches!(ins.op, FusedOp::Plain(EventKind::JumpDest)) {
            break;
        }
        let terminates = ins.op.terminates_block();
        match ins.op.constituents() {
            Constituents::Single(byte) => {
                if !terminates {
                    acc.apply(byte);
                }
            }
            Constituents::Fixed(bytes) => {
                // A terminator can only be the final source opcode; the
                // prefix still belongs to the block.
                let take = if terminates {
                    bytes.len().saturating_sub(1)
                } else {
                    bytes.len()
                };
                for byte in bytes.iter().take(take) {
                    acc.apply(*byte);
                }
            }
            Constituents::Repeat(byte, n) => {
                for _ in 0..n {
                    acc.apply(byte);
                }
            }
        }
        if terminates {
            break;
        }
    }

    acc.finish()
}
