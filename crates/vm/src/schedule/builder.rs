//! Single-pass schedule construction.
//!
//! The builder drains the fused instruction stream, appending handler and
//! metadata items in bytecode order while collecting JUMPDEST positions
//! and unresolved static jumps on the side. When the stream ends it
//! appends the two sentinel STOPs and resolves every pending jump against
//! the JUMPDEST list in one pass. The item buffer is reserved up front for
//! the worst case, so construction never reallocates.

use bytes::Bytes;
use tracing::debug;

use crate::Pc;
use crate::analysis::analyze_block;
use crate::bytecode::{EventKind, FusedInstruction, FusedOp, PatternRecognizer, PushFuseKind};
use crate::config::{FusionSet, ScheduleConfig};
use crate::constant_pool::ConstantPool;
use crate::constants::{FIXED_ITEM_OVERHEAD, MAX_ITEMS_PER_BYTE, SENTINEL_STOPS};
use crate::errors::{InternalError, ScheduleError};
use crate::opcodes::{self, opcode_info};
use crate::schedule::jump_table::{JumpTable, JumpTableEntry};
use crate::schedule::{Schedule, ScheduleItem};
use crate::synthetic::{OpTag, SyntheticOp};
use crate::tracer::BuildTracer;
use crate::Word;

/// A `jump_static` slot awaiting its destination.
struct PendingJump {
    /// Index of the placeholder metadata item.
    slot: usize,
    /// Offset of the fused jump, for diagnostics.
    from_pc: u64,
    target: Pc,
}

pub(crate) fn build<T: BuildTracer>(
    code: Bytes,
    config: &ScheduleConfig,
    tracer: &mut T,
) -> Result<Schedule, ScheduleError> {
    tracer.schedule_build_start(code.len());
    debug!(code_len = code.len(), "building dispatch schedule");

    let capacity = code
        .len()
        .checked_mul(MAX_ITEMS_PER_BYTE)
        .and_then(|n| n.checked_add(FIXED_ITEM_OVERHEAD))
        .ok_or(ScheduleError::OutOfMemory {
            requested: usize::MAX,
        })?;
    let mut items = Vec::new();
    items
        .try_reserve_exact(capacity)
        .map_err(|_| ScheduleError::OutOfMemory {
            requested: capacity,
        })?;

    let mut state = Builder {
        items,
        pool: ConstantPool::new(),
        jumpdests: Vec::new(),
        pending: Vec::new(),
        code: code.clone(),
        fusions: config.fusions,
    };

    // Entry block bounds, emitted only when the block does anything (the
    // single permitted item without a preceding handler).
    let entry = analyze_block(&state.code, 0, state.fusions);
    let has_entry_meta = !entry.is_trivial();
    if has_entry_meta {
        state.push_item(ScheduleItem::block_meta(entry.into()));
    }

    let mut stream = PatternRecognizer::new(&code, config.fusions);
    while let Some(ins) = stream.advance() {
        if stream.raw_steps() > config.loop_quota {
            return Err(ScheduleError::QuotaExceeded {
                limit: config.loop_quota,
            });
        }
        state.emit(ins, tracer)?;
    }

    // Fall-through always lands on a STOP, even when the bytecode ends
    // without one (S2).
    for _ in 0..SENTINEL_STOPS {
        state.push_item(ScheduleItem::handler(OpTag::regular(opcodes::STOP)));
    }

    state.resolve_jumps(tracer)?;

    let Builder {
        items,
        pool,
        jumpdests,
        ..
    } = state;
    let jump_table = JumpTable::from_sorted(jumpdests);
    tracer.jump_table_created(jump_table.len());
    debug!(
        items = items.len(),
        constants = pool.len(),
        jumpdests = jump_table.len(),
        "dispatch schedule ready"
    );

    Ok(Schedule {
        items: items.into_boxed_slice(),
        pool,
        jump_table,
        code,
        config: config.clone(),
        has_entry_meta,
    })
}

struct Builder {
    items: Vec<ScheduleItem>,
    pool: ConstantPool,
    jumpdests: Vec<JumpTableEntry>,
    pending: Vec<PendingJump>,
    code: Bytes,
    fusions: FusionSet,
}

impl Builder {
    /// Append one item. Capacity was reserved for the worst case, so this
    /// never reallocates.
    fn push_item(&mut self, item: ScheduleItem) {
        debug_assert!(self.items.len() < self.items.capacity());
        self.items.push(item);
    }

    fn emit<T: BuildTracer>(
        &mut self,
        ins: FusedInstruction,
        tracer: &mut T,
    ) -> Result<(), ScheduleError> {
        let pc = ins.pc;
        if let Some(kind) = fused_kind(&ins.op) {
            tracer.fusion_detected(pc_u64(pc), kind, ins.byte_len);
        }

        match ins.op {
            FusedOp::Plain(kind) => self.emit_plain(pc, kind),
            FusedOp::PushOp { kind, value } => {
                let (inline_op, pointer_op) = push_fusion_tags(kind);
                self.emit_value_synthetic(inline_op, pointer_op, &value)
            }
            FusedOp::PushJump { target } => {
                self.emit_static_jump(SyntheticOp::PushJump, &target, pc, tracer)
            }
            FusedOp::PushJumpi { target } => {
                self.emit_static_jump(SyntheticOp::PushJumpi, &target, pc, tracer)
            }
            FusedOp::IszeroJumpi { target } => {
                self.emit_static_jump(SyntheticOp::IszeroJumpi, &target, pc, tracer)
            }
            FusedOp::MultiPush { values, count } => {
                let op = if count == 3 {
                    SyntheticOp::MultiPush3
                } else {
                    SyntheticOp::MultiPush2
                };
                self.push_item(ScheduleItem::handler(OpTag::fused(op)));
                for value in values.iter().take(usize::from(count)) {
                    self.push_item(ScheduleItem::push_inline(*value));
                }
                Ok(())
            }
            FusedOp::MultiPop { count } => {
                self.push_item(ScheduleItem::handler(OpTag::fused(SyntheticOp::MultiPop)));
                self.push_item(ScheduleItem::push_inline(count));
                Ok(())
            }
            FusedOp::Dup2MstorePush { value } => self.emit_value_synthetic(
                SyntheticOp::Dup2MstorePushInline,
                SyntheticOp::Dup2MstorePushPointer,
                &value,
            ),
            FusedOp::PushDup3Add { value } => self.emit_value_synthetic(
                SyntheticOp::PushDup3AddInline,
                SyntheticOp::PushDup3AddPointer,
                &value,
            ),
            FusedOp::PushAddDup1 { value } => self.emit_value_synthetic(
                SyntheticOp::PushAddDup1Inline,
                SyntheticOp::PushAddDup1Pointer,
                &value,
            ),
            FusedOp::Dup3AddMstore => self.emit_bare(SyntheticOp::Dup3AddMstore),
            FusedOp::Swap1Dup2Add => self.emit_bare(SyntheticOp::Swap1Dup2Add),
            FusedOp::MloadSwap1Dup2 => self.emit_bare(SyntheticOp::MloadSwap1Dup2),
            FusedOp::CallvalueCheck => self.emit_bare(SyntheticOp::CallvalueCheck),
            FusedOp::Push0Revert => self.emit_bare(SyntheticOp::Push0Revert),
            FusedOp::FunctionDispatch { selector, target } => {
                self.push_item(ScheduleItem::handler(OpTag::fused(
                    SyntheticOp::FunctionDispatch,
                )));
                self.push_item(ScheduleItem::push_inline(u64::from(selector)));
                self.push_pending_jump(&target, pc)
            }
        }
    }

    fn emit_plain(&mut self, pc: usize, kind: EventKind) -> Result<(), ScheduleError> {
        match kind {
            EventKind::Regular(op) if op.get() == opcodes::PC => {
                // The PC opcode observes its original byte offset; the
                // offset rides in the metadata slot.
                self.push_item(ScheduleItem::handler(OpTag::regular(opcodes::PC)));
                let pc = Pc::try_from(pc).map_err(|_| InternalError::NarrowingOverflow)?;
                self.push_item(ScheduleItem::pc_value(pc));
                Ok(())
            }
            EventKind::Regular(op) => {
                self.push_item(ScheduleItem::handler(OpTag::regular(op.get())));
                Ok(())
            }
            EventKind::Push { size, value } => {
                let byte = opcodes::PUSH0.saturating_add(size);
                self.push_item(ScheduleItem::handler(OpTag::regular(byte)));
                if size <= 8 {
                    // The immediate of a short push always fits inline.
                    self.push_item(ScheduleItem::push_inline(value.low_u64()));
                } else {
                    let reference = self.pool.intern(value)?;
                    self.push_item(ScheduleItem::push_pointer(reference));
                }
                Ok(())
            }
            EventKind::JumpDest => self.emit_jumpdest(pc),
            EventKind::Stop => {
                self.push_item(ScheduleItem::handler(OpTag::regular(opcodes::STOP)));
                Ok(())
            }
            EventKind::Invalid { .. } => {
                // Undefined bytes share the INVALID handler; execution
                // faults deterministically if the position is reached.
                self.push_item(ScheduleItem::handler(OpTag::regular(opcodes::INVALID)));
                Ok(())
            }
        }
    }

    fn emit_jumpdest(&mut self, pc: usize) -> Result<(), ScheduleError> {
        let position = u32::try_from(self.items.len())
            .map_err(|_| InternalError::NarrowingOverflow)?;
        let pc_value = Pc::try_from(pc).map_err(|_| InternalError::NarrowingOverflow)?;
        self.jumpdests
            .try_reserve(1)
            .map_err(|_| ScheduleError::OutOfMemory { requested: 1 })?;
        self.jumpdests.push(JumpTableEntry {
            pc: pc_value,
            position,
        });

        self.push_item(ScheduleItem::handler(OpTag::regular(opcodes::JUMPDEST)));
        // Block bounds cover the JUMPDEST itself plus everything up to the
        // terminator; the analyzer walks from the following instruction.
        let mut info = analyze_block(&self.code, pc.saturating_add(1), self.fusions);
        info.gas = info
            .gas
            .saturating_add(u64::from(opcode_info(opcodes::JUMPDEST).gas));
        self.push_item(ScheduleItem::block_meta(info.into()));
        Ok(())
    }

    fn emit_bare(&mut self, op: SyntheticOp) -> Result<(), ScheduleError> {
        self.push_item(ScheduleItem::handler(OpTag::fused(op)));
        Ok(())
    }

    /// Handler plus one value slot, inline when the operand fits 64 bits,
    /// interned otherwise. The synthetic variant encodes which.
    fn emit_value_synthetic(
        &mut self,
        inline_op: SyntheticOp,
        pointer_op: SyntheticOp,
        value: &Word,
    ) -> Result<(), ScheduleError> {
        if fits_inline(value) {
            self.push_item(ScheduleItem::handler(OpTag::fused(inline_op)));
            self.push_item(ScheduleItem::push_inline(value.low_u64()));
        } else {
            let reference = self.pool.intern(*value)?;
            self.push_item(ScheduleItem::handler(OpTag::fused(pointer_op)));
            self.push_item(ScheduleItem::push_pointer(reference));
        }
        Ok(())
    }

    /// Statically-resolvable jump: a placeholder slot is emitted now and
    /// overwritten during resolution. Targets outside the addressable pc
    /// range degrade to an INVALID handler instead (the jump would fault
    /// on every execution).
    fn emit_static_jump<T: BuildTracer>(
        &mut self,
        op: SyntheticOp,
        target: &Word,
        from_pc: usize,
        tracer: &mut T,
    ) -> Result<(), ScheduleError> {
        if pc_from_word(target).is_some() {
            self.push_item(ScheduleItem::handler(OpTag::fused(op)));
            self.push_pending_jump(target, from_pc)
        } else {
            tracer.invalid_static_jump(pc_u64(from_pc), saturated_u64(target));
            self.push_item(ScheduleItem::handler(OpTag::regular(opcodes::INVALID)));
            Ok(())
        }
    }

    fn push_pending_jump(&mut self, target: &Word, from_pc: usize) -> Result<(), ScheduleError> {
        let target = pc_from_word(target).ok_or(InternalError::NarrowingOverflow)?;
        let slot = self.items.len();
        self.pending
            .try_reserve(1)
            .map_err(|_| ScheduleError::OutOfMemory { requested: 1 })?;
        self.pending.push(PendingJump {
            slot,
            from_pc: pc_u64(from_pc),
            target,
        });
        self.push_item(ScheduleItem::unresolved_jump());
        Ok(())
    }

    /// One-shot resolution: locate every pending target in the (pc-sorted)
    /// JUMPDEST list and overwrite its placeholder with the destination's
    /// schedule position.
    fn resolve_jumps<T: BuildTracer>(&mut self, tracer: &mut T) -> Result<(), ScheduleError> {
        self.jumpdests.sort_unstable_by_key(|entry| entry.pc);
        for jump in &self.pending {
            match self
                .jumpdests
                .binary_search_by_key(&jump.target, |entry| entry.pc)
            {
                Ok(found) => {
                    let position = self
                        .jumpdests
                        .get(found)
                        .map(|entry| usize::try_from(entry.position).unwrap_or(usize::MAX))
                        .ok_or(InternalError::SlotOutOfBounds)?;
                    let slot = self
                        .items
                        .get_mut(jump.slot)
                        .ok_or(InternalError::SlotOutOfBounds)?;
                    *slot = ScheduleItem::jump_target(position);
                    tracer.static_jump_resolved(jump.from_pc, u64::from(jump.target));
                }
                Err(_) => {
                    tracer.invalid_static_jump(jump.from_pc, u64::from(jump.target));
                    return Err(ScheduleError::InvalidStaticJump {
                        from_pc: jump.from_pc,
                        target_pc: u64::from(jump.target),
                    });
                }
            }
        }
        Ok(())
    }
}

fn push_fusion_tags(kind: PushFuseKind) -> (SyntheticOp, SyntheticOp) {
    match kind {
        PushFuseKind::Add => (SyntheticOp::PushAddInline, SyntheticOp::PushAddPointer),
        PushFuseKind::Mul => (SyntheticOp::PushMulInline, SyntheticOp::PushMulPointer),
        PushFuseKind::Sub => (SyntheticOp::PushSubInline, SyntheticOp::PushSubPointer),
        PushFuseKind::Div => (SyntheticOp::PushDivInline, SyntheticOp::PushDivPointer),
        PushFuseKind::And => (SyntheticOp::PushAndInline, SyntheticOp::PushAndPointer),
        PushFuseKind::Or => (SyntheticOp::PushOrInline, SyntheticOp::PushOrPointer),
        PushFuseKind::Xor => (SyntheticOp::PushXorInline, SyntheticOp::PushXorPointer),
        PushFuseKind::Mload => (SyntheticOp::PushMloadInline, SyntheticOp::PushMloadPointer),
        PushFuseKind::Mstore => (SyntheticOp::PushMstoreInline, SyntheticOp::PushMstorePointer),
        PushFuseKind::Mstore8 => (
            SyntheticOp::PushMstore8Inline,
            SyntheticOp::PushMstore8Pointer,
        ),
    }
}

/// Synthetic op a fused instruction is emitted (and reported) as, `None`
/// for plain pass-throughs.
pub(crate) fn fused_kind(op: &FusedOp) -> Option<SyntheticOp> {
    Some(match op {
        FusedOp::Plain(_) => return None,
        FusedOp::PushOp { kind, value } => {
            let (inline_op, pointer_op) = push_fusion_tags(*kind);
            if fits_inline(value) { inline_op } else { pointer_op }
        }
        FusedOp::PushJump { .. } => SyntheticOp::PushJump,
        FusedOp::PushJumpi { .. } => SyntheticOp::PushJumpi,
        FusedOp::IszeroJumpi { .. } => SyntheticOp::IszeroJumpi,
        FusedOp::MultiPush { count: 3, .. } => SyntheticOp::MultiPush3,
        FusedOp::MultiPush { .. } => SyntheticOp::MultiPush2,
        FusedOp::MultiPop { .. } => SyntheticOp::MultiPop,
        FusedOp::Dup2MstorePush { value } => {
            if fits_inline(value) {
                SyntheticOp::Dup2MstorePushInline
            } else {
                SyntheticOp::Dup2MstorePushPointer
            }
        }
        FusedOp::Dup3AddMstore => SyntheticOp::Dup3AddMstore,
        FusedOp::Swap1Dup2Add => SyntheticOp::Swap1Dup2Add,
        FusedOp::PushDup3Add { value } => {
            if fits_inline(value) {
                SyntheticOp::PushDup3AddInline
            } else {
                SyntheticOp::PushDup3AddPointer
            }
        }
        FusedOp::PushAddDup1 { value } => {
            if fits_inline(value) {
                SyntheticOp::PushAddDup1Inline
            } else {
                SyntheticOp::PushAddDup1Pointer
            }
        }
        FusedOp::MloadSwap1Dup2 => SyntheticOp::MloadSwap1Dup2,
        FusedOp::FunctionDispatch { .. } => SyntheticOp::FunctionDispatch,
        FusedOp::CallvalueCheck => SyntheticOp::CallvalueCheck,
        FusedOp::Push0Revert => SyntheticOp::Push0Revert,
    })
}

pub(crate) fn fits_inline(value: &Word) -> bool {
    *value <= Word::from(u64::MAX)
}

pub(crate) fn pc_from_word(value: &Word) -> Option<Pc> {
    if *value > Word::from(Pc::MAX) {
        None
    } else {
        Pc::try_from(value.low_u64()).ok()
    }
}

fn pc_u64(pc: usize) -> u64 {
    u64::try_from(pc).unwrap_or(u64::MAX)
}

fn saturated_u64(value: &Word) -> u64 {
    if *value > Word::from(u64::MAX) {
        u64::MAX
    } else {
        value.low_u64()
    }
}
