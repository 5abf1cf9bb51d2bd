//! Structural validation and the human-readable schedule listing.
//!
//! Both re-derive the positional item layout instead of trusting it: the
//! validator walks the finished item sequence against the per-opcode
//! arity rules, the listing re-runs the recognizer over the source
//! bytecode and pairs every instruction with its schedule index.

use core::fmt;

use serde::Serialize;

use crate::bytecode::{EventKind, FusedOp, PatternRecognizer};
use crate::errors::ValidationError;
use crate::opcodes::{self, opcode_name};
use crate::schedule::builder::{fused_kind, pc_from_word};
use crate::schedule::Schedule;
use crate::synthetic::{OpTag, SyntheticOp};

/// Re-walk a schedule and check the structural invariants: every handler
/// is followed by exactly its arity in metadata, the tail is two STOP
/// sentinels, static jumps land on JUMPDEST handlers, push pointers
/// reference live constants, and the jump table is a strictly-increasing
/// bijection onto the JUMPDEST handlers.
pub fn validate(schedule: &Schedule) -> Result<(), ValidationError> {
    let items = schedule.items();
    let len = items.len();
    let mut is_jumpdest = vec![false; len];
    let mut static_jumps: Vec<(usize, usize)> = Vec::new();

    let mut index = usize::from(schedule.has_entry_meta());
    while let Some(item) = items.get(index).copied() {
        let tag = item.as_tag().ok_or(ValidationError::UnknownTag {
            index,
            tag: u16::try_from(item.raw()).unwrap_or(u16::MAX),
        })?;

        let arity = tag.metadata_arity();
        let next = index.saturating_add(1).saturating_add(arity);
        if next > len {
            return Err(ValidationError::MissingMetadata {
                index,
                missing: next.saturating_sub(len),
            });
        }

        if tag.byte() == Some(opcodes::JUMPDEST) {
            if let Some(flag) = is_jumpdest.get_mut(index) {
                *flag = true;
            }
        }
        for slot in jump_slots(tag).iter().copied() {
            let target = items
                .get(index.saturating_add(1).saturating_add(slot))
                .map(|item| item.as_jump_target())
                .unwrap_or(usize::MAX);
            static_jumps.push((index, target));
        }
        if let Some(slot) = pointer_slot(tag) {
            let reference = items
                .get(index.saturating_add(1).saturating_add(slot))
                .map(|item| item.as_pointer());
            let live = reference.is_some_and(|r| schedule.constant(r).is_some());
            if !live {
                return Err(ValidationError::BadConstRef {
                    index,
                    reference: reference.map(|r| r.index()).unwrap_or(u32::MAX),
                    len: schedule.constants().len(),
                });
            }
        }

        index = next;
    }

    // Two sentinel STOP handlers close every schedule.
    let stop = OpTag::regular(opcodes::STOP);
    let tail_ok = len >= 2
        && items
            .get(len.saturating_sub(2)..)
            .is_some_and(|tail| tail.iter().all(|item| item.as_tag() == Some(stop)));
    if !tail_ok {
        return Err(ValidationError::MissingSentinel);
    }

    for (index, target) in static_jumps {
        let ok = is_jumpdest.get(target).copied().unwrap_or(false);
        if !ok {
            return Err(ValidationError::BadStaticJump { index, target });
        }
    }

    validate_jump_table(schedule, &is_jumpdest)
}

fn validate_jump_table(
    schedule: &Schedule,
    is_jumpdest: &[bool],
) -> Result<(), ValidationError> {
    let entries = schedule.jump_table().entries();
    for (entry_index, pair) in entries.windows(2).enumerate() {
        if let [a, b] = pair {
            if a.pc >= b.pc {
                return Err(ValidationError::JumpTableOrder {
                    entry: entry_index.saturating_add(1),
                });
            }
        }
    }
    let mut covered = vec![false; is_jumpdest.len()];
    for entry in entries {
        let position = usize::try_from(entry.position).unwrap_or(usize::MAX);
        if !is_jumpdest.get(position).copied().unwrap_or(false) {
            return Err(ValidationError::JumpTableTarget {
                pc: u64::from(entry.pc),
                position,
            });
        }
        if let Some(flag) = covered.get_mut(position) {
            *flag = true;
        }
    }
    // Every JUMPDEST handler must be reachable through the table; report
    // the first one the table does not cover.
    let unlisted = is_jumpdest
        .iter()
        .zip(covered.iter())
        .position(|(dest, seen)| *dest && !*seen);
    if let Some(index) = unlisted {
        return Err(ValidationError::UnlistedJumpDest { index });
    }
    Ok(())
}

/// Metadata-slot indices holding `jump_static` positions for a tag.
fn jump_slots(tag: OpTag) -> &'static [usize] {
    match tag.synthetic() {
        Some(SyntheticOp::PushJump | SyntheticOp::PushJumpi | SyntheticOp::IszeroJumpi) => &[0],
        Some(SyntheticOp::FunctionDispatch) => &[1],
        _ => &[],
    }
}

/// Metadata-slot index holding a `push_pointer`, if the tag mandates one.
fn pointer_slot(tag: OpTag) -> Option<usize> {
    if let Some(byte) = tag.byte() {
        return (byte > opcodes::PUSH8 && byte <= opcodes::PUSH32).then_some(0);
    }
    match tag.synthetic()? {
        SyntheticOp::PushAddPointer
        | SyntheticOp::PushMulPointer
        | SyntheticOp::PushSubPointer
        | SyntheticOp::PushDivPointer
        | SyntheticOp::PushAndPointer
        | SyntheticOp::PushOrPointer
        | SyntheticOp::PushXorPointer
        | SyntheticOp::PushMloadPointer
        | SyntheticOp::PushMstorePointer
        | SyntheticOp::PushMstore8Pointer
        | SyntheticOp::Dup2MstorePushPointer
        | SyntheticOp::PushDup3AddPointer
        | SyntheticOp::PushAddDup1Pointer => Some(0),
        _ => None,
    }
}

/// One line of the debug listing: a source instruction and where it
/// landed in the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingLine {
    /// Byte offset of the instruction in the original bytecode.
    pub pc: u64,
    /// Schedule index of the emitted handler.
    pub index: usize,
    /// Handler name (opcode or synthetic).
    pub name: &'static str,
    /// Items the emission occupies, handler included.
    pub items: usize,
    pub status: LineStatus,
}

/// Validation status of one listing line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LineStatus {
    Ok,
    /// A statically-unaddressable jump degraded to an INVALID handler.
    Replaced,
}

/// Human-readable pairing of bytecode offsets with schedule positions.
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub lines: Vec<ListingLine>,
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            let marker = match line.status {
                LineStatus::Ok => "",
                LineStatus::Replaced => "  !invalid-target",
            };
            writeln!(
                f,
                "{:#06x} -> {:4}  {}{}",
                line.pc, line.index, line.name, marker
            )?;
        }
        Ok(())
    }
}

impl Schedule {
    /// Produce the pc ↔ schedule-index listing for diagnostics and tests.
    /// The recognizer is re-run with the build configuration, so the
    /// listing always mirrors what the builder emitted.
    pub fn debug_listing(&self) -> Listing {
        let mut lines = Vec::new();
        let mut index = usize::from(self.has_entry_meta());
        let mut stream = PatternRecognizer::new(self.code(), self.config().fusions);
        while let Some(ins) = stream.advance() {
            let (name, items, status) = line_shape(&ins.op);
            lines.push(ListingLine {
                pc: u64::try_from(ins.pc).unwrap_or(u64::MAX),
                index,
                name,
                items,
                status,
            });
            index = index.saturating_add(items);
        }
        Listing { lines }
    }
}

/// Name, emitted item count and status for one fused instruction,
/// mirroring the builder's emission table.
fn line_shape(op: &FusedOp) -> (&'static str, usize, LineStatus) {
    if let Some(kind) = fused_kind(op) {
        let replaced = match op {
            FusedOp::PushJump { target } | FusedOp::PushJumpi { target } => {
                pc_from_word(target).is_none()
            }
            _ => false,
        };
        if replaced {
            return (opcode_name(opcodes::INVALID), 1, LineStatus::Replaced);
        }
        let tag = OpTag::fused(kind);
        return (tag.name(), tag.metadata_arity().saturating_add(1), LineStatus::Ok);
    }
    match op {
        FusedOp::Plain(EventKind::Invalid { .. }) => {
            (opcode_name(opcodes::INVALID), 1, LineStatus::Ok)
        }
        FusedOp::Plain(kind) => {
            let tag = OpTag::regular(kind.opcode_byte());
            (tag.name(), tag.metadata_arity().saturating_add(1), LineStatus::Ok)
        }
        // Unreachable: every fused op has a kind.
        _ => (opcode_name(opcodes::INVALID), 1, LineStatus::Ok),
    }
}
