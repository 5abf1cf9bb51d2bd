//! Handler-table interface and the trampoline driver.
//!
//! The core does not execute opcodes; it hands each schedule position to
//! an externally-owned handler. A handler receives the mutable execution
//! frame and a cursor at its own dispatch item, consumes its metadata
//! slots and advances the cursor by exactly `1 + arity` items (or
//! repositions it, for jumps). Under guaranteed tail calls handlers chain
//! directly; [`run`] is the portable trampoline for targets without them.

use strum::EnumCount;

use crate::schedule::{Cursor, Schedule};
use crate::synthetic::{OpTag, SyntheticOp};

/// What a handler tells the trampoline after executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The cursor was advanced (or repositioned); keep dispatching.
    Continue,
    /// Execution halted; the frame holds the result.
    Halt,
}

/// One opcode handler over frame type `F` with error type `E`.
pub type HandlerFn<F, E> = fn(&mut F, &mut Cursor<'_>) -> Result<DispatchOutcome, E>;

/// Process-wide immutable table of handlers: one per regular opcode byte
/// plus one per synthetic opcode. The schedule borrows handler references
/// from here by tag.
pub struct HandlerTable<F, E> {
    regular: [HandlerFn<F, E>; 256],
    synthetic: [HandlerFn<F, E>; SyntheticOp::COUNT],
}

impl<F, E> HandlerTable<F, E> {
    /// Table with every entry set to `default` (typically an
    /// invalid-opcode handler).
    pub fn new(default: HandlerFn<F, E>) -> Self {
        Self {
            regular: [default; 256],
            synthetic: [default; SyntheticOp::COUNT],
        }
    }

    /// Install the handler for a regular opcode byte.
    pub fn set(&mut self, opcode: u8, handler: HandlerFn<F, E>) {
        if let Some(slot) = self.regular.get_mut(usize::from(opcode)) {
            *slot = handler;
        }
    }

    /// Install the handler for a synthetic opcode.
    pub fn set_synthetic(&mut self, op: SyntheticOp, handler: HandlerFn<F, E>) {
        let index = usize::from(OpTag::fused(op).raw().saturating_sub(256));
        if let Some(slot) = self.synthetic.get_mut(index) {
            *slot = handler;
        }
    }

    /// Handler for a unified tag. Metadata slots never reach this point;
    /// tags always come from handler positions.
    pub fn get(&self, tag: OpTag) -> Option<HandlerFn<F, E>> {
        match tag.byte() {
            Some(byte) => self.regular.get(usize::from(byte)).copied(),
            None => {
                let index = usize::from(tag.raw().saturating_sub(256));
                self.synthetic.get(index).copied()
            }
        }
    }
}

/// Drive a frame through a schedule by repeated handler calls: the
/// best-effort realization of the dispatch chain for targets without
/// guaranteed tail calls. Returns when a handler halts or the cursor
/// leaves the schedule (which conforming handlers never let happen: the
/// sentinel STOPs halt first).
pub fn run<F, E>(
    frame: &mut F,
    schedule: &Schedule,
    table: &HandlerTable<F, E>,
) -> Result<(), E> {
    let mut cursor = schedule.entry_cursor();
    // The optional `first_block_gas` slot has no preceding handler; its
    // charge is the caller's concern via `Schedule::entry_block_meta`.
    if schedule.has_entry_meta() {
        cursor.jump_to(1);
    }
    while let Some(tag) = cursor.tag() {
        let Some(handler) = table.get(tag) else {
            return Ok(());
        };
        match handler(frame, &mut cursor)? {
            DispatchOutcome::Continue => {}
            DispatchOutcome::Halt => return Ok(()),
        }
    }
    Ok(())
}
