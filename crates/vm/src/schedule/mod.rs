//! The dispatch schedule: construction, ownership and cursor access.

mod builder;
pub mod debug;
mod item;
mod jump_table;

pub use item::{BlockMeta, ScheduleItem};
pub use jump_table::{JumpTable, JumpTableEntry};

use bytes::Bytes;

use crate::Word;
use crate::config::{SafetyChecks, ScheduleConfig};
use crate::constant_pool::{ConstRef, ConstantPool};
use crate::errors::ScheduleError;
use crate::synthetic::OpTag;
use crate::tracer::{BuildTracer, NoopTracer};

/// An immutable, fully-resolved dispatch schedule.
///
/// Owns its item sequence, the constant pool and the jump table, so all
/// three share one lifetime and are destroyed as a unit. Once built the
/// schedule is never mutated and can be shared read-only across threads.
#[derive(Debug)]
pub struct Schedule {
    items: Box<[ScheduleItem]>,
    pool: ConstantPool,
    jump_table: JumpTable,
    code: Bytes,
    config: ScheduleConfig,
    has_entry_meta: bool,
}

impl Schedule {
    /// Preprocess `code` into a schedule without build tracing.
    pub fn build(code: Bytes, config: &ScheduleConfig) -> Result<Self, ScheduleError> {
        Self::build_traced(code, config, &mut NoopTracer)
    }

    /// Preprocess `code`, reporting build events to `tracer`.
    pub fn build_traced<T: BuildTracer>(
        code: Bytes,
        config: &ScheduleConfig,
        tracer: &mut T,
    ) -> Result<Self, ScheduleError> {
        let schedule = builder::build(code, config, tracer)?;
        if matches!(config.safety_checks, SafetyChecks::Full) {
            debug::validate(&schedule)
                .map_err(crate::errors::InternalError::Validation)
                .map_err(ScheduleError::Internal)?;
        }
        tracer.schedule_build_complete(schedule.items.len(), schedule.pool.len());
        Ok(schedule)
    }

    /// The dispatch item sequence.
    pub fn items(&self) -> &[ScheduleItem] {
        &self.items
    }

    /// Cursor positioned at item zero, ready for execution.
    pub fn entry_cursor(&self) -> Cursor<'_> {
        Cursor::new(&self.items, 0)
    }

    /// Jump table over this schedule's JUMPDESTs.
    pub fn jump_table(&self) -> &JumpTable {
        &self.jump_table
    }

    /// Value behind a `push_pointer` metadata slot.
    pub fn constant(&self, reference: ConstRef) -> Option<&Word> {
        self.pool.get(reference)
    }

    /// All interned constants in insertion order.
    pub fn constants(&self) -> &[Word] {
        self.pool.values()
    }

    /// The bytecode this schedule was built from.
    pub fn code(&self) -> &Bytes {
        &self.code
    }

    /// Configuration used for the build.
    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Whether item zero is the entry block's `first_block_gas` slot.
    pub fn has_entry_meta(&self) -> bool {
        self.has_entry_meta
    }

    /// Gas and stack bounds of the entry block, when it has any.
    pub fn entry_block_meta(&self) -> Option<BlockMeta> {
        self.has_entry_meta
            .then(|| self.items.first().map(|item| item.as_block_meta()))
            .flatten()
    }
}

/// Pointer into a schedule, identifying the current item.
///
/// Handlers read their metadata through [`Cursor::metadata`] and advance
/// past exactly the slots their opcode's arity mandates.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    items: &'a [ScheduleItem],
    index: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(items: &'a [ScheduleItem], index: usize) -> Self {
        Self { items, index }
    }

    /// Current schedule position.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The item under the cursor.
    pub fn item(&self) -> Option<ScheduleItem> {
        self.items.get(self.index).copied()
    }

    /// The item under the cursor read as a handler tag. Only meaningful
    /// when the cursor is at a handler position.
    pub fn tag(&self) -> Option<OpTag> {
        self.item()?.as_tag()
    }

    /// Metadata slot `slot` of the current handler (zero-based).
    pub fn metadata(&self, slot: usize) -> Option<ScheduleItem> {
        self.items
            .get(self.index.checked_add(1)?.checked_add(slot)?)
            .copied()
    }

    /// Move past the current handler and its `arity` metadata slots.
    pub fn advance(&mut self, arity: usize) {
        self.index = self
            .index
            .saturating_add(1)
            .saturating_add(arity)
            .min(self.items.len());
        debug_assert!(self.index <= self.items.len());
    }

    /// Reposition at an absolute schedule index, as resolved jumps do.
    pub fn jump_to(&mut self, position: usize) {
        debug_assert!(position < self.items.len());
        self.index = position.min(self.items.len());
    }
}
