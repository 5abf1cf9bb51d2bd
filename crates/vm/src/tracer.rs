//! Build-event tracing capability.
//!
//! The builder is generic over the tracer so the disabled path costs
//! nothing: every [`NoopTracer`] method is an empty default the compiler
//! erases. Implementations see every fusion, every jump resolution and
//! the final schedule statistics.

use crate::synthetic::SyntheticOp;

/// Sink for schedule-construction events.
pub trait BuildTracer {
    /// Preprocessing of `code_len` bytes is starting.
    fn schedule_build_start(&mut self, code_len: usize) {
        let _ = code_len;
    }

    /// The schedule was built: final item and interned-constant counts.
    fn schedule_build_complete(&mut self, items: usize, interned_constants: usize) {
        let _ = (items, interned_constants);
    }

    /// A fusion window matched at `pc`, covering `source_len` bytes.
    fn fusion_detected(&mut self, pc: u64, kind: SyntheticOp, source_len: usize) {
        let _ = (pc, kind, source_len);
    }

    /// A static jump was resolved to a JUMPDEST.
    fn static_jump_resolved(&mut self, from_pc: u64, to_pc: u64) {
        let _ = (from_pc, to_pc);
    }

    /// A static jump targets something that is not a JUMPDEST (or does
    /// not fit the pc type); preprocessing aborts or degrades to INVALID.
    fn invalid_static_jump(&mut self, from_pc: u64, to_pc: u64) {
        let _ = (from_pc, to_pc);
    }

    /// The jump table was assembled with `entries` destinations.
    fn jump_table_created(&mut self, entries: usize) {
        let _ = entries;
    }
}

/// Tracer that compiles to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl BuildTracer for NoopTracer {}
