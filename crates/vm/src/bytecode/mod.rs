//! Bytecode decoding: the instruction iterator and the fusion-pattern
//! recognizer layered on top of it.

mod iterator;
mod patterns;

pub use iterator::{BytecodeIterator, EventKind, InstructionEvent};
pub use patterns::{FusedInstruction, FusedOp, PatternRecognizer, PushFuseKind};

pub(crate) use patterns::Constituents;
