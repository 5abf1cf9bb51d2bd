//! EVM bytecode preprocessor producing a flat dispatch schedule.
//!
//! Raw bytecode is analyzed once and lowered into a linear sequence of
//! 8-byte dispatch items: handler references interleaved with the metadata
//! each handler consumes (push operands, block gas, resolved jump targets).
//! Execution then advances a cursor through the schedule instead of decoding
//! bytes, with dynamic jumps served by a sorted jump table.
//!
//! The crate deliberately stops at the schedule boundary: opcode handler
//! semantics, world state and dynamic gas accounting are external
//! collaborators reached through [`dispatch::HandlerTable`].

pub mod analysis;
pub mod bytecode;
pub mod config;
pub mod constant_pool;
pub mod constants;
pub mod dispatch;
pub mod errors;
pub mod opcodes;
pub mod schedule;
pub mod synthetic;
pub mod tracer;

pub use analysis::BlockInfo;
pub use config::{FusionSet, SafetyChecks, ScheduleConfig, TailCallMode};
pub use constant_pool::{ConstRef, ConstantPool};
pub use dispatch::{DispatchOutcome, HandlerFn, HandlerTable};
pub use errors::{ScheduleError, ValidationError};
pub use opcodes::{OpCode, OpInfo};
pub use schedule::{BlockMeta, Cursor, JumpTable, Schedule, ScheduleItem};
pub use synthetic::{OpTag, SyntheticOp};
pub use tracer::{BuildTracer, NoopTracer};

/// 256-bit word type used for push operands and constant-pool entries.
pub type Word = ethereum_types::U256;

/// Program-counter width. Jump-table entries and `pc_value` metadata use
/// this type; pushed jump targets that do not fit are degraded to INVALID.
pub type Pc = u32;
