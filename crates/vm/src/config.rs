//! Preprocessing configuration.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_LOOP_QUOTA;

/// Options recognized by the schedule builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Maximum bytecode-iterator steps before preprocessing fails with
    /// [`ScheduleError::QuotaExceeded`](crate::ScheduleError::QuotaExceeded).
    pub loop_quota: u64,
    /// How the dispatch chain is executed. Purely informational for the
    /// core: it is communicated to handler implementations, the schedule
    /// format does not depend on it.
    pub tail_call_mode: TailCallMode,
    /// Which structural assertions are active.
    pub safety_checks: SafetyChecks,
    /// The set of fusion rules the pattern recognizer applies.
    pub fusions: FusionSet,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            loop_quota: DEFAULT_LOOP_QUOTA,
            tail_call_mode: TailCallMode::Guaranteed,
            safety_checks: SafetyChecks::Bounds,
            fusions: FusionSet::ALL,
        }
    }
}

impl ScheduleConfig {
    /// Configuration with every fusion rule disabled; the schedule then
    /// mirrors the bytecode one handler per opcode.
    pub fn without_fusion() -> Self {
        Self {
            fusions: FusionSet::NONE,
            ..Self::default()
        }
    }
}

/// How handlers chain to their successor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TailCallMode {
    /// Handlers tail-call each other directly; the stack does not grow.
    #[default]
    Guaranteed,
    /// Handlers return control to a trampoline loop between items
    /// ([`dispatch::run`](crate::dispatch::run)).
    BestEffort,
}

/// Structural-assertion level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyChecks {
    /// No checks beyond what safe Rust already guarantees.
    Off,
    /// Debug assertions on cursor movement.
    #[default]
    Bounds,
    /// Additionally re-validate the finished schedule against the
    /// per-opcode arity rules before returning it.
    Full,
}

/// Bitmask of fusion rules. Each bit gates one pattern of the recognizer,
/// so property tests can exercise every rule in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionSet(u32);

macro_rules! fusion_rules {
    ($($(#[$doc:meta])* $name:ident = $bit:expr;)*) => {
        impl FusionSet {
            $($(#[$doc])* pub const $name: FusionSet = FusionSet(1 << $bit);)*

            /// Every rule enabled.
            pub const ALL: FusionSet = FusionSet($((1 << $bit))|*);
        }
    };
}

fusion_rules! {
    /// PUSH + ADD.
    PUSH_ADD = 0;
    /// PUSH + MUL.
    PUSH_MUL = 1;
    /// PUSH + SUB.
    PUSH_SUB = 2;
    /// PUSH + DIV.
    PUSH_DIV = 3;
    /// PUSH + AND.
    PUSH_AND = 4;
    /// PUSH + OR.
    PUSH_OR = 5;
    /// PUSH + XOR.
    PUSH_XOR = 6;
    /// PUSH + MLOAD.
    PUSH_MLOAD = 7;
    /// PUSH + MSTORE.
    PUSH_MSTORE = 8;
    /// PUSH + MSTORE8.
    PUSH_MSTORE8 = 9;
    /// PUSH + JUMP, statically resolved.
    PUSH_JUMP = 10;
    /// PUSH + JUMPI, statically resolved.
    PUSH_JUMPI = 11;
    /// ISZERO + PUSH + JUMPI.
    ISZERO_JUMPI = 12;
    /// Two or three consecutive short PUSHes.
    MULTI_PUSH = 13;
    /// A run of two or more POPs.
    MULTI_POP = 14;
    /// DUP2 + MSTORE + PUSH.
    DUP2_MSTORE_PUSH = 15;
    /// DUP3 + ADD + MSTORE.
    DUP3_ADD_MSTORE = 16;
    /// SWAP1 + DUP2 + ADD.
    SWAP1_DUP2_ADD = 17;
    /// PUSH + DUP3 + ADD.
    PUSH_DUP3_ADD = 18;
    /// PUSH + ADD + DUP1.
    PUSH_ADD_DUP1 = 19;
    /// MLOAD + SWAP1 + DUP2.
    MLOAD_SWAP1_DUP2 = 20;
    /// DUP1 + PUSH4 selector + EQ + PUSH target + JUMPI.
    FUNCTION_DISPATCH = 21;
    /// CALLVALUE + DUP1 + ISZERO.
    CALLVALUE_CHECK = 22;
    /// PUSH0 + PUSH0 + REVERT.
    PUSH0_REVERT = 23;
}

impl FusionSet {
    /// No rule enabled; the recognizer becomes a pass-through.
    pub const NONE: FusionSet = FusionSet(0);

    /// Whether all rules in `rule` are enabled.
    pub const fn contains(self, rule: FusionSet) -> bool {
        self.0 & rule.0 == rule.0
    }

    /// Copy of `self` with `rule` enabled.
    #[must_use]
    pub const fn with(self, rule: FusionSet) -> FusionSet {
        FusionSet(self.0 | rule.0)
    }

    /// Copy of `self` with `rule` disabled.
    #[must_use]
    pub const fn without(self, rule: FusionSet) -> FusionSet {
        FusionSet(self.0 & !rule.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for FusionSet {
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fusion_set_toggles() {
        let set = FusionSet::ALL.without(FusionSet::PUSH_ADD);
        assert!(!set.contains(FusionSet::PUSH_ADD));
        assert!(set.contains(FusionSet::PUSH_JUMP));
        assert!(set.with(FusionSet::PUSH_ADD).contains(FusionSet::PUSH_ADD));
        assert!(FusionSet::NONE.is_empty());
        assert!(!FusionSet::ALL.is_empty());
    }
}
