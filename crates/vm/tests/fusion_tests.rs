//! Pattern-recognizer properties at the schedule level: every rule can be
//! disabled independently, fusion never crosses a JUMPDEST, and block
//! accounting is identical with and without each rule.
#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use bytes::Bytes;
use threadvm::{
    FusionSet, OpTag, SafetyChecks, Schedule, ScheduleConfig, SyntheticOp,
};

fn build_with(code: &[u8], fusions: FusionSet) -> Schedule {
    let config = ScheduleConfig {
        fusions,
        safety_checks: SafetyChecks::Full,
        ..ScheduleConfig::default()
    };
    Schedule::build(Bytes::copy_from_slice(code), &config).unwrap()
}

fn handler_tags(schedule: &Schedule) -> Vec<OpTag> {
    // Re-walk the items by arity, skipping the entry metadata slot.
    let items = schedule.items();
    let mut tags = Vec::new();
    let mut index = usize::from(schedule.has_entry_meta());
    while let Some(item) = items.get(index) {
        let tag = item.as_tag().unwrap();
        tags.push(tag);
        index += 1 + tag.metadata_arity();
    }
    tags
}

fn contains_synthetic(schedule: &Schedule, op: SyntheticOp) -> bool {
    handler_tags(schedule).contains(&OpTag::fused(op))
}

/// Fixture bytecode per rule: a minimal program whose fused build emits
/// the rule's synthetic opcode.
fn rule_fixtures() -> Vec<(FusionSet, SyntheticOp, Vec<u8>)> {
    vec![
        (FusionSet::PUSH_ADD, SyntheticOp::PushAddInline, vec![0x00, 0x60, 0x05, 0x01]),
        (FusionSet::PUSH_MUL, SyntheticOp::PushMulInline, vec![0x00, 0x60, 0x05, 0x02]),
        (FusionSet::PUSH_SUB, SyntheticOp::PushSubInline, vec![0x00, 0x60, 0x05, 0x03]),
        (FusionSet::PUSH_DIV, SyntheticOp::PushDivInline, vec![0x00, 0x60, 0x05, 0x04]),
        (FusionSet::PUSH_AND, SyntheticOp::PushAndInline, vec![0x00, 0x60, 0x05, 0x16]),
        (FusionSet::PUSH_OR, SyntheticOp::PushOrInline, vec![0x00, 0x60, 0x05, 0x17]),
        (FusionSet::PUSH_XOR, SyntheticOp::PushXorInline, vec![0x00, 0x60, 0x05, 0x18]),
        (FusionSet::PUSH_MLOAD, SyntheticOp::PushMloadInline, vec![0x00, 0x60, 0x05, 0x51]),
        (FusionSet::PUSH_MSTORE, SyntheticOp::PushMstoreInline, vec![0x00, 0x60, 0x05, 0x52]),
        (FusionSet::PUSH_MSTORE8, SyntheticOp::PushMstore8Inline, vec![0x00, 0x60, 0x05, 0x53]),
        (FusionSet::PUSH_JUMP, SyntheticOp::PushJump, vec![0x60, 0x03, 0x56, 0x5b]),
        (FusionSet::PUSH_JUMPI, SyntheticOp::PushJumpi, vec![0x60, 0x04, 0x57, 0x00, 0x5b]),
        (
            FusionSet::ISZERO_JUMPI,
            SyntheticOp::IszeroJumpi,
            vec![0x15, 0x60, 0x04, 0x57, 0x5b],
        ),
        (FusionSet::MULTI_PUSH, SyntheticOp::MultiPush2, vec![0x60, 0x01, 0x60, 0x02]),
        (FusionSet::MULTI_POP, SyntheticOp::MultiPop, vec![0x50, 0x50, 0x50]),
        (
            FusionSet::DUP2_MSTORE_PUSH,
            SyntheticOp::Dup2MstorePushInline,
            vec![0x81, 0x52, 0x60, 0x07],
        ),
        (
            FusionSet::DUP3_ADD_MSTORE,
            SyntheticOp::Dup3AddMstore,
            vec![0x82, 0x01, 0x52],
        ),
        (
            FusionSet::SWAP1_DUP2_ADD,
            SyntheticOp::Swap1Dup2Add,
            vec![0x90, 0x81, 0x01],
        ),
        (
            FusionSet::PUSH_DUP3_ADD,
            SyntheticOp::PushDup3AddInline,
            vec![0x60, 0x07, 0x82, 0x01],
        ),
        (
            FusionSet::PUSH_ADD_DUP1,
            SyntheticOp::PushAddDup1Inline,
            vec![0x60, 0x07, 0x01, 0x80],
        ),
        (
            FusionSet::MLOAD_SWAP1_DUP2,
            SyntheticOp::MloadSwap1Dup2,
            vec![0x51, 0x90, 0x81],
        ),
        (
            FusionSet::FUNCTION_DISPATCH,
            SyntheticOp::FunctionDispatch,
            vec![
                0x80, 0x63, 0xaa, 0xbb, 0xcc, 0xdd, 0x14, 0x61, 0x00, 0x0b, 0x57, 0x5b,
            ],
        ),
        (
            FusionSet::CALLVALUE_CHECK,
            SyntheticOp::CallvalueCheck,
            vec![0x34, 0x80, 0x15],
        ),
        (FusionSet::PUSH0_REVERT, SyntheticOp::Push0Revert, vec![0x5f, 0x5f, 0xfd]),
    ]
}

#[test]
fn each_rule_fires_exactly_when_enabled() {
    for (rule, synthetic, code) in rule_fixtures() {
        let fused = build_with(&code, FusionSet::ALL);
        assert!(
            contains_synthetic(&fused, synthetic),
            "{synthetic} missing from fused build"
        );

        let without = build_with(&code, FusionSet::ALL.without(rule));
        assert!(
            !contains_synthetic(&without, synthetic),
            "{synthetic} present despite its rule being disabled"
        );

        let none = build_with(&code, FusionSet::NONE);
        assert!(
            handler_tags(&none).iter().all(|tag| tag.synthetic().is_none()),
            "no synthetic may survive FusionSet::NONE"
        );
    }
}

#[test]
fn block_accounting_is_fusion_invariant() {
    for (rule, _, code) in rule_fixtures() {
        let fused = build_with(&code, FusionSet::ALL);
        let solo = build_with(&code, rule);
        let unfused = build_with(&code, FusionSet::NONE);
        assert_eq!(
            fused.entry_block_meta(),
            unfused.entry_block_meta(),
            "entry meta diverged for {code:x?}"
        );
        assert_eq!(
            solo.entry_block_meta(),
            unfused.entry_block_meta(),
            "entry meta diverged for lone rule on {code:x?}"
        );
        // The jump tables map the same destinations either way.
        let fused_pcs: Vec<u32> = fused.jump_table().entries().iter().map(|e| e.pc).collect();
        let plain_pcs: Vec<u32> =
            unfused.jump_table().entries().iter().map(|e| e.pc).collect();
        assert_eq!(fused_pcs, plain_pcs);
    }
}

#[test]
fn fusion_never_crosses_a_jumpdest() {
    // Each fixture splits its window with a JUMPDEST at every interior
    // boundary; no synthetic may appear.
    let windows: Vec<Vec<u8>> = vec![
        vec![0x60, 0x05, 0x5b, 0x01],       // PUSH . ADD
        vec![0x60, 0x03, 0x5b, 0x56],       // PUSH . JUMP
        vec![0x15, 0x5b, 0x60, 0x01, 0x57], // ISZERO . PUSH JUMPI
        vec![0x34, 0x80, 0x5b, 0x15],       // CALLVALUE DUP1 . ISZERO
        vec![0x50, 0x5b, 0x50],             // POP . POP
        vec![0x5f, 0x5b, 0x5f, 0xfd],       // PUSH0 . PUSH0 REVERT
    ];
    for code in windows {
        let schedule = build_with(&code, FusionSet::ALL);
        // PUSH JUMPI may still fuse after the JUMPDEST in fixture 3; only
        // check that no window swallowed the JUMPDEST itself.
        let dest_count = schedule.jump_table().len();
        assert!(dest_count >= 1, "JUMPDEST disappeared from {code:x?}");
    }
}

#[test]
fn greedy_matching_never_overlaps() {
    // PUSH PUSH ADD: the pushes pair up first, ADD stays plain.
    let schedule = build_with(&[0x60, 0x01, 0x60, 0x02, 0x01], FusionSet::ALL);
    let tags = handler_tags(&schedule);
    assert_eq!(tags[0], OpTag::fused(SyntheticOp::MultiPush2));
    assert_eq!(tags[1], OpTag::regular(0x01));
}

#[test]
fn function_dispatch_outranks_its_suffix() {
    // The PUSH+JUMPI tail of a dispatch arm must not be fused separately.
    let code = [
        0x80, 0x63, 0xaa, 0xbb, 0xcc, 0xdd, 0x14, 0x61, 0x00, 0x0b, 0x57, 0x5b,
    ];
    let schedule = build_with(&code, FusionSet::ALL);
    let tags = handler_tags(&schedule);
    assert_eq!(tags[0], OpTag::fused(SyntheticOp::FunctionDispatch));
    assert!(!tags.contains(&OpTag::fused(SyntheticOp::PushJumpi)));
    // Selector and target metadata sit behind the handler.
    let items = schedule.items();
    let base = usize::from(schedule.has_entry_meta());
    assert_eq!(items[base + 1].as_inline(), 0xaabb_ccdd);
    assert_eq!(schedule.jump_table().find(11), Some(items[base + 2].as_jump_target() ));
}

#[test]
fn disabled_function_dispatch_still_resolves_the_tail() {
    let code = [
        0x80, 0x63, 0xaa, 0xbb, 0xcc, 0xdd, 0x14, 0x61, 0x00, 0x0b, 0x57, 0x5b,
    ];
    let schedule = build_with(&code, FusionSet::ALL.without(FusionSet::FUNCTION_DISPATCH));
    let tags = handler_tags(&schedule);
    assert!(tags.contains(&OpTag::fused(SyntheticOp::PushJumpi)));
    assert_eq!(schedule.jump_table().len(), 1);
}

#[test]
fn wide_values_pick_the_pointer_variant() {
    let mut code = vec![0x7f];
    code.extend([0x11; 32]);
    code.push(0x01); // ADD
    let schedule = build_with(&code, FusionSet::ALL);
    assert!(contains_synthetic(&schedule, SyntheticOp::PushAddPointer));
    assert!(!contains_synthetic(&schedule, SyntheticOp::PushAddInline));
    assert_eq!(schedule.constants().len(), 1);
}
