//! Emission/consumption contract tests: a miniature stack-machine frame
//! with conforming handlers executes schedules through the trampoline
//! driver, and fused schedules must produce the same observable state
//! (stack, gas) as unfused ones.
#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use bytes::Bytes;
use threadvm::dispatch::{self, DispatchOutcome, HandlerTable};
use threadvm::{Cursor, Schedule, ScheduleConfig, SyntheticOp, Word};

#[derive(Debug, PartialEq, Eq)]
enum MiniError {
    Underflow,
    StackBounds,
    BadJump,
    MissingConstant,
    UnhandledOp,
}

struct Frame<'a> {
    schedule: &'a Schedule,
    stack: Vec<Word>,
    gas: u64,
}

impl<'a> Frame<'a> {
    fn new(schedule: &'a Schedule) -> Self {
        let gas = schedule
            .entry_block_meta()
            .map(|meta| u64::from(meta.gas))
            .unwrap_or(0);
        Self {
            schedule,
            stack: Vec::new(),
            gas,
        }
    }

    fn pop(&mut self) -> Result<Word, MiniError> {
        self.stack.pop().ok_or(MiniError::Underflow)
    }
}

type MiniHandler = for<'f, 'c> fn(
    &mut Frame<'f>,
    &mut Cursor<'c>,
) -> Result<DispatchOutcome, MiniError>;

fn h_unhandled(_: &mut Frame<'_>, _: &mut Cursor<'_>) -> Result<DispatchOutcome, MiniError> {
    Err(MiniError::UnhandledOp)
}

fn h_stop(_: &mut Frame<'_>, _: &mut Cursor<'_>) -> Result<DispatchOutcome, MiniError> {
    Ok(DispatchOutcome::Halt)
}

fn h_push_inline(
    frame: &mut Frame<'_>,
    cursor: &mut Cursor<'_>,
) -> Result<DispatchOutcome, MiniError> {
    let value = cursor.metadata(0).ok_or(MiniError::UnhandledOp)?.as_inline();
    frame.stack.push(Word::from(value));
    cursor.advance(1);
    Ok(DispatchOutcome::Continue)
}

fn h_push_pointer(
    frame: &mut Frame<'_>,
    cursor: &mut Cursor<'_>,
) -> Result<DispatchOutcome, MiniError> {
    let reference = cursor.metadata(0).ok_or(MiniError::UnhandledOp)?.as_pointer();
    let value = frame
        .schedule
        .constant(reference)
        .ok_or(MiniError::MissingConstant)?;
    frame.stack.push(*value);
    cursor.advance(1);
    Ok(DispatchOutcome::Continue)
}

fn h_add(frame: &mut Frame<'_>, cursor: &mut Cursor<'_>) -> Result<DispatchOutcome, MiniError> {
    let a = frame.pop()?;
    let b = frame.pop()?;
    frame.stack.push(a.overflowing_add(b).0);
    cursor.advance(0);
    Ok(DispatchOutcome::Continue)
}

fn h_jumpdest(
    frame: &mut Frame<'_>,
    cursor: &mut Cursor<'_>,
) -> Result<DispatchOutcome, MiniError> {
    let meta = cursor
        .metadata(0)
        .ok_or(MiniError::UnhandledOp)?
        .as_block_meta();
    // One admission check covers the whole block's stack traffic.
    if !meta.admits(frame.stack.len()) {
        return Err(MiniError::StackBounds);
    }
    frame.gas += u64::from(meta.gas);
    cursor.advance(1);
    Ok(DispatchOutcome::Continue)
}

/// Dynamic jump: the target comes off the stack and goes through the
/// jump table, the only mechanism dynamic jumps have.
fn h_jump(frame: &mut Frame<'_>, cursor: &mut Cursor<'_>) -> Result<DispatchOutcome, MiniError> {
    let target = frame.pop()?;
    let pc = u32::try_from(target.low_u64()).map_err(|_| MiniError::BadJump)?;
    let position = frame
        .schedule
        .jump_table()
        .find(pc)
        .ok_or(MiniError::BadJump)?;
    frame.gas += 8;
    cursor.jump_to(position);
    Ok(DispatchOutcome::Continue)
}

/// Fused static jump: the destination is already a schedule position.
fn h_push_jump(
    frame: &mut Frame<'_>,
    cursor: &mut Cursor<'_>,
) -> Result<DispatchOutcome, MiniError> {
    let position = cursor
        .metadata(0)
        .ok_or(MiniError::UnhandledOp)?
        .as_jump_target();
    frame.gas += 8;
    cursor.jump_to(position);
    Ok(DispatchOutcome::Continue)
}

fn h_multi_push2(
    frame: &mut Frame<'_>,
    cursor: &mut Cursor<'_>,
) -> Result<DispatchOutcome, MiniError> {
    for slot in 0..2 {
        let value = cursor.metadata(slot).ok_or(MiniError::UnhandledOp)?.as_inline();
        frame.stack.push(Word::from(value));
    }
    cursor.advance(2);
    Ok(DispatchOutcome::Continue)
}

fn h_multi_push3(
    frame: &mut Frame<'_>,
    cursor: &mut Cursor<'_>,
) -> Result<DispatchOutcome, MiniError> {
    for slot in 0..3 {
        let value = cursor.metadata(slot).ok_or(MiniError::UnhandledOp)?.as_inline();
        frame.stack.push(Word::from(value));
    }
    cursor.advance(3);
    Ok(DispatchOutcome::Continue)
}

fn h_push_add_inline(
    frame: &mut Frame<'_>,
    cursor: &mut Cursor<'_>,
) -> Result<DispatchOutcome, MiniError> {
    let value = cursor.metadata(0).ok_or(MiniError::UnhandledOp)?.as_inline();
    let top = frame.pop()?;
    frame.stack.push(top.overflowing_add(Word::from(value)).0);
    cursor.advance(1);
    Ok(DispatchOutcome::Continue)
}

fn h_push_add_pointer(
    frame: &mut Frame<'_>,
    cursor: &mut Cursor<'_>,
) -> Result<DispatchOutcome, MiniError> {
    let reference = cursor.metadata(0).ok_or(MiniError::UnhandledOp)?.as_pointer();
    let value = *frame
        .schedule
        .constant(reference)
        .ok_or(MiniError::MissingConstant)?;
    let top = frame.pop()?;
    frame.stack.push(top.overflowing_add(value).0);
    cursor.advance(1);
    Ok(DispatchOutcome::Continue)
}

fn handler_table<'a>() -> HandlerTable<Frame<'a>, MiniError> {
    let mut table = HandlerTable::new(h_unhandled as MiniHandler);
    table.set(0x00, h_stop);
    table.set(0x01, h_add);
    table.set(0x56, h_jump);
    table.set(0x5b, h_jumpdest);
    for byte in 0x5f..=0x67u8 {
        table.set(byte, h_push_inline); // PUSH0..PUSH8
    }
    for byte in 0x68..=0x7fu8 {
        table.set(byte, h_push_pointer); // PUSH9..PUSH32
    }
    table.set_synthetic(SyntheticOp::PushJump, h_push_jump);
    table.set_synthetic(SyntheticOp::MultiPush2, h_multi_push2);
    table.set_synthetic(SyntheticOp::MultiPush3, h_multi_push3);
    table.set_synthetic(SyntheticOp::PushAddInline, h_push_add_inline);
    table.set_synthetic(SyntheticOp::PushAddPointer, h_push_add_pointer);
    table
}

fn execute(code: &[u8], config: &ScheduleConfig) -> (Vec<Word>, u64) {
    let schedule = Schedule::build(Bytes::copy_from_slice(code), config).unwrap();
    let table = handler_table();
    let mut frame = Frame::new(&schedule);
    dispatch::run(&mut frame, &schedule, &table).unwrap();
    (frame.stack, frame.gas)
}

/// PUSH1 5, PUSH1 3, ADD, PUSH1 8, JUMP, JUMPDEST, PUSH1 7, ADD, STOP.
const JUMPY: &[u8] = &[
    0x60, 0x05, 0x60, 0x03, 0x01, 0x60, 0x08, 0x56, 0x5b, 0x60, 0x07, 0x01, 0x00,
];

#[test]
fn fused_and_unfused_runs_agree() {
    let (fused_stack, fused_gas) = execute(JUMPY, &ScheduleConfig::default());
    let (plain_stack, plain_gas) = execute(JUMPY, &ScheduleConfig::without_fusion());

    assert_eq!(fused_stack, vec![Word::from(15)]);
    assert_eq!(fused_stack, plain_stack);
    // 4 pushes + 2 adds + JUMP + JUMPDEST = 12 + 8 + 7 static gas.
    assert_eq!(plain_gas, 27);
    assert_eq!(fused_gas, plain_gas);
}

#[test]
fn wide_operands_flow_through_the_pool() {
    let mut code = vec![0x60, 0x01, 0x7f];
    code.extend([0xab; 32]);
    code.extend([0x01, 0x00]); // ADD STOP
    let expected = Word::from_big_endian(&[0xab; 32]).overflowing_add(Word::from(1)).0;

    let (fused_stack, fused_gas) = execute(&code, &ScheduleConfig::default());
    let (plain_stack, plain_gas) = execute(&code, &ScheduleConfig::without_fusion());
    assert_eq!(fused_stack, vec![expected]);
    assert_eq!(plain_stack, fused_stack);
    assert_eq!(fused_gas, plain_gas);
    assert_eq!(fused_gas, 9);
}

#[test]
fn sentinel_stops_halt_fall_through() {
    // No STOP in the bytecode: the sentinels terminate execution.
    let (stack, gas) = execute(&[0x60, 0x05], &ScheduleConfig::default());
    assert_eq!(stack, vec![Word::from(5)]);
    assert_eq!(gas, 3);
}

#[test]
fn dynamic_jumps_use_the_table() {
    // PUSH1 5, JUMP, STOP, STOP, JUMPDEST, PUSH1 9, STOP — with fusion
    // off the JUMP stays dynamic and must go through the table.
    let code = [0x60, 0x05, 0x56, 0x00, 0x00, 0x5b, 0x60, 0x09, 0x00];
    let config = ScheduleConfig::without_fusion();
    let (stack, _) = execute(&code, &config);
    assert_eq!(stack, vec![Word::from(9)]);
}

#[test]
fn underfilled_block_entry_is_rejected() {
    // PUSH1 3, JUMP, JUMPDEST, ADD, STOP: the target block needs two
    // stack items and is entered with none, so the admission check at
    // the JUMPDEST refuses it.
    let code = [0x60, 0x03, 0x56, 0x5b, 0x01, 0x00];
    let schedule =
        Schedule::build(Bytes::copy_from_slice(&code), &ScheduleConfig::default()).unwrap();
    let table = handler_table();
    let mut frame = Frame::new(&schedule);
    let err = dispatch::run(&mut frame, &schedule, &table).unwrap_err();
    assert_eq!(err, MiniError::StackBounds);
}

#[test]
fn multi_push_three_way() {
    let (stack, gas) = execute(&[0x60, 0x01, 0x60, 0x02, 0x60, 0x03], &ScheduleConfig::default());
    assert_eq!(
        stack,
        vec![Word::from(1), Word::from(2), Word::from(3)]
    );
    assert_eq!(gas, 9);
}
