//! End-to-end tests for the SSA compilation pipeline.
//!
//! Drives the public API the way an embedding front end would: build
//! bytecode with `FunctionBuilder`, register module tables, compile, and
//! walk the resulting block chain.

use std::sync::Arc;

use talonvm::bytecode::{Function, FunctionBuilder, Module, Opcode};
use talonvm::ssa::{compile_function, Instruction, IrOp, MalformedKind, SsaFunction};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

fn assert_wellformed(ssa: &SsaFunction) {
    for block in ssa.iter() {
        let instructions = block.instructions();
        for (index, inst) in instructions.iter().enumerate() {
            for reference in inst.value_refs() {
                assert!(
                    (reference as usize) < index,
                    "block {}: forward reference to {} from instruction {}",
                    block.id(),
                    reference,
                    index
                );
            }
        }
        let phis = instructions
            .iter()
            .take_while(|inst| inst.op == IrOp::Phi)
            .count();
        assert_eq!(phis, block.stack_entry() as usize);
    }
}

/// max(a, b) over two parameters: compare, branch, return one of them.
#[test]
fn test_max_of_two_parameters() {
    init_tracing();

    let mut b = FunctionBuilder::new(2);
    b.emit_byte(Opcode::Grab8, 0);
    b.emit_byte(Opcode::Grab8, 1);
    b.emit(Opcode::GreaterThan);
    let first_bigger = b.emit_jump(Opcode::JumpIfTrue8);
    b.emit_byte(Opcode::Grab8, 1);
    b.emit(Opcode::Return);
    b.patch_jump(first_bigger);
    b.emit_byte(Opcode::Grab8, 0);
    b.emit(Opcode::Return);

    let ssa = compile_function(&Module::new(), &b.build()).unwrap();
    assert_eq!(ssa.block_count(), 3);
    assert_wellformed(&ssa);

    let blocks = ssa.blocks();

    // entry: both parameters compared, both kept live across the branch
    assert_eq!(
        blocks[0].instructions(),
        &[
            Instruction::unary(IrOp::Phi, 1),
            Instruction::unary(IrOp::Phi, 0),
            Instruction::binary(IrOp::GreaterThan, 0, 1),
            Instruction::unary(IrOp::Push, 1),
            Instruction::unary(IrOp::Push, 0),
            Instruction::binary(IrOp::JumpIfTrue, 2, 2),
        ]
    );

    // both exits re-materialize the parameters and return one of them
    assert_eq!(
        blocks[1].instructions(),
        &[
            Instruction::unary(IrOp::Phi, 1),
            Instruction::unary(IrOp::Phi, 0),
            Instruction::unary(IrOp::Return, 1),
        ]
    );
    assert_eq!(
        blocks[2].instructions(),
        &[
            Instruction::unary(IrOp::Phi, 1),
            Instruction::unary(IrOp::Phi, 0),
            Instruction::unary(IrOp::Return, 0),
        ]
    );
}

/// A loop with a live accumulator: the back-edge carries the value through
/// a push/phi pair every iteration.
#[test]
fn test_countdown_loop() {
    let mut b = FunctionBuilder::new(0);
    b.push_integer(10);
    let head = b.current_offset();
    b.emit(Opcode::Decrement);
    b.emit_byte(Opcode::Grab8, 0);
    b.emit(Opcode::IsTrue);
    b.jump_to(Opcode::JumpIfTrue8, head);
    b.emit(Opcode::Return);

    let ssa = compile_function(&Module::new(), &b.build()).unwrap();
    assert_eq!(ssa.block_count(), 3);
    assert_wellformed(&ssa);

    let blocks = ssa.blocks();
    assert_eq!(
        blocks[1].instructions(),
        &[
            Instruction::unary(IrOp::Phi, 0),
            Instruction::unary(IrOp::Decrement, 0),
            Instruction::unary(IrOp::IsTrue, 1),
            Instruction::unary(IrOp::Push, 1),
            // back to the loop head
            Instruction::binary(IrOp::JumpIfTrue, 1, 2),
        ]
    );
    assert_eq!(blocks[2].stack_entry(), 1);
    assert_eq!(
        blocks[2].instructions(),
        &[
            Instruction::unary(IrOp::Phi, 0),
            Instruction::unary(IrOp::Return, 0),
        ]
    );
}

/// Strings, functions, and a call wired through the module tables.
#[test]
fn test_call_through_module_tables() {
    let mut module = Module::new();
    let greeting = module.add_string("hello");
    let callee = Arc::new(Function::new(1, vec![Opcode::Return.to_byte()]));
    let print = module.add_function(callee);

    let mut b = FunctionBuilder::new(0);
    b.push_string(greeting);
    b.push_function(print);
    b.emit_byte(Opcode::CallFunction8, 1);
    b.emit(Opcode::Return);

    let ssa = compile_function(&module, &b.build()).unwrap();
    assert_eq!(
        ssa.blocks()[0].instructions(),
        &[
            Instruction::wide(IrOp::String, u64::from(greeting)),
            Instruction::wide(IrOp::Function, u64::from(print)),
            Instruction::unary(IrOp::Push, 0),
            Instruction::binary(IrOp::CallFunction, 1, 1),
            Instruction::unary(IrOp::Return, 3),
        ]
    );
}

#[test]
fn test_dump_renders_whole_pipeline() {
    let mut b = FunctionBuilder::new(0);
    b.emit(Opcode::PushTrue);
    let label = b.emit_jump(Opcode::JumpIfFalse8);
    b.push_integer(1);
    b.emit(Opcode::Return);
    b.patch_jump(label);
    b.push_integer(2);
    b.emit(Opcode::Return);
    let function = b.build();

    // the bytecode listing and the SSA listing describe the same program
    let listing = function.disassemble();
    assert!(listing.contains("push_true"));
    assert!(listing.contains("jump_if_false_8 -> 0006"));

    let ssa = compile_function(&Module::new(), &function).unwrap();
    let dump = ssa.dump();
    assert!(dump.contains("block 0 (0 incoming)"));
    assert!(dump.contains("jump_if_false bb2 [0]"));
    assert!(dump.contains("block 2 (0 incoming)"));
    assert!(dump.contains("signed_integer 2"));
}

#[test]
fn test_empty_function_compiles_to_nothing() {
    let ssa = compile_function(&Module::new(), &Function::new(0, Vec::new())).unwrap();
    assert!(ssa.is_empty());
}

#[test]
fn test_malformed_inputs_are_rejected() {
    let module = Module::new();

    // truncated operand
    let function = Function::new(0, vec![Opcode::PushFloat.to_byte(), 1, 2, 3]);
    let err = compile_function(&module, &function).unwrap_err();
    assert_eq!(err.kind, MalformedKind::TruncatedOperand);

    // branch past the end
    let mut b = FunctionBuilder::new(0);
    b.jump_to(Opcode::Jump8, 200);
    let err = compile_function(&module, &b.build()).unwrap_err();
    assert_eq!(err.kind, MalformedKind::BranchOutOfRange { target: 200 });

    // unknown opcode byte
    let function = Function::new(0, vec![Opcode::PushTrue.to_byte(), 0xEF]);
    let err = compile_function(&module, &function).unwrap_err();
    assert_eq!(err.offset, 1);
    assert_eq!(err.kind, MalformedKind::UnknownOpcode { byte: 0xEF });

    // popping an empty stack
    let function = Function::new(0, vec![Opcode::Return.to_byte()]);
    let err = compile_function(&module, &function).unwrap_err();
    assert_eq!(err.kind, MalformedKind::StackUnderflow);
}

#[test]
fn test_failure_then_success_is_deterministic() {
    let module = Module::new();

    let mut good = FunctionBuilder::new(1);
    good.emit(Opcode::Increment);
    good.emit(Opcode::Return);
    let good = good.build();

    let baseline = compile_function(&module, &good).unwrap().dump();

    for bad_code in [
        vec![Opcode::PushInteger64.to_byte(), 1, 2],
        vec![0xEE],
        vec![Opcode::Add.to_byte()],
    ] {
        let bad = Function::new(0, bad_code);
        assert!(compile_function(&module, &bad).is_err());
        let again = compile_function(&module, &good).unwrap().dump();
        assert_eq!(baseline, again);
    }
}
