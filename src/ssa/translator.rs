//! Bytecode-to-SSA translator.
//!
//! Walks the bytecode with the scanner's markers in hand, symbolically
//! executing each opcode against a stack of value IDs. Pushes and pops of
//! the runtime stack become explicit operand references; stack shuffling
//! opcodes vanish into the symbolic stack.
//!
//! At every block boundary the remaining live values are flushed as `push`
//! instructions and re-materialized in the successor as `phi` instructions,
//! so downstream passes can follow cross-block data flow without a
//! separate CFG pass.

use std::mem;

use tracing::trace;

use crate::bytecode::{Function, Module, Opcode};

use super::error::{MalformedBytecode, MalformedKind, SsaResult};
use super::ir::{Instruction, IrOp, SsaFunction, ValueId};
use super::scanner::{read_operand, ByteMarker};
use super::stack::ValueStack;

/// Phase 3: emit SSA instructions for every basic block.
pub(super) fn translate(
    module: &Module,
    function: &Function,
    markers: &[ByteMarker],
) -> SsaResult<SsaFunction> {
    Translator {
        module,
        code: function.code(),
        markers,
        pos: 0,
        stack: ValueStack::new(),
        instructions: Vec::new(),
        code_pos: 0,
        chain: SsaFunction::empty(),
        open: None,
        next_id: 0,
    }
    .run()
}

/// Identity of the block currently receiving instructions
struct OpenBlock {
    id: u32,
    stack_entry: u32,
}

struct Translator<'a> {
    module: &'a Module,
    code: &'a [u8],
    markers: &'a [ByteMarker],
    /// Offset of the opcode being translated
    pos: usize,
    /// Symbolic operand stack; holds IDs local to the open block
    stack: ValueStack,
    /// Instructions of the open block
    instructions: Vec<Instruction>,
    /// Next value ID within the open block
    code_pos: ValueId,
    /// Sealed blocks, newest first
    chain: SsaFunction,
    open: Option<OpenBlock>,
    next_id: u32,
}

impl<'a> Translator<'a> {
    fn run(mut self) -> SsaResult<SsaFunction> {
        while self.pos < self.code.len() {
            if self.markers[self.pos].leader {
                if !self.markers[self.pos].is_opcode {
                    return Err(self.error(MalformedKind::LeaderInOperand));
                }
                self.open_block();
            }

            let byte = self.code[self.pos];
            let Some(op) = Opcode::from_byte(byte) else {
                return Err(self.error(MalformedKind::UnknownOpcode { byte }));
            };
            self.translate_op(op)?;
            self.pos += 1 + op.operand_width();
        }
        self.seal_open_block();

        trace!(
            target: "talonvm::ssa::translate",
            blocks = self.next_id,
            "translated function"
        );
        Ok(mem::take(&mut self.chain))
    }

    /// Close the open block (if any) and start the one leading at the
    /// current offset.
    fn open_block(&mut self) {
        // whatever is still live is sent on to the successor
        self.flush_stack();
        self.seal_open_block();

        let stack_entry = self.markers[self.pos].stack_in as u32;
        let id = self.next_id;
        self.next_id += 1;
        trace!(
            target: "talonvm::ssa::translate",
            block = id,
            incoming = stack_entry,
            "open block"
        );

        self.code_pos = 0;
        self.open = Some(OpenBlock { id, stack_entry });

        // re-materialize the incoming stack, bottom slot first
        for k in 0..stack_entry {
            let value = self.code_pos;
            self.stack.push(value);
            self.emit(Instruction::unary(IrOp::Phi, stack_entry - k - 1));
        }
    }

    /// Link the open block into the chain, newest first.
    fn seal_open_block(&mut self) {
        if let Some(open) = self.open.take() {
            self.chain
                .push_front(open.id, open.stack_entry, mem::take(&mut self.instructions));
        }
    }

    /// Emit the remaining live values as outgoing `push` instructions, in
    /// pop order.
    fn flush_stack(&mut self) {
        while let Some(value) = self.stack.pop() {
            self.emit(Instruction::unary(IrOp::Push, value));
        }
    }

    fn emit(&mut self, inst: Instruction) -> ValueId {
        let id = self.code_pos;
        trace!(target: "talonvm::ssa::translate", value = id, "{}", inst);
        self.instructions.push(inst);
        self.code_pos += 1;
        id
    }

    fn error(&self, kind: MalformedKind) -> MalformedBytecode {
        MalformedBytecode::new(self.pos, kind)
    }

    fn pop(&mut self) -> SsaResult<ValueId> {
        match self.stack.pop() {
            Some(value) => Ok(value),
            None => Err(self.error(MalformedKind::StackUnderflow)),
        }
    }

    /// Decode the operand of the opcode at the cursor.
    fn operand(&self, width: usize) -> SsaResult<u64> {
        if self.pos + width >= self.code.len() {
            return Err(self.error(MalformedKind::TruncatedOperand));
        }
        Ok(read_operand(self.code, self.pos + 1, width))
    }

    fn translate_op(&mut self, op: Opcode) -> SsaResult<()> {
        match op {
            // === Binary operators ===
            Opcode::Add => self.binary_op(IrOp::Add),
            Opcode::Subtract => self.binary_op(IrOp::Subtract),
            Opcode::Multiply => self.binary_op(IrOp::Multiply),
            Opcode::Divide => self.binary_op(IrOp::Divide),
            Opcode::Modulo => self.binary_op(IrOp::Modulo),
            Opcode::Xor => self.binary_op(IrOp::Xor),
            Opcode::And => self.binary_op(IrOp::And),
            Opcode::Or => self.binary_op(IrOp::Or),
            Opcode::ShiftLeft => self.binary_op(IrOp::ShiftLeft),
            Opcode::ShiftRight => self.binary_op(IrOp::ShiftRight),
            Opcode::RotateLeft => self.binary_op(IrOp::RotateLeft),
            Opcode::RotateRight => self.binary_op(IrOp::RotateRight),
            Opcode::Equals => self.binary_op(IrOp::Equals),
            Opcode::NotEquals => self.binary_op(IrOp::NotEquals),
            Opcode::LessThan => self.binary_op(IrOp::LessThan),
            Opcode::GreaterThan => self.binary_op(IrOp::GreaterThan),
            Opcode::LessThanOrEquals => self.binary_op(IrOp::LessThanOrEquals),
            Opcode::GreaterThanOrEquals => self.binary_op(IrOp::GreaterThanOrEquals),

            // === Unary operators ===
            Opcode::Increment => self.unary_op(IrOp::Increment),
            Opcode::Decrement => self.unary_op(IrOp::Decrement),
            Opcode::Not => self.unary_op(IrOp::Not),
            Opcode::Invert => self.unary_op(IrOp::Invert),
            Opcode::IsNull => self.unary_op(IrOp::IsNull),
            Opcode::IsNotNull => self.unary_op(IrOp::IsNotNull),
            Opcode::IsTrue => self.unary_op(IrOp::IsTrue),
            Opcode::IsFalse => self.unary_op(IrOp::IsFalse),
            Opcode::ToInteger => self.unary_op(IrOp::ToSignedInteger),
            Opcode::ToUnsignedInteger => self.unary_op(IrOp::ToUnsignedInteger),
            Opcode::ToFloat => self.unary_op(IrOp::ToFloat),
            Opcode::ToString => self.unary_op(IrOp::ToString),
            Opcode::GetType => self.unary_op(IrOp::GetType),
            Opcode::Require => self.unary_op(IrOp::Require),
            Opcode::NewArray => self.unary_op(IrOp::NewArray),
            Opcode::NewBuffer => self.unary_op(IrOp::NewBuffer),

            // === Stack manipulation ===
            Opcode::Pop => {
                self.stack.pop_no_return();
                Ok(())
            }
            Opcode::PopMany => {
                let count = self.operand(1)?;
                for _ in 0..count {
                    self.stack.pop_no_return();
                }
                Ok(())
            }
            Opcode::Grab8 => self.grab(1),
            Opcode::Grab16 => self.grab(2),
            Opcode::Grab32 => self.grab(4),
            Opcode::Store8 => self.store(1),
            Opcode::Store16 => self.store(2),
            Opcode::Store32 => self.store(4),
            Opcode::Swap8 => self.swap(1),
            Opcode::Swap16 => self.swap(2),
            Opcode::Swap32 => self.swap(4),

            // === Constants ===
            Opcode::PushTrue => self.push_constant(Instruction::nullary(IrOp::True)),
            Opcode::PushFalse => self.push_constant(Instruction::nullary(IrOp::False)),
            Opcode::PushNull => self.push_constant(Instruction::nullary(IrOp::Null)),
            Opcode::PushManyNulls => self.push_many_nulls(),
            Opcode::PushInteger8 => self.signed_constant(1),
            Opcode::PushInteger16 => self.signed_constant(2),
            Opcode::PushInteger32 => self.signed_constant(4),
            Opcode::PushInteger64 => self.signed_constant(8),
            Opcode::PushUnsignedInteger8 => self.unsigned_constant(1),
            Opcode::PushUnsignedInteger16 => self.unsigned_constant(2),
            Opcode::PushUnsignedInteger32 => self.unsigned_constant(4),
            Opcode::PushUnsignedInteger64 => self.unsigned_constant(8),
            Opcode::PushFloat => {
                let bits = self.operand(8)?;
                self.push_constant(Instruction::wide(IrOp::Float, bits))
            }
            Opcode::PushString8 => self.string_constant(1),
            Opcode::PushString16 => self.string_constant(2),
            Opcode::PushString32 => self.string_constant(4),
            Opcode::PushFunction => self.function_constant(),

            // === Calls ===
            Opcode::CallFunction8 => self.call(1, IrOp::CallFunction, true),
            Opcode::CallFunction16 => self.call(2, IrOp::CallFunction, true),
            Opcode::CallFunctionNoReturn8 => self.call(1, IrOp::CallFunction, false),
            Opcode::CallFunctionNoReturn16 => self.call(2, IrOp::CallFunction, false),
            Opcode::CallProcedure8 => self.call(1, IrOp::CallPureFunction, true),
            Opcode::CallProcedure16 => self.call(2, IrOp::CallPureFunction, true),

            // === Returns ===
            Opcode::Return => {
                let value = self.pop()?;
                self.emit(Instruction::unary(IrOp::Return, value));
                Ok(())
            }
            Opcode::ReturnNull => {
                self.emit(Instruction::nullary(IrOp::ReturnNull));
                Ok(())
            }

            // === Jumps ===
            Opcode::Jump8 => self.jump(1),
            Opcode::Jump16 => self.jump(2),
            Opcode::Jump32 => self.jump(4),
            Opcode::JumpIfTrue8 => self.conditional_jump(1, IrOp::JumpIfTrue),
            Opcode::JumpIfTrue16 => self.conditional_jump(2, IrOp::JumpIfTrue),
            Opcode::JumpIfTrue32 => self.conditional_jump(4, IrOp::JumpIfTrue),
            Opcode::JumpIfFalse8 => self.conditional_jump(1, IrOp::JumpIfFalse),
            Opcode::JumpIfFalse16 => self.conditional_jump(2, IrOp::JumpIfFalse),
            Opcode::JumpIfFalse32 => self.conditional_jump(4, IrOp::JumpIfFalse),
            Opcode::JumpIfNull8 => self.conditional_jump(1, IrOp::JumpIfNull),
            Opcode::JumpIfNull16 => self.conditional_jump(2, IrOp::JumpIfNull),
            Opcode::JumpIfNull32 => self.conditional_jump(4, IrOp::JumpIfNull),
            Opcode::JumpIfNotNull8 => self.conditional_jump(1, IrOp::JumpIfNotNull),
            Opcode::JumpIfNotNull16 => self.conditional_jump(2, IrOp::JumpIfNotNull),
            Opcode::JumpIfNotNull32 => self.conditional_jump(4, IrOp::JumpIfNotNull),

            // === Aggregates ===
            Opcode::NewObject => self.push_constant(Instruction::nullary(IrOp::NewObject)),
            Opcode::LoadElement => {
                let container = self.pop()?;
                let key = self.pop()?;
                let id = self.emit(Instruction::binary(IrOp::LoadElement, key, container));
                self.stack.push(id);
                Ok(())
            }
            Opcode::SaveElement => {
                let container = self.pop()?;
                let key = self.pop()?;
                let value = self.pop()?;
                self.emit(Instruction::unary(IrOp::Push, value));
                self.emit(Instruction::binary(IrOp::SaveElement, key, container));
                Ok(())
            }
            Opcode::DeleteElement => {
                let object = self.pop()?;
                let key = self.pop()?;
                self.emit(Instruction::binary(IrOp::DeleteElement, key, object));
                Ok(())
            }

            // === Buffer access ===
            Opcode::LoadBufferUnsigned8 => self.load_buffer(IrOp::LoadBufferUnsigned8),
            Opcode::LoadBufferUnsigned16 => self.load_buffer(IrOp::LoadBufferUnsigned16),
            Opcode::LoadBufferUnsigned32 => self.load_buffer(IrOp::LoadBufferUnsigned32),
            Opcode::LoadBufferUnsigned64 => self.load_buffer(IrOp::LoadBufferUnsigned64),
            Opcode::LoadBufferSigned8 => self.load_buffer(IrOp::LoadBufferSigned8),
            Opcode::LoadBufferSigned16 => self.load_buffer(IrOp::LoadBufferSigned16),
            Opcode::LoadBufferSigned32 => self.load_buffer(IrOp::LoadBufferSigned32),
            Opcode::LoadBufferSigned64 => self.load_buffer(IrOp::LoadBufferSigned64),
            Opcode::LoadBufferFloat32 => self.load_buffer(IrOp::LoadBufferFloat32),
            Opcode::LoadBufferFloat64 => self.load_buffer(IrOp::LoadBufferFloat64),
            Opcode::StoreBufferUnsigned8 => self.store_buffer(IrOp::StoreBufferUnsigned8),
            Opcode::StoreBufferUnsigned16 => self.store_buffer(IrOp::StoreBufferUnsigned16),
            Opcode::StoreBufferUnsigned32 => self.store_buffer(IrOp::StoreBufferUnsigned32),
            Opcode::StoreBufferUnsigned64 => self.store_buffer(IrOp::StoreBufferUnsigned64),
            Opcode::StoreBufferSigned8 => self.store_buffer(IrOp::StoreBufferSigned8),
            Opcode::StoreBufferSigned16 => self.store_buffer(IrOp::StoreBufferSigned16),
            Opcode::StoreBufferSigned32 => self.store_buffer(IrOp::StoreBufferSigned32),
            Opcode::StoreBufferSigned64 => self.store_buffer(IrOp::StoreBufferSigned64),
            Opcode::StoreBufferFloat32 => self.store_buffer(IrOp::StoreBufferFloat32),
            Opcode::StoreBufferFloat64 => self.store_buffer(IrOp::StoreBufferFloat64),

            // === Closures ===
            Opcode::LoadClosure8 => self.load_closure(1),
            Opcode::LoadClosure16 => self.load_closure(2),
            Opcode::LoadClosure32 => self.load_closure(4),
            Opcode::StoreClosure8 => self.store_closure(1),
            Opcode::StoreClosure16 => self.store_closure(2),
            Opcode::StoreClosure32 => self.store_closure(4),
        }
    }

    // === Handlers ===

    fn binary_op(&mut self, ir: IrOp) -> SsaResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let id = self.emit(Instruction::binary(ir, a, b));
        self.stack.push(id);
        Ok(())
    }

    fn unary_op(&mut self, ir: IrOp) -> SsaResult<()> {
        let a = self.pop()?;
        let id = self.emit(Instruction::unary(ir, a));
        self.stack.push(id);
        Ok(())
    }

    fn push_constant(&mut self, inst: Instruction) -> SsaResult<()> {
        let id = self.emit(inst);
        self.stack.push(id);
        Ok(())
    }

    fn signed_constant(&mut self, width: usize) -> SsaResult<()> {
        let raw = self.operand(width)?;
        let value = sign_extend(raw, width);
        self.push_constant(Instruction::wide(IrOp::SignedInteger, value as u64))
    }

    fn unsigned_constant(&mut self, width: usize) -> SsaResult<()> {
        let value = self.operand(width)?;
        self.push_constant(Instruction::wide(IrOp::UnsignedInteger, value))
    }

    fn string_constant(&mut self, width: usize) -> SsaResult<()> {
        let index = self.operand(width)? as u32;
        if self.module.string(index).is_none() {
            return Err(self.error(MalformedKind::InvalidStringIndex { index }));
        }
        self.push_constant(Instruction::wide(IrOp::String, u64::from(index)))
    }

    fn function_constant(&mut self) -> SsaResult<()> {
        let index = self.operand(4)? as u32;
        if self.module.function(index).is_none() {
            return Err(self.error(MalformedKind::InvalidFunctionIndex { index }));
        }
        self.push_constant(Instruction::wide(IrOp::Function, u64::from(index)))
    }

    fn push_many_nulls(&mut self) -> SsaResult<()> {
        let count = self.operand(1)?;
        // a single constant feeds every duplicated slot
        if count > 0 {
            let id = self.emit(Instruction::nullary(IrOp::Null));
            for _ in 0..count {
                self.stack.push(id);
            }
        }
        Ok(())
    }

    /// Duplicate a stack slot onto the top; no instruction is emitted.
    fn grab(&mut self, width: usize) -> SsaResult<()> {
        let index = self.operand(width)? as usize;
        let Some(value) = self.stack.get(index) else {
            return Err(self.error(MalformedKind::StackUnderflow));
        };
        self.stack.push(value);
        Ok(())
    }

    /// Pop into a stack slot; no instruction is emitted.
    fn store(&mut self, width: usize) -> SsaResult<()> {
        let index = self.operand(width)? as usize;
        let value = self.pop()?;
        self.stack.set(index, value);
        Ok(())
    }

    /// Exchange two stack slots; `half` is the width of each index operand.
    fn swap(&mut self, half: usize) -> SsaResult<()> {
        let raw = self.operand(half * 2)?;
        let mask = (1u64 << (half * 8)) - 1;
        let first = (raw & mask) as usize;
        let second = (raw >> (half * 8)) as usize;

        let Some(a) = self.stack.get(first) else {
            return Err(self.error(MalformedKind::StackUnderflow));
        };
        let Some(b) = self.stack.get(second) else {
            return Err(self.error(MalformedKind::StackUnderflow));
        };
        self.stack.set(first, b);
        self.stack.set(second, a);
        Ok(())
    }

    fn load_closure(&mut self, width: usize) -> SsaResult<()> {
        let slot = self.operand(width)? as u32;
        let id = self.emit(Instruction::unary(IrOp::LoadClosure, slot));
        self.stack.push(id);
        Ok(())
    }

    fn store_closure(&mut self, width: usize) -> SsaResult<()> {
        let slot = self.operand(width)? as u32;
        let value = self.pop()?;
        self.emit(Instruction::binary(IrOp::StoreClosure, slot, value));
        Ok(())
    }

    fn load_buffer(&mut self, ir: IrOp) -> SsaResult<()> {
        let buffer = self.pop()?;
        let address = self.pop()?;
        let id = self.emit(Instruction::binary(ir, address, buffer));
        self.stack.push(id);
        Ok(())
    }

    fn store_buffer(&mut self, ir: IrOp) -> SsaResult<()> {
        let _buffer = self.pop()?;
        let address = self.pop()?;
        let value = self.pop()?;
        self.emit(Instruction::unary(IrOp::Push, value));
        self.emit(Instruction::binary(ir, address, value));
        Ok(())
    }

    /// Pop the callable and `args` arguments, re-emitting the arguments as
    /// outgoing pushes in pop order.
    fn call(&mut self, width: usize, ir: IrOp, has_result: bool) -> SsaResult<()> {
        let args = self.operand(width)? as u32;
        let func = self.pop()?;
        for _ in 0..args {
            let argument = self.pop()?;
            self.emit(Instruction::unary(IrOp::Push, argument));
        }
        let id = self.emit(Instruction::binary(ir, args, func));
        if has_result {
            self.stack.push(id);
        }
        Ok(())
    }

    fn jump(&mut self, width: usize) -> SsaResult<()> {
        let dest = self.jump_destination(width)?;
        self.flush_stack();
        self.emit(Instruction::unary(IrOp::Jump, dest));
        Ok(())
    }

    fn conditional_jump(&mut self, width: usize, ir: IrOp) -> SsaResult<()> {
        let dest = self.jump_destination(width)?;
        let condition = self.pop()?;
        self.flush_stack();
        self.emit(Instruction::binary(ir, dest, condition));
        Ok(())
    }

    /// Resolve a branch target offset to its 0-based block ID.
    fn jump_destination(&mut self, width: usize) -> SsaResult<u32> {
        let target = self.operand(width)? as usize;
        let Some(marker) = self.markers.get(target) else {
            return Err(self.error(MalformedKind::BranchOutOfRange { target }));
        };
        // the scanner marked every in-range target a leader, so the
        // numbering pass gave it a positive ID
        Ok(marker.block - 1)
    }
}

fn sign_extend(raw: u64, width: usize) -> i64 {
    match width {
        1 => raw as u8 as i8 as i64,
        2 => raw as u16 as i16 as i64,
        4 => raw as u32 as i32 as i64,
        _ => raw as i64,
    }
}
