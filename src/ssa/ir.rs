//! SSA intermediate representation
//!
//! Instructions are value-numbered per basic block: an instruction's ID is
//! its index in the block, and operands refer to earlier IDs in the same
//! block. Cross-block data flow is carried exclusively by `push`
//! instructions before a terminator and `phi` instructions at block entry.

use std::fmt;

use itertools::Itertools;
use smallvec::SmallVec;

/// Index of an instruction within its basic block
pub type ValueId = u32;

/// IR opcode enumeration
///
/// A separate opcode space from the bytecode: width-suffixed constant pushes
/// collapse into single constant ops carrying a 64-bit immediate, and stack
/// shuffling (`grab`/`store`/`swap`/`pop`) disappears entirely, resolved at
/// compile time against the symbolic stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrOp {
    // Arithmetic and bitwise
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Increment,
    Decrement,
    Xor,
    And,
    Or,
    Not,
    ShiftLeft,
    ShiftRight,
    RotateLeft,
    RotateRight,
    Invert,

    // Comparison and predicates
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    LessThanOrEquals,
    GreaterThanOrEquals,
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,

    // Constants
    Null,
    True,
    False,
    SignedInteger,
    UnsignedInteger,
    Float,
    String,
    Function,

    // Conversions and type queries
    ToSignedInteger,
    ToUnsignedInteger,
    ToFloat,
    ToString,
    GetType,
    Require,

    // Aggregates
    NewArray,
    NewObject,
    NewBuffer,
    LoadElement,
    SaveElement,
    DeleteElement,

    // Buffer loads
    LoadBufferUnsigned8,
    LoadBufferUnsigned16,
    LoadBufferUnsigned32,
    LoadBufferUnsigned64,
    LoadBufferSigned8,
    LoadBufferSigned16,
    LoadBufferSigned32,
    LoadBufferSigned64,
    LoadBufferFloat32,
    LoadBufferFloat64,

    // Buffer stores
    StoreBufferUnsigned8,
    StoreBufferUnsigned16,
    StoreBufferUnsigned32,
    StoreBufferUnsigned64,
    StoreBufferSigned8,
    StoreBufferSigned16,
    StoreBufferSigned32,
    StoreBufferSigned64,
    StoreBufferFloat32,
    StoreBufferFloat64,

    // Closures
    LoadClosure,
    StoreClosure,

    // Calls
    CallFunction,
    CallPureFunction,

    // Control transfers
    Return,
    ReturnNull,
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    JumpIfNull,
    JumpIfNotNull,

    // Block-boundary plumbing
    Phi,
    Push,
}

impl IrOp {
    /// Get the mnemonic name for this opcode
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Modulo => "modulo",
            Self::Increment => "increment",
            Self::Decrement => "decrement",
            Self::Xor => "xor",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::ShiftLeft => "shift_left",
            Self::ShiftRight => "shift_right",
            Self::RotateLeft => "rotate_left",
            Self::RotateRight => "rotate_right",
            Self::Invert => "invert",
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::LessThan => "less_than",
            Self::GreaterThan => "greater_than",
            Self::LessThanOrEquals => "less_than_or_equals",
            Self::GreaterThanOrEquals => "greater_than_or_equals",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::IsTrue => "is_true",
            Self::IsFalse => "is_false",
            Self::Null => "null",
            Self::True => "true",
            Self::False => "false",
            Self::SignedInteger => "signed_integer",
            Self::UnsignedInteger => "unsigned_integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Function => "function",
            Self::ToSignedInteger => "to_signed_integer",
            Self::ToUnsignedInteger => "to_unsigned_integer",
            Self::ToFloat => "to_float",
            Self::ToString => "to_string",
            Self::GetType => "get_type",
            Self::Require => "require",
            Self::NewArray => "new_array",
            Self::NewObject => "new_object",
            Self::NewBuffer => "new_buffer",
            Self::LoadElement => "load_element",
            Self::SaveElement => "save_element",
            Self::DeleteElement => "delete_element",
            Self::LoadBufferUnsigned8 => "load_buffer_unsigned_8",
            Self::LoadBufferUnsigned16 => "load_buffer_unsigned_16",
            Self::LoadBufferUnsigned32 => "load_buffer_unsigned_32",
            Self::LoadBufferUnsigned64 => "load_buffer_unsigned_64",
            Self::LoadBufferSigned8 => "load_buffer_signed_8",
            Self::LoadBufferSigned16 => "load_buffer_signed_16",
            Self::LoadBufferSigned32 => "load_buffer_signed_32",
            Self::LoadBufferSigned64 => "load_buffer_signed_64",
            Self::LoadBufferFloat32 => "load_buffer_float_32",
            Self::LoadBufferFloat64 => "load_buffer_float_64",
            Self::StoreBufferUnsigned8 => "store_buffer_unsigned_8",
            Self::StoreBufferUnsigned16 => "store_buffer_unsigned_16",
            Self::StoreBufferUnsigned32 => "store_buffer_unsigned_32",
            Self::StoreBufferUnsigned64 => "store_buffer_unsigned_64",
            Self::StoreBufferSigned8 => "store_buffer_signed_8",
            Self::StoreBufferSigned16 => "store_buffer_signed_16",
            Self::StoreBufferSigned32 => "store_buffer_signed_32",
            Self::StoreBufferSigned64 => "store_buffer_signed_64",
            Self::StoreBufferFloat32 => "store_buffer_float_32",
            Self::StoreBufferFloat64 => "store_buffer_float_64",
            Self::LoadClosure => "load_closure",
            Self::StoreClosure => "store_closure",
            Self::CallFunction => "call_function",
            Self::CallPureFunction => "call_pure_function",
            Self::Return => "return",
            Self::ReturnNull => "return_null",
            Self::Jump => "jump",
            Self::JumpIfTrue => "jump_if_true",
            Self::JumpIfFalse => "jump_if_false",
            Self::JumpIfNull => "jump_if_null",
            Self::JumpIfNotNull => "jump_if_not_null",
            Self::Phi => "phi",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for IrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Operand payload of an instruction
///
/// What the fields mean depends on the opcode: `Binary(a, b)` holds two
/// value references for an arithmetic op, but a block ID and a condition
/// for a conditional jump. `Instruction::value_refs` knows the difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// No operands
    None,
    /// One 32-bit operand
    Unary(u32),
    /// Two 32-bit operands
    Binary(u32, u32),
    /// One 64-bit immediate: integer, float bits, or a module table index
    Wide(u64),
}

/// A single SSA instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// The operation
    pub op: IrOp,
    /// Its operands
    pub payload: Payload,
}

impl Instruction {
    /// Instruction with no operands
    #[inline]
    pub fn nullary(op: IrOp) -> Self {
        Self { op, payload: Payload::None }
    }

    /// Instruction with one operand
    #[inline]
    pub fn unary(op: IrOp, a: u32) -> Self {
        Self { op, payload: Payload::Unary(a) }
    }

    /// Instruction with two operands
    #[inline]
    pub fn binary(op: IrOp, a: u32, b: u32) -> Self {
        Self { op, payload: Payload::Binary(a, b) }
    }

    /// Instruction with a 64-bit immediate
    #[inline]
    pub fn wide(op: IrOp, value: u64) -> Self {
        Self { op, payload: Payload::Wide(value) }
    }

    /// The operands of this instruction that reference earlier SSA values
    /// in the same block
    ///
    /// Slot indices (phi, closures), argument counts, block IDs, and
    /// immediates are excluded.
    pub fn value_refs(&self) -> SmallVec<[ValueId; 2]> {
        use IrOp::*;
        match (self.op, self.payload) {
            // Both operands are value references
            (
                Add | Subtract | Multiply | Divide | Modulo | Xor | And | Or
                | ShiftLeft | ShiftRight | RotateLeft | RotateRight
                | Equals | NotEquals | LessThan | GreaterThan
                | LessThanOrEquals | GreaterThanOrEquals
                | LoadElement | SaveElement | DeleteElement
                | LoadBufferUnsigned8 | LoadBufferUnsigned16
                | LoadBufferUnsigned32 | LoadBufferUnsigned64
                | LoadBufferSigned8 | LoadBufferSigned16
                | LoadBufferSigned32 | LoadBufferSigned64
                | LoadBufferFloat32 | LoadBufferFloat64
                | StoreBufferUnsigned8 | StoreBufferUnsigned16
                | StoreBufferUnsigned32 | StoreBufferUnsigned64
                | StoreBufferSigned8 | StoreBufferSigned16
                | StoreBufferSigned32 | StoreBufferSigned64
                | StoreBufferFloat32 | StoreBufferFloat64,
                Payload::Binary(a, b),
            ) => SmallVec::from_slice(&[a, b]),

            // Single value reference
            (
                Increment | Decrement | Not | Invert
                | IsNull | IsNotNull | IsTrue | IsFalse
                | ToSignedInteger | ToUnsignedInteger | ToFloat | ToString
                | GetType | Require | NewArray | NewBuffer | Push | Return,
                Payload::Unary(a),
            ) => SmallVec::from_slice(&[a]),

            // Second operand only: the first is a slot, count, or block ID
            (
                StoreClosure | CallFunction | CallPureFunction
                | JumpIfTrue | JumpIfFalse | JumpIfNull | JumpIfNotNull,
                Payload::Binary(_, b),
            ) => SmallVec::from_slice(&[b]),

            _ => SmallVec::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use IrOp::*;
        let mnemonic = self.op.mnemonic();
        match (self.op, self.payload) {
            (SignedInteger, Payload::Wide(v)) => write!(f, "{} {}", mnemonic, v as i64),
            (Float, Payload::Wide(v)) => write!(f, "{} {}", mnemonic, f64::from_bits(v)),
            (String | Function, Payload::Wide(v)) => write!(f, "{} #{}", mnemonic, v),
            (_, Payload::Wide(v)) => write!(f, "{} {}", mnemonic, v),
            (Phi, Payload::Unary(slot)) => write!(f, "{} {}", mnemonic, slot),
            (LoadClosure, Payload::Unary(slot)) => write!(f, "{} {}", mnemonic, slot),
            (StoreClosure, Payload::Binary(slot, v)) => {
                write!(f, "{} {} [{}]", mnemonic, slot, v)
            }
            (CallFunction | CallPureFunction, Payload::Binary(args, func)) => {
                write!(f, "{} {} [{}]", mnemonic, args, func)
            }
            (Jump, Payload::Unary(block)) => write!(f, "{} bb{}", mnemonic, block),
            (
                JumpIfTrue | JumpIfFalse | JumpIfNull | JumpIfNotNull,
                Payload::Binary(block, cond),
            ) => write!(f, "{} bb{} [{}]", mnemonic, block, cond),
            (_, Payload::Unary(a)) => write!(f, "{} [{}]", mnemonic, a),
            (_, Payload::Binary(a, b)) => write!(f, "{} [{}] [{}]", mnemonic, a, b),
            (_, Payload::None) => write!(f, "{}", mnemonic),
        }
    }
}

/// A basic block: a straight-line instruction sequence with one entry and
/// one exit
///
/// Blocks are linked in reverse creation order; `SsaFunction::blocks`
/// restores forward order.
#[derive(Debug)]
pub struct BasicBlock {
    id: u32,
    stack_entry: u32,
    instructions: Vec<Instruction>,
    next: Option<Box<BasicBlock>>,
}

impl BasicBlock {
    /// Stable identifier, 0-based in creation order
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of phi parameters consumed at entry
    #[inline]
    pub fn stack_entry(&self) -> u32 {
        self.stack_entry
    }

    /// The emitted instruction sequence
    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The block created before this one
    #[inline]
    pub fn next(&self) -> Option<&BasicBlock> {
        self.next.as_deref()
    }
}

/// The SSA form of one compiled function
#[derive(Debug, Default)]
pub struct SsaFunction {
    head: Option<Box<BasicBlock>>,
}

impl SsaFunction {
    /// An SSA function with no blocks
    pub fn empty() -> Self {
        Self::default()
    }

    /// Link a freshly sealed block in front of the chain.
    pub(crate) fn push_front(
        &mut self,
        id: u32,
        stack_entry: u32,
        instructions: Vec<Instruction>,
    ) {
        let next = self.head.take();
        self.head = Some(Box::new(BasicBlock { id, stack_entry, instructions, next }));
    }

    /// Check if the function has no blocks
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Number of basic blocks
    pub fn block_count(&self) -> usize {
        self.iter().count()
    }

    /// Iterate blocks in reverse creation order (the link order)
    pub fn iter(&self) -> Blocks<'_> {
        Blocks { next: self.head.as_deref() }
    }

    /// Collect blocks in forward creation order
    pub fn blocks(&self) -> Vec<&BasicBlock> {
        let mut blocks: Vec<&BasicBlock> = self.iter().collect();
        blocks.reverse();
        blocks
    }

    /// Render the whole function as a listing, one block per paragraph
    pub fn dump(&self) -> String {
        self.blocks()
            .iter()
            .map(|block| {
                let header = format!(
                    "block {} ({} incoming)",
                    block.id(),
                    block.stack_entry()
                );
                let body = block
                    .instructions()
                    .iter()
                    .enumerate()
                    .map(|(i, inst)| format!("  {:>3}: {}", i, inst))
                    .join("\n");
                if body.is_empty() {
                    header
                } else {
                    format!("{}\n{}", header, body)
                }
            })
            .join("\n")
    }
}

impl Drop for SsaFunction {
    fn drop(&mut self) {
        // Unlink iteratively; the chain can be long
        let mut current = self.head.take();
        while let Some(mut block) = current {
            current = block.next.take();
        }
    }
}

/// Iterator over a block chain
#[derive(Debug)]
pub struct Blocks<'a> {
    next: Option<&'a BasicBlock>,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = &'a BasicBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        self.next = block.next();
        Some(block)
    }
}
