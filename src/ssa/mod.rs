//! SSA compilation pass
//!
//! Compiles one bytecode function at a time into a value-numbered,
//! basic-block-structured intermediate representation. The pass runs in
//! three phases over the instruction stream:
//!
//! 1. `scanner`: per-byte stack-effect analysis and basic-block discovery
//! 2. block numbering: contiguous IDs for the leaders, in offset order
//! 3. `translator`: symbolic execution turning stack traffic into explicit
//!    value references, with `push`/`phi` bridges at block boundaries
//!
//! The pass is synchronous and self-contained: it only reads the function's
//! bytecode and its module's string and function tables, and on any
//! malformed input it returns an error with nothing allocated left behind.

use tracing::trace;

use crate::bytecode::{Function, Module};

mod error;
mod ir;
mod scanner;
mod stack;
mod translator;


pub use error::{MalformedBytecode, MalformedKind, SsaResult};
pub use ir::{BasicBlock, Blocks, Instruction, IrOp, Payload, SsaFunction, ValueId};
pub use stack::ValueStack;

/// Compile one function to SSA form.
///
/// Returns the basic-block chain on success. A function with no bytecode
/// compiles to an empty `SsaFunction`. Any malformed input is rejected
/// with the offending offset; nothing partial escapes.
///
/// # Example
///
/// ```rust
/// use talonvm::bytecode::{FunctionBuilder, Module, Opcode};
/// use talonvm::ssa::compile_function;
///
/// let mut builder = FunctionBuilder::new(0);
/// builder.push_integer(1);
/// builder.push_integer(2);
/// builder.emit(Opcode::Add);
/// builder.emit(Opcode::Return);
///
/// let module = Module::new();
/// let ssa = compile_function(&module, &builder.build()).unwrap();
/// assert_eq!(ssa.block_count(), 1);
/// ```
pub fn compile_function(module: &Module, function: &Function) -> SsaResult<SsaFunction> {
    if function.is_empty() {
        return Ok(SsaFunction::empty());
    }

    trace!(
        target: "talonvm::ssa",
        len = function.len(),
        parameters = function.parameters(),
        "compiling function"
    );

    let mut info = scanner::scan(function)?;
    let numbered = scanner::number_blocks(&mut info.markers)?;
    debug_assert_eq!(numbered, info.block_count);
    translator::translate(module, function, &info.markers)
}
