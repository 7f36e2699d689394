//! Talon VM - SSA compilation backend
//!
//! This library compiles the Talon VM's stack-oriented bytecode into a
//! value-numbered, basic-block-structured intermediate representation
//! suitable for further optimization or native code generation.
//!
//! # Architecture
//!
//! The pipeline consists of two layers:
//!
//! 1. **Bytecode model** (`bytecode` module)
//!    - The instruction set with per-opcode operand widths and stack effects
//!    - Function and module containers (bytecode buffers, string and
//!      function tables)
//!    - A builder for producing well-formed instruction streams
//!
//! 2. **SSA compiler** (`ssa` module)
//!    - Scans bytecode for basic-block leaders and abstract stack depths
//!    - Symbolically executes each block, turning stack pushes and pops
//!      into explicit value references
//!    - Bridges cross-block data flow with `push`/`phi` pairs, so the
//!      block list doubles as the control-flow graph
//!
//! # Example
//!
//! ```rust
//! use talonvm::bytecode::{FunctionBuilder, Module, Opcode};
//! use talonvm::ssa::compile_function;
//!
//! // (1 + 2) returned to the caller
//! let mut builder = FunctionBuilder::new(0);
//! builder.push_integer(1);
//! builder.push_integer(2);
//! builder.emit(Opcode::Add);
//! builder.emit(Opcode::Return);
//!
//! let module = Module::new();
//! let ssa = compile_function(&module, &builder.build()).unwrap();
//! println!("{}", ssa.dump());
//! ```
//!
//! Compilation is synchronous and per-function; disjoint functions may be
//! compiled from different threads. Malformed bytecode is rejected with
//! a [`ssa::MalformedBytecode`] error naming the offending offset.

pub mod bytecode;
pub mod ssa;

pub use bytecode::{Function, FunctionBuilder, Module, Opcode};
pub use ssa::{
    compile_function, BasicBlock, Instruction, IrOp, MalformedBytecode, MalformedKind,
    Payload, SsaFunction, SsaResult, ValueId,
};
