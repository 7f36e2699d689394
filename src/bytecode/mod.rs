//! Bytecode representation for the Talon VM
//!
//! This module defines the instruction set (`Opcode`), the function and
//! module containers the SSA compiler consumes, and a builder for
//! producing instruction streams.

mod builder;
mod function;
mod opcodes;

pub use builder::{FunctionBuilder, JumpLabel};
pub use function::{Function, Module};
pub use opcodes::Opcode;
