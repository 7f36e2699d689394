//! Builder for constructing bytecode functions
//!
//! `FunctionBuilder` is the append-only emitter front ends and tests use to
//! produce well-formed instruction streams without hand-packing bytes.
//! Operands are encoded little-endian.

use super::function::Function;
use super::opcodes::Opcode;

/// Builder for constructing bytecode `Function`s
#[derive(Debug)]
pub struct FunctionBuilder {
    code: Vec<u8>,
    parameters: u32,
}

/// A forward-jump operand awaiting its target
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel {
    offset: usize,
    width: usize,
}

impl FunctionBuilder {
    /// Create a new function builder
    pub fn new(parameters: u32) -> Self {
        Self {
            code: Vec::with_capacity(64),
            parameters,
        }
    }

    /// Get the current bytecode offset
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a single opcode
    pub fn emit(&mut self, opcode: Opcode) {
        self.code.push(opcode.to_byte());
    }

    /// Emit an opcode with a 1-byte operand
    pub fn emit_byte(&mut self, opcode: Opcode, operand: u8) {
        self.code.push(opcode.to_byte());
        self.code.push(operand);
    }

    /// Emit an opcode with a 2-byte operand
    pub fn emit_u16(&mut self, opcode: Opcode, operand: u16) {
        self.code.push(opcode.to_byte());
        self.code.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emit an opcode with a 4-byte operand
    pub fn emit_u32(&mut self, opcode: Opcode, operand: u32) {
        self.code.push(opcode.to_byte());
        self.code.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emit an opcode with an 8-byte operand
    pub fn emit_u64(&mut self, opcode: Opcode, operand: u64) {
        self.code.push(opcode.to_byte());
        self.code.extend_from_slice(&operand.to_le_bytes());
    }

    /// Emit raw bytes
    pub fn emit_raw(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    // === Constants ===

    /// Emit the narrowest signed-integer push that holds `value`
    pub fn push_integer(&mut self, value: i64) {
        if let Ok(v) = i8::try_from(value) {
            self.emit_byte(Opcode::PushInteger8, v as u8);
        } else if let Ok(v) = i16::try_from(value) {
            self.emit_u16(Opcode::PushInteger16, v as u16);
        } else if let Ok(v) = i32::try_from(value) {
            self.emit_u32(Opcode::PushInteger32, v as u32);
        } else {
            self.emit_u64(Opcode::PushInteger64, value as u64);
        }
    }

    /// Emit the narrowest unsigned-integer push that holds `value`
    pub fn push_unsigned_integer(&mut self, value: u64) {
        if let Ok(v) = u8::try_from(value) {
            self.emit_byte(Opcode::PushUnsignedInteger8, v);
        } else if let Ok(v) = u16::try_from(value) {
            self.emit_u16(Opcode::PushUnsignedInteger16, v);
        } else if let Ok(v) = u32::try_from(value) {
            self.emit_u32(Opcode::PushUnsignedInteger32, v);
        } else {
            self.emit_u64(Opcode::PushUnsignedInteger64, value);
        }
    }

    /// Emit a float push
    pub fn push_float(&mut self, value: f64) {
        self.emit_u64(Opcode::PushFloat, value.to_bits());
    }

    /// Emit the narrowest string push for a module table index
    pub fn push_string(&mut self, index: u32) {
        if let Ok(i) = u8::try_from(index) {
            self.emit_byte(Opcode::PushString8, i);
        } else if let Ok(i) = u16::try_from(index) {
            self.emit_u16(Opcode::PushString16, i);
        } else {
            self.emit_u32(Opcode::PushString32, index);
        }
    }

    /// Emit a function-reference push for a module table index
    pub fn push_function(&mut self, index: u32) {
        self.emit_u32(Opcode::PushFunction, index);
    }

    // === Jumps ===

    /// Emit a jump with a placeholder target, returns a label to patch later
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpLabel {
        debug_assert!(opcode.is_jump());
        self.code.push(opcode.to_byte());
        let offset = self.code.len();
        let width = opcode.operand_width();
        self.code.extend(std::iter::repeat(0xFF).take(width));
        JumpLabel { offset, width }
    }

    /// Patch a jump label to target the current position
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.code.len();
        self.patch_jump_to(label, target);
    }

    /// Patch a jump label to target a known offset
    pub fn patch_jump_to(&mut self, label: JumpLabel, target: usize) {
        let max = match label.width {
            1 => u8::MAX as usize,
            2 => u16::MAX as usize,
            _ => u32::MAX as usize,
        };
        if target > max {
            panic!(
                "Jump target {:#x} does not fit a {}-byte operand",
                target, label.width
            );
        }
        let bytes = (target as u64).to_le_bytes();
        self.code[label.offset..label.offset + label.width]
            .copy_from_slice(&bytes[..label.width]);
    }

    /// Emit a jump to a known target, choosing the narrowest encoding
    pub fn jump_to(&mut self, opcode: Opcode, target: usize) {
        debug_assert!(opcode.is_jump());
        let label = self.emit_jump(opcode);
        self.patch_jump_to(label, target);
    }

    /// Consume the builder and produce the function
    pub fn build(self) -> Function {
        Function::new(self.parameters, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_widths() {
        let mut b = FunctionBuilder::new(0);
        b.push_integer(42);
        b.push_integer(-1000);
        b.push_integer(1 << 20);
        b.push_integer(1 << 40);
        b.emit(Opcode::Return);
        let f = b.build();
        assert_eq!(f.code()[0], Opcode::PushInteger8.to_byte());
        assert_eq!(f.code()[1], 42);
        assert_eq!(f.code()[2], Opcode::PushInteger16.to_byte());
        // little-endian
        assert_eq!(
            i16::from_le_bytes([f.code()[3], f.code()[4]]),
            -1000
        );
        assert_eq!(f.code()[5], Opcode::PushInteger32.to_byte());
        assert_eq!(f.code()[10], Opcode::PushInteger64.to_byte());
        assert_eq!(*f.code().last().unwrap(), Opcode::Return.to_byte());
    }

    #[test]
    fn test_jump_patching() {
        let mut b = FunctionBuilder::new(0);
        b.emit(Opcode::PushTrue);
        let label = b.emit_jump(Opcode::JumpIfFalse8);
        b.push_integer(1);
        b.emit(Opcode::Return);
        b.patch_jump(label);
        b.push_integer(2);
        b.emit(Opcode::Return);
        let f = b.build();

        // operand byte of the conditional jump points at the second constant
        assert_eq!(f.code()[2], 6);
        assert_eq!(f.code()[6], Opcode::PushInteger8.to_byte());
    }

    #[test]
    fn test_string_width_selection() {
        let mut b = FunctionBuilder::new(0);
        b.push_string(3);
        b.push_string(300);
        b.push_string(70_000);
        let f = b.build();
        assert_eq!(f.code()[0], Opcode::PushString8.to_byte());
        assert_eq!(f.code()[2], Opcode::PushString16.to_byte());
        assert_eq!(f.code()[5], Opcode::PushString32.to_byte());
    }
}
