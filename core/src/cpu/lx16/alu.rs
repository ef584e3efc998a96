//! ALU instruction group: ADD, SUB, MUL, DIV, AND, OR, XOR, NOT, shifts.
//!
//! Mode 0 takes the source from reg2; mode 1 fetches an immediate word.
//! Shift counts come from the low 4 bits of the instruction word itself.

use super::{CYC_ALU_IMM, CYC_ALU_REG, Lx16, StatusFlag};
use crate::core::{Bus, BusMaster};

impl Lx16 {
    #[inline]
    pub(crate) fn set_zn(&mut self, value: u16) {
        self.set_flag(StatusFlag::Z, value == 0);
        self.set_flag(StatusFlag::N, value & 0x8000 != 0);
    }

    /// 16-bit two's-complement add: sets Z, N, C (carry out), V (signed overflow).
    pub(crate) fn perform_add(&mut self, a: u16, b: u16) -> u16 {
        let wide = a as u32 + b as u32;
        let result = wide as u16;
        self.set_zn(result);
        self.set_flag(StatusFlag::C, wide > 0xFFFF);
        self.set_flag(StatusFlag::V, (!(a ^ b) & (a ^ result) & 0x8000) != 0);
        result
    }

    /// 16-bit subtract: sets Z, N, C (borrow out), V (signed overflow).
    pub(crate) fn perform_sub(&mut self, a: u16, b: u16) -> u16 {
        let result = a.wrapping_sub(b);
        self.set_zn(result);
        self.set_flag(StatusFlag::C, a < b);
        self.set_flag(StatusFlag::V, ((a ^ b) & (a ^ result) & 0x8000) != 0);
        result
    }

    /// Low 16 bits of the 16x16 product. C and V cleared.
    fn perform_mul(&mut self, a: u16, b: u16) -> u16 {
        let result = a.wrapping_mul(b);
        self.set_zn(result);
        self.set_flag(StatusFlag::C, false);
        self.set_flag(StatusFlag::V, false);
        result
    }

    /// Truncating unsigned division. Division by zero saturates to 0xFFFF
    /// and raises the D status flag instead of trapping; a successful
    /// division clears it again.
    fn perform_div(&mut self, a: u16, b: u16) -> u16 {
        let result = if b == 0 {
            self.set_flag(StatusFlag::D, true);
            0xFFFF
        } else {
            self.set_flag(StatusFlag::D, false);
            a / b
        };
        self.set_zn(result);
        self.set_flag(StatusFlag::C, false);
        self.set_flag(StatusFlag::V, false);
        result
    }

    /// Bitwise result: sets Z and N, clears C and V.
    fn set_logic_flags(&mut self, result: u16) -> u16 {
        self.set_zn(result);
        self.set_flag(StatusFlag::C, false);
        self.set_flag(StatusFlag::V, false);
        result
    }

    /// Dispatch for opcodes 0x2-0x9. `opcode` selects the operation,
    /// `mode` 0 = reg-reg, 1 = reg-imm. NOT (0x9) is unary on reg1.
    pub(crate) fn op_alu<B: Bus + ?Sized>(
        &mut self,
        opcode: u8,
        mode: u8,
        r1: usize,
        r2: usize,
        bus: &mut B,
        master: BusMaster,
    ) -> u32 {
        let (src, cost) = if mode == 1 {
            (self.fetch_word(bus, master), CYC_ALU_IMM)
        } else {
            (self.r[r2], CYC_ALU_REG)
        };
        let dst = self.r[r1];

        self.r[r1] = match opcode {
            0x2 => self.perform_add(dst, src),
            0x3 => self.perform_sub(dst, src),
            0x4 => self.perform_mul(dst, src),
            0x5 => self.perform_div(dst, src),
            0x6 => self.set_logic_flags(dst & src),
            0x7 => self.set_logic_flags(dst | src),
            0x8 => self.set_logic_flags(dst ^ src),
            0x9 => self.set_logic_flags(!dst),
            _ => unreachable!(),
        };
        cost
    }

    /// SHL: logical shift left, count from the instruction's low 4 bits.
    /// C holds the last bit shifted out (0 for a zero count).
    pub(crate) fn op_shl(&mut self, r1: usize, count: u32) -> u32 {
        let value = self.r[r1];
        let result = if count == 0 {
            self.set_flag(StatusFlag::C, false);
            value
        } else {
            self.set_flag(StatusFlag::C, (value >> (16 - count)) & 1 != 0);
            value << count
        };
        self.set_zn(result);
        self.set_flag(StatusFlag::V, false);
        self.r[r1] = result;
        CYC_ALU_REG
    }

    /// SHR: logical shift right, count from the instruction's low 4 bits.
    pub(crate) fn op_shr(&mut self, r1: usize, count: u32) -> u32 {
        let value = self.r[r1];
        let result = if count == 0 {
            self.set_flag(StatusFlag::C, false);
            value
        } else {
            self.set_flag(StatusFlag::C, (value >> (count - 1)) & 1 != 0);
            value >> count
        };
        self.set_zn(result);
        self.set_flag(StatusFlag::V, false);
        self.r[r1] = result;
        CYC_ALU_REG
    }
}
