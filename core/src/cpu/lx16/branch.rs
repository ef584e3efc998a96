//! Compare/branch group (opcode 0xC), JMP (0xD), and CALL (0xE).
//!
//! Branches, JMP, and CALL all consume a signed 16-bit offset word. The
//! target is `PC_at_instruction + 4 + offset` — by the time the offset word
//! has been fetched, PC already sits at `PC_at_instruction + 4`, so the
//! transfer is a plain add. Bit 0 of the result is cleared to keep the
//! program counter word-aligned. The matching assembler helper computes
//! `offset = target - current - 4`.

use super::{
    CYC_ALU_IMM, CYC_ALU_REG, CYC_BRANCH_NOT, CYC_BRANCH_TAKEN, CYC_CALL, CYC_JMP, Lx16,
    StatusFlag,
};
use crate::core::{Bus, BusMaster};

impl Lx16 {
    /// Apply a relative control transfer. PC must already be past the
    /// instruction and its offset word.
    #[inline]
    pub(crate) fn branch_relative(&mut self, offset: i16) {
        self.pc_offset = self.pc_offset.wrapping_add(offset as u16) & !1;
    }

    /// Opcode 0xC: mode 0 = CMP reg-reg, mode 7 = CMP reg-imm,
    /// modes 1-6 = BEQ, BNE, BGT, BLT, BGE, BLE (signed conditions).
    pub(crate) fn op_compare_branch<B: Bus + ?Sized>(
        &mut self,
        mode: u8,
        r1: usize,
        r2: usize,
        bus: &mut B,
        master: BusMaster,
    ) -> u32 {
        match mode {
            0 => {
                let (a, b) = (self.r[r1], self.r[r2]);
                self.perform_sub(a, b);
                CYC_ALU_REG
            }
            7 => {
                let b = self.fetch_word(bus, master);
                let a = self.r[r1];
                self.perform_sub(a, b);
                CYC_ALU_IMM
            }
            1..=6 => {
                let offset = self.fetch_word(bus, master) as i16;
                let z = self.flag(StatusFlag::Z);
                let n = self.flag(StatusFlag::N);
                let v = self.flag(StatusFlag::V);
                let taken = match mode {
                    1 => z,            // BEQ
                    2 => !z,           // BNE
                    3 => !z && n == v, // BGT
                    4 => n != v,       // BLT
                    5 => n == v,       // BGE
                    _ => z || n != v,  // BLE
                };
                if taken {
                    self.branch_relative(offset);
                    CYC_BRANCH_TAKEN
                } else {
                    CYC_BRANCH_NOT
                }
            }
            _ => CYC_ALU_REG,
        }
    }

    /// JMP: unconditional relative transfer within the current bank.
    pub(crate) fn op_jmp<B: Bus + ?Sized>(&mut self, bus: &mut B, master: BusMaster) -> u32 {
        let offset = self.fetch_word(bus, master) as i16;
        self.branch_relative(offset);
        CYC_JMP
    }

    /// CALL: push the return offset (the word after the operand), then branch.
    pub(crate) fn op_call<B: Bus + ?Sized>(&mut self, bus: &mut B, master: BusMaster) -> u32 {
        let offset = self.fetch_word(bus, master) as i16;
        let return_offset = self.pc_offset;
        self.push_u16(bus, master, return_offset);
        self.branch_relative(offset);
        CYC_CALL
    }
}
