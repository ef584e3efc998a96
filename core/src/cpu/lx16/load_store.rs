//! MOV instruction family (opcode 0x1).
//!
//! | Mode | Operation                                  |
//! |------|--------------------------------------------|
//! | 0    | reg1 <- reg2                               |
//! | 1    | reg1 <- immediate word                     |
//! | 2    | reg1 <- [DBR:reg2] (16-bit load)           |
//! | 3    | [DBR:reg1] <- reg2 (16-bit store)          |
//! | 4    | PUSH reg1                                  |
//! | 5    | POP reg1                                   |
//! | 6    | reg1 <- [DBR:reg2] (8-bit, zero-extended)  |
//! | 7    | [DBR:reg1] <- low byte of reg2             |
//!
//! MOV never touches the flags.

use super::{CYC_ALU_IMM, CYC_ALU_REG, CYC_MEM, Lx16};
use crate::core::{Bus, BusMaster, bus::addr24};

impl Lx16 {
    pub(crate) fn op_mov<B: Bus + ?Sized>(
        &mut self,
        mode: u8,
        r1: usize,
        r2: usize,
        bus: &mut B,
        master: BusMaster,
    ) -> u32 {
        match mode {
            0 => {
                self.r[r1] = self.r[r2];
                CYC_ALU_REG
            }
            1 => {
                self.r[r1] = self.fetch_word(bus, master);
                CYC_ALU_IMM
            }
            2 => {
                self.r[r1] = bus.read_u16(master, addr24(self.dbr, self.r[r2]));
                CYC_MEM
            }
            3 => {
                bus.write_u16(master, addr24(self.dbr, self.r[r1]), self.r[r2]);
                CYC_MEM
            }
            4 => {
                let value = self.r[r1];
                self.push_u16(bus, master, value);
                CYC_MEM
            }
            5 => {
                self.r[r1] = self.pop_u16(bus, master);
                CYC_MEM
            }
            6 => {
                self.r[r1] = bus.read_u8(master, addr24(self.dbr, self.r[r2])) as u16;
                CYC_MEM
            }
            7 => {
                bus.write_u8(master, addr24(self.dbr, self.r[r1]), self.r[r2] as u8);
                CYC_MEM
            }
            _ => CYC_ALU_REG, // Unassigned MOV modes execute as NOP
        }
    }
}
