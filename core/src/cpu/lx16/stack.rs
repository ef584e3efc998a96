//! Stack operations, RET/RTI, and the interrupt entry sequence.
//!
//! The stack lives in bank-0 WRAM and grows downward: PUSH pre-decrements
//! SP by 2 and writes; POP reads then post-increments. Interrupt entry
//! pushes pc_offset, pc_bank, flags (in that order); RTI pops in reverse.

use super::{CYC_RET, CYC_RTI, Lx16, StatusFlag};
use crate::core::{Bus, BusMaster, bus::addr24};

impl Lx16 {
    pub(crate) fn push_u16<B: Bus + ?Sized>(&mut self, bus: &mut B, master: BusMaster, value: u16) {
        self.sp = self.sp.wrapping_sub(2);
        bus.write_u16(master, addr24(0, self.sp), value);
    }

    pub(crate) fn pop_u16<B: Bus + ?Sized>(&mut self, bus: &mut B, master: BusMaster) -> u16 {
        let value = bus.read_u16(master, addr24(0, self.sp));
        self.sp = self.sp.wrapping_add(2);
        value
    }

    /// RET: pop the return offset pushed by CALL.
    pub(crate) fn op_ret<B: Bus + ?Sized>(&mut self, bus: &mut B, master: BusMaster) -> u32 {
        self.pc_offset = self.pop_u16(bus, master) & !1;
        CYC_RET
    }

    /// RTI: pop flags, then PC bank, then PC offset.
    pub(crate) fn op_rti<B: Bus + ?Sized>(&mut self, bus: &mut B, master: BusMaster) -> u32 {
        self.flags = self.pop_u16(bus, master) as u8;
        self.pc_bank = self.pop_u16(bus, master) as u8;
        self.pc_offset = self.pop_u16(bus, master) & !1;
        CYC_RTI
    }

    /// Accept an interrupt: stack the return context, mask further IRQs,
    /// and load the handler offset from the bank-0 vector.
    pub(crate) fn service_interrupt<B: Bus + ?Sized>(
        &mut self,
        bus: &mut B,
        master: BusMaster,
        vector: u16,
    ) {
        let offset = self.pc_offset;
        let bank = self.pc_bank as u16;
        let flags = self.flags as u16;
        self.push_u16(bus, master, offset);
        self.push_u16(bus, master, bank);
        self.push_u16(bus, master, flags);
        self.set_flag(StatusFlag::I, true);
        self.pc_bank = 0;
        self.pc_offset = bus.read_u16(master, addr24(0, vector)) & !1;
    }
}
