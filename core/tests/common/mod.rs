use cinder_core::core::{Bus, BusMaster, bus::InterruptState, bus::split24};

/// Minimal bus for CPU testing: bank 0 is a flat 64KB read/write memory
/// (including the vector area), other banks are open bus. Interrupt lines
/// are plain test-settable fields.
pub struct TestBus {
    pub memory: Vec<u8>,
    pub irq: bool,
    pub nmi: bool,
}

impl TestBus {
    pub fn new() -> Self {
        Self {
            memory: vec![0; 0x1_0000],
            irq: false,
            nmi: false,
        }
    }

    /// Load a program as little-endian 16-bit words.
    pub fn load_words(&mut self, offset: u16, words: &[u16]) {
        for (i, word) in words.iter().enumerate() {
            let at = offset as usize + i * 2;
            self.memory[at] = *word as u8;
            self.memory[at + 1] = (*word >> 8) as u8;
        }
    }
}

impl Bus for TestBus {
    fn read_u8(&mut self, _master: BusMaster, addr: u32) -> u8 {
        let (bank, offset) = split24(addr);
        if bank == 0 { self.memory[offset as usize] } else { 0 }
    }

    fn write_u8(&mut self, _master: BusMaster, addr: u32, data: u8) {
        let (bank, offset) = split24(addr);
        if bank == 0 {
            self.memory[offset as usize] = data;
        }
    }

    fn check_interrupts(&self, _target: BusMaster) -> InterruptState {
        InterruptState {
            nmi: self.nmi,
            irq: self.irq,
        }
    }
}
