//! Cinder-16 console system: memory bus, IO dispatch, and master-clock
//! scheduler tying the CPU, PPU, APU, and controllers together.
//!
//! The system owns every subsystem and is the single [`Bus`] implementor;
//! interrupt lines are plain bits polled by the CPU at instruction
//! boundaries, so there are no callbacks or shared-ownership cycles.
//!
//! Memory map:
//!
//! | Bank    | Offset        | Region                                     |
//! |---------|---------------|--------------------------------------------|
//! | 0       | 0x0000-0x7FFF | WRAM (32 KiB)                              |
//! | 0       | 0x8000-0x8FFF | PPU registers                              |
//! | 0       | 0x9000-0x9FFF | APU registers (FM extension at 0x9100+)    |
//! | 0       | 0xA000-0xAFFF | Controller registers                       |
//! | 1-125   | 0x8000-0xFFFF | Cartridge ROM (LoROM)                      |
//! | 126-127 | 0x0000-0xFFFF | Extended WRAM (128 KiB)                    |
//! | other   | any           | Open bus: reads 0, writes dropped          |
//!
//! Scheduling: `step_cycles(n)` runs the CPU for n cycles (instruction-
//! atomic, carrying overshoot into the next batch), then paces PPU dots
//! with a 32.32 fixed-point accumulator, feeds the DMA engine up to one
//! byte per granted cycle, clocks the FM timers, and finally emits every
//! APU sample whose scheduled cycle falls inside the batch — also on a
//! 32.32 accumulator, so the long-run sample rate is exact. `run_frame`
//! issues one frame of cycles in small batches so VBlank polling and OAM
//! write-protection interleave with CPU execution the way the hardware
//! timing grid does.

use cinder_core::core::bus::{InterruptState, addr24, split24};
use cinder_core::core::machine::{InputButton, Machine};
use cinder_core::core::{Bus, BusMaster};
use cinder_core::cpu::lx16::Lx16;
use cinder_core::cpu::state::Lx16State;
use cinder_core::cpu::{Cpu, CpuStateTrait};
use cinder_core::device::apu::{Apu, SAMPLE_RATE};
use cinder_core::device::gamepad::GamePad;
use cinder_core::device::ppu::{Ppu, SCREEN_HEIGHT, SCREEN_WIDTH};

use crate::cartridge::Cartridge;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Master/CPU clock in Hz.
pub const CPU_SPEED: u64 = 7_670_000;
/// Output sample rate in Hz.
pub const APU_SPEED: u64 = SAMPLE_RATE as u64;
/// Master cycles per 60 Hz frame.
pub const CYCLES_PER_FRAME: u64 = CPU_SPEED / 60;

/// PPU dot rate: one full 220x261 grid per 60 Hz frame.
const DOTS_PER_SECOND: u64 = 220 * 261 * 60;
/// 32.32 fixed-point dots advanced per master cycle.
const DOT_STEP: u64 = (DOTS_PER_SECOND << 32) / CPU_SPEED;
/// 32.32 fixed-point master cycles between APU samples.
const SAMPLE_PERIOD: u64 = (CPU_SPEED << 32) / APU_SPEED;

/// Sub-frame scheduling grain: fine enough that ROM loops polling VBlank
/// or racing the OAM protection window observe the PPU mid-frame.
const SCHED_BATCH: u64 = 64;

// ---------------------------------------------------------------------------
// Input button IDs (controller 2 at +16)
// ---------------------------------------------------------------------------

pub const INPUT_UP: u8 = 0;
pub const INPUT_DOWN: u8 = 1;
pub const INPUT_LEFT: u8 = 2;
pub const INPUT_RIGHT: u8 = 3;
pub const INPUT_A: u8 = 4;
pub const INPUT_B: u8 = 5;
pub const INPUT_C: u8 = 6;
pub const INPUT_L: u8 = 7;
pub const INPUT_R: u8 = 8;
pub const INPUT_SELECT: u8 = 9;
pub const INPUT_START: u8 = 10;
pub const INPUT_P2_BASE: u8 = 16;

const CINDER16_INPUT_MAP: &[InputButton] = &[
    InputButton { id: INPUT_UP, name: "P1 Up" },
    InputButton { id: INPUT_DOWN, name: "P1 Down" },
    InputButton { id: INPUT_LEFT, name: "P1 Left" },
    InputButton { id: INPUT_RIGHT, name: "P1 Right" },
    InputButton { id: INPUT_A, name: "P1 A" },
    InputButton { id: INPUT_B, name: "P1 B" },
    InputButton { id: INPUT_C, name: "P1 C" },
    InputButton { id: INPUT_L, name: "P1 L" },
    InputButton { id: INPUT_R, name: "P1 R" },
    InputButton { id: INPUT_SELECT, name: "P1 Select" },
    InputButton { id: INPUT_START, name: "P1 Start" },
    InputButton { id: INPUT_P2_BASE + INPUT_UP, name: "P2 Up" },
    InputButton { id: INPUT_P2_BASE + INPUT_DOWN, name: "P2 Down" },
    InputButton { id: INPUT_P2_BASE + INPUT_LEFT, name: "P2 Left" },
    InputButton { id: INPUT_P2_BASE + INPUT_RIGHT, name: "P2 Right" },
    InputButton { id: INPUT_P2_BASE + INPUT_A, name: "P2 A" },
    InputButton { id: INPUT_P2_BASE + INPUT_B, name: "P2 B" },
    InputButton { id: INPUT_P2_BASE + INPUT_C, name: "P2 C" },
    InputButton { id: INPUT_P2_BASE + INPUT_L, name: "P2 L" },
    InputButton { id: INPUT_P2_BASE + INPUT_R, name: "P2 R" },
    InputButton { id: INPUT_P2_BASE + INPUT_SELECT, name: "P2 Select" },
    InputButton { id: INPUT_P2_BASE + INPUT_START, name: "P2 Start" },
];

const WRAM_SIZE: usize = 0x8000;
const EXWRAM_SIZE: usize = 0x2_0000;

/// The Cinder-16 fantasy console.
pub struct Cinder16System {
    cpu: Lx16,
    cart: Option<Cartridge>,

    wram: Box<[u8]>,
    exwram: Box<[u8]>,

    ppu: Ppu,
    apu: Apu,
    pads: [GamePad; 2],

    master_cycle: u64,
    /// 32.32 fractional dots owed to the PPU.
    dot_accumulator: u64,
    /// 32.32 master cycles until the next APU sample.
    sample_countdown: u64,
    /// Cycles the CPU has already executed beyond the batch boundary.
    cpu_ahead: u64,
}

impl Cinder16System {
    pub fn new() -> Self {
        Self {
            cpu: Lx16::new(),
            cart: None,
            wram: vec![0; WRAM_SIZE].into_boxed_slice(),
            exwram: vec![0; EXWRAM_SIZE].into_boxed_slice(),
            ppu: Ppu::new(),
            apu: Apu::new(SAMPLE_RATE),
            pads: [GamePad::new(), GamePad::new()],
            master_cycle: 0,
            dot_accumulator: 0,
            sample_countdown: SAMPLE_PERIOD,
            cpu_ahead: 0,
        }
    }

    /// Insert a cartridge and perform a power-on reset.
    pub fn load_cartridge(&mut self, cart: Cartridge) {
        self.cart = Some(cart);
        self.reset();
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cart.as_ref()
    }

    pub fn cpu_state(&self) -> Lx16State {
        self.cpu.snapshot()
    }

    pub fn cpu(&self) -> &Lx16 {
        &self.cpu
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn apu_mut(&mut self) -> &mut Apu {
        &mut self.apu
    }

    pub fn master_cycle(&self) -> u64 {
        self.master_cycle
    }

    /// Replace a controller's live button mask wholesale.
    pub fn set_buttons(&mut self, controller: usize, mask: u16) {
        if controller < 2 {
            self.pads[controller].set_buttons(mask);
        }
    }

    pub fn framebuffer(&self) -> &[u32] {
        self.ppu.framebuffer()
    }

    /// Drain the APU sample buffer (mono i16 at 44.1 kHz).
    pub fn drain_audio(&mut self) -> Vec<i16> {
        self.apu.drain_audio()
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    /// Advance the whole system by `n` master cycles: CPU first, then PPU
    /// dots (with the DMA engine fed from the same budget), FM timers, and
    /// the APU samples scheduled inside the batch. This ordering is
    /// normative — ROM code relies on CPU writes being visible to the
    /// PPU's next dot.
    pub fn step_cycles(&mut self, n: u64) {
        self.run_cpu(n);
        self.advance_subsystems(n);
    }

    /// Execute exactly one CPU instruction, then realign the rest of the
    /// system with the cycles it consumed.
    pub fn step_instruction(&mut self) {
        let mut cpu = std::mem::take(&mut self.cpu);
        let spent = cpu.step_instruction(self, BusMaster::Cpu);
        self.cpu = cpu;
        self.advance_subsystems(spent as u64);
    }

    fn run_cpu(&mut self, n: u64) {
        if self.cpu_ahead >= n {
            self.cpu_ahead -= n;
            return;
        }
        let mut budget = n - self.cpu_ahead;
        self.cpu_ahead = 0;

        let mut cpu = std::mem::take(&mut self.cpu);
        while budget > 0 {
            if cpu.is_halted() {
                // A halted CPU burns the remaining batch; PPU/APU carry on.
                break;
            }
            let spent = cpu.step_instruction(self, BusMaster::Cpu) as u64;
            if spent >= budget {
                self.cpu_ahead = spent - budget;
                break;
            }
            budget -= spent;
        }
        self.cpu = cpu;
    }

    fn advance_subsystems(&mut self, n: u64) {
        // PPU dots at the fixed-point dot rate.
        self.dot_accumulator += DOT_STEP * n;
        let mut dots = self.dot_accumulator >> 32;
        self.dot_accumulator &= 0xFFFF_FFFF;
        while dots > 0 {
            if self.ppu.tick() {
                // Frame wrap: run the APU's per-frame timers.
                self.apu.update_frame();
            }
            dots -= 1;
        }

        // DMA moves at most one byte per granted master cycle.
        self.run_dma(n);

        // FM timers and the busy latch run on raw master cycles.
        self.apu.step_cycles(n);

        // Emit every sample scheduled inside this batch.
        let mut elapsed = n << 32;
        while elapsed >= self.sample_countdown {
            elapsed -= self.sample_countdown;
            self.apu.emit_sample();
            self.sample_countdown = SAMPLE_PERIOD;
        }
        self.sample_countdown -= elapsed;

        self.master_cycle += n;
    }

    fn run_dma(&mut self, cycles: u64) {
        let mut remaining = cycles;
        while remaining > 0 && self.ppu.dma_active() {
            let byte = if self.ppu.dma_is_fill() {
                self.ppu.dma_fill_value()
            } else {
                let (bank, offset) = self.ppu.dma_source();
                self.read_u8(BusMaster::Dma, addr24(bank, offset))
            };
            self.ppu.dma_step(byte);
            remaining -= 1;
        }
    }
}

impl Default for Cinder16System {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

impl Bus for Cinder16System {
    fn read_u8(&mut self, master: BusMaster, addr: u32) -> u8 {
        let (bank, offset) = split24(addr);
        match bank {
            0 => match offset {
                0x0000..=0x7FFF => self.wram[offset as usize],
                // IO registers read as open bus for the DMA engine so a
                // misprogrammed source cannot trigger register side effects.
                0x8000..=0x8FFF if master == BusMaster::Dma => 0,
                0x9000..=0xAFFF if master == BusMaster::Dma => 0,
                0x8000..=0x8FFF => self.ppu.read(offset - 0x8000),
                0x9000..=0x9FFF => self.apu.read(offset - 0x9000),
                0xA000..=0xAFFF => {
                    let io = offset - 0xA000;
                    if io < 0x10 {
                        self.pads[(io >> 3) as usize].read(io & 0x07)
                    } else {
                        0
                    }
                }
                _ => 0,
            },
            1..=125 => self.cart.as_ref().map_or(0, |c| c.read(bank, offset)),
            126 | 127 => self.exwram[(bank as usize - 126) * 0x1_0000 + offset as usize],
            _ => 0,
        }
    }

    fn write_u8(&mut self, _master: BusMaster, addr: u32, data: u8) {
        let (bank, offset) = split24(addr);
        match bank {
            0 => match offset {
                0x0000..=0x7FFF => self.wram[offset as usize] = data,
                0x8000..=0x8FFF => self.ppu.write(offset - 0x8000, data),
                0x9000..=0x9FFF => self.apu.write(offset - 0x9000, data),
                0xA000..=0xAFFF => {
                    let io = offset - 0xA000;
                    if io < 0x10 {
                        self.pads[(io >> 3) as usize].write(io & 0x07, data);
                    }
                }
                _ => {}
            },
            // ROM writes are discarded.
            1..=125 => {}
            126 | 127 => {
                self.exwram[(bank as usize - 126) * 0x1_0000 + offset as usize] = data;
            }
            _ => {}
        }
    }

    fn write_u16(&mut self, master: BusMaster, addr: u32, data: u16) {
        let (bank, offset) = split24(addr);
        match (bank, offset) {
            // CGRAM_DATA: both bytes land on the same address, low byte
            // first, driving the two-byte palette latch.
            (0, 0x8013) => {
                self.write_u8(master, addr, data as u8);
                self.write_u8(master, addr, (data >> 8) as u8);
            }
            // CGRAM_ADDR is an 8-bit register: only the low byte is written.
            (0, 0x8012) => self.write_u8(master, addr, data as u8),
            _ => {
                self.write_u8(master, addr24(bank, offset), data as u8);
                self.write_u8(master, addr24(bank, offset.wrapping_add(1)), (data >> 8) as u8);
            }
        }
    }

    fn check_interrupts(&self, _target: BusMaster) -> InterruptState {
        InterruptState {
            nmi: false,
            irq: self.ppu.irq() || self.apu.irq(),
        }
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

impl Machine for Cinder16System {
    fn display_size(&self) -> (u32, u32) {
        (SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32)
    }

    fn run_frame(&mut self) {
        let mut remaining = CYCLES_PER_FRAME;
        while remaining > 0 {
            let batch = remaining.min(SCHED_BATCH);
            self.step_cycles(batch);
            remaining -= batch;
        }
    }

    fn render_frame(&self, buffer: &mut [u8]) {
        for (i, &rgb) in self.ppu.framebuffer().iter().enumerate() {
            let out = &mut buffer[i * 3..i * 3 + 3];
            out[0] = (rgb >> 16) as u8;
            out[1] = (rgb >> 8) as u8;
            out[2] = rgb as u8;
        }
    }

    fn set_input(&mut self, button: u8, pressed: bool) {
        let pad = (button / INPUT_P2_BASE) as usize;
        let bit = button % INPUT_P2_BASE;
        if pad < 2 && bit <= INPUT_START {
            self.pads[pad].set_button(1 << bit, pressed);
        }
    }

    fn input_map(&self) -> &[InputButton] {
        CINDER16_INPUT_MAP
    }

    fn reset(&mut self) {
        self.cpu.reset();
        self.wram.fill(0);
        self.exwram.fill(0);
        self.ppu.reset();
        self.apu.reset();
        for pad in &mut self.pads {
            pad.reset();
        }
        self.master_cycle = 0;
        self.dot_accumulator = 0;
        self.sample_countdown = SAMPLE_PERIOD;
        self.cpu_ahead = 0;

        if let Some(cart) = &self.cart {
            let entry = cart.entry_point();
            self.cpu.set_entry(entry.bank, entry.offset);
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

fn create_cinder16(rom: &[u8]) -> Result<Box<dyn Machine>, crate::cartridge::RomError> {
    let cart = Cartridge::load(rom)?;
    let mut system = Cinder16System::new();
    system.load_cartridge(cart);
    Ok(Box::new(system))
}

inventory::submit! {
    crate::registry::MachineEntry::new("cinder16", create_cinder16)
}
