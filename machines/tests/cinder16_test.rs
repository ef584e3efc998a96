use cinder_core::core::bus::addr24;
use cinder_core::core::machine::Machine;
use cinder_core::core::{Bus, BusMaster};
use cinder_core::cpu::lx16::StatusFlag;
use cinder_machines::cartridge::Cartridge;
use cinder_machines::cinder16::{CPU_SPEED, Cinder16System};

mod common;
use common::{branch_offset, idle_rom, rom_image};

fn boot(image: &[u8]) -> Cinder16System {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut system = Cinder16System::new();
    system.load_cartridge(Cartridge::load(image).unwrap());
    system
}

/// Run until the CPU halts (with a safety bound in frames).
fn run_until_halt(system: &mut Cinder16System, max_frames: u32) {
    for _ in 0..max_frames {
        if system.cpu().is_halted() {
            return;
        }
        system.run_frame();
    }
    assert!(system.cpu().is_halted(), "program never reached HALT");
}

fn bus_read(system: &mut Cinder16System, bank: u8, offset: u16) -> u8 {
    system.read_u8(BusMaster::Cpu, addr24(bank, offset))
}

fn bus_write(system: &mut Cinder16System, bank: u8, offset: u16, data: u8) {
    system.write_u8(BusMaster::Cpu, addr24(bank, offset), data);
}

// ---------------------------------------------------------------------------
// Boot and memory map
// ---------------------------------------------------------------------------

#[test]
fn test_boot_state_matches_entry_point() {
    let system = boot(&idle_rom());
    let state = system.cpu_state();
    assert_eq!(state.pc_bank, 1);
    assert_eq!(state.pc_offset, 0x8000);
    assert_eq!(state.sp, 0x1FFF);
    assert_eq!(state.dbr, 0);
    assert_eq!(state.flags, 0);
    assert_eq!(state.r, [0; 8]);
}

#[test]
fn test_wram_read_write() {
    let mut system = boot(&idle_rom());
    bus_write(&mut system, 0, 0x1234, 0xAB);
    assert_eq!(bus_read(&mut system, 0, 0x1234), 0xAB);
}

#[test]
fn test_extended_wram_banks() {
    let mut system = boot(&idle_rom());
    bus_write(&mut system, 126, 0x0000, 0x11);
    bus_write(&mut system, 127, 0xFFFF, 0x22);
    assert_eq!(bus_read(&mut system, 126, 0x0000), 0x11);
    assert_eq!(bus_read(&mut system, 127, 0xFFFF), 0x22);
    // The two banks are distinct storage.
    assert_eq!(bus_read(&mut system, 127, 0x0000), 0);
}

#[test]
fn test_rom_reads_and_write_discard() {
    let mut system = boot(&rom_image(&[0xF200, 0xBEEF]));
    assert_eq!(bus_read(&mut system, 1, 0x8000), 0x00);
    assert_eq!(bus_read(&mut system, 1, 0x8001), 0xF2);
    assert_eq!(bus_read(&mut system, 1, 0x8002), 0xEF);

    bus_write(&mut system, 1, 0x8002, 0x55);
    assert_eq!(bus_read(&mut system, 1, 0x8002), 0xEF, "ROM writes discarded");
}

#[test]
fn test_open_bus_reads_zero() {
    let mut system = boot(&idle_rom());
    assert_eq!(bus_read(&mut system, 0, 0xB000), 0);
    assert_eq!(bus_read(&mut system, 0, 0xFFE0), 0);
    assert_eq!(bus_read(&mut system, 200, 0x1234), 0);
    // ROM banks below the window read zero too.
    assert_eq!(bus_read(&mut system, 1, 0x0000), 0);
}

#[test]
fn test_rom_path_returns_zero_for_unmapped_banks() {
    let mut system = boot(&idle_rom());
    assert_eq!(bus_read(&mut system, 126, 0x8000), 0);
    assert_eq!(bus_read(&mut system, 127, 0x8000), 0);
}

#[test]
fn test_16bit_access_is_little_endian() {
    let mut system = boot(&idle_rom());
    system.write_u16(BusMaster::Cpu, addr24(0, 0x0100), 0x1234);
    assert_eq!(bus_read(&mut system, 0, 0x0100), 0x34);
    assert_eq!(bus_read(&mut system, 0, 0x0101), 0x12);
    assert_eq!(system.read_u16(BusMaster::Cpu, addr24(0, 0x0100)), 0x1234);
}

#[test]
fn test_cgram_16bit_write_drives_the_latch() {
    let mut system = boot(&idle_rom());
    // CGRAM_ADDR via 16-bit write: only the low byte lands.
    system.write_u16(BusMaster::Cpu, addr24(0, 0x8012), 0xAA05);
    // CGRAM_DATA via 16-bit write: both bytes to the same address.
    system.write_u16(BusMaster::Cpu, addr24(0, 0x8013), 0x7FFF);

    bus_write(&mut system, 0, 0x8012, 5);
    assert_eq!(bus_read(&mut system, 0, 0x8013), 0xFF);
    assert_eq!(bus_read(&mut system, 0, 0x8013), 0x7F);
}

// ---------------------------------------------------------------------------
// CPU programs over the full bus
// ---------------------------------------------------------------------------

#[test]
fn test_register_program() {
    // MOV R0,#5 / MOV R1,#10 / ADD R0,R1 / HALT
    let mut system = boot(&rom_image(&[
        0x1100, 0x0005, 0x1110, 0x000A, 0x2001, 0xF200,
    ]));
    run_until_halt(&mut system, 2);

    let state = system.cpu_state();
    assert_eq!(state.r[0], 15);
    assert_eq!(state.r[1], 10);
    assert_eq!(state.flags & (StatusFlag::Z as u8), 0);
    assert_eq!(state.flags & (StatusFlag::N as u8), 0);
    assert_eq!(state.flags & (StatusFlag::C as u8), 0);
}

#[test]
fn test_divide_by_zero_program() {
    // MOV R0,#9 / DIV R0,R1 / HALT
    let mut system = boot(&rom_image(&[0x1100, 0x0009, 0x5001, 0xF200]));
    run_until_halt(&mut system, 2);

    let state = system.cpu_state();
    assert_eq!(state.r[0], 0xFFFF);
    assert_eq!(state.r[1], 0);
    assert_ne!(state.flags & (StatusFlag::D as u8), 0);
}

#[test]
fn test_program_writes_wram() {
    // MOV R0,#0xCAFE / MOV R1,#0x0040 / MOV [R1],R0 / HALT
    let mut system = boot(&rom_image(&[
        0x1100, 0xCAFE, 0x1110, 0x0040, 0x1310, 0xF200,
    ]));
    run_until_halt(&mut system, 2);

    assert_eq!(bus_read(&mut system, 0, 0x0040), 0xFE);
    assert_eq!(bus_read(&mut system, 0, 0x0041), 0xCA);
}

// ---------------------------------------------------------------------------
// Scenario: minimal sprite
// ---------------------------------------------------------------------------

/// Program from the minimal-sprite scenario: enable BG0, set palette 1
/// color 1 to white, fill tile 0 with color 1, wait for VBlank, then
/// write sprite 0 at (160, 100) and halt.
fn sprite_demo() -> Vec<u8> {
    let mut words: Vec<u16> = Vec::new();
    // 0x00: enable BG0
    words.extend([0x1110, 0x8008, 0x1120, 0x0001, 0x1712]);
    // 0x0A: CGRAM entry 17 (palette 1, color 1) = 0x7FFF
    words.extend([0x1110, 0x8012, 0x1120, 0x0011, 0x1712]);
    words.extend([0x1110, 0x8013, 0x1120, 0x00FF, 0x1712]);
    words.extend([0x1120, 0x007F, 0x1712]);
    // 0x24: VRAM_ADDR = 0
    words.extend([0x1110, 0x800E, 0x1120, 0x0000, 0x1312]);
    // 0x2E: 32 bytes of 0x11 through VRAM_DATA
    words.extend([0x1110, 0x8010, 0x1120, 0x0011, 0x1130, 0x0020]);
    words.extend([0x1712]); // 0x3A: store
    words.extend([0x3130, 0x0001]); // 0x3C: SUB R3,#1
    words.extend([0xC200, branch_offset(0x40, 0x3A)]); // 0x40: BNE
    // 0x44: poll VBLANK_FLAG until it reads 1
    words.extend([0x1110, 0x803E]);
    words.extend([0x1621]); // 0x48: MOV.b R2,[R1]
    words.extend([0xC720, 0x0001]); // 0x4A: CMP R2,#1
    words.extend([0xC200, branch_offset(0x4E, 0x48)]); // 0x4E: BNE
    // 0x52: OAM sprite 0 = (160, 100), tile 0, palette 1, enabled
    words.extend([0x1110, 0x8014, 0x1120, 0x0000, 0x1712]);
    words.extend([0x1110, 0x8015]);
    for byte in [0x00A0u16, 0x0000, 0x0064, 0x0000, 0x0001, 0x0001] {
        words.extend([0x1120, byte, 0x1712]);
    }
    words.push(0xF200); // HALT
    rom_image(&words)
}

#[test]
fn test_minimal_sprite_scenario() {
    let mut system = boot(&sprite_demo());
    for _ in 0..3 {
        system.run_frame();
    }
    assert!(system.cpu().is_halted(), "demo program should have halted");

    let fb = system.framebuffer();
    for y in 0..200usize {
        for x in 0..320usize {
            let expected = if (160..168).contains(&x) && (100..108).contains(&y) {
                0xFFFFFF
            } else {
                0x000000
            };
            assert_eq!(
                fb[y * 320 + x],
                expected,
                "pixel ({x}, {y})"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// VBlank and OAM protection over the bus
// ---------------------------------------------------------------------------

#[test]
fn test_vblank_flag_one_shot_over_bus() {
    let mut system = boot(&idle_rom());
    while system.ppu().scanline() != 200 {
        system.step_cycles(64);
    }
    assert_eq!(bus_read(&mut system, 0, 0x803E), 1);
    assert_eq!(bus_read(&mut system, 0, 0x803E), 0);
}

#[test]
fn test_oam_write_protection_scenario() {
    let mut system = boot(&idle_rom());

    // Before any frame has rendered: the write lands.
    bus_write(&mut system, 0, 0x8014, 0);
    bus_write(&mut system, 0, 0x8015, 0xAB);
    bus_write(&mut system, 0, 0x8014, 0);
    assert_eq!(bus_read(&mut system, 0, 0x8015), 0xAB);

    system.run_frame();

    // During scanline 50 of the second frame: dropped.
    while system.ppu().scanline() != 50 {
        system.step_cycles(64);
    }
    bus_write(&mut system, 0, 0x8014, 0);
    bus_write(&mut system, 0, 0x8015, 0xCD);

    while system.ppu().scanline() != 150 {
        system.step_cycles(64);
    }
    bus_write(&mut system, 0, 0x8014, 0);
    assert_eq!(bus_read(&mut system, 0, 0x8015), 0xAB);
}

// ---------------------------------------------------------------------------
// DMA through the scheduler
// ---------------------------------------------------------------------------

#[test]
fn test_dma_copy_from_wram_to_vram() {
    let mut system = boot(&idle_rom());
    for i in 0..8u16 {
        bus_write(&mut system, 0, 0x0100 + i, 0x30 + i as u8);
    }

    // Source 00:0100, dest VRAM 0x0500, length 8, copy mode.
    bus_write(&mut system, 0, 0x8061, 0x00);
    bus_write(&mut system, 0, 0x8062, 0x00);
    bus_write(&mut system, 0, 0x8063, 0x01);
    bus_write(&mut system, 0, 0x8064, 0x00);
    bus_write(&mut system, 0, 0x8065, 0x05);
    bus_write(&mut system, 0, 0x8066, 0x08);
    bus_write(&mut system, 0, 0x8067, 0x00);
    bus_write(&mut system, 0, 0x8060, 0x01);

    system.step_cycles(16);
    assert!(!system.ppu().dma_active());
    assert_eq!(bus_read(&mut system, 0, 0x8060) & 0x80, 0x80);

    // Read back through the VRAM port.
    bus_write(&mut system, 0, 0x800E, 0x00);
    bus_write(&mut system, 0, 0x800F, 0x05);
    for i in 0..8 {
        assert_eq!(bus_read(&mut system, 0, 0x8010), 0x30 + i);
    }
}

#[test]
fn test_dma_rate_is_one_byte_per_cycle() {
    let mut system = boot(&idle_rom());
    bus_write(&mut system, 0, 0x8062, 0x5A); // fill value
    bus_write(&mut system, 0, 0x8064, 0x00);
    bus_write(&mut system, 0, 0x8065, 0x00);
    bus_write(&mut system, 0, 0x8066, 0x40); // 64 bytes
    bus_write(&mut system, 0, 0x8067, 0x00);
    bus_write(&mut system, 0, 0x8060, 0x03); // start, fill mode

    system.step_cycles(16);
    assert!(system.ppu().dma_active(), "64-byte fill unfinished after 16 cycles");
    system.step_cycles(48);
    assert!(!system.ppu().dma_active());
    assert_eq!(system.ppu().vram_peek(0x003F), 0x5A);
}

// ---------------------------------------------------------------------------
// Input latch over the bus
// ---------------------------------------------------------------------------

#[test]
fn test_controller_latch_over_bus() {
    let mut system = boot(&idle_rom());
    system.set_buttons(0, 0b0000_0100_0001_0001); // UP, A, START

    bus_write(&mut system, 0, 0xA001, 1);
    system.set_buttons(0, 0);

    let mut bits = 0u16;
    for i in 0..16 {
        bits |= (bus_read(&mut system, 0, 0xA000) as u16) << i;
    }
    assert_eq!(bits, 0b0000_0100_0001_0001);
}

#[test]
fn test_second_controller_is_independent() {
    let mut system = boot(&idle_rom());
    system.set_buttons(0, 0x0001);
    system.set_buttons(1, 0x0002);
    bus_write(&mut system, 0, 0xA001, 1);
    bus_write(&mut system, 0, 0xA009, 1);

    assert_eq!(bus_read(&mut system, 0, 0xA000), 1); // pad 1 bit 0
    assert_eq!(bus_read(&mut system, 0, 0xA008), 0); // pad 2 bit 0
    assert_eq!(bus_read(&mut system, 0, 0xA008), 1); // pad 2 bit 1
}

// ---------------------------------------------------------------------------
// FM extension over the bus
// ---------------------------------------------------------------------------

#[test]
fn test_fm_timer_reachable_through_apu_window() {
    let mut system = boot(&idle_rom());
    bus_write(&mut system, 0, 0x9103, 0x01); // FM_CONTROL: enable

    bus_write(&mut system, 0, 0x9100, 0x10);
    bus_write(&mut system, 0, 0x9101, 0xFF);
    bus_write(&mut system, 0, 0x9100, 0x11);
    bus_write(&mut system, 0, 0x9101, 0x03);
    bus_write(&mut system, 0, 0x9100, 0x14);
    bus_write(&mut system, 0, 0x9101, 0x11); // start A + IRQ A

    system.step_cycles(64);
    let status = bus_read(&mut system, 0, 0x9102);
    assert_ne!(status & 0x01, 0, "Timer A flag");
    assert_ne!(status & 0x04, 0, "IRQ flag");
}

// ---------------------------------------------------------------------------
// Scheduler properties
// ---------------------------------------------------------------------------

#[test]
fn test_sample_rate_integrity() {
    let mut system = boot(&idle_rom());
    let cycles = 1_000_000u64;
    system.step_cycles(cycles);

    let samples = system.drain_audio().len() as u64;
    let expected = cycles * 44_100 / CPU_SPEED;
    assert!(
        samples.abs_diff(expected) <= 1,
        "got {samples} samples, expected {expected} +/- 1"
    );
}

#[test]
fn test_frame_counter_advances_once_per_frame() {
    let mut system = boot(&idle_rom());
    let start = system.ppu().frame_count();
    for _ in 0..5 {
        system.run_frame();
    }
    let advanced = system.ppu().frame_count() - start;
    assert!((4..=6).contains(&advanced), "got {advanced} frames");
}

#[test]
fn test_determinism_across_runs() {
    let run = || {
        let mut system = boot(&sprite_demo());
        system.set_buttons(0, 0x0011);
        for _ in 0..3 {
            system.run_frame();
        }
        let audio = system.drain_audio();
        (system.framebuffer().to_vec(), audio)
    };

    let (fb1, audio1) = run();
    let (fb2, audio2) = run();
    assert_eq!(fb1, fb2);
    assert_eq!(audio1, audio2);
}

#[test]
fn test_reset_is_idempotent() {
    let mut system = boot(&sprite_demo());
    for _ in 0..2 {
        system.run_frame();
    }

    system.reset();
    let first = (
        system.cpu_state(),
        system.ppu().frame_count(),
        system.master_cycle(),
    );
    system.reset();
    let second = (
        system.cpu_state(),
        system.ppu().frame_count(),
        system.master_cycle(),
    );
    assert_eq!(first, second);
}

#[test]
fn test_halted_cpu_keeps_ppu_running() {
    let mut system = boot(&idle_rom());
    system.run_frame();
    assert!(system.cpu().is_halted());

    let frames_before = system.ppu().frame_count();
    for _ in 0..3 {
        system.run_frame();
    }
    assert!(system.ppu().frame_count() > frames_before);
}

#[test]
fn test_vblank_irq_reaches_cpu_when_enabled() {
    // Install an RTI-only handler at WRAM 0, enable the VBlank IRQ gate,
    // then spin. The handler counts services in R7.
    let mut words: Vec<u16> = Vec::new();
    for (i, hw) in [0x2170u16, 0x0001, 0xF100].iter().enumerate() {
        let at = (i * 2) as u16;
        words.extend([0x1110, at, 0x1100, *hw, 0x1310]);
    }
    words.extend([0x1110, 0x803D, 0x1120, 0x0001, 0x1712]); // IRQ_ENABLE
    let spin_at = (words.len() * 2) as u16;
    words.extend([0xD000, branch_offset(spin_at, spin_at)]);

    let mut system = boot(&rom_image(&words));
    system.run_frame();
    system.run_frame();
    assert!(system.cpu_state().r[7] >= 1, "VBlank IRQ should have fired");
}

#[test]
fn test_vblank_irq_masked_without_enable_bit() {
    // Same handler, but the gate stays closed: R7 must stay 0.
    let mut words: Vec<u16> = Vec::new();
    for (i, hw) in [0x2170u16, 0x0001, 0xF100].iter().enumerate() {
        let at = (i * 2) as u16;
        words.extend([0x1110, at, 0x1100, *hw, 0x1310]);
    }
    let spin_at = (words.len() * 2) as u16;
    words.extend([0xD000, branch_offset(spin_at, spin_at)]);

    let mut system = boot(&rom_image(&words));
    system.run_frame();
    system.run_frame();
    assert_eq!(system.cpu_state().r[7], 0);
}

#[test]
fn test_fm_irq_reaches_cpu() {
    // Program: install an IRQ handler trampoline in WRAM at 0, then spin.
    // The handler increments R7 and returns. The FM timer fires the IRQ.
    //
    // Vector reads at 00:FFE0 see open bus (0), so the handler must live
    // at WRAM offset 0.
    let mut words: Vec<u16> = Vec::new();
    // 0x00: write handler to WRAM 0x0000: MOV R1,#0 / MOV R0,#<word> / ...
    // Handler words: ADD R7,#1 (0x2170, 0x0001), RTI (0xF100).
    for (i, hw) in [0x2170u16, 0x0001, 0xF100].iter().enumerate() {
        let at = (i * 2) as u16;
        words.extend([0x1110, at, 0x1100, *hw, 0x1310]);
    }
    // FM: enable, Timer A raw 0x3FF, start + IRQ enable.
    words.extend([0x1110, 0x9103, 0x1120, 0x0001, 0x1712]);
    words.extend([0x1110, 0x9100, 0x1120, 0x0010, 0x1712]);
    words.extend([0x1110, 0x9101, 0x1120, 0x00FF, 0x1712]);
    words.extend([0x1110, 0x9100, 0x1120, 0x0011, 0x1712]);
    words.extend([0x1110, 0x9101, 0x1120, 0x0003, 0x1712]);
    words.extend([0x1110, 0x9100, 0x1120, 0x0014, 0x1712]);
    words.extend([0x1110, 0x9101, 0x1120, 0x0011, 0x1712]);
    // Spin forever: JMP -4 (to itself).
    let spin_at = (words.len() * 2) as u16;
    words.extend([0xD000, branch_offset(spin_at, spin_at)]);

    let mut system = boot(&rom_image(&words));
    system.run_frame();
    assert!(
        system.cpu_state().r[7] >= 1,
        "FM timer IRQ should have run the WRAM handler"
    );
}
