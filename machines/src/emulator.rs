//! Host-facing emulator façade.
//!
//! Wraps [`Cinder16System`] with the lifecycle surface a host drives:
//! ROM loading, reset, frame/instruction stepping, pause, input injection,
//! and read-only access to the framebuffer and audio stream. The façade
//! also keeps wall-clock diagnostics (fps) that never feed back into
//! emulation, so timing stays deterministic.

use std::time::Instant;

use cinder_core::core::machine::Machine;

use crate::cartridge::{Cartridge, EntryPoint, RomError};
use crate::cinder16::{CYCLES_PER_FRAME, Cinder16System};

/// Errors from lifecycle operations after load-time validation.
#[derive(Debug, PartialEq)]
pub enum EmulatorError {
    /// `run_frame`/`step_instruction` called before a successful `load_rom`.
    NoCartridge,
}

impl std::fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCartridge => write!(f, "no cartridge loaded"),
        }
    }
}

impl std::error::Error for EmulatorError {}

/// Point-in-time diagnostics for host UIs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmulatorSnapshot {
    pub frame_count: u16,
    /// CPU cycles actually executed during the last completed frame.
    pub cpu_cycles_per_frame: u64,
    /// Wall-clock frames per second (smoothed); diagnostics only.
    pub fps: f64,
    pub paused: bool,
}

pub struct Emulator {
    system: Cinder16System,
    rom_loaded: bool,
    paused: bool,

    cpu_cycles_per_frame: u64,
    last_frame_at: Option<Instant>,
    fps: f64,
}

impl Emulator {
    pub fn new() -> Self {
        Self {
            system: Cinder16System::new(),
            rom_loaded: false,
            paused: false,
            cpu_cycles_per_frame: 0,
            last_frame_at: None,
            fps: 0.0,
        }
    }

    /// Parse, validate, and insert a ROM image, then power-on reset.
    pub fn load_rom(&mut self, bytes: &[u8]) -> Result<EntryPoint, RomError> {
        let cart = Cartridge::load(bytes)?;
        let entry = cart.entry_point();
        self.system.load_cartridge(cart);
        self.rom_loaded = true;
        self.paused = false;
        self.cpu_cycles_per_frame = 0;
        self.last_frame_at = None;
        self.fps = 0.0;
        Ok(entry)
    }

    pub fn reset(&mut self) {
        self.system.reset();
        self.cpu_cycles_per_frame = 0;
        self.last_frame_at = None;
        self.fps = 0.0;
    }

    /// Run one frame. Pausing short-circuits to a no-op; a halted CPU
    /// still succeeds (the PPU and APU keep running until reset).
    pub fn run_frame(&mut self) -> Result<(), EmulatorError> {
        if !self.rom_loaded {
            return Err(EmulatorError::NoCartridge);
        }
        if self.paused {
            return Ok(());
        }

        let cycles_before = self.system.cpu().cycles;
        self.system.run_frame();
        self.cpu_cycles_per_frame = self.system.cpu().cycles - cycles_before;

        let now = Instant::now();
        if let Some(previous) = self.last_frame_at {
            let dt = now.duration_since(previous).as_secs_f64();
            if dt > 0.0 {
                // Exponential smoothing keeps the readout stable.
                let instant_fps = 1.0 / dt;
                self.fps = if self.fps == 0.0 {
                    instant_fps
                } else {
                    self.fps * 0.9 + instant_fps * 0.1
                };
            }
        }
        self.last_frame_at = Some(now);
        Ok(())
    }

    /// Run a single frame even while paused.
    pub fn step_frame(&mut self) -> Result<(), EmulatorError> {
        let was_paused = self.paused;
        self.paused = false;
        let result = self.run_frame();
        self.paused = was_paused;
        result
    }

    /// Execute exactly one CPU instruction (works while paused).
    pub fn step_instruction(&mut self) -> Result<(), EmulatorError> {
        if !self.rom_loaded {
            return Err(EmulatorError::NoCartridge);
        }
        self.system.step_instruction();
        Ok(())
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Replace a controller's 16-bit button mask.
    pub fn set_input_buttons(&mut self, controller: usize, mask: u16) {
        self.system.set_buttons(controller, mask);
    }

    /// 320x200 packed RGB888 words, owned by the PPU.
    pub fn framebuffer(&self) -> &[u32] {
        self.system.framebuffer()
    }

    /// Samples generated since the last retrieval (mono i16, 44.1 kHz).
    pub fn audio_samples_fixed(&mut self) -> Vec<i16> {
        self.system.drain_audio()
    }

    /// i16 sample to host float, as the audio sink expects it.
    pub fn sample_to_f32(sample: i16) -> f32 {
        sample as f32 / 32768.0
    }

    pub fn snapshot(&self) -> EmulatorSnapshot {
        EmulatorSnapshot {
            frame_count: self.system.ppu().frame_count(),
            cpu_cycles_per_frame: if self.cpu_cycles_per_frame == 0 {
                CYCLES_PER_FRAME
            } else {
                self.cpu_cycles_per_frame
            },
            fps: self.fps,
            paused: self.paused,
        }
    }

    pub fn system(&self) -> &Cinder16System {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut Cinder16System {
        &mut self.system
    }
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}
