pub mod cartridge;
pub mod cinder16;
pub mod emulator;
pub mod registry;

pub use cartridge::{Cartridge, EntryPoint, RomError};
pub use cinder16::Cinder16System;
pub use emulator::{Emulator, EmulatorError, EmulatorSnapshot};
