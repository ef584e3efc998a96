pub mod apu;
pub mod gamepad;
pub mod opm;
pub mod ppu;

pub use apu::Apu;
pub use gamepad::GamePad;
pub use opm::OpmFm;
pub use ppu::Ppu;
