use crate::core::component::BusMasterComponent;

/// Generic CPU interface
pub trait Cpu: BusMasterComponent + CpuStateTrait {
    /// Return to the power-on register state (PC is set separately by the board)
    fn reset(&mut self);

    /// Signal a specific interrupt line (implementation-defined; the LX16
    /// polls lines through the bus instead)
    fn signal_interrupt(&mut self, int: crate::core::bus::InterruptState);

    /// Query if the CPU is halted internally (HALT instruction)
    fn is_sleeping(&self) -> bool;
}

// Re-export state types
pub mod state;
pub use state::{CpuStateTrait, Lx16State};

// The console's 16-bit CPU
pub mod lx16;
pub use lx16::Lx16;
