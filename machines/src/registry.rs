//! Machine registry for automatic front-end discovery.
//!
//! Front-end-capable machines self-register via [`inventory::submit!`]
//! with a [`MachineEntry`] containing a CLI name and a factory taking a
//! raw ROM image. The front-end discovers available machines at runtime
//! without any central list.

use cinder_core::core::machine::Machine;

use crate::cartridge::RomError;

/// Describes a front-end-capable machine.
pub struct MachineEntry {
    /// CLI name used to select this machine (e.g., "cinder16").
    pub name: &'static str,
    /// Factory: construct a Machine from a ROM image.
    pub create: fn(&[u8]) -> Result<Box<dyn Machine>, RomError>,
}

impl MachineEntry {
    pub const fn new(
        name: &'static str,
        create: fn(&[u8]) -> Result<Box<dyn Machine>, RomError>,
    ) -> Self {
        Self { name, create }
    }
}

inventory::collect!(MachineEntry);

/// Return all registered machines, sorted by name.
pub fn all() -> Vec<&'static MachineEntry> {
    let mut entries: Vec<_> = inventory::iter::<MachineEntry>.into_iter().collect();
    entries.sort_by_key(|e| e.name);
    entries
}

/// Look up a machine by its CLI name.
pub fn find(name: &str) -> Option<&'static MachineEntry> {
    inventory::iter::<MachineEntry>
        .into_iter()
        .find(|e| e.name == name)
}
