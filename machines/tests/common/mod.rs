use cinder_machines::cartridge::{HEADER_SIZE, ROM_MAGIC};

/// Assemble an RMCF image from instruction words, entry at 01:8000.
pub fn rom_image(words: &[u16]) -> Vec<u8> {
    let mut code = Vec::with_capacity(words.len() * 2);
    for word in words {
        code.extend_from_slice(&word.to_le_bytes());
    }

    let mut image = Vec::with_capacity(HEADER_SIZE + code.len());
    image.extend_from_slice(&ROM_MAGIC.to_le_bytes());
    image.extend_from_slice(&0u16.to_le_bytes()); // version
    image.extend_from_slice(&(code.len() as u32).to_le_bytes());
    image.extend_from_slice(&1u16.to_le_bytes()); // entry bank
    image.extend_from_slice(&0x8000u16.to_le_bytes()); // entry offset
    image.extend_from_slice(&0u16.to_le_bytes()); // mapper flags
    image.extend_from_slice(&0u32.to_le_bytes()); // checksum
    image.extend_from_slice(&[0u8; 12]); // reserved
    image.extend_from_slice(&code);
    image
}

/// Offset word for a relative branch: target - current - 4, on byte
/// offsets within the code segment.
pub fn branch_offset(current: u16, target: u16) -> u16 {
    (target as i32 - current as i32 - 4) as u16
}

/// A ROM whose first instruction halts the CPU — for tests that drive the
/// hardware directly over the bus.
pub fn idle_rom() -> Vec<u8> {
    rom_image(&[0xF200])
}
