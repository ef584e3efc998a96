//! RMCF cartridge images: header parsing, validation, and LoROM reads.
//!
//! A ROM image is a 32-byte little-endian header followed by raw code
//! bytes (a little-endian sequence of 16-bit words). Banked images pad
//! unused banks with zeros up to the highest used bank; reads past the
//! stored payload inside a mapped bank return 0.
//!
//! | Offset | Size | Field                        |
//! |--------|------|------------------------------|
//! | 0      | 4    | magic = 0x46434D52 ("RMCF")  |
//! | 4      | 2    | version (u16, <= 1)          |
//! | 6      | 4    | code_size (u32)              |
//! | 10     | 2    | entry_bank (u16, 1-125)      |
//! | 12     | 2    | entry_offset (u16, >= 0x8000)|
//! | 14     | 2    | mapper_flags (u16)           |
//! | 16     | 4    | checksum (unused)            |
//! | 20     | 12   | reserved (zero)              |
//!
//! Code banks map into the upper half of the CPU address space (LoROM):
//! bank b in 1-125 exposes `rom[(b-1)*0x8000 ..]` at offsets 0x8000-0xFFFF.

pub const ROM_MAGIC: u32 = 0x4643_4D52; // "RMCF" little-endian
pub const HEADER_SIZE: usize = 32;
pub const MAX_VERSION: u16 = 1;
pub const BANK_SIZE: usize = 0x8000;
pub const FIRST_ROM_BANK: u16 = 1;
pub const LAST_ROM_BANK: u16 = 125;
pub const ROM_WINDOW_BASE: u16 = 0x8000;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur when loading a ROM image.
#[derive(Debug)]
pub enum RomError {
    /// The buffer is smaller than the header or the declared code size.
    Truncated { expected: usize, actual: usize },

    /// The magic field does not spell "RMCF".
    BadMagic { found: u32 },

    /// The header version is newer than this core understands.
    UnsupportedVersion { found: u16 },

    /// The entry point lies outside the ROM-mapped address space.
    EntryOutOfRange { bank: u16, offset: u16 },
}

impl std::fmt::Display for RomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { expected, actual } => {
                write!(f, "ROM truncated: expected at least {expected} bytes, got {actual}")
            }
            Self::BadMagic { found } => write!(
                f,
                "bad ROM magic: expected 0x{ROM_MAGIC:08X} (\"RMCF\"), found 0x{found:08X}"
            ),
            Self::UnsupportedVersion { found } => write!(
                f,
                "unsupported ROM version {found}: this core handles versions up to {MAX_VERSION}"
            ),
            Self::EntryOutOfRange { bank, offset } => write!(
                f,
                "entry point {bank:02X}:{offset:04X} out of range: bank must be \
                 {FIRST_ROM_BANK}-{LAST_ROM_BANK} and offset >= 0x{ROM_WINDOW_BASE:04X}"
            ),
        }
    }
}

impl std::error::Error for RomError {}

// ---------------------------------------------------------------------------
// Header / cartridge
// ---------------------------------------------------------------------------

/// Parsed 32-byte RMCF header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RomHeader {
    pub version: u16,
    pub code_size: u32,
    pub entry_bank: u16,
    pub entry_offset: u16,
    pub mapper_flags: u16,
    pub checksum: u32,
}

/// ROM entry point handed back from a successful load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryPoint {
    pub bank: u8,
    pub offset: u16,
}

/// An accepted cartridge: immutable code bytes plus the parsed header.
#[derive(Debug)]
pub struct Cartridge {
    header: RomHeader,
    data: Vec<u8>,
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl Cartridge {
    /// Parse and validate a ROM image. Rejections name the failing header
    /// field and the accepted range.
    pub fn load(bytes: &[u8]) -> Result<Self, RomError> {
        if bytes.len() < HEADER_SIZE {
            return Err(RomError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let magic = read_u32(bytes, 0);
        if magic != ROM_MAGIC {
            return Err(RomError::BadMagic { found: magic });
        }

        let header = RomHeader {
            version: read_u16(bytes, 4),
            code_size: read_u32(bytes, 6),
            entry_bank: read_u16(bytes, 10),
            entry_offset: read_u16(bytes, 12),
            mapper_flags: read_u16(bytes, 14),
            checksum: read_u32(bytes, 16),
        };

        if header.version > MAX_VERSION {
            return Err(RomError::UnsupportedVersion {
                found: header.version,
            });
        }

        let payload = bytes.len() - HEADER_SIZE;
        if header.code_size as usize > payload {
            return Err(RomError::Truncated {
                expected: HEADER_SIZE + header.code_size as usize,
                actual: bytes.len(),
            });
        }

        if !(FIRST_ROM_BANK..=LAST_ROM_BANK).contains(&header.entry_bank)
            || header.entry_offset < ROM_WINDOW_BASE
        {
            return Err(RomError::EntryOutOfRange {
                bank: header.entry_bank,
                offset: header.entry_offset,
            });
        }

        log::info!(
            "cartridge accepted: {} code bytes, entry {:02X}:{:04X}",
            header.code_size,
            header.entry_bank,
            header.entry_offset
        );

        Ok(Self {
            header,
            data: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    pub fn header(&self) -> &RomHeader {
        &self.header
    }

    /// Validated execution entry point from header bytes 10-13.
    pub fn entry_point(&self) -> EntryPoint {
        EntryPoint {
            bank: self.header.entry_bank as u8,
            offset: self.header.entry_offset,
        }
    }

    /// LoROM read: banks 1-125 expose the payload at offsets 0x8000+.
    /// Everything else (and reads past the stored bytes) returns 0.
    pub fn read(&self, bank: u8, offset: u16) -> u8 {
        if !(FIRST_ROM_BANK..=LAST_ROM_BANK).contains(&(bank as u16))
            || offset < ROM_WINDOW_BASE
        {
            return 0;
        }
        let rom_offset = (bank as usize - 1) * BANK_SIZE + (offset - ROM_WINDOW_BASE) as usize;
        self.data.get(rom_offset).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a ROM image: valid header plus the given code bytes.
    fn build_rom(code: &[u8]) -> Vec<u8> {
        build_rom_with(code, 0, 1, 0x8000)
    }

    fn build_rom_with(code: &[u8], version: u16, entry_bank: u16, entry_offset: u16) -> Vec<u8> {
        let mut image = Vec::with_capacity(HEADER_SIZE + code.len());
        image.extend_from_slice(&ROM_MAGIC.to_le_bytes());
        image.extend_from_slice(&version.to_le_bytes());
        image.extend_from_slice(&(code.len() as u32).to_le_bytes());
        image.extend_from_slice(&entry_bank.to_le_bytes());
        image.extend_from_slice(&entry_offset.to_le_bytes());
        image.extend_from_slice(&0u16.to_le_bytes()); // mapper_flags
        image.extend_from_slice(&0u32.to_le_bytes()); // checksum
        image.extend_from_slice(&[0u8; 12]); // reserved
        image.extend_from_slice(code);
        image
    }

    #[test]
    fn load_valid_rom() {
        let cart = Cartridge::load(&build_rom(&[0x34, 0x12])).unwrap();
        assert_eq!(cart.header().version, 0);
        assert_eq!(cart.header().code_size, 2);
        assert_eq!(
            cart.entry_point(),
            EntryPoint {
                bank: 1,
                offset: 0x8000
            }
        );
    }

    #[test]
    fn reject_short_buffer() {
        let result = Cartridge::load(&[0u8; 10]);
        assert!(matches!(result, Err(RomError::Truncated { expected: 32, .. })));
    }

    #[test]
    fn reject_bad_magic() {
        let mut image = build_rom(&[]);
        image[0] = b'X';
        assert!(matches!(Cartridge::load(&image), Err(RomError::BadMagic { .. })));
    }

    #[test]
    fn reject_future_version() {
        let image = build_rom_with(&[], 2, 1, 0x8000);
        assert!(matches!(
            Cartridge::load(&image),
            Err(RomError::UnsupportedVersion { found: 2 })
        ));
    }

    #[test]
    fn reject_declared_size_beyond_payload() {
        let mut image = build_rom(&[0xAA]);
        image[6..10].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(Cartridge::load(&image), Err(RomError::Truncated { .. })));
    }

    #[test]
    fn reject_entry_bank_zero() {
        let image = build_rom_with(&[], 0, 0, 0x8000);
        assert!(matches!(
            Cartridge::load(&image),
            Err(RomError::EntryOutOfRange { bank: 0, .. })
        ));
    }

    #[test]
    fn reject_entry_bank_above_rom_window() {
        let image = build_rom_with(&[], 0, 126, 0x8000);
        assert!(matches!(Cartridge::load(&image), Err(RomError::EntryOutOfRange { .. })));
    }

    #[test]
    fn reject_entry_offset_below_window() {
        let image = build_rom_with(&[], 0, 1, 0x7FFE);
        assert!(matches!(Cartridge::load(&image), Err(RomError::EntryOutOfRange { .. })));
    }

    #[test]
    fn lorom_read_mapping() {
        // Two banks: bank 1 starts with 0x11, bank 2 with 0x22.
        let mut code = vec![0u8; BANK_SIZE * 2];
        code[0] = 0x11;
        code[BANK_SIZE] = 0x22;
        code[BANK_SIZE + 0x123] = 0x99;
        let cart = Cartridge::load(&build_rom(&code)).unwrap();

        assert_eq!(cart.read(1, 0x8000), 0x11);
        assert_eq!(cart.read(2, 0x8000), 0x22);
        assert_eq!(cart.read(2, 0x8123), 0x99);
    }

    #[test]
    fn unmapped_banks_read_zero() {
        let cart = Cartridge::load(&build_rom(&[0xFF; 16])).unwrap();
        assert_eq!(cart.read(0, 0x8000), 0);
        assert_eq!(cart.read(126, 0x8000), 0);
        assert_eq!(cart.read(127, 0x8000), 0);
    }

    #[test]
    fn low_offsets_read_zero() {
        let cart = Cartridge::load(&build_rom(&[0xFF; 16])).unwrap();
        assert_eq!(cart.read(1, 0x7FFF), 0);
        assert_eq!(cart.read(1, 0x0000), 0);
    }

    #[test]
    fn reads_past_payload_return_zero() {
        let cart = Cartridge::load(&build_rom(&[0xAB])).unwrap();
        assert_eq!(cart.read(1, 0x8000), 0xAB);
        assert_eq!(cart.read(1, 0x8001), 0);
        assert_eq!(cart.read(125, 0xFFFF), 0);
    }

    #[test]
    fn display_messages_name_the_field() {
        let err = Cartridge::load(&build_rom_with(&[], 0, 0, 0x8000)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("entry point"));
        assert!(message.contains("1-125"));
    }
}
