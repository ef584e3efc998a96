//! Picture Processing Unit — scanline renderer for the console's video.
//!
//! Timing grid: 220 scanlines of 261 dots; the visible region is scanlines
//! 0-199 and dots 0-319. One `tick()` advances one dot and composes one
//! framebuffer pixel while inside the visible region.
//!
//! Video memories: 64 KiB VRAM (4-bpp tile data + tilemaps), 512 B CGRAM
//! (256 RGB555 palette entries), 768 B OAM (128 sprites x 6 bytes).
//! Four scrollable background layers compose back-to-front (BG3 lowest,
//! BG0 on top); BG0 can optionally pass through an affine "Matrix Mode"
//! transform. Two rectangular windows with a programmable combinator mask
//! layers per the enable registers. 128 sprites overlay the backgrounds
//! according to their 2-bit priority.
//!
//! # Register map (offsets relative to the PPU IO base)
//!
//! | Offset    | Register                                            |
//! |-----------|-----------------------------------------------------|
//! | 0x00-0x03 | BG0 scroll X lo/hi, Y lo/hi                         |
//! | 0x04-0x07 | BG1 scroll X lo/hi, Y lo/hi                         |
//! | 0x08      | BG_ENABLE: bit n enables layer n                    |
//! | 0x09      | BG_TILE_SIZE: bit n selects 16x16 tiles for layer n |
//! | 0x0A-0x0D | BG2 scroll X lo/hi, Y lo/hi                         |
//! | 0x0E/0x0F | VRAM_ADDR lo/hi                                     |
//! | 0x10      | VRAM_DATA (r/w, auto-increment)                     |
//! | 0x12      | CGRAM_ADDR (palette entry index, resets the latch)  |
//! | 0x13      | CGRAM_DATA (r/w, two-byte latch, low byte first)    |
//! | 0x14      | OAM_ADDR (sprite index, resets the byte cursor)     |
//! | 0x15      | OAM_DATA (r/w, auto-increment across 6-byte records)|
//! | 0x16/0x17 | BG3 scroll X lo/hi                                  |
//! | 0x18      | MATRIX_CONTROL: en[0], oob mode[2:1], mirror X/Y[4:3]|
//! | 0x19-0x24 | matrix A, B, C, D (8.8 fixed), CX, CY (16-bit each) |
//! | 0x2B-0x2E | window 0 left, right, top, bottom                   |
//! | 0x2F-0x32 | window 1 left, right, top, bottom                   |
//! | 0x33      | WINDOW_CONTROL: combinator in bits 3:2              |
//! | 0x34      | WINDOW_MAIN_ENABLE: bit n masks layer n in-window   |
//! | 0x35      | WINDOW_SUB_ENABLE: bit n inverts layer n's mask     |
//! | 0x36      | HDMA_CONTROL (latched)                              |
//! | 0x37/0x38 | HDMA_TABLE_BASE lo/hi (latched)                     |
//! | 0x39/0x3A | BG3 scroll Y lo/hi                                  |
//! | 0x3D      | IRQ_ENABLE: bit 0 gates the VBlank IRQ line         |
//! | 0x3E      | VBLANK_FLAG (read-only, one-shot: reading clears)   |
//! | 0x3F/0x40 | FRAME_COUNT lo/hi (read-only)                       |
//! | 0x41-0x48 | BG0-BG3 TILEMAP_BASE (16-bit each; 0 means 0x4000)  |
//! | 0x60      | DMA_CONTROL: start[0], fill[1], dest[3:2];          |
//! |           | reads back active[0], fill[1], dest[3:2], done[7]   |
//! | 0x61      | DMA_SOURCE_BANK                                     |
//! | 0x62/0x63 | DMA_SOURCE offset lo/hi (lo is the fill value)      |
//! | 0x64/0x65 | DMA_DEST lo/hi                                      |
//! | 0x66/0x67 | DMA_LENGTH lo/hi                                    |
//!
//! Unmapped offsets read 0 and drop writes.
//!
//! # Frame lifecycle
//!
//! Entering scanline 200 sets the VBlank latch and, when the IRQ_ENABLE
//! gate is open, asserts the VBlank IRQ line; entering scanline 0 clears
//! the latch. The latch is one-shot on the read side.
//! OAM writes during scanlines 0-199 are silently dropped once the first
//! frame has rendered — games must deliver OAM updates during VBlank.
//!
//! # DMA
//!
//! The DMA engine moves one byte per granted master cycle, fed from the
//! same cycle budget as the dot clock (never from the CPU batch). Copy mode
//! consumes source bytes the board fetches over the bus; fill mode repeats
//! the latched fill value. Destinations auto-increment and wrap within
//! their region; the OAM destination honors write protection.

pub const SCREEN_WIDTH: usize = 320;
pub const SCREEN_HEIGHT: usize = 200;
pub const TOTAL_SCANLINES: u16 = 220;
pub const DOTS_PER_SCANLINE: u16 = 261;
pub const VBLANK_SCANLINE: u16 = 200;

const VRAM_SIZE: usize = 0x1_0000;
const CGRAM_SIZE: usize = 512;
const OAM_SPRITES: usize = 128;
const OAM_RECORD: usize = 6;
const OAM_SIZE: usize = OAM_SPRITES * OAM_RECORD;
const TILEMAP_TILES: i32 = 32;
const DEFAULT_TILEMAP_BASE: u16 = 0x4000;

// Register offsets
pub const REG_BG_ENABLE: u16 = 0x08;
pub const REG_BG_TILE_SIZE: u16 = 0x09;
pub const REG_VRAM_ADDR_LO: u16 = 0x0E;
pub const REG_VRAM_ADDR_HI: u16 = 0x0F;
pub const REG_VRAM_DATA: u16 = 0x10;
pub const REG_CGRAM_ADDR: u16 = 0x12;
pub const REG_CGRAM_DATA: u16 = 0x13;
pub const REG_OAM_ADDR: u16 = 0x14;
pub const REG_OAM_DATA: u16 = 0x15;
pub const REG_MATRIX_CONTROL: u16 = 0x18;
pub const REG_WINDOW_CONTROL: u16 = 0x33;
pub const REG_WINDOW_MAIN_ENABLE: u16 = 0x34;
pub const REG_WINDOW_SUB_ENABLE: u16 = 0x35;
pub const REG_HDMA_CONTROL: u16 = 0x36;
pub const REG_IRQ_ENABLE: u16 = 0x3D;
pub const REG_VBLANK_FLAG: u16 = 0x3E;
pub const REG_FRAME_COUNT_LO: u16 = 0x3F;
pub const REG_FRAME_COUNT_HI: u16 = 0x40;
pub const REG_DMA_CONTROL: u16 = 0x60;
pub const REG_DMA_SOURCE_BANK: u16 = 0x61;
pub const REG_DMA_SOURCE_LO: u16 = 0x62;
pub const REG_DMA_SOURCE_HI: u16 = 0x63;
pub const REG_DMA_DEST_LO: u16 = 0x64;
pub const REG_DMA_DEST_HI: u16 = 0x65;
pub const REG_DMA_LENGTH_LO: u16 = 0x66;
pub const REG_DMA_LENGTH_HI: u16 = 0x67;

// MATRIX_CONTROL bits
const MATRIX_ENABLE: u8 = 0x01;
const MATRIX_OOB_MASK: u8 = 0x06; // 0 = wrap, 1 = backdrop, 2 = character 0
const MATRIX_MIRROR_X: u8 = 0x08;
const MATRIX_MIRROR_Y: u8 = 0x10;

// DMA_CONTROL bits
const DMA_START: u8 = 0x01;
const DMA_FILL: u8 = 0x02;
const DMA_DEST_MASK: u8 = 0x0C;
const DMA_COMPLETE: u8 = 0x80;

/// Per-layer background descriptor.
#[derive(Clone, Copy, Default)]
struct Background {
    scroll_x: i16,
    scroll_y: i16,
    enabled: bool,
    tile16: bool,
    tilemap_base: u16,
}

impl Background {
    fn tile_size(&self) -> i32 {
        if self.tile16 { 16 } else { 8 }
    }

    fn tilemap_base(&self) -> u16 {
        if self.tilemap_base == 0 {
            DEFAULT_TILEMAP_BASE
        } else {
            self.tilemap_base
        }
    }
}

#[derive(Clone, Copy, Default)]
struct Window {
    left: u8,
    right: u8,
    top: u8,
    bottom: u8,
}

impl Window {
    fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.left as usize
            && x <= self.right as usize
            && y >= self.top as usize
            && y <= self.bottom as usize
    }
}

#[derive(Clone, Copy, PartialEq)]
enum DmaDest {
    Vram,
    Cgram,
    Oam,
}

/// DMA engine registers and progress state.
struct Dma {
    enabled: bool,
    fill_mode: bool,
    dest: DmaDest,
    source_bank: u8,
    source_offset: u16,
    dest_offset: u16,
    length: u16,
    progress: u16,
    complete: bool,
}

impl Dma {
    fn new() -> Self {
        Self {
            enabled: false,
            fill_mode: false,
            dest: DmaDest::Vram,
            source_bank: 0,
            source_offset: 0,
            dest_offset: 0,
            length: 0,
            progress: 0,
            complete: false,
        }
    }
}

pub struct Ppu {
    vram: Box<[u8]>,
    cgram: [u8; CGRAM_SIZE],
    oam: [u8; OAM_SIZE],

    layers: [Background; 4],

    // Matrix Mode (BG0 affine transform)
    matrix_control: u8,
    matrix: [i16; 6], // A, B, C, D (8.8 fixed), CX, CY

    windows: [Window; 2],
    window_control: u8,
    window_main_enable: u8,
    window_sub_enable: u8,

    hdma_control: u8,
    hdma_table_base: u16,

    // Port cursors and the CGRAM two-byte latch
    vram_addr: u16,
    cgram_addr: u8,
    cgram_second: bool,
    cgram_low: u8,
    oam_sprite: u8,
    oam_byte: u8,

    dma: Dma,

    // Timing
    scanline: u16,
    dot: u16,
    frame_count: u16,
    vblank_flag: bool,
    vblank_irq_enable: bool,
    frame_complete: bool,

    framebuffer: Box<[u32]>,
}

impl Ppu {
    pub fn new() -> Self {
        Self {
            vram: vec![0; VRAM_SIZE].into_boxed_slice(),
            cgram: [0; CGRAM_SIZE],
            oam: [0; OAM_SIZE],
            layers: [Background::default(); 4],
            matrix_control: 0,
            matrix: [0; 6],
            windows: [Window::default(); 2],
            window_control: 0,
            window_main_enable: 0,
            window_sub_enable: 0,
            hdma_control: 0,
            hdma_table_base: 0,
            vram_addr: 0,
            cgram_addr: 0,
            cgram_second: false,
            cgram_low: 0,
            oam_sprite: 0,
            oam_byte: 0,
            dma: Dma::new(),
            scanline: 0,
            dot: 0,
            // The counter names the frame being rendered; OAM protection
            // arms once it moves past the first.
            frame_count: 1,
            vblank_flag: false,
            vblank_irq_enable: false,
            frame_complete: false,
            framebuffer: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    /// Advance one dot. Returns true on frame wrap (scanline 219 -> 0).
    pub fn tick(&mut self) -> bool {
        if self.scanline < VBLANK_SCANLINE && (self.dot as usize) < SCREEN_WIDTH {
            self.render_dot(self.dot as usize, self.scanline as usize);
        }

        self.dot += 1;
        if self.dot == DOTS_PER_SCANLINE {
            self.dot = 0;
            self.scanline += 1;
            match self.scanline {
                VBLANK_SCANLINE => {
                    // VBlank entry: latch the flag (doubles as the IRQ line)
                    // and open OAM for updates.
                    self.vblank_flag = true;
                }
                TOTAL_SCANLINES => {
                    self.scanline = 0;
                    self.frame_count = self.frame_count.wrapping_add(1);
                    self.frame_complete = true;
                    self.vblank_flag = false;
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn dot(&self) -> u16 {
        self.dot
    }

    pub fn frame_count(&self) -> u16 {
        self.frame_count
    }

    /// VBlank IRQ line: asserted from VBlank entry until the flag is
    /// acknowledged by a read or the next frame starts. Gated by the
    /// IRQ_ENABLE register (off at reset), so ROMs that only poll the
    /// flag are never interrupted.
    pub fn irq(&self) -> bool {
        self.vblank_flag && self.vblank_irq_enable
    }

    /// Take the frame-complete latch (set once per scanline wrap).
    pub fn take_frame_complete(&mut self) -> bool {
        std::mem::take(&mut self.frame_complete)
    }

    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer
    }

    // -----------------------------------------------------------------------
    // Register interface
    // -----------------------------------------------------------------------

    pub fn read(&mut self, offset: u16) -> u8 {
        match offset {
            REG_VRAM_DATA => {
                let value = self.vram[self.vram_addr as usize];
                self.vram_addr = self.vram_addr.wrapping_add(1);
                value
            }
            REG_CGRAM_DATA => {
                let index = self.cgram_addr as usize * 2;
                if self.cgram_second {
                    self.cgram_second = false;
                    let value = self.cgram[index + 1];
                    self.cgram_addr = self.cgram_addr.wrapping_add(1);
                    value
                } else {
                    self.cgram_second = true;
                    self.cgram[index]
                }
            }
            REG_OAM_DATA => {
                let value = self.oam[self.oam_index()];
                self.advance_oam();
                value
            }
            REG_IRQ_ENABLE => self.vblank_irq_enable as u8,
            REG_VBLANK_FLAG => {
                // One-shot: reading acknowledges the latch.
                let value = self.vblank_flag as u8;
                self.vblank_flag = false;
                value
            }
            REG_FRAME_COUNT_LO => self.frame_count as u8,
            REG_FRAME_COUNT_HI => (self.frame_count >> 8) as u8,
            REG_DMA_CONTROL => {
                let mut status = 0;
                if self.dma.enabled {
                    status |= DMA_START;
                }
                if self.dma.fill_mode {
                    status |= DMA_FILL;
                }
                status |= match self.dma.dest {
                    DmaDest::Vram => 0,
                    DmaDest::Cgram => 1 << 2,
                    DmaDest::Oam => 2 << 2,
                };
                if self.dma.complete {
                    status |= DMA_COMPLETE;
                }
                status
            }
            REG_DMA_SOURCE_BANK => self.dma.source_bank,
            REG_DMA_SOURCE_LO => self.dma.source_offset as u8,
            REG_DMA_SOURCE_HI => (self.dma.source_offset >> 8) as u8,
            REG_DMA_DEST_LO => self.dma.dest_offset as u8,
            REG_DMA_DEST_HI => (self.dma.dest_offset >> 8) as u8,
            REG_DMA_LENGTH_LO => self.dma.length as u8,
            REG_DMA_LENGTH_HI => (self.dma.length >> 8) as u8,
            _ => 0,
        }
    }

    pub fn write(&mut self, offset: u16, data: u8) {
        match offset {
            0x00..=0x07 => self.write_scroll((offset / 4) as usize, (offset % 4) as usize, data),
            REG_BG_ENABLE => {
                for (i, layer) in self.layers.iter_mut().enumerate() {
                    layer.enabled = data & (1 << i) != 0;
                }
            }
            REG_BG_TILE_SIZE => {
                for (i, layer) in self.layers.iter_mut().enumerate() {
                    layer.tile16 = data & (1 << i) != 0;
                }
            }
            0x0A..=0x0D => self.write_scroll(2, (offset - 0x0A) as usize, data),
            REG_VRAM_ADDR_LO => self.vram_addr = (self.vram_addr & 0xFF00) | data as u16,
            REG_VRAM_ADDR_HI => self.vram_addr = (self.vram_addr & 0x00FF) | ((data as u16) << 8),
            REG_VRAM_DATA => {
                self.vram[self.vram_addr as usize] = data;
                self.vram_addr = self.vram_addr.wrapping_add(1);
            }
            REG_CGRAM_ADDR => {
                self.cgram_addr = data;
                self.cgram_second = false;
            }
            REG_CGRAM_DATA => {
                if self.cgram_second {
                    let index = self.cgram_addr as usize * 2;
                    self.cgram[index] = self.cgram_low;
                    self.cgram[index + 1] = data;
                    self.cgram_addr = self.cgram_addr.wrapping_add(1);
                    self.cgram_second = false;
                } else {
                    self.cgram_low = data;
                    self.cgram_second = true;
                }
            }
            REG_OAM_ADDR => {
                self.oam_sprite = data & (OAM_SPRITES as u8 - 1);
                self.oam_byte = 0;
            }
            REG_OAM_DATA => {
                if self.oam_writable() {
                    let index = self.oam_index();
                    self.oam[index] = data;
                }
                self.advance_oam();
            }
            0x16 => self.write_scroll(3, 0, data),
            0x17 => self.write_scroll(3, 1, data),
            REG_MATRIX_CONTROL => self.matrix_control = data,
            0x19..=0x24 => {
                let component = ((offset - 0x19) / 2) as usize;
                let value = &mut self.matrix[component];
                if (offset - 0x19) % 2 == 0 {
                    *value = set_lo(*value, data);
                } else {
                    *value = set_hi(*value, data);
                }
            }
            0x2B..=0x32 => {
                let window = &mut self.windows[((offset - 0x2B) / 4) as usize];
                match (offset - 0x2B) % 4 {
                    0 => window.left = data,
                    1 => window.right = data,
                    2 => window.top = data,
                    _ => window.bottom = data,
                }
            }
            REG_WINDOW_CONTROL => self.window_control = data,
            REG_WINDOW_MAIN_ENABLE => self.window_main_enable = data,
            REG_WINDOW_SUB_ENABLE => self.window_sub_enable = data,
            REG_HDMA_CONTROL => self.hdma_control = data,
            REG_IRQ_ENABLE => self.vblank_irq_enable = data & 0x01 != 0,
            0x37 => self.hdma_table_base = (self.hdma_table_base & 0xFF00) | data as u16,
            0x38 => self.hdma_table_base = (self.hdma_table_base & 0x00FF) | ((data as u16) << 8),
            0x39 => self.write_scroll(3, 2, data),
            0x3A => self.write_scroll(3, 3, data),
            0x41..=0x48 => {
                let layer = ((offset - 0x41) / 2) as usize;
                let base = &mut self.layers[layer].tilemap_base;
                if (offset - 0x41) % 2 == 0 {
                    *base = (*base & 0xFF00) | data as u16;
                } else {
                    *base = (*base & 0x00FF) | ((data as u16) << 8);
                }
            }
            REG_DMA_CONTROL => {
                self.dma.fill_mode = data & DMA_FILL != 0;
                self.dma.dest = match (data & DMA_DEST_MASK) >> 2 {
                    1 => DmaDest::Cgram,
                    2 => DmaDest::Oam,
                    _ => DmaDest::Vram,
                };
                if data & DMA_START != 0 {
                    self.dma.progress = 0;
                    self.dma.complete = false;
                    if self.dma.length == 0 {
                        self.dma.enabled = false;
                        self.dma.complete = true;
                    } else {
                        self.dma.enabled = true;
                    }
                } else {
                    self.dma.enabled = false;
                }
            }
            REG_DMA_SOURCE_BANK => self.dma.source_bank = data,
            REG_DMA_SOURCE_LO => {
                self.dma.source_offset = (self.dma.source_offset & 0xFF00) | data as u16
            }
            REG_DMA_SOURCE_HI => {
                self.dma.source_offset = (self.dma.source_offset & 0x00FF) | ((data as u16) << 8)
            }
            REG_DMA_DEST_LO => self.dma.dest_offset = (self.dma.dest_offset & 0xFF00) | data as u16,
            REG_DMA_DEST_HI => {
                self.dma.dest_offset = (self.dma.dest_offset & 0x00FF) | ((data as u16) << 8)
            }
            REG_DMA_LENGTH_LO => self.dma.length = (self.dma.length & 0xFF00) | data as u16,
            REG_DMA_LENGTH_HI => self.dma.length = (self.dma.length & 0x00FF) | ((data as u16) << 8),
            _ => {}
        }
    }

    fn write_scroll(&mut self, layer: usize, sub: usize, data: u8) {
        let bg = &mut self.layers[layer];
        match sub {
            0 => bg.scroll_x = set_lo(bg.scroll_x, data),
            1 => bg.scroll_x = set_hi(bg.scroll_x, data),
            2 => bg.scroll_y = set_lo(bg.scroll_y, data),
            _ => bg.scroll_y = set_hi(bg.scroll_y, data),
        }
    }

    // -----------------------------------------------------------------------
    // OAM
    // -----------------------------------------------------------------------

    fn oam_index(&self) -> usize {
        self.oam_sprite as usize * OAM_RECORD + self.oam_byte as usize
    }

    fn advance_oam(&mut self) {
        self.oam_byte += 1;
        if self.oam_byte as usize == OAM_RECORD {
            self.oam_byte = 0;
            self.oam_sprite = (self.oam_sprite + 1) & (OAM_SPRITES as u8 - 1);
        }
    }

    /// OAM accepts writes during VBlank, and anywhere during the first
    /// rendered frame (boot-time setup).
    fn oam_writable(&self) -> bool {
        self.frame_count <= 1 || self.scanline >= VBLANK_SCANLINE
    }

    /// Current OAM write cursor as (sprite, byte) — for diagnostics/tests.
    pub fn oam_cursor(&self) -> (u8, u8) {
        (self.oam_sprite, self.oam_byte)
    }

    /// Direct OAM inspection (no cursor side effects).
    pub fn oam_peek(&self, index: usize) -> u8 {
        self.oam[index % OAM_SIZE]
    }

    /// Direct VRAM inspection (no cursor side effects).
    pub fn vram_peek(&self, addr: u16) -> u8 {
        self.vram[addr as usize]
    }

    // -----------------------------------------------------------------------
    // DMA engine
    // -----------------------------------------------------------------------

    pub fn dma_active(&self) -> bool {
        self.dma.enabled
    }

    pub fn dma_is_fill(&self) -> bool {
        self.dma.fill_mode
    }

    /// Fill mode repeats the low source-offset byte.
    pub fn dma_fill_value(&self) -> u8 {
        self.dma.source_offset as u8
    }

    /// Current copy-mode source address as (bank, offset).
    pub fn dma_source(&self) -> (u8, u16) {
        (self.dma.source_bank, self.dma.source_offset)
    }

    /// Consume one DMA byte: write it to the destination, advance both
    /// addresses and the progress counter, and finish the transfer when
    /// progress reaches the programmed length.
    pub fn dma_step(&mut self, data: u8) {
        if !self.dma.enabled {
            return;
        }
        match self.dma.dest {
            DmaDest::Vram => self.vram[self.dma.dest_offset as usize] = data,
            DmaDest::Cgram => self.cgram[self.dma.dest_offset as usize % CGRAM_SIZE] = data,
            DmaDest::Oam => {
                if self.oam_writable() {
                    self.oam[self.dma.dest_offset as usize % OAM_SIZE] = data;
                }
            }
        }
        self.dma.dest_offset = self.dma.dest_offset.wrapping_add(1);
        self.dma.source_offset = self.dma.source_offset.wrapping_add(1);
        self.dma.progress += 1;
        if self.dma.progress == self.dma.length {
            self.dma.enabled = false;
            self.dma.complete = true;
        }
    }

    // -----------------------------------------------------------------------
    // Pixel pipeline
    // -----------------------------------------------------------------------

    fn render_dot(&mut self, x: usize, y: usize) {
        // Backdrop is palette entry 0.
        let mut color = self.cgram_color(0, 0);
        let mut bg_priority: Option<u8> = None;

        // Layers compose back-to-front: BG3 lowest, BG0 on top.
        for layer in (0..4).rev() {
            if !self.layers[layer].enabled {
                continue;
            }
            if self.layer_window_masked(layer, x, y) {
                continue;
            }
            if let Some(rgb) = self.layer_pixel(layer, x, y) {
                color = rgb;
                bg_priority = Some(layer as u8);
            }
        }

        if let Some((rgb, priority)) = self.sprite_pixel(x, y)
            && bg_priority.is_none_or(|bp| priority >= bp)
        {
            color = rgb;
        }

        self.framebuffer[y * SCREEN_WIDTH + x] = color;
    }

    /// Background pixel for one layer. Background color index 0 is opaque;
    /// `None` only occurs for Matrix Mode backdrop overflow.
    fn layer_pixel(&self, layer: usize, x: usize, y: usize) -> Option<u32> {
        let bg = &self.layers[layer];
        let tile_size = bg.tile_size();
        let map_pixels = TILEMAP_TILES * tile_size;

        let (base_x, base_y) = if layer == 0 && self.matrix_control & MATRIX_ENABLE != 0 {
            self.matrix_transform(x, y)
        } else {
            (x as i32, y as i32)
        };

        let world_x = base_x + bg.scroll_x as i32;
        let world_y = base_y + bg.scroll_y as i32;

        let mut char0 = false;
        if layer == 0
            && self.matrix_control & MATRIX_ENABLE != 0
            && (world_x < 0 || world_x >= map_pixels || world_y < 0 || world_y >= map_pixels)
        {
            match (self.matrix_control & MATRIX_OOB_MASK) >> 1 {
                0 => {} // wrap below
                1 => return None,
                _ => char0 = true,
            }
        }

        let wx = world_x.rem_euclid(map_pixels);
        let wy = world_y.rem_euclid(map_pixels);

        let (tile_index, attrs) = if char0 {
            (0u8, 0u8)
        } else {
            let tx = wx / tile_size;
            let ty = wy / tile_size;
            let entry = bg
                .tilemap_base()
                .wrapping_add(((ty * TILEMAP_TILES + tx) as u16) * 2);
            (
                self.vram[entry as usize],
                self.vram[entry.wrapping_add(1) as usize],
            )
        };

        let palette = attrs & 0x0F;
        let mut px = wx % tile_size;
        let mut py = wy % tile_size;
        if attrs & 0x10 != 0 {
            px = tile_size - 1 - px;
        }
        if attrs & 0x20 != 0 {
            py = tile_size - 1 - py;
        }

        let index = self.tile_pixel(tile_index, tile_size, px, py);
        Some(self.cgram_color(palette, index))
    }

    /// Matrix Mode affine transform around (CX, CY); A-D are 8.8 fixed.
    fn matrix_transform(&self, x: usize, y: usize) -> (i32, i32) {
        let [a, b, c, d, cx, cy] = self.matrix;
        let mut dx = x as i32 - cx as i32;
        let mut dy = y as i32 - cy as i32;
        if self.matrix_control & MATRIX_MIRROR_X != 0 {
            dx = -dx;
        }
        if self.matrix_control & MATRIX_MIRROR_Y != 0 {
            dy = -dy;
        }
        let fx = ((a as i32 * dx + b as i32 * dy) >> 8) + cx as i32;
        let fy = ((c as i32 * dx + d as i32 * dy) >> 8) + cy as i32;
        (fx, fy)
    }

    /// 4-bpp tile fetch: two pixels per byte, upper nibble = even column.
    fn tile_pixel(&self, tile_index: u8, tile_size: i32, px: i32, py: i32) -> u8 {
        let stride = (tile_size * tile_size / 2) as usize;
        let offset = tile_index as usize * stride + ((py * tile_size + px) / 2) as usize;
        let byte = self.vram[offset % VRAM_SIZE];
        if px % 2 == 0 { byte >> 4 } else { byte & 0x0F }
    }

    /// Highest-priority opaque sprite pixel covering (x, y). Lower OAM
    /// index wins among equal priorities.
    fn sprite_pixel(&self, x: usize, y: usize) -> Option<(u32, u8)> {
        let mut best: Option<(u32, u8)> = None;

        for sprite in 0..OAM_SPRITES {
            let record = &self.oam[sprite * OAM_RECORD..sprite * OAM_RECORD + OAM_RECORD];
            if record[5] & 0x01 == 0 {
                continue;
            }
            let size = if record[5] & 0x02 != 0 { 16i32 } else { 8i32 };

            // X is 9 bits, sign-extended from bit 0 of the high byte.
            let mut sx = record[0] as i32 | ((record[1] as i32 & 1) << 8);
            if sx & 0x100 != 0 {
                sx -= 512;
            }
            let sy = record[2] as i32;

            let px = x as i32 - sx;
            let py = y as i32 - sy;
            if px < 0 || px >= size || py < 0 || py >= size {
                continue;
            }

            let attrs = record[4];
            let priority = attrs >> 6;
            if let Some((_, best_priority)) = best
                && priority <= best_priority
            {
                continue;
            }

            let mut tx = px;
            let mut ty = py;
            if attrs & 0x10 != 0 {
                tx = size - 1 - tx;
            }
            if attrs & 0x20 != 0 {
                ty = size - 1 - ty;
            }

            let index = self.tile_pixel(record[3], size, tx, ty);
            if index == 0 {
                continue; // sprite color 0 is transparent
            }
            best = Some((self.cgram_color(attrs & 0x0F, index), priority));
        }

        best
    }

    /// True when the combined window test masks this layer at (x, y).
    fn layer_window_masked(&self, layer: usize, x: usize, y: usize) -> bool {
        let main = self.window_main_enable & (1 << layer) != 0;
        if !main {
            return false;
        }
        let in0 = self.windows[0].contains(x, y);
        let in1 = self.windows[1].contains(x, y);
        let combined = match (self.window_control >> 2) & 0x03 {
            0 => in0 || in1,
            1 => in0 && in1,
            2 => in0 ^ in1,
            _ => !(in0 ^ in1),
        };
        // The sub-enable bit inverts the mask sense for this layer.
        combined ^ (self.window_sub_enable & (1 << layer) != 0)
    }

    /// CGRAM lookup: little-endian RGB555 expanded to packed RGB888.
    fn cgram_color(&self, palette: u8, index: u8) -> u32 {
        let entry = (palette as usize * 16 + index as usize) * 2;
        let lo = self.cgram[entry];
        let hi = self.cgram[entry + 1];
        let r5 = (hi & 0x7C) >> 2;
        let g5 = ((hi & 0x03) << 3) | ((lo & 0xE0) >> 5);
        let b5 = lo & 0x1F;
        let r = (r5 as u32 * 255) / 31;
        let g = (g5 as u32 * 255) / 31;
        let b = (b5 as u32 * 255) / 31;
        (r << 16) | (g << 8) | b
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::core::Component for Ppu {
    fn tick(&mut self) -> bool {
        Ppu::tick(self)
    }
}

#[inline]
fn set_lo(value: i16, data: u8) -> i16 {
    ((value as u16 & 0xFF00) | data as u16) as i16
}

#[inline]
fn set_hi(value: i16, data: u8) -> i16 {
    ((value as u16 & 0x00FF) | ((data as u16) << 8)) as i16
}
