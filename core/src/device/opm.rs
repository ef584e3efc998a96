//! OPM-style FM synthesizer extension.
//!
//! An address/data port pair fronts a 256-byte shadow of the OPM register
//! file. Writes that land on timer or key-on addresses update live state;
//! everything else is held in the shadow for the voice decoders. The
//! synthesis path is a two-operator subset (modulator -> carrier) with
//! feedback, PMS-scaled phase modulation, linear TL attenuation, pan
//! gains, and a short linear attack envelope on key-on.
//!
//! # Host ports (offsets relative to the FM window)
//!
//! | Offset | Port       | Description                                    |
//! |--------|------------|------------------------------------------------|
//! | 0x00   | FM_ADDR    | Select the OPM register for FM_DATA            |
//! | 0x01   | FM_DATA    | Read/write the selected register; a write      |
//! |        |            | asserts Busy for 32 master cycles              |
//! | 0x02   | FM_STATUS  | Read-only: TimerA[0], TimerB[1], IRQ[2], Busy[7]|
//! | 0x03   | FM_CONTROL | enable[0], mute[1], one-shot reset[7]          |
//! | 0x04   | FM_MIX_L   | Left mix gain (0-255)                          |
//! | 0x05   | FM_MIX_R   | Right mix gain (0-255)                         |
//!
//! # OPM register decode
//!
//! | Address   | Effect                                                   |
//! |-----------|----------------------------------------------------------|
//! | 0x08      | Key on/off: voice in bits 2:0, operator mask in 6:3      |
//! | 0x10/0x11 | Timer A raw value, high 8 / low 2 bits (10-bit total)    |
//! | 0x12      | Timer B raw value (8-bit)                                |
//! | 0x14      | Timer control: start A[0], start B[1], clear A flag[2],  |
//! |           | clear B flag[3], IRQ enable A[4], IRQ enable B[5]        |
//! | 0x20+v    | Pan R[7]/L[6], feedback[5:3], algorithm[2:0]             |
//! | 0x28+v    | Key code (octave[6:4], note[3:0])                        |
//! | 0x30+v    | Key fraction (bits 7:2)                                  |
//! | 0x38+v    | PMS[6:4], AMS[1:0]                                       |
//! | 0x40+v    | Modulator MUL (bits 3:0)                                 |
//! | 0x58+v    | Carrier MUL (bits 3:0)                                   |
//! | 0x60+v    | Modulator TL (bits 6:0)                                  |
//! | 0x78+v    | Carrier TL (bits 6:0)                                    |
//!
//! Timer periods in master cycles: A = `(0x400 - raw) * 64`,
//! B = `(0x100 - raw) * 1024`. Expiry sets the status bit and reloads.
//! The IRQ output is `(en_a & st_a) | (en_b & st_b)`.

pub const PORT_ADDR: u8 = 0x00;
pub const PORT_DATA: u8 = 0x01;
pub const PORT_STATUS: u8 = 0x02;
pub const PORT_CONTROL: u8 = 0x03;
pub const PORT_MIX_L: u8 = 0x04;
pub const PORT_MIX_R: u8 = 0x05;

pub const STATUS_TIMER_A: u8 = 0x01;
pub const STATUS_TIMER_B: u8 = 0x02;
pub const STATUS_IRQ: u8 = 0x04;
pub const STATUS_BUSY: u8 = 0x80;

const CONTROL_ENABLE: u8 = 0x01;
const CONTROL_MUTE: u8 = 0x02;
const CONTROL_RESET: u8 = 0x80;

/// Register write busy window, in master cycles.
const BUSY_CYCLES: u64 = 32;

const VOICES: usize = 8;
const SINE_TABLE_LEN: usize = 1024;

/// OPM 16-entry note field folded onto 12 semitones (every fourth code
/// repeats its predecessor).
const NOTE_FOLD: [u8; 16] = [0, 1, 2, 3, 3, 4, 5, 6, 6, 7, 8, 9, 9, 10, 11, 11];

struct FmTimer {
    raw: u16,
    running: bool,
    irq_enable: bool,
    status: bool,
    countdown: u64,
    /// Master cycles per expiry for the current raw value.
    period: fn(u16) -> u64,
}

impl FmTimer {
    fn new(period: fn(u16) -> u64) -> Self {
        Self {
            raw: 0,
            running: false,
            irq_enable: false,
            status: false,
            countdown: 0,
            period,
        }
    }

    fn set_running(&mut self, run: bool) {
        if run && !self.running {
            // Rising edge reloads the countdown.
            self.countdown = (self.period)(self.raw);
        }
        self.running = run;
    }

    fn step(&mut self, cycles: u64) {
        if !self.running {
            return;
        }
        let mut remaining = cycles;
        while remaining >= self.countdown {
            remaining -= self.countdown;
            self.countdown = (self.period)(self.raw);
            self.status = true;
        }
        self.countdown -= remaining;
    }
}

fn timer_a_period(raw: u16) -> u64 {
    (0x400 - raw as u64) * 64
}

fn timer_b_period(raw: u16) -> u64 {
    (0x100 - raw as u64) * 1024
}

#[derive(Clone, Copy, Default)]
struct Voice {
    key_on: bool,
    pan_l: bool,
    pan_r: bool,
    algorithm: u8,
    feedback: u8,
    pms: u8,
    // Captured for the LFO path; the two-operator subset has no LFO yet.
    #[allow(dead_code)]
    ams: u8,
    key_code: u8,
    key_frac: u8,
    mod_mul: u8,
    carrier_mul: u8,
    mod_tl: u8,
    carrier_tl: u8,
    base_increment: u32,
    mod_increment: u32,
    carrier_increment: u32,
    mod_phase: u32,
    carrier_phase: u32,
    last_mod: i32,
    envelope: u8,
}

impl Voice {
    /// Recompute phase increments from the key code/fraction and the
    /// per-operator multipliers. Done at register-write time so the sample
    /// path stays integer-only.
    fn update_increments(&mut self, sample_rate: u32) {
        if sample_rate == 0 {
            return;
        }
        let octave = (self.key_code >> 4) & 0x07;
        let note = NOTE_FOLD[(self.key_code & 0x0F) as usize];
        let semis = octave as f64 * 12.0 + note as f64 + self.key_frac as f64 / 64.0;
        // A4 (440 Hz) sits at octave 4, note 9 on this scale.
        let freq = 440.0 * ((semis - 57.0) / 12.0).exp2();
        self.base_increment = ((freq * 4294967296.0) / sample_rate as f64) as u32;
        self.mod_increment = mul_scale(self.base_increment, self.mod_mul);
        self.carrier_increment = mul_scale(self.base_increment, self.carrier_mul);
    }

    fn key_on(&mut self) {
        if !self.key_on {
            // Rising edge: restart phases and the attack ramp so the voice
            // starts from silence instead of a click transient.
            self.mod_phase = 0;
            self.carrier_phase = 0;
            self.last_mod = 0;
            self.envelope = 0;
        }
        self.key_on = true;
    }

    fn key_off(&mut self) {
        self.key_on = false;
    }

    /// One sample of two-operator FM. Linear TL attenuation stands in for
    /// the OPM exponential table.
    fn step(&mut self, sine: &[i16]) -> i32 {
        self.envelope = self.envelope.saturating_add(4);

        let fb_offset = (self.last_mod * self.feedback as i32) << 9;
        let mod_index = self.mod_phase.wrapping_add(fb_offset as u32);
        let mod_out =
            sine[(mod_index >> 22) as usize] as i32 * (127 - self.mod_tl as i32) / 127;
        self.last_mod = mod_out;

        let pm_offset = (mod_out * self.pms as i32) << 10;
        let carrier_index = self.carrier_phase.wrapping_add(pm_offset as u32);
        let carrier_out =
            sine[(carrier_index >> 22) as usize] as i32 * (127 - self.carrier_tl as i32) / 127;

        self.mod_phase = self.mod_phase.wrapping_add(self.mod_increment);
        self.carrier_phase = self.carrier_phase.wrapping_add(self.carrier_increment);

        // Algorithms 4-7 route the modulator straight to the output as well.
        let out = if self.algorithm >= 4 {
            (carrier_out + mod_out) / 2
        } else {
            carrier_out
        };
        out * self.envelope as i32 / 255
    }
}

/// OPM MUL semantics: 0 halves the base rate, 1-15 multiply it.
fn mul_scale(base: u32, mul: u8) -> u32 {
    if mul == 0 {
        base / 2
    } else {
        (base as u64 * mul as u64) as u32
    }
}

pub struct OpmFm {
    address: u8,
    regs: [u8; 256],

    enabled: bool,
    muted: bool,
    busy_cycles: u64,
    mix_l: u8,
    mix_r: u8,

    timer_a: FmTimer,
    timer_b: FmTimer,

    voices: [Voice; VOICES],

    sample_rate: u32,
    sine_table: Vec<i16>,
}

impl OpmFm {
    pub fn new(sample_rate: u32) -> Self {
        let sine_table = (0..SINE_TABLE_LEN)
            .map(|i| {
                let angle = i as f64 / SINE_TABLE_LEN as f64 * std::f64::consts::TAU;
                (angle.sin() * 32767.0) as i16
            })
            .collect();
        Self {
            address: 0,
            regs: [0; 256],
            enabled: false,
            muted: false,
            busy_cycles: 0,
            mix_l: 255,
            mix_r: 255,
            timer_a: FmTimer::new(timer_a_period),
            timer_b: FmTimer::new(timer_b_period),
            voices: [Voice::default(); VOICES],
            sample_rate,
            sine_table,
        }
    }

    /// Reinitialize register and voice state. Enable/mute and the mix
    /// gains survive (they belong to the host-side control ports).
    pub fn reset(&mut self) {
        self.address = 0;
        self.regs = [0; 256];
        self.busy_cycles = 0;
        self.timer_a = FmTimer::new(timer_a_period);
        self.timer_b = FmTimer::new(timer_b_period);
        self.voices = [Voice::default(); VOICES];
    }

    // -----------------------------------------------------------------------
    // Host ports
    // -----------------------------------------------------------------------

    pub fn read_port(&mut self, port: u8) -> u8 {
        match port {
            PORT_ADDR => self.address,
            PORT_DATA => self.regs[self.address as usize],
            PORT_STATUS => {
                let mut status = 0;
                if self.timer_a.status {
                    status |= STATUS_TIMER_A;
                }
                if self.timer_b.status {
                    status |= STATUS_TIMER_B;
                }
                if self.irq() {
                    status |= STATUS_IRQ;
                }
                if self.busy_cycles > 0 {
                    status |= STATUS_BUSY;
                }
                status
            }
            PORT_CONTROL => {
                let mut control = 0;
                if self.enabled {
                    control |= CONTROL_ENABLE;
                }
                if self.muted {
                    control |= CONTROL_MUTE;
                }
                control
            }
            PORT_MIX_L => self.mix_l,
            PORT_MIX_R => self.mix_r,
            _ => 0,
        }
    }

    pub fn write_port(&mut self, port: u8, data: u8) {
        match port {
            PORT_ADDR => self.address = data,
            PORT_DATA => {
                let address = self.address;
                self.write_register(address, data);
                self.busy_cycles = BUSY_CYCLES;
            }
            PORT_CONTROL => {
                if data & CONTROL_RESET != 0 {
                    log::debug!("FM extension reset");
                    self.reset();
                }
                self.enabled = data & CONTROL_ENABLE != 0;
                self.muted = data & CONTROL_MUTE != 0;
            }
            PORT_MIX_L => self.mix_l = data,
            PORT_MIX_R => self.mix_r = data,
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // OPM register file
    // -----------------------------------------------------------------------

    fn write_register(&mut self, address: u8, data: u8) {
        self.regs[address as usize] = data;
        let sample_rate = self.sample_rate;
        match address {
            0x08 => {
                let voice = &mut self.voices[(data & 0x07) as usize];
                if (data >> 3) & 0x0F != 0 {
                    voice.key_on();
                } else {
                    voice.key_off();
                }
            }
            0x10 => self.timer_a.raw = (self.timer_a.raw & 0x003) | ((data as u16) << 2),
            0x11 => self.timer_a.raw = (self.timer_a.raw & 0x3FC) | (data as u16 & 0x03),
            0x12 => self.timer_b.raw = data as u16,
            0x14 => {
                self.timer_a.set_running(data & 0x01 != 0);
                self.timer_b.set_running(data & 0x02 != 0);
                if data & 0x04 != 0 {
                    self.timer_a.status = false;
                }
                if data & 0x08 != 0 {
                    self.timer_b.status = false;
                }
                self.timer_a.irq_enable = data & 0x10 != 0;
                self.timer_b.irq_enable = data & 0x20 != 0;
            }
            0x20..=0x27 => {
                let voice = &mut self.voices[(address & 0x07) as usize];
                voice.pan_r = data & 0x80 != 0;
                voice.pan_l = data & 0x40 != 0;
                voice.feedback = (data >> 3) & 0x07;
                voice.algorithm = data & 0x07;
            }
            0x28..=0x2F => {
                let voice = &mut self.voices[(address & 0x07) as usize];
                voice.key_code = data & 0x7F;
                voice.update_increments(sample_rate);
            }
            0x30..=0x37 => {
                let voice = &mut self.voices[(address & 0x07) as usize];
                voice.key_frac = data >> 2;
                voice.update_increments(sample_rate);
            }
            0x38..=0x3F => {
                let voice = &mut self.voices[(address & 0x07) as usize];
                voice.pms = (data >> 4) & 0x07;
                voice.ams = data & 0x03;
            }
            0x40..=0x47 => {
                let voice = &mut self.voices[(address & 0x07) as usize];
                voice.mod_mul = data & 0x0F;
                voice.update_increments(sample_rate);
            }
            0x58..=0x5F => {
                let voice = &mut self.voices[(address & 0x07) as usize];
                voice.carrier_mul = data & 0x0F;
                voice.update_increments(sample_rate);
            }
            0x60..=0x67 => self.voices[(address & 0x07) as usize].mod_tl = data & 0x7F,
            0x78..=0x7F => self.voices[(address & 0x07) as usize].carrier_tl = data & 0x7F,
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Timing and synthesis
    // -----------------------------------------------------------------------

    /// Advance timers and the busy latch by `n` master cycles.
    pub fn step_cycles(&mut self, cycles: u64) {
        self.busy_cycles = self.busy_cycles.saturating_sub(cycles);
        self.timer_a.step(cycles);
        self.timer_b.step(cycles);
    }

    /// Interrupt request output toward the host.
    pub fn irq(&self) -> bool {
        (self.timer_a.irq_enable && self.timer_a.status)
            || (self.timer_b.irq_enable && self.timer_b.status)
    }

    /// Mix one mono sample from all keyed voices.
    pub fn emit_sample(&mut self) -> i16 {
        if !self.enabled || self.muted {
            return 0;
        }

        let mut left: i32 = 0;
        let mut right: i32 = 0;
        let mut active = 0;
        for voice in &mut self.voices {
            if !voice.key_on {
                continue;
            }
            active += 1;
            let sample = voice.step(&self.sine_table);
            if voice.pan_l {
                left += sample;
            }
            if voice.pan_r {
                right += sample;
            }
        }

        if active >= 2 {
            // Headroom scaling keeps chords out of clipping range.
            left = left * 2 / (active + 1);
            right = right * 2 / (active + 1);
        }

        left = left * self.mix_l as i32 / 255;
        right = right * self.mix_r as i32 / 255;

        ((left + right) / 2).clamp(-32768, 32767) as i16
    }
}

impl Default for OpmFm {
    fn default() -> Self {
        Self::new(super::apu::SAMPLE_RATE)
    }
}
