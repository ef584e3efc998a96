//! Audio Processing Unit — four phase-accumulator tone channels plus the
//! OPM-style FM extension, mixed into a mono i16 stream at the host sample
//! rate (44.1 kHz).
//!
//! Each channel owns a 32-bit phase accumulator (2^32 = one waveform
//! period) advanced by a precomputed fixed-point increment
//! `(frequency << 32) / sample_rate`. The normative synthesis path is
//! integer-only; the sine table is generated once at construction.
//!
//! # Register map (offsets relative to the APU IO base)
//!
//! 8 bytes per channel (channel n at n*8):
//!
//! | Reg | Name          | Description                                     |
//! |-----|---------------|-------------------------------------------------|
//! | 0   | FREQ_LOW      | Stages the low frequency byte                   |
//! | 1   | FREQ_HIGH     | Commits the 16-bit frequency (see below)        |
//! | 2   | VOLUME        | Channel volume 0-255                            |
//! | 3   | CONTROL       | bit0 enable; ch0-2 bits 2:1 waveform            |
//! |     |               | (0 sine, 1 square, 2 sawtooth, 3 noise);        |
//! |     |               | ch3 bit1: 0 noise, 1 square                     |
//! | 4   | DURATION_LOW  | Duration in frames, low byte                    |
//! | 5   | DURATION_HIGH | Duration high byte                              |
//! | 6   | DURATION_MODE | bit0: 0 stop on expiry, 1 loop                  |
//! | 7   | —             | reserved                                        |
//!
//! 0x20 MASTER_VOLUME, 0x21 CHANNEL_COMPLETION_STATUS (one-shot: reading
//! returns and clears; writes are ignored). The FM extension occupies
//! 0x100-0x1FF (see [`super::opm`]).
//!
//! # Frequency write protocol
//!
//! FREQ_LOW stages a pending byte; FREQ_HIGH combines it (or the current
//! low byte when nothing is pending) and commits. The phase accumulator
//! resets only when the committed value actually changes — recommitting
//! the same frequency must not produce an audible phase discontinuity.
//!
//! # Duration timers
//!
//! `update_frame()` runs once per video frame. A non-zero duration counts
//! down; on expiry, stop mode disables the channel and latches its bit in
//! the completion status, loop mode reloads from the duration captured at
//! the enable rising edge (zero means free-running).

use super::opm::OpmFm;

pub const SAMPLE_RATE: u32 = 44_100;

const SINE_TABLE_LEN: usize = 1024;
const CHANNELS: usize = 4;

pub const REG_MASTER_VOLUME: u16 = 0x20;
pub const REG_COMPLETION_STATUS: u16 = 0x21;
pub const FM_BASE: u16 = 0x100;

#[derive(Clone, Copy, PartialEq, Debug)]
enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Noise,
}

struct Channel {
    frequency: u16,
    volume: u8,
    enabled: bool,
    waveform: Waveform,
    phase: u32,
    phase_increment: u32,
    noise_lfsr: u16,
    duration: u16,
    duration_loop: bool,
    initial_duration: u16,
    // Atomic frequency write latch
    pending_low: u8,
    update_pending: bool,
}

impl Channel {
    fn new() -> Self {
        Self {
            frequency: 0,
            volume: 0,
            enabled: false,
            waveform: Waveform::Sine,
            phase: 0,
            phase_increment: 0,
            noise_lfsr: 0x7FFF,
            duration: 0,
            duration_loop: false,
            initial_duration: 0,
            pending_low: 0,
            update_pending: false,
        }
    }

    fn set_increment(&mut self, sample_rate: u32) {
        if sample_rate == 0 {
            return;
        }
        self.phase_increment = (((self.frequency as u64) << 32) / sample_rate as u64) as u32;
    }

    /// Commit a frequency write. Resets the phase only on an actual change.
    fn commit_frequency(&mut self, high: u8, sample_rate: u32) {
        let low = if self.update_pending {
            self.pending_low
        } else {
            self.frequency as u8
        };
        self.update_pending = false;
        let committed = low as u16 | ((high as u16) << 8);
        if committed != self.frequency {
            self.frequency = committed;
            self.set_increment(sample_rate);
            self.phase = 0;
        }
    }

    /// 15-bit LFSR, x^15 + x^14 + 1: shift right, feedback into bit 14.
    fn clock_lfsr(&mut self) {
        let feedback = (self.noise_lfsr & 1) ^ ((self.noise_lfsr >> 14) & 1);
        self.noise_lfsr = (self.noise_lfsr >> 1) | (feedback << 14);
        if self.noise_lfsr == 0 {
            self.noise_lfsr = 1;
        }
    }

    /// Produce one volume-scaled sample and advance the phase.
    fn step(&mut self, sine_table: &[i16]) -> i32 {
        if !self.enabled {
            return 0;
        }
        let previous = self.phase;
        self.phase = self.phase.wrapping_add(self.phase_increment);
        // The noise generator shifts once per completed period.
        if self.waveform == Waveform::Noise && self.phase < previous {
            self.clock_lfsr();
        }

        let raw: i32 = match self.waveform {
            Waveform::Sine => sine_table[(self.phase >> 22) as usize] as i32,
            Waveform::Square => {
                if self.phase < 0x8000_0000 {
                    32767
                } else {
                    -32768
                }
            }
            Waveform::Sawtooth => (self.phase >> 16) as i32 - 32768,
            Waveform::Noise => {
                if self.noise_lfsr & 1 != 0 {
                    32767
                } else {
                    -32767
                }
            }
        };

        raw * self.volume as i32 / 255
    }
}

pub struct Apu {
    channels: [Channel; 4],
    master_volume: u8,
    completion_status: u8,
    sample_rate: u32,
    sine_table: Vec<i16>,
    sample_buffer: Vec<i16>,
    fm: OpmFm,
}

impl Apu {
    pub fn new(sample_rate: u32) -> Self {
        let sine_table = (0..SINE_TABLE_LEN)
            .map(|i| {
                let angle = i as f64 / SINE_TABLE_LEN as f64 * std::f64::consts::TAU;
                (angle.sin() * 32767.0) as i16
            })
            .collect();
        Self {
            channels: [Channel::new(), Channel::new(), Channel::new(), Channel::new()],
            master_volume: 255,
            completion_status: 0,
            sample_rate,
            sine_table,
            sample_buffer: Vec::with_capacity(2048),
            fm: OpmFm::new(sample_rate),
        }
    }

    pub fn reset(&mut self) {
        self.channels = [Channel::new(), Channel::new(), Channel::new(), Channel::new()];
        self.master_volume = 255;
        self.completion_status = 0;
        self.sample_buffer.clear();
        self.fm.reset();
    }

    pub fn fm(&self) -> &OpmFm {
        &self.fm
    }

    // -----------------------------------------------------------------------
    // Register interface
    // -----------------------------------------------------------------------

    pub fn read(&mut self, offset: u16) -> u8 {
        match offset {
            0x00..=0x1F => {
                let channel = &self.channels[(offset / 8) as usize];
                match offset % 8 {
                    0 => channel.frequency as u8,
                    1 => (channel.frequency >> 8) as u8,
                    2 => channel.volume,
                    3 => self.read_control((offset / 8) as usize),
                    4 => channel.duration as u8,
                    5 => (channel.duration >> 8) as u8,
                    6 => channel.duration_loop as u8,
                    _ => 0,
                }
            }
            REG_MASTER_VOLUME => self.master_volume,
            REG_COMPLETION_STATUS => {
                // One-shot: reading returns and clears the latch.
                let value = self.completion_status;
                self.completion_status = 0;
                value
            }
            FM_BASE..=0x1FF => self.fm.read_port((offset - FM_BASE) as u8),
            _ => 0,
        }
    }

    pub fn write(&mut self, offset: u16, data: u8) {
        match offset {
            0x00..=0x1F => self.channel_write((offset / 8) as usize, (offset % 8) as u8, data),
            REG_MASTER_VOLUME => self.master_volume = data,
            REG_COMPLETION_STATUS => {} // read-clear latch; writes ignored
            FM_BASE..=0x1FF => self.fm.write_port((offset - FM_BASE) as u8, data),
            _ => {}
        }
    }

    fn read_control(&self, index: usize) -> u8 {
        let channel = &self.channels[index];
        let mut value = channel.enabled as u8;
        if index == 3 {
            if channel.waveform == Waveform::Square {
                value |= 0x02;
            }
        } else {
            value |= match channel.waveform {
                Waveform::Sine => 0,
                Waveform::Square => 1,
                Waveform::Sawtooth => 2,
                Waveform::Noise => 3,
            } << 1;
        }
        value
    }

    fn channel_write(&mut self, index: usize, reg: u8, data: u8) {
        let sample_rate = self.sample_rate;
        let channel = &mut self.channels[index];
        match reg {
            0 => {
                channel.pending_low = data;
                channel.update_pending = true;
            }
            1 => channel.commit_frequency(data, sample_rate),
            2 => channel.volume = data,
            3 => {
                let enable = data & 0x01 != 0;
                if enable && !channel.enabled && channel.duration > 0 {
                    // Rising edge with an armed timer: capture the reload value.
                    channel.initial_duration = channel.duration;
                }
                channel.enabled = enable;
                channel.waveform = if index == 3 {
                    if data & 0x02 != 0 { Waveform::Square } else { Waveform::Noise }
                } else {
                    match (data >> 1) & 0x03 {
                        0 => Waveform::Sine,
                        1 => Waveform::Square,
                        2 => Waveform::Sawtooth,
                        _ => Waveform::Noise,
                    }
                };
            }
            4 => channel.duration = (channel.duration & 0xFF00) | data as u16,
            5 => channel.duration = (channel.duration & 0x00FF) | ((data as u16) << 8),
            6 => channel.duration_loop = data & 0x01 != 0,
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Synthesis
    // -----------------------------------------------------------------------

    /// Advance FM timers and the busy latch by `n` master cycles.
    pub fn step_cycles(&mut self, cycles: u64) {
        self.fm.step_cycles(cycles);
    }

    /// Mix and emit one output sample.
    pub fn emit_sample(&mut self) {
        let mut sum: i32 = 0;
        for channel in &mut self.channels {
            sum += channel.step(&self.sine_table);
        }
        sum += self.fm.emit_sample() as i32;
        sum = sum * self.master_volume as i32 / 255;
        self.sample_buffer.push(sum.clamp(-32768, 32767) as i16);
    }

    /// Per-frame housekeeping: duration countdown and completion latching.
    pub fn update_frame(&mut self) {
        for (i, channel) in self.channels.iter_mut().enumerate() {
            if !channel.enabled || channel.duration == 0 {
                continue;
            }
            channel.duration -= 1;
            if channel.duration == 0 {
                if channel.duration_loop {
                    // Zero reload means play on indefinitely.
                    channel.duration = channel.initial_duration;
                } else {
                    channel.enabled = false;
                    self.completion_status |= 1 << i;
                }
            }
        }
    }

    /// FM interrupt request line toward the CPU.
    pub fn irq(&self) -> bool {
        self.fm.irq()
    }

    /// Take the accumulated sample buffer (mono i16 at the host rate).
    pub fn drain_audio(&mut self) -> Vec<i16> {
        std::mem::take(&mut self.sample_buffer)
    }

    /// Number of samples generated since the last drain.
    pub fn pending_samples(&self) -> usize {
        self.sample_buffer.len()
    }

    /// Channel phase accumulator, for tests and diagnostics.
    pub fn channel_phase(&self, index: usize) -> u32 {
        self.channels[index].phase
    }

    /// Channel enable state, for tests and diagnostics.
    pub fn channel_enabled(&self, index: usize) -> bool {
        self.channels[index].enabled
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new(SAMPLE_RATE)
    }
}
