//! Save states.
//!
//! A little-endian, field-ordered dump of every piece of mutable state,
//! prefixed with a 32-bit magic that bakes in the format version. The
//! layout is explicit (no struct memcpy), so states are portable across
//! hosts. The total length is fixed for a given ROM; a magic or length
//! mismatch rejects the blob without touching the emulator.

use crate::Emulator;
use crate::apu::{EnvelopeDirection, LfsrWidth, SweepDirection};
use crate::cartridge::Error;
use crate::dma::DmaState;
use crate::interrupt::Ints;
use crate::joypad::JoypadSelect;
use crate::mbc::{BankMode, MbcState};
use crate::ppu::{PpuMode, StatInterrupt};
use crate::serial::SerialClock;
use crate::timer::TimaState;

const SAVE_STATE_VERSION: u32 = 1;
pub const SAVE_STATE_MAGIC: u32 = 0x6b57a7e0 + SAVE_STATE_VERSION;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }
    fn bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }
    fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
    fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
    fn u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }
    fn bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u8(&mut self) -> u8 {
        let value = self.data[self.pos];
        self.pos += 1;
        value
    }
    fn bool(&mut self) -> bool {
        self.u8() != 0
    }
    fn u16(&mut self) -> u16 {
        u16::from_le_bytes([self.u8(), self.u8()])
    }
    fn u32(&mut self) -> u32 {
        u32::from_le_bytes([self.u8(), self.u8(), self.u8(), self.u8()])
    }
    fn i32(&mut self) -> i32 {
        self.u32() as i32
    }
    fn u64(&mut self) -> u64 {
        u64::from(self.u32()) | u64::from(self.u32()) << 32
    }
    fn bytes(&mut self, out: &mut [u8]) {
        out.copy_from_slice(&self.data[self.pos..self.pos + out.len()]);
        self.pos += out.len();
    }
}

fn write_stat_interrupt(w: &mut Writer, stat: &StatInterrupt) {
    w.bool(stat.irq);
    w.bool(stat.trigger);
    w.u8(stat.delay);
    w.i32(stat.cycles);
}

fn read_stat_interrupt(r: &mut Reader) -> StatInterrupt {
    StatInterrupt {
        irq: r.bool(),
        trigger: r.bool(),
        delay: r.u8(),
        cycles: r.i32(),
    }
}

impl Emulator {
    pub fn save_state(&self) -> Vec<u8> {
        let mut w = Writer {
            buf: Vec::with_capacity(0x12000),
        };
        w.u32(SAVE_STATE_MAGIC);

        // Registers.
        let regs = &self.regs;
        w.u8(regs.a);
        w.u8(regs.b);
        w.u8(regs.c);
        w.u8(regs.d);
        w.u8(regs.e);
        w.u8(regs.h);
        w.u8(regs.l);
        w.u8(regs.f.bits());
        w.u16(regs.sp);
        w.u16(regs.pc);

        // Interrupt controller.
        let interrupt = &self.interrupt;
        w.bool(interrupt.ime);
        w.u8(interrupt.ie);
        w.u8(interrupt.if_.bits());
        w.u8(interrupt.new_if.bits());
        w.bool(interrupt.enable);
        w.bool(interrupt.halt);
        w.bool(interrupt.halt_di);
        w.bool(interrupt.halt_bug);

        // Timer.
        let timer = &self.timer;
        w.u8(timer.tima);
        w.u8(timer.tma);
        w.u8(timer.clock_select);
        w.bool(timer.on);
        w.u16(timer.div_counter);
        w.u8(match timer.tima_state {
            TimaState::Normal => 0,
            TimaState::Overflow => 1,
            TimaState::Reset => 2,
        });

        // Serial.
        let serial = &self.serial;
        w.bool(serial.transferring);
        w.u8(match serial.clock {
            SerialClock::External => 0,
            SerialClock::Internal => 1,
        });
        w.u8(serial.sb);
        w.u8(serial.transferred_bits);
        w.u32(serial.cycles);

        // Joypad select (button state belongs to the host).
        w.u8(match self.joypad.joypad_select {
            JoypadSelect::Both => 0,
            JoypadSelect::Buttons => 1,
            JoypadSelect::Dpad => 2,
            JoypadSelect::None => 3,
        });

        // DMA.
        let dma = &self.dma;
        w.u8(match dma.state {
            DmaState::Inactive => 0,
            DmaState::Triggered => 1,
            DmaState::Active => 2,
        });
        w.u16(dma.source.addr);
        w.u8(source_region_code(dma.source.region));
        w.u32(dma.cycles);

        // PPU.
        let ppu = &self.ppu;
        w.u8(ppu.lcdc.bits());
        write_stat_interrupt(&mut w, &ppu.stat.y_compare);
        write_stat_interrupt(&mut w, &ppu.stat.mode2);
        write_stat_interrupt(&mut w, &ppu.stat.vblank);
        write_stat_interrupt(&mut w, &ppu.stat.hblank);
        w.bool(ppu.stat.ly_eq_lyc);
        w.u8(ppu.stat.mode as u8);
        w.bool(ppu.stat.if_);
        w.u8(ppu.stat.next_mode as u8);
        w.u8(ppu.stat.trigger_mode as u8);
        w.u32(ppu.stat.mode_cycles);
        w.bool(ppu.stat.new_ly_eq_lyc);
        w.u8(ppu.scy);
        w.u8(ppu.scx);
        w.u8(ppu.ly);
        w.u8(ppu.lyc);
        w.u8(ppu.wy);
        w.u8(ppu.wx);
        w.u8(ppu.bgp.read());
        w.u8(ppu.obp[0].read());
        w.u8(ppu.obp[1].read());
        w.u32(ppu.frame);
        w.u8(ppu.last_ly);
        w.u32(ppu.ly_cycles);
        w.u32(ppu.line_cycles);
        w.u8(ppu.line_y);
        w.u8(ppu.win_y);
        w.u8(ppu.frame_wy);
        w.bool(ppu.new_frame_edge);
        w.u8(ppu.display_delay_frames);

        // APU.
        let apu = &self.apu;
        w.bool(apu.enabled);
        w.u8(apu.so1_volume);
        w.u8(apu.so2_volume);
        w.bool(apu.vin_so1);
        w.bool(apu.vin_so2);
        for ch in 0..4 {
            w.bool(apu.so1_output[ch]);
            w.bool(apu.so2_output[ch]);
        }
        let sweep = &apu.sweep;
        w.u8(sweep.period);
        w.u8(match sweep.direction {
            SweepDirection::Addition => 0,
            SweepDirection::Subtraction => 1,
        });
        w.u8(sweep.shift);
        w.u16(sweep.frequency);
        w.u8(sweep.timer);
        w.bool(sweep.enabled);
        w.bool(sweep.calculated_subtract);
        let wave = &apu.wave;
        w.u8(wave.volume);
        w.bytes(&wave.ram);
        for sample in &wave.sample {
            w.u64(sample.time);
            w.u8(sample.position);
            w.u8(sample.byte);
            w.u8(sample.data);
        }
        w.u32(wave.period);
        w.u8(wave.position);
        w.u32(wave.cycles);
        w.bool(wave.playing);
        let noise = &apu.noise;
        w.u8(noise.clock_shift);
        w.u8(match noise.lfsr_width {
            LfsrWidth::Fifteen => 0,
            LfsrWidth::Seven => 1,
        });
        w.u8(noise.divisor);
        w.u8(noise.sample);
        w.u16(noise.lfsr);
        w.u32(noise.period);
        w.u32(noise.cycles);
        for channel in &apu.channels {
            w.u8(channel.square_wave.duty);
            w.u8(channel.square_wave.sample);
            w.u32(channel.square_wave.period);
            w.u8(channel.square_wave.position);
            w.u32(channel.square_wave.cycles);
            w.u8(channel.envelope.initial_volume);
            w.u8(match channel.envelope.direction {
                EnvelopeDirection::Attenuate => 0,
                EnvelopeDirection::Amplify => 1,
            });
            w.u8(channel.envelope.period);
            w.u8(channel.envelope.volume);
            w.u8(channel.envelope.timer);
            w.bool(channel.envelope.automatic);
            w.u16(channel.frequency);
            w.u16(channel.length);
            w.bool(channel.length_enabled);
            w.bool(channel.dac_enabled);
            w.bool(channel.status);
        }
        w.u8(apu.frame);
        w.u32(apu.frame_cycles);
        w.u64(apu.cycles);

        // MBC latches; the masks are fixed by the header.
        match self.mbc.state {
            MbcState::None | MbcState::Mbc2 | MbcState::Mbc3 => {}
            MbcState::Mbc1 {
                byte_2000_3fff,
                byte_4000_5fff,
                bank_mode,
            } => {
                w.u8(byte_2000_3fff);
                w.u8(byte_4000_5fff);
                w.u8(match bank_mode {
                    BankMode::Rom => 0,
                    BankMode::Ram => 1,
                });
            }
            MbcState::Mbc5 { bank_lo, bank_hi } => {
                w.u8(bank_lo);
                w.u8(bank_hi);
            }
        }
        w.u16(self.mbc.rom_bank);
        w.u8(self.mbc.ext_ram_bank);
        w.bool(self.mbc.ext_ram_enabled);

        // Memories. Raw VRAM only; the derived views are rebuilt.
        w.bytes(&self.vram.data);
        w.bytes(&self.wram);
        for obj in &self.oam {
            for field in 0..4 {
                w.u8(obj.read(field));
            }
        }
        w.bytes(&self.hram);
        w.bytes(&self.ext_ram.data);

        w.u64(self.cycles);
        w.buf
    }

    pub fn load_state(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() != self.save_state().len() {
            return Err(Error::SaveStateMismatch);
        }
        let mut r = Reader { data, pos: 0 };
        if r.u32() != SAVE_STATE_MAGIC {
            return Err(Error::SaveStateMismatch);
        }

        let regs = &mut self.regs;
        regs.a = r.u8();
        regs.b = r.u8();
        regs.c = r.u8();
        regs.d = r.u8();
        regs.e = r.u8();
        regs.h = r.u8();
        regs.l = r.u8();
        regs.f = crate::cpu::Flags::from_bits_truncate(r.u8());
        regs.sp = r.u16();
        regs.pc = r.u16();

        let interrupt = &mut self.interrupt;
        interrupt.ime = r.bool();
        interrupt.ie = r.u8();
        interrupt.if_ = Ints::from_bits_truncate(r.u8());
        interrupt.new_if = Ints::from_bits_truncate(r.u8());
        interrupt.enable = r.bool();
        interrupt.halt = r.bool();
        interrupt.halt_di = r.bool();
        interrupt.halt_bug = r.bool();

        let timer = &mut self.timer;
        timer.tima = r.u8();
        timer.tma = r.u8();
        timer.clock_select = r.u8();
        timer.on = r.bool();
        timer.div_counter = r.u16();
        timer.tima_state = match r.u8() {
            1 => TimaState::Overflow,
            2 => TimaState::Reset,
            _ => TimaState::Normal,
        };

        let serial = &mut self.serial;
        serial.transferring = r.bool();
        serial.clock = if r.u8() == 1 {
            SerialClock::Internal
        } else {
            SerialClock::External
        };
        serial.sb = r.u8();
        serial.transferred_bits = r.u8();
        serial.cycles = r.u32();

        self.joypad.joypad_select = match r.u8() {
            0 => JoypadSelect::Both,
            1 => JoypadSelect::Buttons,
            2 => JoypadSelect::Dpad,
            _ => JoypadSelect::None,
        };

        let dma_state = match r.u8() {
            1 => DmaState::Triggered,
            2 => DmaState::Active,
            _ => DmaState::Inactive,
        };
        let dma_addr = r.u16();
        let dma_region = r.u8();
        self.dma.state = dma_state;
        self.dma.source = crate::bus::MappedAddress {
            region: region_from_code(dma_region),
            addr: dma_addr,
        };
        self.dma.cycles = r.u32();

        let ppu = &mut self.ppu;
        ppu.lcdc = crate::ppu::LcdControl::from_bits_truncate(r.u8());
        ppu.stat.y_compare = read_stat_interrupt(&mut r);
        ppu.stat.mode2 = read_stat_interrupt(&mut r);
        ppu.stat.vblank = read_stat_interrupt(&mut r);
        ppu.stat.hblank = read_stat_interrupt(&mut r);
        ppu.stat.ly_eq_lyc = r.bool();
        ppu.stat.mode = ppu_mode_from_code(r.u8());
        ppu.stat.if_ = r.bool();
        ppu.stat.next_mode = ppu_mode_from_code(r.u8());
        ppu.stat.trigger_mode = ppu_mode_from_code(r.u8());
        ppu.stat.mode_cycles = r.u32();
        ppu.stat.new_ly_eq_lyc = r.bool();
        ppu.scy = r.u8();
        ppu.scx = r.u8();
        ppu.ly = r.u8();
        ppu.lyc = r.u8();
        ppu.wy = r.u8();
        ppu.wx = r.u8();
        let bgp = r.u8();
        ppu.bgp.write(bgp);
        let obp0 = r.u8();
        ppu.obp[0].write(obp0);
        let obp1 = r.u8();
        ppu.obp[1].write(obp1);
        ppu.frame = r.u32();
        ppu.last_ly = r.u8();
        ppu.ly_cycles = r.u32();
        ppu.line_cycles = r.u32();
        ppu.line_y = r.u8();
        ppu.win_y = r.u8();
        ppu.frame_wy = r.u8();
        ppu.new_frame_edge = r.bool();
        ppu.display_delay_frames = r.u8();

        let apu = &mut self.apu;
        apu.enabled = r.bool();
        apu.so1_volume = r.u8();
        apu.so2_volume = r.u8();
        apu.vin_so1 = r.bool();
        apu.vin_so2 = r.bool();
        for ch in 0..4 {
            apu.so1_output[ch] = r.bool();
            apu.so2_output[ch] = r.bool();
        }
        let sweep = &mut apu.sweep;
        sweep.period = r.u8();
        sweep.direction = if r.u8() == 1 {
            SweepDirection::Subtraction
        } else {
            SweepDirection::Addition
        };
        sweep.shift = r.u8();
        sweep.frequency = r.u16();
        sweep.timer = r.u8();
        sweep.enabled = r.bool();
        sweep.calculated_subtract = r.bool();
        let wave = &mut apu.wave;
        wave.volume = r.u8();
        r.bytes(&mut wave.ram);
        for sample in &mut wave.sample {
            sample.time = r.u64();
            sample.position = r.u8();
            sample.byte = r.u8();
            sample.data = r.u8();
        }
        wave.period = r.u32();
        wave.position = r.u8();
        wave.cycles = r.u32();
        wave.playing = r.bool();
        let noise = &mut apu.noise;
        noise.clock_shift = r.u8();
        noise.lfsr_width = if r.u8() == 1 {
            LfsrWidth::Seven
        } else {
            LfsrWidth::Fifteen
        };
        noise.divisor = r.u8();
        noise.sample = r.u8();
        noise.lfsr = r.u16();
        noise.period = r.u32();
        noise.cycles = r.u32();
        for channel in &mut apu.channels {
            channel.square_wave.duty = r.u8();
            channel.square_wave.sample = r.u8();
            channel.square_wave.period = r.u32();
            channel.square_wave.position = r.u8();
            channel.square_wave.cycles = r.u32();
            channel.envelope.initial_volume = r.u8();
            channel.envelope.direction = if r.u8() == 1 {
                EnvelopeDirection::Amplify
            } else {
                EnvelopeDirection::Attenuate
            };
            channel.envelope.period = r.u8();
            channel.envelope.volume = r.u8();
            channel.envelope.timer = r.u8();
            channel.envelope.automatic = r.bool();
            channel.frequency = r.u16();
            channel.length = r.u16();
            channel.length_enabled = r.bool();
            channel.dac_enabled = r.bool();
            channel.status = r.bool();
        }
        apu.frame = r.u8();
        apu.frame_cycles = r.u32();
        apu.cycles = r.u64();

        match &mut self.mbc.state {
            MbcState::None | MbcState::Mbc2 | MbcState::Mbc3 => {}
            MbcState::Mbc1 {
                byte_2000_3fff,
                byte_4000_5fff,
                bank_mode,
            } => {
                *byte_2000_3fff = r.u8();
                *byte_4000_5fff = r.u8();
                *bank_mode = if r.u8() == 1 {
                    BankMode::Ram
                } else {
                    BankMode::Rom
                };
            }
            MbcState::Mbc5 { bank_lo, bank_hi } => {
                *bank_lo = r.u8();
                *bank_hi = r.u8();
            }
        }
        self.mbc.rom_bank = r.u16();
        self.mbc.ext_ram_bank = r.u8();
        self.mbc.ext_ram_enabled = r.bool();

        r.bytes(&mut self.vram.data);
        self.vram.rebuild_derived();
        r.bytes(&mut self.wram);
        for obj in &mut self.oam {
            for field in 0..4 {
                let value = r.u8();
                obj.write(field, value);
            }
        }
        r.bytes(&mut self.hram);
        r.bytes(&mut self.ext_ram.data);

        self.cycles = r.u64();
        Ok(())
    }
}

fn source_region_code(region: crate::bus::MemRegion) -> u8 {
    use crate::bus::MemRegion::*;
    match region {
        Rom => 0,
        RomBankSwitch => 1,
        Vram => 2,
        ExtRam => 3,
        WorkRam => 4,
        WorkRamBankSwitch => 5,
        Oam => 6,
        Unused => 7,
        Io => 8,
        Apu => 9,
        WaveRam => 10,
        HighRam => 11,
    }
}

fn region_from_code(code: u8) -> crate::bus::MemRegion {
    use crate::bus::MemRegion::*;
    match code {
        0 => Rom,
        1 => RomBankSwitch,
        2 => Vram,
        3 => ExtRam,
        4 => WorkRam,
        5 => WorkRamBankSwitch,
        6 => Oam,
        7 => Unused,
        8 => Io,
        9 => Apu,
        10 => WaveRam,
        _ => HighRam,
    }
}

fn ppu_mode_from_code(code: u8) -> PpuMode {
    match code {
        1 => PpuMode::VBlank,
        2 => PpuMode::OamScan,
        3 => PpuMode::Transfer,
        _ => PpuMode::HBlank,
    }
}
