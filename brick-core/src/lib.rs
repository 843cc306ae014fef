//! Cycle-driven emulator core for the original monochrome handheld.
//!
//! The whole machine advances in lock-step: every byte the CPU touches
//! runs one M-cycle through DMA, PPU, timer, APU and serial before the
//! access lands. Hosts drive the core with [`Emulator::run_until`] and
//! drain the framebuffer and audio buffer between calls.

use std::time::Instant;

use crate::apu::{Apu, AudioBuffer, CH1};
use crate::cartridge::{EXT_RAM_MAX_SIZE, MbcKind, RomInfo};
use crate::cpu::Registers;
use crate::dma::Dma;
use crate::interrupt::Interrupt;
use crate::joypad::{Joypad, JoypadInput};
use crate::mbc::{MBC2_RAM_SIZE, Mbc};
use crate::ppu::{FrameBuffer, Obj, OBJ_COUNT, Ppu, RGBA_WHITE, SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::serial::Serial;
use crate::timer::Timer;

pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod cpu;
pub mod dma;
pub mod interrupt;
pub mod joypad;
pub mod mbc;
pub mod ppu;
mod savestate;
pub mod serial;
pub mod timer;

pub use cartridge::Error;

pub const WIDTH: u8 = 160;
pub const HEIGHT: u8 = 144;

pub const CPU_CYCLES_PER_SECOND: u32 = 4_194_304;
/// The APU emits one stereo pair per APU cycle (2 MHz).
pub const APU_CYCLES_PER_SECOND: u32 = CPU_CYCLES_PER_SECOND / 2;
pub const FRAME_CYCLES: u32 = ppu::PPU_FRAME_CYCLES;

/// Instructions per deadline check in `run_until`.
const INSTRUCTION_QUANTA: u32 = 2000;

/// Default audio capacity: one frame of channel samples plus slack for
/// the instruction that crosses the boundary.
const DEFAULT_AUDIO_CAPACITY: usize = FRAME_CYCLES as usize + 512;

const WORK_RAM_SIZE: usize = 0x2000;
const HIGH_RAM_SIZE: usize = 127;

const INITIAL_WAVE_RAM: [u8; 16] = [
    0x60, 0x0d, 0xda, 0xdd, 0x50, 0x0f, 0xad, 0xed, 0xc0, 0xde, 0xf0, 0x0d, 0xbe, 0xef, 0xfe,
    0xed,
];

bitflags::bitflags! {
    /// Reasons `run_until` returned; several can be set at once.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Events: u8 {
        const NEW_FRAME = 1;
        const AUDIO_BUFFER_FULL = 1 << 1;
        const TIMEOUT = 1 << 2;
    }
}

/// External (cartridge) RAM. The array is always max-sized; `size` is
/// what the header declared and bounds the battery-backed save view.
#[derive(Clone)]
pub struct ExtRam {
    pub data: [u8; EXT_RAM_MAX_SIZE],
    pub size: usize,
    pub present: bool,
    pub battery: bool,
}

pub struct Emulator {
    pub rom: Vec<u8>,
    pub rom_info: RomInfo,
    pub regs: Registers,
    pub interrupt: Interrupt,
    pub timer: Timer,
    pub serial: Serial,
    pub joypad: Joypad,
    pub dma: Dma,
    pub mbc: Mbc,
    pub ppu: Ppu,
    pub apu: Apu,
    pub vram: ppu::VideoRam,
    pub oam: [Obj; OBJ_COUNT],
    pub wram: [u8; WORK_RAM_SIZE],
    pub hram: [u8; HIGH_RAM_SIZE],
    pub ext_ram: ExtRam,
    pub cycles: u64,
    pub frame_buffer: Box<FrameBuffer>,
    pub audio_buffer: AudioBuffer,
}

impl Emulator {
    pub fn new(rom: Vec<u8>) -> Result<Self, Error> {
        let rom_info = RomInfo::parse(&rom)?;
        let kind = rom_info.cartridge_type.mbc_kind()?;
        let ext_ram = ExtRam {
            data: [0; EXT_RAM_MAX_SIZE],
            size: if kind == MbcKind::Mbc2 {
                MBC2_RAM_SIZE
            } else {
                rom_info.ext_ram_size
            },
            present: kind == MbcKind::Mbc2 || rom_info.cartridge_type.has_ext_ram(),
            battery: rom_info.cartridge_type.has_battery(),
        };
        let mut emulator = Self {
            mbc: Mbc::new(&rom_info, kind),
            rom,
            rom_info,
            regs: Registers::default(),
            interrupt: Interrupt::default(),
            timer: Timer::default(),
            serial: Serial::default(),
            joypad: Joypad::default(),
            dma: Dma::default(),
            ppu: Ppu::default(),
            apu: Apu::default(),
            vram: ppu::VideoRam::default(),
            oam: [Obj::default(); OBJ_COUNT],
            wram: [0; WORK_RAM_SIZE],
            hram: [0; HIGH_RAM_SIZE],
            ext_ram,
            cycles: 0,
            frame_buffer: Box::new([RGBA_WHITE; SCREEN_WIDTH * SCREEN_HEIGHT]),
            audio_buffer: AudioBuffer::with_capacity(DEFAULT_AUDIO_CAPACITY),
        };
        emulator.power_on();
        Ok(emulator)
    }

    /// Documented post-boot state; the boot ROM itself is not run.
    fn power_on(&mut self) {
        self.regs.set_af(0x01b0);
        self.regs.set_bc(0x0013);
        self.regs.set_de(0x00d8);
        self.regs.set_hl(0x014d);
        self.regs.sp = 0xfffe;
        self.regs.pc = 0x0100;
        self.interrupt.ime = false;
        // Prime the APU through its own register writes, enable first so
        // the rest stick.
        self.apu.write(bus::NR52, 0xf1, 0);
        self.apu.write(bus::NR11, 0x80, 0);
        self.apu.write(bus::NR12, 0xf3, 0);
        self.apu.write(bus::NR14, 0x80, 0);
        self.apu.write(bus::NR50, 0x77, 0);
        self.apu.write(bus::NR51, 0xf3, 0);
        self.apu.wave.ram = INITIAL_WAVE_RAM;
        // Channel 1 is left ringing by the boot sound; mute it.
        self.apu.channels[CH1].envelope.volume = 0;
        self.write_io(bus::LCDC, 0x91);
        self.write_io(bus::SCY, 0x00);
        self.write_io(bus::SCX, 0x00);
        self.write_io(bus::LYC, 0x00);
        self.write_io(bus::BGP, 0xfc);
        self.write_io(bus::OBP0, 0xff);
        self.write_io(bus::OBP1, 0xff);
        self.write_io(bus::IF, 0x01);
        self.write_io(bus::IE, 0x00);
    }

    /// Advance the whole machine by one M-cycle. The order is load
    /// bearing: the IF snapshot promotes first, and every subsystem sees
    /// the cycle counter before it advances.
    pub(crate) fn mcycle(&mut self) {
        self.interrupt.promote_delayed();
        self.dma_mcycle();
        self.ppu_mcycle();
        self.timer.mcycle(&mut self.interrupt);
        self.apu.mcycle(&mut self.audio_buffer, self.cycles);
        self.serial.mcycle(&mut self.interrupt);
        self.cycles = self.cycles.wrapping_add(4);
    }

    /// Run until a frame is ready, `requested_samples` audio bytes are
    /// buffered, or the deadline passes. State is suspended on an
    /// instruction boundary; nothing is rolled back.
    pub fn run_until(
        &mut self,
        last_event: Events,
        requested_samples: usize,
        deadline: Option<Instant>,
    ) -> Events {
        if last_event.contains(Events::NEW_FRAME) {
            self.ppu.new_frame_edge = false;
        }
        if last_event.contains(Events::AUDIO_BUFFER_FULL) {
            self.audio_buffer.reset();
        }
        assert!(requested_samples <= self.audio_buffer.capacity());

        let mut result = Events::empty();
        let mut running = true;
        while running {
            for _ in 0..INSTRUCTION_QUANTA {
                if !running {
                    break;
                }
                self.step();
                if self.ppu.new_frame_edge {
                    result |= Events::NEW_FRAME;
                    running = false;
                }
                if self.audio_buffer.len() >= requested_samples || self.audio_buffer.overflowed()
                {
                    result |= Events::AUDIO_BUFFER_FULL;
                    running = false;
                }
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                result |= Events::TIMEOUT;
                running = false;
            }
        }
        result
    }

    pub fn joypad_input_mut(&mut self) -> &mut JoypadInput {
        &mut self.joypad.input
    }

    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.frame_buffer
    }

    /// Battery-backed external RAM for the host to persist, if the
    /// cartridge has any.
    pub fn ext_ram_to_save(&self) -> Option<&[u8]> {
        (self.ext_ram.battery && self.ext_ram.size > 0).then(|| &self.ext_ram.data[..self.ext_ram.size])
    }

    pub fn load_ext_ram(&mut self, saved: &[u8]) {
        let len = saved.len().min(self.ext_ram.data.len());
        self.ext_ram.data[..len].copy_from_slice(&saved[..len]);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dma::DmaState;
    use crate::interrupt::Ints;

    /// A 32 KiB ROM with a valid header and `code` at the entry point.
    pub(crate) fn emulator_with_code(code: &[u8]) -> Emulator {
        let mut rom = vec![0u8; 0x8000];
        rom[0x134..0x139].copy_from_slice(b"BRICK");
        rom[0x100..0x100 + code.len()].copy_from_slice(code);
        let mut checksum = 0u8;
        for i in 0x134..=0x14c {
            checksum = checksum.wrapping_sub(rom[i]).wrapping_sub(1);
        }
        rom[0x14d] = checksum;
        Emulator::new(rom).unwrap()
    }

    /// An emulator parked on `JR -2`.
    fn emulator() -> Emulator {
        emulator_with_code(&[0x18, 0xfe])
    }

    #[test]
    fn audio_buffer_grows_four_bytes_per_mcycle() {
        let mut emu = emulator();
        for _ in 0..100 {
            let before = emu.audio_buffer.len();
            emu.mcycle();
            assert_eq!(before + 4, emu.audio_buffer.len());
        }
    }

    #[test]
    fn audio_buffer_overflow_is_recovered() {
        let mut emu = emulator();
        emu.audio_buffer = AudioBuffer::with_capacity(8);
        for _ in 0..4 {
            emu.mcycle();
        }
        assert!(emu.audio_buffer.overflowed());
        assert_eq!(8, emu.audio_buffer.len());
        let event = emu.run_until(Events::empty(), 8, None);
        assert!(event.contains(Events::AUDIO_BUFFER_FULL));
    }

    #[test]
    fn dma_conflict_window() {
        let mut emu = emulator();
        // Keep the PPU out of the way so OAM is otherwise accessible.
        emu.write_u8(bus::LCDC, 0x00);
        for (i, b) in emu.wram[..0xa0].iter_mut().enumerate() {
            *b = i as u8 ^ 0x5a;
        }

        emu.write_u8(bus::DMA, 0xc0);
        assert_eq!(DmaState::Triggered, emu.dma.state);
        // Startup: OAM reads still work for two M-cycles.
        emu.mcycle();
        assert_ne!(0xff, emu.read_u8(0xfe00));
        emu.mcycle();
        assert_eq!(DmaState::Active, emu.dma.state);
        for _ in 0..160 {
            assert_eq!(0xff, emu.read_u8(0xfe00));
            assert_eq!(0xff, emu.read_u8(0xfe9f));
            emu.mcycle();
        }
        assert_eq!(DmaState::Inactive, emu.dma.state);
        for i in 0..0xa0u16 {
            assert_eq!(
                emu.wram[usize::from(i)],
                emu.oam[usize::from(i >> 2)].read(i),
                "oam byte {i}"
            );
        }
    }

    #[test]
    fn dma_restart_relatches_source() {
        let mut emu = emulator();
        emu.write_u8(bus::LCDC, 0x00);
        emu.wram[0] = 0x11;
        emu.wram[0x1000] = 0x99;
        emu.write_u8(bus::DMA, 0xc0);
        for _ in 0..10 {
            emu.mcycle();
        }
        emu.write_u8(bus::DMA, 0xd0);
        assert_eq!(DmaState::Active, emu.dma.state);
        for _ in 0..162 {
            emu.mcycle();
        }
        assert_eq!(DmaState::Inactive, emu.dma.state);
        assert_eq!(0x99, emu.oam[0].read(0));
    }

    #[test]
    fn ly_counts_lines_of_456_cycles() {
        let mut emu = emulator();
        // Wait for the start of a line.
        while emu.ppu.ly != 10 {
            emu.mcycle();
        }
        let mut cycles = 0;
        while emu.ppu.ly == 10 {
            emu.mcycle();
            cycles += 4;
        }
        assert_eq!(456, cycles);
    }

    #[test]
    fn ly_153_lasts_one_mcycle() {
        let mut emu = emulator();
        while emu.ppu.ly != 153 {
            emu.mcycle();
        }
        let mut cycles = 0;
        while emu.ppu.ly == 153 {
            emu.mcycle();
            cycles += 4;
        }
        assert_eq!(4, cycles);
        // The extended LY=0 span absorbs the rest of the line.
        assert_eq!(0, emu.ppu.ly);
        let mut zero_cycles = 0;
        while emu.ppu.ly == 0 {
            emu.mcycle();
            zero_cycles += 4;
        }
        assert_eq!(2 * 456 - 4, zero_cycles);
    }

    #[test]
    fn lyc_interrupt_latches_once_per_line() {
        let mut emu = emulator();
        emu.write_u8(bus::LYC, 42);
        emu.write_u8(bus::STAT, 0x40);
        let mut edges = 0;
        let mut last_if = emu.ppu.stat.if_;
        for _ in 0..2 * FRAME_CYCLES / 4 {
            emu.mcycle();
            if emu.ppu.stat.if_ && !last_if {
                edges += 1;
            }
            last_if = emu.ppu.stat.if_;
        }
        assert_eq!(2, edges);
    }

    #[test]
    fn stat_write_can_synthesize_trigger() {
        let mut emu = emulator();
        // Run into an HBlank trigger window with the IRQ disabled.
        while !(emu.ppu.stat.trigger_mode == ppu::PpuMode::HBlank && emu.ppu.ly == 20) {
            emu.mcycle();
        }
        emu.interrupt.new_if = Ints::empty();
        emu.interrupt.if_ = Ints::empty();
        assert!(!emu.ppu.stat.if_);
        emu.write_u8(bus::STAT, 0x08);
        assert!(emu.interrupt.new_if.contains(Ints::STAT));
    }

    #[test]
    fn vblank_interrupt_requested_each_frame() {
        let mut emu = emulator();
        emu.interrupt.new_if = Ints::empty();
        emu.interrupt.if_ = Ints::empty();
        let mut requests = 0;
        let mut last = false;
        for _ in 0..2 * FRAME_CYCLES / 4 {
            emu.mcycle();
            let now = emu.interrupt.new_if.contains(Ints::VBLANK);
            if now && !last {
                requests += 1;
            }
            last = now;
            emu.interrupt.new_if -= Ints::VBLANK;
            emu.interrupt.if_ -= Ints::VBLANK;
        }
        assert_eq!(2, requests);
    }

    #[test]
    fn display_enable_withholds_four_frames() {
        let mut emu = emulator();
        assert_eq!(4, emu.ppu.display_delay_frames);
        let mut vblanks = 0;
        while !emu.ppu.new_frame_edge {
            emu.mcycle();
            if emu.ppu.ly == 144 && emu.ppu.ly_cycles == ppu::PPU_LINE_CYCLES {
                vblanks += 1;
            }
        }
        assert_eq!(5, vblanks);
    }
}
