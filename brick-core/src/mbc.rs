//! Memory bank controllers.
//!
//! Writes into the 0x0000-0x7fff range never touch ROM; they are latch
//! operations decoded per controller kind. The effective ROM bank is
//! always masked by the bank count declared in the header, so selecting
//! past the end of the ROM wraps.

use crate::cartridge::{EXT_RAM_BANK_SHIFT, MbcKind, ROM_BANK_SHIFT, RomInfo};

const RAM_ENABLED_MASK: u8 = 0x0f;
const RAM_ENABLED_VALUE: u8 = 0x0a;
const MBC1_ROM_BANK_LO_SELECT_MASK: u8 = 0x1f;
const MBC1_BANK_HI_SELECT_MASK: u8 = 0x03;
const MBC1_BANK_HI_SHIFT: u16 = 5;
pub const MBC2_RAM_SIZE: usize = 0x200;
const MBC2_RAM_ADDR_MASK: u16 = 0x1ff;
pub const MBC2_RAM_VALUE_MASK: u8 = 0x0f;
const MBC2_ADDR_SELECT_BIT: u16 = 0x100;
const MBC2_ROM_BANK_SELECT_MASK: u8 = 0x0f;
const MBC3_ROM_BANK_SELECT_MASK: u8 = 0x7f;
const MBC3_RAM_BANK_SELECT_MASK: u8 = 0x07;
const MBC5_RAM_BANK_SELECT_MASK: u8 = 0x0f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankMode {
    Rom,
    Ram,
}

/// Per-kind latch state. Only MBC1 and MBC5 keep raw latch bytes around;
/// the others decode straight into the effective banks.
#[derive(Debug, Clone, Copy)]
pub enum MbcState {
    None,
    Mbc1 {
        byte_2000_3fff: u8,
        byte_4000_5fff: u8,
        bank_mode: BankMode,
    },
    Mbc2,
    Mbc3,
    Mbc5 {
        bank_lo: u8,
        bank_hi: u8,
    },
}

#[derive(Debug, Clone)]
pub struct Mbc {
    pub state: MbcState,
    pub rom_bank: u16,
    pub rom_bank_mask: u16,
    pub ext_ram_bank: u8,
    pub ext_ram_addr_mask: u16,
    pub ext_ram_enabled: bool,
}

impl Mbc {
    pub fn new(info: &RomInfo, kind: MbcKind) -> Self {
        Self {
            state: match kind {
                MbcKind::None => MbcState::None,
                MbcKind::Mbc1 => MbcState::Mbc1 {
                    byte_2000_3fff: 0,
                    byte_4000_5fff: 0,
                    bank_mode: BankMode::Rom,
                },
                MbcKind::Mbc2 => MbcState::Mbc2,
                MbcKind::Mbc3 => MbcState::Mbc3,
                MbcKind::Mbc5 => MbcState::Mbc5 {
                    bank_lo: 1,
                    bank_hi: 0,
                },
            },
            rom_bank: 1,
            rom_bank_mask: info.rom_bank_mask,
            ext_ram_bank: 0,
            ext_ram_addr_mask: info.ext_ram_addr_mask,
            ext_ram_enabled: false,
        }
    }

    /// Decode a write anywhere in 0x0000-0x7fff.
    pub fn write_rom(&mut self, addr: u16, value: u8) {
        match &mut self.state {
            MbcState::None => {}
            MbcState::Mbc1 {
                byte_2000_3fff,
                byte_4000_5fff,
                bank_mode,
            } => {
                match addr >> 13 {
                    0 => {
                        self.ext_ram_enabled = value & RAM_ENABLED_MASK == RAM_ENABLED_VALUE;
                    }
                    1 => *byte_2000_3fff = value,
                    2 => *byte_4000_5fff = value,
                    3 => {
                        *bank_mode = if value & 1 == 0 {
                            BankMode::Rom
                        } else {
                            BankMode::Ram
                        }
                    }
                    _ => unreachable!(),
                }

                let mut rom_bank = u16::from(*byte_2000_3fff & MBC1_ROM_BANK_LO_SELECT_MASK);
                if rom_bank == 0 {
                    rom_bank = 1;
                }
                match bank_mode {
                    BankMode::Rom => {
                        rom_bank |= u16::from(*byte_4000_5fff & MBC1_BANK_HI_SELECT_MASK)
                            << MBC1_BANK_HI_SHIFT;
                        self.ext_ram_bank = 0;
                    }
                    BankMode::Ram => {
                        self.ext_ram_bank = *byte_4000_5fff & MBC1_BANK_HI_SELECT_MASK;
                    }
                }
                self.rom_bank = rom_bank & self.rom_bank_mask;
                log::trace!(
                    "mbc1 write {addr:#06x} = {value:#04x}: rom bank {:#04x}",
                    self.rom_bank
                );
            }
            MbcState::Mbc2 => match addr >> 13 {
                0 => {
                    if addr & MBC2_ADDR_SELECT_BIT == 0 {
                        self.ext_ram_enabled = value & RAM_ENABLED_MASK == RAM_ENABLED_VALUE;
                    }
                }
                1 => {
                    if addr & MBC2_ADDR_SELECT_BIT != 0 {
                        self.rom_bank =
                            u16::from(value & MBC2_ROM_BANK_SELECT_MASK) & self.rom_bank_mask;
                    }
                }
                _ => {}
            },
            MbcState::Mbc3 => match addr >> 13 {
                0 => {
                    self.ext_ram_enabled = value & RAM_ENABLED_MASK == RAM_ENABLED_VALUE;
                }
                1 => {
                    // The bank is masked but zero is not rewritten to one;
                    // commercial software never asks for bank zero here.
                    self.rom_bank =
                        u16::from(value & MBC3_ROM_BANK_SELECT_MASK) & self.rom_bank_mask;
                }
                2 => {
                    self.ext_ram_bank = value & MBC3_RAM_BANK_SELECT_MASK;
                }
                _ => {}
            },
            MbcState::Mbc5 { bank_lo, bank_hi } => {
                match addr {
                    0x0000..0x2000 => {
                        self.ext_ram_enabled = value & RAM_ENABLED_MASK == RAM_ENABLED_VALUE;
                    }
                    0x2000..0x3000 => *bank_lo = value,
                    0x3000..0x4000 => *bank_hi = value & 1,
                    0x4000..0x6000 => self.ext_ram_bank = value & MBC5_RAM_BANK_SELECT_MASK,
                    _ => {}
                }
                // No bank-0 remapping on this controller.
                let bank = u16::from(*bank_hi) << 8 | u16::from(*bank_lo);
                self.rom_bank = bank & self.rom_bank_mask;
            }
        }
    }

    /// Offset into the ROM image for the switchable 0x4000-0x7fff window.
    pub fn rom_bank_offset(&self) -> usize {
        usize::from(self.rom_bank) << ROM_BANK_SHIFT
    }

    /// Offset into the external RAM array for an 0xa000-0xbfff access.
    pub fn ext_ram_addr(&self, addr: u16) -> usize {
        match self.state {
            MbcState::Mbc2 => usize::from(addr & MBC2_RAM_ADDR_MASK),
            _ => usize::from(
                (u16::from(self.ext_ram_bank) << EXT_RAM_BANK_SHIFT) & self.ext_ram_addr_mask
                    | addr,
            ),
        }
    }

    pub fn is_mbc2(&self) -> bool {
        matches!(self.state, MbcState::Mbc2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mbc(kind: MbcKind, rom_bank_mask: u16, ext_ram_addr_mask: u16) -> Mbc {
        let mut mbc = Mbc::new(
            &crate::cartridge::RomInfo {
                title: String::new(),
                cgb_flag: crate::cartridge::CgbFlag::None,
                sgb_flag: 0,
                cartridge_type: crate::cartridge::CartridgeType::RomOnly,
                rom_bank_count: 2,
                rom_bank_mask: 1,
                ext_ram_size: 0,
                ext_ram_addr_mask: 0,
                header_checksum: 0,
                global_checksum: 0,
                header_checksum_valid: true,
                global_checksum_valid: true,
            },
            kind,
        );
        mbc.rom_bank_mask = rom_bank_mask;
        mbc.ext_ram_addr_mask = ext_ram_addr_mask;
        mbc
    }

    #[test]
    fn mbc1_zero_bank_is_rewritten() {
        let mut m = mbc(MbcKind::Mbc1, 0x7f, 0x7fff);
        m.write_rom(0x2000, 0);
        assert_eq!(1, m.rom_bank);
        m.write_rom(0x2000, 0x20);
        // Only the low five bits reach the latch, so 0x20 reads as zero.
        assert_eq!(1, m.rom_bank);
    }

    #[test]
    fn mbc1_high_bits_compose_in_rom_mode() {
        let mut m = mbc(MbcKind::Mbc1, 0x7f, 0x7fff);
        m.write_rom(0x2000, 0x12);
        m.write_rom(0x4000, 0x01);
        assert_eq!(0x32, m.rom_bank);
        assert_eq!(0, m.ext_ram_bank);
        m.write_rom(0x6000, 0x01);
        assert_eq!(0x01, m.ext_ram_bank);
    }

    #[test]
    fn mbc1_bank_wraps_to_declared_size() {
        let mut m = mbc(MbcKind::Mbc1, 0x0f, 0);
        m.write_rom(0x2000, 0x1f);
        assert_eq!(0x0f, m.rom_bank);
    }

    #[test]
    fn mbc2_address_bit_8_selects_latch() {
        let mut m = mbc(MbcKind::Mbc2, 0x0f, 0);
        m.write_rom(0x0000, 0x0a);
        assert!(m.ext_ram_enabled);
        // Bit 8 set: this is a bank select, not a RAM enable toggle.
        m.write_rom(0x0100, 0x00);
        assert!(m.ext_ram_enabled);
        m.write_rom(0x2100, 0x07);
        assert_eq!(7, m.rom_bank);
        // Bit 8 clear in the bank range: ignored.
        m.write_rom(0x2000, 0x03);
        assert_eq!(7, m.rom_bank);
    }

    #[test]
    fn mbc3_does_not_rewrite_zero() {
        let mut m = mbc(MbcKind::Mbc3, 0x7f, 0x7fff);
        m.write_rom(0x2000, 0x00);
        assert_eq!(0, m.rom_bank);
        m.write_rom(0x2000, 0xff);
        assert_eq!(0x7f, m.rom_bank);
    }

    #[test]
    fn mbc5_nine_bit_bank() {
        let mut m = mbc(MbcKind::Mbc5, 0x1ff, 0x7fff);
        m.write_rom(0x2000, 0x34);
        m.write_rom(0x3000, 0x01);
        assert_eq!(0x134, m.rom_bank);
        m.write_rom(0x2000, 0x00);
        assert_eq!(0x100, m.rom_bank);
        m.write_rom(0x4000, 0x05);
        assert_eq!(5, m.ext_ram_bank);
    }

    #[test]
    fn ext_ram_banking() {
        let mut m = mbc(MbcKind::Mbc3, 0x7f, 0x7fff);
        m.write_rom(0x4000, 0x02);
        assert_eq!(0x4123, m.ext_ram_addr(0x0123));
        // A 2 KiB cart masks the bank contribution away entirely.
        m.ext_ram_addr_mask = 0x7ff;
        assert_eq!(0x0123, m.ext_ram_addr(0x0123));
    }
}
