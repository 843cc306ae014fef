//! Cartridge header parsing.
//!
//! The header is read once at load time; everything here is fatal except
//! the two checksums, which are reported and then ignored (real hardware
//! only verifies the header checksum in the boot ROM, and plenty of
//! homebrew ships with a bad global checksum).

use thiserror::Error;

pub const MINIMUM_ROM_SIZE: usize = 0x8000;
pub const ROM_BANK_SHIFT: u32 = 14;
pub const EXT_RAM_BANK_SHIFT: u32 = 13;
pub const EXT_RAM_MAX_SIZE: usize = 0x8000;

const TITLE_START_ADDR: usize = 0x134;
const TITLE_END_ADDR: usize = 0x143;
const CGB_FLAG_ADDR: usize = 0x143;
const SGB_FLAG_ADDR: usize = 0x146;
const CARTRIDGE_TYPE_ADDR: usize = 0x147;
const ROM_SIZE_ADDR: usize = 0x148;
const EXT_RAM_SIZE_ADDR: usize = 0x149;
const HEADER_CHECKSUM_ADDR: usize = 0x14d;
const GLOBAL_CHECKSUM_START_ADDR: usize = 0x14e;
const GLOBAL_CHECKSUM_END_ADDR: usize = 0x14f;

const HEADER_CHECKSUM_RANGE: core::ops::RangeInclusive<usize> = 0x134..=0x14c;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("rom is {0} bytes, smaller than the 32 KiB minimum")]
    RomTooSmall(usize),
    #[error("unknown rom size code {0:#04x}")]
    UnknownRomSize(u8),
    #[error("rom is {actual} bytes but the header declares {declared}")]
    RomSizeMismatch { declared: usize, actual: usize },
    #[error("unknown ram size code {0:#04x}")]
    UnknownRamSize(u8),
    #[error("unknown cartridge type {0:#04x}")]
    UnknownCartridgeType(u8),
    #[error("cartridge type {0:?} is not supported")]
    UnsupportedCartridge(CartridgeType),
    #[error("save state magic or length mismatch")]
    SaveStateMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgbFlag {
    None,
    Supported,
    Required,
}

impl From<u8> for CgbFlag {
    fn from(value: u8) -> Self {
        match value {
            0x80 => Self::Supported,
            0xc0 => Self::Required,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartridgeType {
    RomOnly,
    Mbc1,
    Mbc1Ram,
    Mbc1RamBattery,
    Mbc2,
    Mbc2Battery,
    RomRam,
    RomRamBattery,
    Mmm01,
    Mmm01Ram,
    Mmm01RamBattery,
    Mbc3TimerBattery,
    Mbc3TimerRamBattery,
    Mbc3,
    Mbc3Ram,
    Mbc3RamBattery,
    Mbc4,
    Mbc4Ram,
    Mbc4RamBattery,
    Mbc5,
    Mbc5Ram,
    Mbc5RamBattery,
    Mbc5Rumble,
    Mbc5RumbleRam,
    Mbc5RumbleRamBattery,
    PocketCamera,
    Tama5,
    Huc3,
    Huc1RamBattery,
}

impl TryFrom<u8> for CartridgeType {
    type Error = Error;

    // https://gbdev.io/pandocs/The_Cartridge_Header.html#0147--cartridge-type
    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            0x00 => Ok(Self::RomOnly),
            0x01 => Ok(Self::Mbc1),
            0x02 => Ok(Self::Mbc1Ram),
            0x03 => Ok(Self::Mbc1RamBattery),
            0x05 => Ok(Self::Mbc2),
            0x06 => Ok(Self::Mbc2Battery),
            0x08 => Ok(Self::RomRam),
            0x09 => Ok(Self::RomRamBattery),
            0x0b => Ok(Self::Mmm01),
            0x0c => Ok(Self::Mmm01Ram),
            0x0d => Ok(Self::Mmm01RamBattery),
            0x0f => Ok(Self::Mbc3TimerBattery),
            0x10 => Ok(Self::Mbc3TimerRamBattery),
            0x11 => Ok(Self::Mbc3),
            0x12 => Ok(Self::Mbc3Ram),
            0x13 => Ok(Self::Mbc3RamBattery),
            0x15 => Ok(Self::Mbc4),
            0x16 => Ok(Self::Mbc4Ram),
            0x17 => Ok(Self::Mbc4RamBattery),
            0x19 => Ok(Self::Mbc5),
            0x1a => Ok(Self::Mbc5Ram),
            0x1b => Ok(Self::Mbc5RamBattery),
            0x1c => Ok(Self::Mbc5Rumble),
            0x1d => Ok(Self::Mbc5RumbleRam),
            0x1e => Ok(Self::Mbc5RumbleRamBattery),
            0xfc => Ok(Self::PocketCamera),
            0xfd => Ok(Self::Tama5),
            0xfe => Ok(Self::Huc3),
            0xff => Ok(Self::Huc1RamBattery),
            _ => Err(Error::UnknownCartridgeType(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

impl CartridgeType {
    pub fn mbc_kind(self) -> Result<MbcKind, Error> {
        use CartridgeType::*;
        match self {
            RomOnly | RomRam | RomRamBattery | PocketCamera => Ok(MbcKind::None),
            Mbc1 | Mbc1Ram | Mbc1RamBattery => Ok(MbcKind::Mbc1),
            Mbc2 | Mbc2Battery => Ok(MbcKind::Mbc2),
            Mbc3TimerBattery | Mbc3TimerRamBattery | Mbc3 | Mbc3Ram | Mbc3RamBattery => {
                Ok(MbcKind::Mbc3)
            }
            Mbc5 | Mbc5Ram | Mbc5RamBattery | Mbc5Rumble | Mbc5RumbleRam | Mbc5RumbleRamBattery => {
                Ok(MbcKind::Mbc5)
            }
            Mmm01 | Mmm01Ram | Mmm01RamBattery | Mbc4 | Mbc4Ram | Mbc4RamBattery | Tama5 | Huc3
            | Huc1RamBattery => Err(Error::UnsupportedCartridge(self)),
        }
    }

    pub fn has_ext_ram(self) -> bool {
        use CartridgeType::*;
        matches!(
            self,
            Mbc1Ram
                | Mbc1RamBattery
                | RomRam
                | RomRamBattery
                | Mmm01Ram
                | Mmm01RamBattery
                | Mbc3TimerRamBattery
                | Mbc3Ram
                | Mbc3RamBattery
                | Mbc4Ram
                | Mbc4RamBattery
                | Mbc5Ram
                | Mbc5RamBattery
                | Mbc5RumbleRam
                | Mbc5RumbleRamBattery
        )
    }

    pub fn has_battery(self) -> bool {
        use CartridgeType::*;
        matches!(
            self,
            Mbc1RamBattery
                | Mbc2Battery
                | RomRamBattery
                | Mmm01RamBattery
                | Mbc3TimerBattery
                | Mbc3TimerRamBattery
                | Mbc3RamBattery
                | Mbc4RamBattery
                | Mbc5RamBattery
                | Mbc5RumbleRamBattery
        )
    }
}

/// Bank count and selection mask for a ROM size code. The three irregular
/// multi-megabit sizes share the 0x7f mask of their power-of-two neighbors.
pub fn rom_banks(code: u8) -> Result<(u32, u16), Error> {
    match code {
        0x00 => Ok((2, 0x1)),
        0x01 => Ok((4, 0x3)),
        0x02 => Ok((8, 0x7)),
        0x03 => Ok((16, 0xf)),
        0x04 => Ok((32, 0x1f)),
        0x05 => Ok((64, 0x3f)),
        0x06 => Ok((128, 0x7f)),
        0x07 => Ok((256, 0xff)),
        0x52 => Ok((72, 0x7f)),
        0x53 => Ok((80, 0x7f)),
        0x54 => Ok((96, 0x7f)),
        _ => Err(Error::UnknownRomSize(code)),
    }
}

/// Byte size and address mask for an external RAM size code.
pub fn ext_ram_size(code: u8) -> Result<(usize, u16), Error> {
    match code {
        0x00 => Ok((0, 0)),
        0x01 => Ok((0x800, 0x7ff)),
        0x02 => Ok((0x2000, 0x1fff)),
        0x03 => Ok((0x8000, 0x7fff)),
        _ => Err(Error::UnknownRamSize(code)),
    }
}

#[derive(Debug, Clone)]
pub struct RomInfo {
    pub title: String,
    pub cgb_flag: CgbFlag,
    pub sgb_flag: u8,
    pub cartridge_type: CartridgeType,
    pub rom_bank_count: u32,
    pub rom_bank_mask: u16,
    pub ext_ram_size: usize,
    pub ext_ram_addr_mask: u16,
    pub header_checksum: u8,
    pub global_checksum: u16,
    pub header_checksum_valid: bool,
    pub global_checksum_valid: bool,
}

fn rom_title(rom: &[u8]) -> String {
    rom[TITLE_START_ADDR..=TITLE_END_ADDR]
        .iter()
        .take_while(|&&b| b != 0 && b & 0x80 == 0)
        .map(|&b| b as char)
        .collect()
}

fn header_checksum(rom: &[u8]) -> u8 {
    let mut x = 0u8;
    for i in HEADER_CHECKSUM_RANGE {
        x = x.wrapping_sub(rom[i]).wrapping_sub(1);
    }
    x
}

fn global_checksum(rom: &[u8]) -> u16 {
    let mut x = 0u16;
    for (i, &byte) in rom.iter().enumerate() {
        if i == GLOBAL_CHECKSUM_START_ADDR || i == GLOBAL_CHECKSUM_END_ADDR {
            continue;
        }
        x = x.wrapping_add(u16::from(byte));
    }
    x
}

impl RomInfo {
    pub fn parse(rom: &[u8]) -> Result<Self, Error> {
        if rom.len() < MINIMUM_ROM_SIZE {
            return Err(Error::RomTooSmall(rom.len()));
        }
        let (rom_bank_count, rom_bank_mask) = rom_banks(rom[ROM_SIZE_ADDR])?;
        let declared = (rom_bank_count as usize) << ROM_BANK_SHIFT;
        if rom.len() != declared {
            return Err(Error::RomSizeMismatch {
                declared,
                actual: rom.len(),
            });
        }
        let cartridge_type = CartridgeType::try_from(rom[CARTRIDGE_TYPE_ADDR])?;
        let (ext_ram_size, ext_ram_addr_mask) = ext_ram_size(rom[EXT_RAM_SIZE_ADDR])?;

        let expected_header = rom[HEADER_CHECKSUM_ADDR];
        let expected_global = u16::from_be_bytes([
            rom[GLOBAL_CHECKSUM_START_ADDR],
            rom[GLOBAL_CHECKSUM_END_ADDR],
        ]);
        let info = Self {
            title: rom_title(rom),
            cgb_flag: CgbFlag::from(rom[CGB_FLAG_ADDR]),
            sgb_flag: rom[SGB_FLAG_ADDR],
            cartridge_type,
            rom_bank_count,
            rom_bank_mask,
            ext_ram_size,
            ext_ram_addr_mask,
            header_checksum: expected_header,
            global_checksum: expected_global,
            header_checksum_valid: header_checksum(rom) == expected_header,
            global_checksum_valid: global_checksum(rom) == expected_global,
        };

        log::info!(
            "loaded \"{}\": {:?}, {} rom banks, {} bytes ext ram",
            info.title,
            info.cartridge_type,
            info.rom_bank_count,
            info.ext_ram_size
        );
        if !info.header_checksum_valid {
            log::warn!("header checksum mismatch (expected {expected_header:#04x})");
        }
        if !info.global_checksum_valid {
            log::warn!("global checksum mismatch (expected {expected_global:#06x})");
        }
        Ok(info)
    }
}
