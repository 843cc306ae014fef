//! Shared harness: test ROMs are assembled in memory, so no fixture
//! files are needed. Code is placed straight at the 0x100 entry point.

use brick_core::Emulator;

#[allow(dead_code)]
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const CARTRIDGE_TYPE_ADDR: usize = 0x147;
const ROM_SIZE_ADDR: usize = 0x148;
const RAM_SIZE_ADDR: usize = 0x149;
const HEADER_CHECKSUM_ADDR: usize = 0x14d;

pub struct RomBuilder {
    data: Vec<u8>,
    cursor: usize,
}

#[allow(dead_code)]
impl RomBuilder {
    pub fn new() -> Self {
        Self::with_size_code(0)
    }

    pub fn with_size_code(rom_size: u8) -> Self {
        let banks = 2usize << rom_size;
        let mut data = vec![0u8; banks * 0x4000];
        data[0x134..0x138].copy_from_slice(b"TEST");
        data[ROM_SIZE_ADDR] = rom_size;
        Self { data, cursor: 0x100 }
    }

    pub fn cartridge_type(mut self, value: u8) -> Self {
        self.data[CARTRIDGE_TYPE_ADDR] = value;
        self
    }

    pub fn ram_size(mut self, value: u8) -> Self {
        self.data[RAM_SIZE_ADDR] = value;
        self
    }

    /// Append code at the cursor (starts at the 0x100 entry point).
    pub fn code(mut self, bytes: &[u8]) -> Self {
        self.data[self.cursor..self.cursor + bytes.len()].copy_from_slice(bytes);
        self.cursor += bytes.len();
        self
    }

    /// Place bytes at an absolute offset (interrupt handlers, data).
    pub fn at(mut self, addr: usize, bytes: &[u8]) -> Self {
        self.data[addr..addr + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// `JR -2`: park the CPU.
    pub fn spin(self) -> Self {
        self.code(&[0x18, 0xfe])
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut checksum = 0u8;
        for i in 0x134..=0x14c {
            checksum = checksum.wrapping_sub(self.data[i]).wrapping_sub(1);
        }
        self.data[HEADER_CHECKSUM_ADDR] = checksum;
        let mut global = 0u16;
        for (i, &b) in self.data.iter().enumerate() {
            if i != 0x14e && i != 0x14f {
                global = global.wrapping_add(u16::from(b));
            }
        }
        self.data[0x14e..=0x14f].copy_from_slice(&global.to_be_bytes());
        self.data
    }

    pub fn emulator(self) -> Emulator {
        Emulator::new(self.build()).expect("test rom should load")
    }
}
