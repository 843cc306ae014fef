//! OAM DMA engine.
//!
//! 160 bytes from (value << 8) into OAM at one byte per M-cycle, after an
//! 8-cycle startup during which OAM is still reachable. The destination
//! write skips the PPU mode check, and the source read skips the DMA
//! conflict check.

use crate::Emulator;
use crate::bus::{MappedAddress, map_address};

const DMA_CYCLES: u32 = 648;
const DMA_DELAY_CYCLES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmaState {
    #[default]
    Inactive,
    Triggered,
    Active,
}

#[derive(Debug, Clone, Default)]
pub struct Dma {
    pub state: DmaState,
    pub source: MappedAddress,
    pub cycles: u32,
}

impl Emulator {
    pub(crate) fn dma_mcycle(&mut self) {
        if self.dma.state == DmaState::Inactive {
            return;
        }
        if self.dma.cycles < DMA_DELAY_CYCLES {
            self.dma.cycles += 4;
            if self.dma.cycles >= DMA_DELAY_CYCLES {
                self.dma.cycles = DMA_DELAY_CYCLES;
                self.dma.state = DmaState::Active;
            }
            return;
        }

        let offset = ((self.dma.cycles - DMA_DELAY_CYCLES) >> 2) as u16;
        let mut pair = self.dma.source;
        pair.addr += offset;
        let value = self.read_mapped(pair);
        self.oam[usize::from(offset >> 2)].write(offset, value);
        self.dma.cycles += 4;
        if self.dma.cycles >= DMA_CYCLES {
            self.dma.cycles -= DMA_CYCLES;
            self.dma.state = DmaState::Inactive;
        }
    }

    /// A write to the DMA register; restarting while running re-latches
    /// the source and starts the transfer over.
    pub(crate) fn write_dma(&mut self, value: u8) {
        if self.dma.state == DmaState::Inactive {
            self.dma.state = DmaState::Triggered;
        }
        self.dma.source = map_address(u16::from(value) << 8);
        self.dma.cycles = 0;
    }
}
