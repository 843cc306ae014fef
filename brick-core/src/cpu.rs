//! CPU core: fetch, decode, execute.
//!
//! Every memory access ticks the whole machine by one M-cycle first, so
//! instruction timing falls out of the access pattern; the handful of
//! internal cycles (taken branches, 16-bit arithmetic, stack adjustment)
//! are explicit `mcycle` calls at the positions hardware takes them.
//!
//! The regular ranges of the opcode space (LD r,r / ALU / CB) are decoded
//! algorithmically from the operand bits; irregular opcodes get their own
//! arms.

use crate::Emulator;
use crate::interrupt::Ints;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        const Z = 1 << 7;
        const N = 1 << 6;
        const H = 1 << 5;
        const C = 1 << 4;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registers {
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub f: Flags,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    pub fn af(&self) -> u16 {
        u16::from(self.a) << 8 | u16::from(self.f.bits())
    }
    pub fn set_af(&mut self, value: u16) {
        self.a = (value >> 8) as u8;
        // The low nibble of F does not exist.
        self.f = Flags::from_bits_truncate(value as u8);
    }
    pub fn bc(&self) -> u16 {
        u16::from(self.b) << 8 | u16::from(self.c)
    }
    pub fn set_bc(&mut self, value: u16) {
        [self.b, self.c] = value.to_be_bytes();
    }
    pub fn de(&self) -> u16 {
        u16::from(self.d) << 8 | u16::from(self.e)
    }
    pub fn set_de(&mut self, value: u16) {
        [self.d, self.e] = value.to_be_bytes();
    }
    pub fn hl(&self) -> u16 {
        u16::from(self.h) << 8 | u16::from(self.l)
    }
    pub fn set_hl(&mut self, value: u16) {
        [self.h, self.l] = value.to_be_bytes();
    }
}

/// Instruction lengths; zero marks invalid opcodes.
pub(crate) const OPCODE_BYTES: [u8; 256] = [
    /*       0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f */
    /* 00 */ 1, 3, 1, 1, 1, 1, 2, 1, 3, 1, 1, 1, 1, 1, 2, 1,
    /* 10 */ 1, 3, 1, 1, 1, 1, 2, 1, 2, 1, 1, 1, 1, 1, 2, 1,
    /* 20 */ 2, 3, 1, 1, 1, 1, 2, 1, 2, 1, 1, 1, 1, 1, 2, 1,
    /* 30 */ 2, 3, 1, 1, 1, 1, 2, 1, 2, 1, 1, 1, 1, 1, 2, 1,
    /* 40 */ 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    /* 50 */ 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    /* 60 */ 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    /* 70 */ 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    /* 80 */ 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    /* 90 */ 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    /* a0 */ 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    /* b0 */ 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    /* c0 */ 1, 1, 3, 3, 3, 1, 2, 1, 1, 1, 3, 2, 3, 3, 2, 1,
    /* d0 */ 1, 1, 3, 0, 3, 1, 2, 1, 1, 1, 3, 0, 3, 0, 2, 1,
    /* e0 */ 2, 1, 1, 0, 0, 1, 2, 1, 2, 1, 3, 0, 0, 0, 2, 1,
    /* f0 */ 2, 1, 1, 1, 0, 1, 2, 1, 2, 1, 3, 1, 0, 0, 2, 1,
];

// Operand encodings: register index 6 is the (HL) memory operand.
const MEM_HL: u8 = 6;

impl Emulator {
    pub(crate) fn read8_cy(&mut self, addr: u16) -> u8 {
        self.mcycle();
        self.read_u8(addr)
    }

    pub(crate) fn read16_cy(&mut self, addr: u16) -> u16 {
        let lo = self.read8_cy(addr);
        let hi = self.read8_cy(addr.wrapping_add(1));
        u16::from(hi) << 8 | u16::from(lo)
    }

    pub(crate) fn write8_cy(&mut self, addr: u16, value: u8) {
        self.mcycle();
        self.write_u8(addr, value);
    }

    pub(crate) fn write16_cy(&mut self, addr: u16, value: u16) {
        self.write8_cy(addr.wrapping_add(1), (value >> 8) as u8);
        self.write8_cy(addr, value as u8);
    }

    fn get_reg(&self, idx: u8) -> u8 {
        match idx {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            7 => self.regs.a,
            _ => unreachable!(),
        }
    }

    fn set_reg(&mut self, idx: u8, value: u8) {
        match idx {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            7 => self.regs.a = value,
            _ => unreachable!(),
        }
    }

    /// Read operand by index, consuming a cycle for (HL).
    fn read_operand(&mut self, idx: u8) -> u8 {
        if idx == MEM_HL {
            self.read8_cy(self.regs.hl())
        } else {
            self.get_reg(idx)
        }
    }

    fn write_operand(&mut self, idx: u8, value: u8) {
        if idx == MEM_HL {
            self.write8_cy(self.regs.hl(), value);
        } else {
            self.set_reg(idx, value);
        }
    }

    fn get_rr(&self, idx: u8) -> u16 {
        match idx {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_rr(&mut self, idx: u8, value: u16) {
        match idx {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// NZ / Z / NC / C.
    fn condition(&self, idx: u8) -> bool {
        match idx {
            0 => !self.regs.f.contains(Flags::Z),
            1 => self.regs.f.contains(Flags::Z),
            2 => !self.regs.f.contains(Flags::C),
            _ => self.regs.f.contains(Flags::C),
        }
    }

    // 8-bit ALU. All operate on A and set all four flags.

    fn alu_add(&mut self, value: u8) {
        let a = self.regs.a;
        let result = a.wrapping_add(value);
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N);
        f.set(Flags::H, (a & 0x0f) + (value & 0x0f) > 0x0f);
        f.set(Flags::C, u16::from(a) + u16::from(value) > 0xff);
        self.regs.a = result;
    }

    fn alu_adc(&mut self, value: u8) {
        let a = self.regs.a;
        let carry = u8::from(self.regs.f.contains(Flags::C));
        let result = a.wrapping_add(value).wrapping_add(carry);
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N);
        f.set(Flags::H, (a & 0x0f) + (value & 0x0f) + carry > 0x0f);
        f.set(
            Flags::C,
            u16::from(a) + u16::from(value) + u16::from(carry) > 0xff,
        );
        self.regs.a = result;
    }

    fn sub_flags(&mut self, value: u8) -> u8 {
        let a = self.regs.a;
        let result = a.wrapping_sub(value);
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.insert(Flags::N);
        f.set(Flags::H, a & 0x0f < value & 0x0f);
        f.set(Flags::C, a < value);
        result
    }

    fn alu_sub(&mut self, value: u8) {
        self.regs.a = self.sub_flags(value);
    }

    fn alu_sbc(&mut self, value: u8) {
        let a = self.regs.a;
        let carry = u8::from(self.regs.f.contains(Flags::C));
        let result = a.wrapping_sub(value).wrapping_sub(carry);
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.insert(Flags::N);
        f.set(
            Flags::H,
            i16::from(a & 0x0f) - i16::from(value & 0x0f) - i16::from(carry) < 0,
        );
        f.set(
            Flags::C,
            i16::from(a) - i16::from(value) - i16::from(carry) < 0,
        );
        self.regs.a = result;
    }

    fn alu_and(&mut self, value: u8) {
        self.regs.a &= value;
        let z = self.regs.a == 0;
        let f = &mut self.regs.f;
        f.set(Flags::Z, z);
        f.remove(Flags::N | Flags::C);
        f.insert(Flags::H);
    }

    fn alu_xor(&mut self, value: u8) {
        self.regs.a ^= value;
        let z = self.regs.a == 0;
        let f = &mut self.regs.f;
        f.set(Flags::Z, z);
        f.remove(Flags::N | Flags::H | Flags::C);
    }

    fn alu_or(&mut self, value: u8) {
        self.regs.a |= value;
        let z = self.regs.a == 0;
        let f = &mut self.regs.f;
        f.set(Flags::Z, z);
        f.remove(Flags::N | Flags::H | Flags::C);
    }

    fn alu_cp(&mut self, value: u8) {
        self.sub_flags(value);
    }

    fn alu_dispatch(&mut self, op: u8, value: u8) {
        match op {
            0 => self.alu_add(value),
            1 => self.alu_adc(value),
            2 => self.alu_sub(value),
            3 => self.alu_sbc(value),
            4 => self.alu_and(value),
            5 => self.alu_xor(value),
            6 => self.alu_or(value),
            _ => self.alu_cp(value),
        }
    }

    fn inc8(&mut self, value: u8) -> u8 {
        let result = value.wrapping_add(1);
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N);
        f.set(Flags::H, result & 0x0f == 0);
        result
    }

    fn dec8(&mut self, value: u8) -> u8 {
        let result = value.wrapping_sub(1);
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.insert(Flags::N);
        f.set(Flags::H, result & 0x0f == 0x0f);
        result
    }

    fn add_hl(&mut self, value: u16) {
        self.mcycle();
        let hl = self.regs.hl();
        let f = &mut self.regs.f;
        f.remove(Flags::N);
        f.set(Flags::H, (hl & 0xfff) + (value & 0xfff) > 0xfff);
        f.set(Flags::C, u32::from(hl) + u32::from(value) > 0xffff);
        self.regs.set_hl(hl.wrapping_add(value));
    }

    /// SP + signed immediate; H and C come from the unsigned low byte.
    fn add_sp_flags(&mut self, offset: u8) {
        let sp = self.regs.sp as u8;
        let f = &mut self.regs.f;
        f.remove(Flags::Z | Flags::N);
        f.set(Flags::H, (sp & 0x0f) + (offset & 0x0f) > 0x0f);
        f.set(Flags::C, u16::from(sp) + u16::from(offset) > 0xff);
    }

    fn daa(&mut self) {
        let f = self.regs.f;
        let mut adjust = 0u8;
        if f.contains(Flags::H) || (!f.contains(Flags::N) && self.regs.a & 0x0f > 9) {
            adjust = 6;
        }
        if f.contains(Flags::C) || (!f.contains(Flags::N) && self.regs.a > 0x99) {
            adjust |= 0x60;
            self.regs.f.insert(Flags::C);
        }
        self.regs.a = if f.contains(Flags::N) {
            self.regs.a.wrapping_sub(adjust)
        } else {
            self.regs.a.wrapping_add(adjust)
        };
        let z = self.regs.a == 0;
        self.regs.f.set(Flags::Z, z);
        self.regs.f.remove(Flags::H);
    }

    // Rotates and shifts. The CB forms set Z from the result; the A-only
    // forms always clear it.

    fn rlc(&mut self, value: u8) -> u8 {
        let carry = value >> 7;
        let result = value << 1 | carry;
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N | Flags::H);
        f.set(Flags::C, carry != 0);
        result
    }

    fn rrc(&mut self, value: u8) -> u8 {
        let carry = value & 1;
        let result = carry << 7 | value >> 1;
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N | Flags::H);
        f.set(Flags::C, carry != 0);
        result
    }

    fn rl(&mut self, value: u8) -> u8 {
        let carry = value >> 7;
        let result = value << 1 | u8::from(self.regs.f.contains(Flags::C));
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N | Flags::H);
        f.set(Flags::C, carry != 0);
        result
    }

    fn rr(&mut self, value: u8) -> u8 {
        let carry = value & 1;
        let result = u8::from(self.regs.f.contains(Flags::C)) << 7 | value >> 1;
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N | Flags::H);
        f.set(Flags::C, carry != 0);
        result
    }

    fn sla(&mut self, value: u8) -> u8 {
        let result = value << 1;
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N | Flags::H);
        f.set(Flags::C, value & 0x80 != 0);
        result
    }

    fn sra(&mut self, value: u8) -> u8 {
        let result = (value.cast_signed() >> 1).cast_unsigned();
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N | Flags::H);
        f.set(Flags::C, value & 1 != 0);
        result
    }

    fn swap(&mut self, value: u8) -> u8 {
        let result = value << 4 | value >> 4;
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N | Flags::H | Flags::C);
        result
    }

    fn srl(&mut self, value: u8) -> u8 {
        let result = value >> 1;
        let f = &mut self.regs.f;
        f.set(Flags::Z, result == 0);
        f.remove(Flags::N | Flags::H);
        f.set(Flags::C, value & 1 != 0);
        result
    }

    fn execute_cb(&mut self, opcode: u8) {
        let idx = opcode & 7;
        let op = opcode >> 3;
        let value = self.read_operand(idx);
        match op {
            0 => {
                let result = self.rlc(value);
                self.write_operand(idx, result);
            }
            1 => {
                let result = self.rrc(value);
                self.write_operand(idx, result);
            }
            2 => {
                let result = self.rl(value);
                self.write_operand(idx, result);
            }
            3 => {
                let result = self.rr(value);
                self.write_operand(idx, result);
            }
            4 => {
                let result = self.sla(value);
                self.write_operand(idx, result);
            }
            5 => {
                let result = self.sra(value);
                self.write_operand(idx, result);
            }
            6 => {
                let result = self.swap(value);
                self.write_operand(idx, result);
            }
            7 => {
                let result = self.srl(value);
                self.write_operand(idx, result);
            }
            8..=15 => {
                let bit = op - 8;
                let f = &mut self.regs.f;
                f.set(Flags::Z, value & 1 << bit == 0);
                f.remove(Flags::N);
                f.insert(Flags::H);
            }
            16..=23 => self.write_operand(idx, value & !(1 << (op - 16))),
            _ => self.write_operand(idx, value | 1 << (op - 24)),
        }
    }

    /// Push a return address and branch; one internal cycle before the
    /// stack writes, as hardware does.
    fn call(&mut self, new_pc: &mut u16, target: u16) {
        self.mcycle();
        self.regs.sp = self.regs.sp.wrapping_sub(2);
        let pushed = *new_pc;
        self.write16_cy(self.regs.sp, pushed);
        *new_pc = target;
    }

    fn ret(&mut self, new_pc: &mut u16) {
        *new_pc = self.read16_cy(self.regs.sp);
        self.regs.sp = self.regs.sp.wrapping_add(2);
        self.mcycle();
    }

    pub(crate) fn execute_instruction(&mut self) {
        if self.interrupt.enable {
            self.interrupt.enable = false;
            self.interrupt.ime = true;
        }

        if self.interrupt.halt {
            self.mcycle();
            return;
        }

        let opcode;
        if self.interrupt.halt_bug {
            // The byte after HALT is decoded without advancing PC, so it
            // runs twice. The duplicated fetch costs no cycle.
            opcode = self.read_u8(self.regs.pc);
            self.regs.pc = self.regs.pc.wrapping_sub(1);
            self.interrupt.halt_bug = false;
        } else {
            opcode = self.read8_cy(self.regs.pc);
        }

        let pc = self.regs.pc;
        let mut new_pc = pc.wrapping_add(u16::from(OPCODE_BYTES[usize::from(opcode)]));

        if opcode == 0xcb {
            let cb_opcode = self.read8_cy(pc.wrapping_add(1));
            self.execute_cb(cb_opcode);
            self.regs.pc = new_pc;
            return;
        }

        match opcode {
            0x00 => {}

            // 16-bit loads and arithmetic.
            0x01 | 0x11 | 0x21 | 0x31 => {
                let value = self.read16_cy(pc.wrapping_add(1));
                self.set_rr(opcode >> 4, value);
            }
            0x03 | 0x13 | 0x23 | 0x33 => {
                self.set_rr(opcode >> 4, self.get_rr(opcode >> 4).wrapping_add(1));
                self.mcycle();
            }
            0x0b | 0x1b | 0x2b | 0x3b => {
                self.set_rr(opcode >> 4, self.get_rr(opcode >> 4).wrapping_sub(1));
                self.mcycle();
            }
            0x09 | 0x19 | 0x29 | 0x39 => self.add_hl(self.get_rr(opcode >> 4)),
            0x08 => {
                let addr = self.read16_cy(pc.wrapping_add(1));
                self.write16_cy(addr, self.regs.sp);
            }

            // 8-bit loads through register pairs.
            0x02 => self.write8_cy(self.regs.bc(), self.regs.a),
            0x12 => self.write8_cy(self.regs.de(), self.regs.a),
            0x0a => self.regs.a = self.read8_cy(self.regs.bc()),
            0x1a => self.regs.a = self.read8_cy(self.regs.de()),
            0x22 => {
                let hl = self.regs.hl();
                self.write8_cy(hl, self.regs.a);
                self.regs.set_hl(hl.wrapping_add(1));
            }
            0x2a => {
                let hl = self.regs.hl();
                self.regs.a = self.read8_cy(hl);
                self.regs.set_hl(hl.wrapping_add(1));
            }
            0x32 => {
                let hl = self.regs.hl();
                self.write8_cy(hl, self.regs.a);
                self.regs.set_hl(hl.wrapping_sub(1));
            }
            0x3a => {
                let hl = self.regs.hl();
                self.regs.a = self.read8_cy(hl);
                self.regs.set_hl(hl.wrapping_sub(1));
            }

            // INC r / DEC r / LD r,n.
            0x04 | 0x0c | 0x14 | 0x1c | 0x24 | 0x2c | 0x34 | 0x3c => {
                let idx = opcode >> 3;
                let value = self.read_operand(idx);
                let result = self.inc8(value);
                self.write_operand(idx, result);
            }
            0x05 | 0x0d | 0x15 | 0x1d | 0x25 | 0x2d | 0x35 | 0x3d => {
                let idx = opcode >> 3;
                let value = self.read_operand(idx);
                let result = self.dec8(value);
                self.write_operand(idx, result);
            }
            0x06 | 0x0e | 0x16 | 0x1e | 0x26 | 0x2e | 0x36 | 0x3e => {
                let value = self.read8_cy(pc.wrapping_add(1));
                self.write_operand(opcode >> 3, value);
            }

            // Accumulator rotates: like the CB forms, but Z is cleared.
            0x07 => {
                let result = self.rlc(self.regs.a);
                self.regs.a = result;
                self.regs.f.remove(Flags::Z);
            }
            0x0f => {
                let result = self.rrc(self.regs.a);
                self.regs.a = result;
                self.regs.f.remove(Flags::Z);
            }
            0x17 => {
                let result = self.rl(self.regs.a);
                self.regs.a = result;
                self.regs.f.remove(Flags::Z);
            }
            0x1f => {
                let result = self.rr(self.regs.a);
                self.regs.a = result;
                self.regs.f.remove(Flags::Z);
            }

            0x27 => self.daa(),
            0x2f => {
                self.regs.a = !self.regs.a;
                self.regs.f.insert(Flags::N | Flags::H);
            }
            0x37 => {
                self.regs.f.remove(Flags::N | Flags::H);
                self.regs.f.insert(Flags::C);
            }
            0x3f => {
                self.regs.f.remove(Flags::N | Flags::H);
                self.regs.f.toggle(Flags::C);
            }

            // Relative jumps.
            0x18 => {
                let offset = self.read8_cy(pc.wrapping_add(1)).cast_signed();
                new_pc = new_pc.wrapping_add_signed(i16::from(offset));
                self.mcycle();
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let offset = self.read8_cy(pc.wrapping_add(1)).cast_signed();
                if self.condition(opcode >> 3 & 3) {
                    new_pc = new_pc.wrapping_add_signed(i16::from(offset));
                    self.mcycle();
                }
            }

            0x76 => {
                // HALT. With IME clear and something already pending the
                // CPU falls through with the fetch bug instead.
                if self.interrupt.ime {
                    self.interrupt.halt = true;
                } else if !self.interrupt.pending().is_empty() {
                    self.interrupt.halt_bug = true;
                } else {
                    self.interrupt.halt = true;
                    self.interrupt.halt_di = true;
                }
            }

            // LD r,r'.
            0x40..=0x7f => {
                let value = self.read_operand(opcode & 7);
                self.write_operand(opcode >> 3 & 7, value);
            }

            // ALU A,r.
            0x80..=0xbf => {
                let value = self.read_operand(opcode & 7);
                self.alu_dispatch(opcode >> 3 & 7, value);
            }
            // ALU A,n.
            0xc6 | 0xce | 0xd6 | 0xde | 0xe6 | 0xee | 0xf6 | 0xfe => {
                let value = self.read8_cy(pc.wrapping_add(1));
                self.alu_dispatch(opcode >> 3 & 7, value);
            }

            // Returns.
            0xc0 | 0xc8 | 0xd0 | 0xd8 => {
                self.mcycle();
                if self.condition(opcode >> 3 & 3) {
                    self.ret(&mut new_pc);
                }
            }
            0xc9 => self.ret(&mut new_pc),
            0xd9 => {
                self.interrupt.enable = false;
                self.interrupt.ime = true;
                self.ret(&mut new_pc);
            }

            // Absolute jumps.
            0xc2 | 0xca | 0xd2 | 0xda => {
                let target = self.read16_cy(pc.wrapping_add(1));
                if self.condition(opcode >> 3 & 3) {
                    new_pc = target;
                    self.mcycle();
                }
            }
            0xc3 => {
                new_pc = self.read16_cy(pc.wrapping_add(1));
                self.mcycle();
            }
            0xe9 => new_pc = self.regs.hl(),

            // Calls and restarts.
            0xc4 | 0xcc | 0xd4 | 0xdc => {
                let target = self.read16_cy(pc.wrapping_add(1));
                if self.condition(opcode >> 3 & 3) {
                    self.call(&mut new_pc, target);
                }
            }
            0xcd => {
                let target = self.read16_cy(pc.wrapping_add(1));
                self.call(&mut new_pc, target);
            }
            0xc7 | 0xcf | 0xd7 | 0xdf | 0xe7 | 0xef | 0xf7 | 0xff => {
                self.call(&mut new_pc, u16::from(opcode & 0x38));
            }

            // Stack.
            0xc1 | 0xd1 | 0xe1 => {
                let value = self.read16_cy(self.regs.sp);
                self.regs.sp = self.regs.sp.wrapping_add(2);
                self.set_rr(opcode >> 4 & 3, value);
            }
            0xf1 => {
                let value = self.read16_cy(self.regs.sp);
                self.regs.sp = self.regs.sp.wrapping_add(2);
                self.regs.set_af(value);
            }
            0xc5 | 0xd5 | 0xe5 => {
                self.mcycle();
                self.regs.sp = self.regs.sp.wrapping_sub(2);
                self.write16_cy(self.regs.sp, self.get_rr(opcode >> 4 & 3));
            }
            0xf5 => {
                self.mcycle();
                self.regs.sp = self.regs.sp.wrapping_sub(2);
                self.write16_cy(self.regs.sp, self.regs.af());
            }

            // High-page and absolute accumulator loads.
            0xe0 => {
                let offset = self.read8_cy(pc.wrapping_add(1));
                self.write8_cy(0xff00 | u16::from(offset), self.regs.a);
            }
            0xf0 => {
                let offset = self.read8_cy(pc.wrapping_add(1));
                self.regs.a = self.read8_cy(0xff00 | u16::from(offset));
            }
            0xe2 => self.write8_cy(0xff00 | u16::from(self.regs.c), self.regs.a),
            0xf2 => self.regs.a = self.read8_cy(0xff00 | u16::from(self.regs.c)),
            0xea => {
                let addr = self.read16_cy(pc.wrapping_add(1));
                self.write8_cy(addr, self.regs.a);
            }
            0xfa => {
                let addr = self.read16_cy(pc.wrapping_add(1));
                self.regs.a = self.read8_cy(addr);
            }

            // SP arithmetic.
            0xe8 => {
                let offset = self.read8_cy(pc.wrapping_add(1));
                self.add_sp_flags(offset);
                self.regs.sp = self
                    .regs
                    .sp
                    .wrapping_add_signed(i16::from(offset.cast_signed()));
                self.mcycle();
                self.mcycle();
            }
            0xf8 => {
                let offset = self.read8_cy(pc.wrapping_add(1));
                self.add_sp_flags(offset);
                let result = self
                    .regs
                    .sp
                    .wrapping_add_signed(i16::from(offset.cast_signed()));
                self.regs.set_hl(result);
                self.mcycle();
            }
            0xf9 => {
                self.regs.sp = self.regs.hl();
                self.mcycle();
            }

            0xf3 => {
                self.interrupt.ime = false;
                self.interrupt.enable = false;
            }
            0xfb => self.interrupt.enable = true,

            0x10 => panic!("STOP not implemented"),
            _ => panic!("invalid opcode {opcode:#04x}"),
        }

        self.regs.pc = new_pc;
    }

    pub(crate) fn handle_interrupts(&mut self) {
        if !(self.interrupt.ime || self.interrupt.halt) {
            return;
        }

        let pending = self.interrupt.pending();
        if pending.is_empty() {
            return;
        }

        // Lowest set bit is the highest priority source.
        let Some(interrupt) = pending.iter().next() else {
            return;
        };

        // A timer interrupt leaving halt takes one cycle longer.
        if self.interrupt.halt && interrupt == Ints::TIMER {
            self.mcycle();
        }

        if self.interrupt.halt_di {
            log::debug!("interrupt during halt with IME disabled; not dispatched");
            self.interrupt.halt_di = false;
        } else {
            self.interrupt.new_if -= interrupt;
            let mut new_pc = self.regs.pc;
            self.call(&mut new_pc, interrupt.vector());
            self.regs.pc = new_pc;
            self.interrupt.ime = false;
            self.mcycle();
            self.mcycle();
        }
        self.interrupt.halt = false;
    }

    /// One instruction plus any interrupt dispatch.
    pub fn step(&mut self) {
        self.execute_instruction();
        self.handle_interrupts();
    }
}
