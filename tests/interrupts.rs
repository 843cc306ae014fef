mod common;

use common::RomBuilder;

fn step_n(emu: &mut brick_core::Emulator, n: usize) {
    for _ in 0..n {
        emu.step();
    }
}

#[test]
fn timer_overflow_vectors_and_reloads() {
    let mut emu = RomBuilder::new()
        .at(0x50, &[0x04, 0xd9]) // INC B; RETI
        .code(&[0x3e, 0x42, 0xe0, 0x06]) // TMA = 0x42
        .code(&[0x3e, 0x04, 0xe0, 0xff]) // IE = timer
        .code(&[0x3e, 0xff, 0xe0, 0x05]) // TIMA = 0xFF
        .code(&[0x3e, 0x05, 0xe0, 0x07]) // TAC = on, 262 kHz
        .code(&[0xfb]) // EI
        .spin()
        .emulator();
    step_n(&mut emu, 100);
    assert_eq!(1, emu.regs.b, "timer handler should have run once");
    // TIMA restarted from TMA and keeps counting from there.
    assert!(emu.timer.tima >= 0x42);
    assert_eq!(0x42, emu.timer.tma);
}

#[test]
fn halt_resumes_on_interrupt() {
    let mut emu = RomBuilder::new()
        .at(0x50, &[0x0c, 0xd9]) // INC C; RETI
        .code(&[0x3e, 0x04, 0xe0, 0xff]) // IE = timer
        .code(&[0x3e, 0xf0, 0xe0, 0x05]) // TIMA = 0xF0
        .code(&[0x3e, 0x05, 0xe0, 0x07]) // TAC = on, 262 kHz
        .code(&[0xfb]) // EI
        .code(&[0x76]) // HALT
        .code(&[0x04]) // INC B: runs once, after the handler
        .spin()
        .emulator();
    step_n(&mut emu, 200);
    assert_eq!(1, emu.regs.c, "handler ran");
    assert_eq!(1, emu.regs.b, "execution resumed after halt");
}

#[test]
fn halt_with_pending_interrupt_duplicates_next_byte() {
    let mut emu = RomBuilder::new()
        .code(&[0xf3]) // DI
        .code(&[0x3e, 0x04, 0xe0, 0x0f]) // IF = timer
        .code(&[0x3e, 0x04, 0xe0, 0xff]) // IE = timer
        .code(&[0x76]) // HALT: IME off, interrupt pending
        .code(&[0x04]) // INC B: fetched twice
        .spin()
        .emulator();
    step_n(&mut emu, 12);
    assert_eq!(2, emu.regs.b);
    assert!(!emu.interrupt.halt);
}

#[test]
fn halt_with_disabled_interrupts_wakes_without_dispatch() {
    let mut emu = RomBuilder::new()
        .at(0x50, &[0x0c, 0xd9]) // INC C; RETI (must not run)
        .code(&[0xf3]) // DI
        .code(&[0x3e, 0x04, 0xe0, 0xff]) // IE = timer
        .code(&[0x3e, 0xf8, 0xe0, 0x05]) // TIMA = 0xF8
        .code(&[0x3e, 0x05, 0xe0, 0x07]) // TAC = on, 262 kHz
        .code(&[0x76]) // HALT with IME off, nothing pending yet
        .code(&[0x04]) // INC B
        .spin()
        .emulator();
    step_n(&mut emu, 200);
    assert_eq!(0, emu.regs.c, "vector must not be taken");
    assert_eq!(1, emu.regs.b, "but execution continues past HALT");
}

#[test]
fn ei_takes_effect_after_one_instruction() {
    // EI; DI leaves no window for the pending interrupt to dispatch.
    let mut emu = RomBuilder::new()
        .at(0x40, &[0x0c, 0xd9]) // INC C; RETI
        .code(&[0x3e, 0x01, 0xe0, 0x0f]) // IF = vblank
        .code(&[0x3e, 0x01, 0xe0, 0xff]) // IE = vblank
        .code(&[0xfb, 0xf3]) // EI; DI
        .spin()
        .emulator();
    step_n(&mut emu, 10);
    assert_eq!(0, emu.regs.c);
    assert!(!emu.interrupt.ime);
}

#[test]
fn interrupt_dispatch_costs_five_mcycles() {
    let mut emu = RomBuilder::new()
        .at(0x40, &[0xd9]) // RETI
        .code(&[0x3e, 0x01, 0xe0, 0xff]) // IE = vblank
        .code(&[0x3e, 0x01, 0xe0, 0x0f]) // IF = vblank
        .code(&[0xfb]) // EI
        .code(&[0x00]) // NOP: interrupt dispatches after this one
        .spin()
        .emulator();
    step_n(&mut emu, 5); // up to and including EI
    let cycles = emu.cycles;
    emu.step(); // NOP + dispatch
    assert_eq!(0x0040, emu.regs.pc);
    assert_eq!(24, emu.cycles - cycles); // 4 for NOP, 20 for the dispatch
}

#[test]
fn higher_priority_interrupt_wins() {
    let mut emu = RomBuilder::new()
        .at(0x40, &[0x04, 0xd9]) // INC B; RETI
        .at(0x50, &[0x0c, 0xd9]) // INC C; RETI
        .code(&[0x3e, 0x05, 0xe0, 0x0f]) // IF = vblank | timer
        .code(&[0x3e, 0x05, 0xe0, 0xff]) // IE = vblank | timer
        .code(&[0xfb]) // EI
        .code(&[0x00, 0x00, 0x00, 0x00])
        .spin()
        .emulator();
    step_n(&mut emu, 12);
    assert_eq!(1, emu.regs.b);
    assert_eq!(1, emu.regs.c);
}

#[test]
fn serial_transfer_completes_with_ones() {
    let mut emu = RomBuilder::new()
        .at(0x58, &[0x04, 0xd9]) // INC B; RETI
        .code(&[0x3e, 0x08, 0xe0, 0xff]) // IE = serial
        .code(&[0x3e, 0x5a, 0xe0, 0x01]) // SB = 0x5A
        .code(&[0x3e, 0x81, 0xe0, 0x02]) // SC = start, internal clock
        .code(&[0xfb]) // EI
        .spin()
        .emulator();
    // 8 bits at 512 cycles each, plus slack.
    step_n(&mut emu, 8 * 512 / 4 + 64);
    assert_eq!(0xff, emu.serial.sb);
    assert_eq!(1, emu.regs.b);
    assert!(!emu.serial.transferring);
}
