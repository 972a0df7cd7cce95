//! Opcode-category coverage for the TMS9900 exec table, one concern per
//! test: general arithmetic/logic/compare, CRU multi-bit transfer, shifts,
//! multiply/divide, and conditional jumps. The scenario-level sequences
//! (LI/AI/STWP, BLWP/RTWP, interrupts, snapshots) live alongside the `Cpu`
//! type itself; this file exercises the individual opcode functions in
//! `cpu::ops` that those scenarios don't touch.

use ti99_core::cpu::{status, Cpu};

fn cpu_at(wp: u16, pc: u16) -> Cpu {
    let mut cpu = Cpu::new();
    cpu.set_wp(wp);
    cpu.set_pc(pc);
    cpu
}

#[test]
fn add_sets_overflow_without_carry_on_signed_overflow() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    // A R1,R2 (Ts=0,S=1 src; Td=0,D=2 dst)
    cpu.bus.write_word(0x8400, 0xA081);
    cpu.set_register(1, 0x7FFF);
    cpu.set_register(2, 0x0001);

    assert!(cpu.step());

    assert_eq!(cpu.register(2), 0x8000);
    assert_ne!(cpu.st() & status::OVERFLOW, 0);
    assert_eq!(cpu.st() & status::CARRY, 0);
}

#[test]
fn szc_clears_masked_bits() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    // SZC R1,R2 -> R2 = !R1 & R2
    cpu.bus.write_word(0x8400, 0x4081);
    cpu.set_register(1, 0x0F0F);
    cpu.set_register(2, 0xFFFF);

    assert!(cpu.step());

    assert_eq!(cpu.register(2), 0xF0F0);
}

#[test]
fn compare_sets_lgt_and_agt_without_eq() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    // C R1,R2
    cpu.bus.write_word(0x8400, 0x8081);
    cpu.set_register(1, 10);
    cpu.set_register(2, 5);

    assert!(cpu.step());

    assert_eq!(cpu.st() & status::EQ, 0);
    assert_ne!(cpu.st() & status::LGT, 0);
    assert_ne!(cpu.st() & status::AGT, 0);
}

#[test]
fn ldcr_then_stcr_round_trips_four_bits_through_cru_space() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    cpu.set_register(12, 0x0010); // CRU base = 8
    cpu.set_register(1, 0x0A00); // high byte 0x0A = 0b1010
    cpu.set_register(2, 0x0000);

    // LDCR R1,4
    cpu.bus.write_word(0x8400, 0x3101);
    // STCR R2,4
    cpu.bus.write_word(0x8402, 0x3502);

    assert!(cpu.step());
    assert!(cpu.step());

    assert_eq!(cpu.register(2), 0x0A00);
}

#[test]
fn sla_flags_sign_change_as_overflow() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    // SLA R1,1
    cpu.bus.write_word(0x8400, 0x0A11);
    cpu.set_register(1, 0x4000);

    assert!(cpu.step());

    assert_eq!(cpu.register(1), 0x8000);
    assert_ne!(cpu.st() & status::OVERFLOW, 0);
    assert_eq!(cpu.st() & status::CARRY, 0);
}

#[test]
fn src_rotates_through_the_low_bit_into_carry() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    // SRC R1,1
    cpu.bus.write_word(0x8400, 0x0B11);
    cpu.set_register(1, 0x0001);

    assert!(cpu.step());

    assert_eq!(cpu.register(1), 0x8000);
    assert_ne!(cpu.st() & status::CARRY, 0);
}

#[test]
fn mpy_places_double_word_product_across_d_and_d_plus_one() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    // MPY R1,R2 (D=2 holds one factor; product lands in R2:R3)
    cpu.bus.write_word(0x8400, 0x3881);
    cpu.set_register(1, 1000);
    cpu.set_register(2, 2000);

    assert!(cpu.step());

    let product = 1000u32 * 2000u32;
    assert_eq!(cpu.register(2), (product >> 16) as u16);
    assert_eq!(cpu.register(3), (product & 0xFFFF) as u16);
}

#[test]
fn div_computes_quotient_and_remainder_when_it_fits() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    // DIV R1,R2 (dividend is R2:R3; divisor is R1)
    cpu.bus.write_word(0x8400, 0x3C81);
    cpu.set_register(1, 3);
    cpu.set_register(2, 0);
    cpu.set_register(3, 100);

    assert!(cpu.step());

    assert_eq!(cpu.register(2), 33);
    assert_eq!(cpu.register(3), 1);
    assert_eq!(cpu.st() & status::OVERFLOW, 0);
}

#[test]
fn div_signals_overflow_and_leaves_registers_untouched_when_quotient_would_not_fit() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    cpu.bus.write_word(0x8400, 0x3C81);
    cpu.set_register(1, 3);
    cpu.set_register(2, 5); // hi >= divisor: quotient would overflow 16 bits
    cpu.set_register(3, 100);

    assert!(cpu.step());

    assert_ne!(cpu.st() & status::OVERFLOW, 0);
    assert_eq!(cpu.register(2), 5);
    assert_eq!(cpu.register(3), 100);
}

#[test]
fn jlt_jumps_only_when_arithmetically_less_than() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    cpu.set_st(0); // AGT=0, EQ=0 -> "less than" holds
    // JLT +2 words
    cpu.bus.write_word(0x8400, 0x1102);

    assert!(cpu.step());

    assert_eq!(cpu.pc(), 0x8400 + 2 + 4);
}

#[test]
fn jlt_falls_through_when_not_less_than() {
    let mut cpu = cpu_at(0x8300, 0x8400);
    cpu.set_st(status::AGT);
    cpu.bus.write_word(0x8400, 0x1102);

    assert!(cpu.step());

    assert_eq!(cpu.pc(), 0x8400 + 2);
}
