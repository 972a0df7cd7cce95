//! TMS9900 disassembler (§1 "not the hard part", §6 CLI surface).
//!
//! A thin consumer of `ti99_core::cpu::ops`'s public opcode table: it never
//! decides *how* an instruction executes, only how to print the operands
//! implied by its [`ti99_core::cpu::ops::Format`]. Grounded on
//! `original_source/src/core/disassemble.cpp`'s `DisassembleASM`/`GetArgs`/
//! `GetRegs` family — same operand-formatting rules (`*Rn`, `*Rn+`,
//! `@>WORD(Rn)`), reimplemented against the bus instead of a raw pointer.

use clap::Parser;
use ti99_core::bus::Bus;
use ti99_core::cartridge::Cartridge;
use ti99_core::cpu::ops::{dispatch_table, Format};
use ti99_core::machine::Machine;

/// Disassembles a range of a loaded cartridge's CPU address space.
#[derive(Parser)]
#[command(name = "disassembler")]
struct Args {
    /// Path to a `.ctg` cartridge container.
    rom_path: String,

    /// Address range to disassemble, e.g. `--range=6000-7FFF`.
    #[arg(long = "range", value_name = "LO-HI")]
    range: String,
}

fn parse_range(spec: &str) -> Option<(u16, u16)> {
    let (lo, hi) = spec.split_once('-')?;
    let lo = u16::from_str_radix(lo.trim(), 16).ok()?;
    let hi = u16::from_str_radix(hi.trim(), 16).ok()?;
    (lo <= hi).then_some((lo, hi))
}

fn main() {
    let args = Args::parse();

    let Some((lo, hi)) = parse_range(&args.range) else {
        eprintln!("disassembler: bad --range value {:?}, expected LO-HI in hex", args.range);
        std::process::exit(-1);
    };

    let cartridge = match Cartridge::load(&args.rom_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("disassembler: {e}");
            std::process::exit(-1);
        }
    };

    let mut machine = Machine::new(44_100);
    machine.load_cartridge(cartridge);

    let mut pc = lo;
    while pc <= hi {
        let (text, next_pc) = disassemble_one(&mut machine.cpu.bus, pc);
        println!("{text}");
        if next_pc <= pc {
            break; // guard against a zero-length decode looping forever
        }
        pc = next_pc;
        if pc == 0 {
            break; // wrapped past 0xFFFF
        }
    }
}

/// Decodes one instruction at `pc`, returning its formatted text and the
/// address of the following instruction.
fn disassemble_one(bus: &mut Bus, pc: u16) -> (String, u16) {
    if pc & 1 != 0 {
        return (format!(">{pc:04X}  <-- Illegal value in PC"), pc.wrapping_add(1));
    }

    let opcode = bus.read_word(pc);
    let mut cursor = pc.wrapping_add(2);

    let Some((_, entry)) = dispatch_table().lookup(opcode) else {
        return (format!(">{pc:04X}  Invalid Op-Code"), cursor);
    };

    if opcode == 0x1000 {
        return (format!(">{pc:04X}  NOP"), cursor);
    }

    let operands = format_operands(bus, entry.format, opcode, pc, &mut cursor);
    let text = match operands {
        Some(operands) => format!(">{pc:04X}  {:<4} {operands}", entry.name),
        None => format!(">{pc:04X}  {}", entry.name),
    };
    (text, cursor)
}

fn format_operands(bus: &mut Bus, format: Format, opcode: u16, pc: u16, cursor: &mut u16) -> Option<String> {
    match format {
        Format::I => {
            let src = get_regs(bus, opcode, cursor);
            let dst = get_regs(bus, opcode >> 6, cursor);
            Some(format!("{src},{dst}"))
        }
        Format::III => {
            let src = get_regs(bus, opcode, cursor);
            let reg = (opcode >> 6) & 0xF;
            Some(format!("{src},R{reg}"))
        }
        Format::IV => {
            let src = get_regs(bus, opcode, cursor);
            let count = (opcode >> 6) & 0xF;
            let count = if count == 0 { 16 } else { count };
            Some(format!("{src},{count}"))
        }
        Format::V => {
            let reg = opcode & 0xF;
            let count = (opcode >> 4) & 0xF;
            Some(format!("R{reg},{count}"))
        }
        Format::VI => Some(get_regs(bus, opcode, cursor)),
        Format::VII => None,
        Format::VIII => Some(format_immediate(bus, opcode, cursor)),
        Format::II => Some(format_jump_or_cru(bus, opcode, pc, cursor)),
    }
}

/// `GetRegs`: formats one general-address operand (`Rn`, `*Rn`, `*Rn+`,
/// `@>WORD` / `@>WORD(Rn)`), consuming an extra word for symbolic/indexed
/// mode (2).
fn get_regs(bus: &mut Bus, op: u16, cursor: &mut u16) -> String {
    let reg = op & 0xF;
    let mode = (op >> 4) & 3;
    match mode {
        0 => format!("R{reg}"),
        1 => format!("*R{reg}"),
        3 => format!("*R{reg}+"),
        2 => {
            let word = bus.read_word(*cursor);
            *cursor = cursor.wrapping_add(2);
            if reg != 0 {
                format!("@>{word:04X}(R{reg})")
            } else {
                format!("@>{word:04X}")
            }
        }
        _ => unreachable!(),
    }
}

/// `format_VIII`: LI/AI/ANDI/ORI/CI take `Rn,>WORD`; LWPI/LIMI take
/// `>WORD`; STWP/STST take `Rn` alone.
fn format_immediate(bus: &mut Bus, opcode: u16, cursor: &mut u16) -> String {
    if opcode < 0x02A0 {
        let reg = opcode & 0xF;
        let word = bus.read_word(*cursor);
        *cursor = cursor.wrapping_add(2);
        format!("R{reg},>{word:04X}")
    } else if opcode >= 0x02E0 {
        let word = bus.read_word(*cursor);
        *cursor = cursor.wrapping_add(2);
        format!(">{word:04X}")
    } else {
        format!("R{}", opcode & 0xF)
    }
}

/// `format_II`: jumps print a word target computed from the signed 8-bit
/// displacement (`PC + disp*2`); SBO/SBZ/TB print the raw displacement byte.
/// `JMP 0` (`opcode == 0x1000`) is handled by the caller before this runs,
/// matching `format_II`'s `NOP` special case.
fn format_jump_or_cru(_bus: &mut Bus, opcode: u16, _pc: u16, cursor: &mut u16) -> String {
    let disp = opcode as i8;
    if opcode >= 0x1D00 {
        format!(">{:02X}", (opcode & 0xFF) as u8)
    } else {
        let target = cursor.wrapping_add((disp as i16 as u16).wrapping_mul(2));
        format!(">{target:04X}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with(words: &[(u16, u16)]) -> Bus {
        let mut bus = Bus::new();
        for &(addr, word) in words {
            bus.write_word(addr, word);
        }
        bus
    }

    #[test]
    fn decodes_li_with_immediate_operand() {
        let mut bus = bus_with(&[(0x1000, 0x0201), (0x1002, 0x1234)]);
        let (text, next) = disassemble_one(&mut bus, 0x1000);
        assert_eq!(next, 0x1004);
        assert!(text.contains("LI"), "{text}");
        assert!(text.contains("R1,>1234"), "{text}");
    }

    #[test]
    fn decodes_jmp_target() {
        // JMP +2 words forward: opcode 0x1000 base with disp=1 -> 0x1001.
        let mut bus = bus_with(&[(0x2000, 0x1001)]);
        let (text, next) = disassemble_one(&mut bus, 0x2000);
        assert_eq!(next, 0x2002);
        assert!(text.contains(">2004"), "{text}");
    }

    #[test]
    fn flags_misaligned_pc() {
        let mut bus = Bus::new();
        let (text, next) = disassemble_one(&mut bus, 0x1001);
        assert!(text.contains("Illegal value in PC"));
        assert_eq!(next, 0x1002);
    }

    #[test]
    fn flags_invalid_opcode() {
        // 0x0000 doesn't match any opcode entry (no entry has base==mask==0 matching).
        let mut bus = bus_with(&[(0x1000, 0x0000)]);
        let (text, _) = disassemble_one(&mut bus, 0x1000);
        assert!(text.contains("Invalid Op-Code"), "{text}");
    }
}
