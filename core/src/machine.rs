//! Wires the cartridge, GROM, VDP, PSG, and speech ports onto the CPU bus
//! as trap handlers (§4.4).
//!
//! Device state that the frontend also needs to drive directly (VDP
//! `refresh`, PSG `fill`, cartridge `save`) is kept in `Rc<RefCell<_>>` and
//! shared with the thin [`TrapHandler`] wrapper registered on the bus, the
//! same way the cartridge's battery-backed RAM needs to survive past the
//! trap handler that mutates it.

use std::cell::{Ref, RefCell, RefMut};
use std::path::Path;
use std::rc::Rc;

use crate::bus::TrapHandler;
use crate::cartridge::{BankType, Cartridge, CartridgeError, CPU_BANK_SIZE, NUM_CPU_REGIONS, NUM_GROM_REGIONS, GROM_BANK_SIZE};
use crate::cpu::Cpu;
use crate::psg::Psg;
use crate::speech::{SpeechError, SpeechPort, Vsm};
use crate::vdp::Vdp;

const PSG_PORT: u16 = 0x8400;
const VDP_PORT_BASE: [u16; 2] = [0x8800, 0x8C00];
const GROM_PORT_BASE: u16 = 0x9800;
const SPEECH_READ_PORT: u16 = 0x9000;
const SPEECH_WRITE_PORT: u16 = 0x9400;

struct PsgPort {
    psg: Rc<RefCell<Psg>>,
}

impl TrapHandler for PsgPort {
    fn read(&mut self, _address: u16) -> u8 {
        0xFF // write-only port; open bus on read
    }

    fn write(&mut self, _address: u16, value: u8) -> u8 {
        self.psg.borrow_mut().write(value);
        value
    }
}

struct VdpPort {
    vdp: Rc<RefCell<Vdp>>,
}

impl TrapHandler for VdpPort {
    fn read(&mut self, address: u16) -> u8 {
        let mut vdp = self.vdp.borrow_mut();
        if address & 0x0002 == 0 {
            vdp.read_data()
        } else {
            vdp.read_status()
        }
    }

    fn write(&mut self, address: u16, value: u8) -> u8 {
        let mut vdp = self.vdp.borrow_mut();
        if address & 0x0002 == 0 {
            vdp.write_data(value);
        } else {
            vdp.write_address(value);
        }
        value
    }
}

/// 8 banks of 8 KiB GROM addressed through a single sequential port: a
/// 16-bit address latch (high byte then low byte) and a one-byte read-ahead
/// register (§4.4). GROM is read-only in this core — cartridges with
/// writable GRAM banks are out of scope — so writes to the data half of the
/// port are accepted but discarded.
struct Grom {
    banks: Vec<Vec<u8>>,
    address: u16,
    read_ahead: u8,
    write_latch_high: Option<u8>,
    read_address_high_pending: bool,
}

impl Grom {
    fn new(cartridge: &Cartridge) -> Self {
        let mut banks = vec![vec![0u8; GROM_BANK_SIZE]; NUM_GROM_REGIONS];
        for (i, bank) in banks.iter_mut().enumerate() {
            if let Some(data) = cartridge.grom_region(i).and_then(|r| r.current()).map(|b| &b.data) {
                bank.copy_from_slice(data);
            }
        }
        let mut grom = Self {
            banks,
            address: 0,
            read_ahead: 0,
            write_latch_high: None,
            read_address_high_pending: true,
        };
        grom.read_ahead = grom.fetch();
        grom
    }

    fn fetch(&self) -> u8 {
        let bank = (self.address >> 13) as usize & (NUM_GROM_REGIONS - 1);
        let offset = (self.address & 0x1FFF) as usize;
        self.banks[bank][offset]
    }
}

impl TrapHandler for Grom {
    fn read(&mut self, address: u16) -> u8 {
        if address & 0x0002 == 0 {
            let byte = self.read_ahead;
            self.address = self.address.wrapping_add(1);
            self.read_ahead = self.fetch();
            byte
        } else if self.read_address_high_pending {
            self.read_address_high_pending = false;
            (self.address >> 8) as u8
        } else {
            self.read_address_high_pending = true;
            (self.address & 0xFF) as u8
        }
    }

    fn write(&mut self, address: u16, value: u8) -> u8 {
        if address & 0x0400 == 0 {
            return 0; // GRAM write: not modeled.
        }
        match self.write_latch_high.take() {
            None => self.write_latch_high = Some(value),
            Some(high) => {
                self.address = ((high as u16) << 8) | value as u16;
                self.read_ahead = self.fetch();
            }
        }
        value
    }
}

/// Banked CPU ROM/RAM, covering all 16 non-empty 4 KiB regions under a
/// single trap slot. A write to a ROM region's window selects a bank (two
/// bytes of address space per bank, the common TI cartridge convention); a
/// write to a RAM or battery-backed region's window stores through.
struct CartridgeRom {
    cartridge: Rc<RefCell<Cartridge>>,
}

impl TrapHandler for CartridgeRom {
    fn read(&mut self, address: u16) -> u8 {
        let region_index = address as usize / CPU_BANK_SIZE;
        let offset = address as usize % CPU_BANK_SIZE;
        self.cartridge
            .borrow()
            .cpu_region(region_index)
            .and_then(|r| r.current())
            .and_then(|b| b.data.get(offset))
            .copied()
            .unwrap_or(0)
    }

    fn write(&mut self, address: u16, value: u8) -> u8 {
        let region_index = address as usize / CPU_BANK_SIZE;
        let offset = address as usize % CPU_BANK_SIZE;
        let mut cartridge = self.cartridge.borrow_mut();
        let Some(region) = cartridge.cpu_region_mut(region_index) else {
            return value;
        };
        let is_rom = region.current().map(|b| b.kind == BankType::Rom).unwrap_or(true);
        if is_rom {
            if region.banks.len() > 1 {
                region.select_bank(offset / 2);
            }
        } else if let Some(bank) = region.current_mut() {
            if let Some(slot) = bank.data.get_mut(offset) {
                *slot = value;
            }
        }
        value
    }
}

struct SpeechTrap {
    port: SpeechPort,
    vsm: Vsm,
}

impl TrapHandler for SpeechTrap {
    fn read(&mut self, _address: u16) -> u8 {
        self.port.read(&self.vsm)
    }

    fn write(&mut self, _address: u16, value: u8) -> u8 {
        self.port.write(value);
        value
    }
}

/// Owns the CPU and the devices hanging off its bus, and exposes the
/// frontend-facing handles (`vdp`, `psg`) that the trap handlers share.
pub struct Machine {
    pub cpu: Cpu,
    vdp: Rc<RefCell<Vdp>>,
    psg: Rc<RefCell<Psg>>,
    cartridge: Option<Rc<RefCell<Cartridge>>>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(44_100)
    }
}

impl Machine {
    pub fn new(audio_sample_rate: u32) -> Self {
        let mut cpu = Cpu::new();
        let vdp = Rc::new(RefCell::new(Vdp::new()));
        let psg = Rc::new(RefCell::new(Psg::new(audio_sample_rate)));

        let vdp_addresses = VDP_PORT_BASE.iter().flat_map(|&base| base..base + 4);
        cpu.bus
            .register_trap(vdp_addresses, Box::new(VdpPort { vdp: Rc::clone(&vdp) }))
            .expect("vdp trap slot");

        cpu.bus
            .register_trap([PSG_PORT], Box::new(PsgPort { psg: Rc::clone(&psg) }))
            .expect("psg trap slot");

        Self { cpu, vdp, psg, cartridge: None }
    }

    pub fn vdp(&self) -> Ref<'_, Vdp> {
        self.vdp.borrow()
    }

    pub fn vdp_mut(&self) -> RefMut<'_, Vdp> {
        self.vdp.borrow_mut()
    }

    pub fn psg_mut(&self) -> RefMut<'_, Psg> {
        self.psg.borrow_mut()
    }

    /// Loads a cartridge, mapping its GROM banks and CPU ROM/RAM regions
    /// onto the bus. Replaces any previously loaded cartridge's mappings.
    pub fn load_cartridge(&mut self, cartridge: Cartridge) {
        let grom = Grom::new(&cartridge);
        let _ = self.cpu.bus.register_trap(GROM_PORT_BASE..=0x9FFE, Box::new(grom));

        let mut cpu_addresses = Vec::new();
        for region_index in 0..NUM_CPU_REGIONS {
            let non_empty = cartridge.cpu_region(region_index).map(|r| !r.is_empty()).unwrap_or(false);
            if !non_empty {
                continue;
            }
            let base = (region_index * CPU_BANK_SIZE) as u16;
            cpu_addresses.extend(base..base + CPU_BANK_SIZE as u16);
        }

        let cartridge = Rc::new(RefCell::new(cartridge));
        if !cpu_addresses.is_empty() {
            let _ = self.cpu.bus.register_trap(
                cpu_addresses,
                Box::new(CartridgeRom { cartridge: Rc::clone(&cartridge) }),
            );
        }

        self.cartridge = Some(cartridge);
    }

    pub fn save_cartridge_ram(&self) {
        if let Some(cartridge) = &self.cartridge {
            cartridge.borrow().save_ram();
        }
    }

    pub fn save_cartridge(&self, path: impl AsRef<Path>) -> Result<(), CartridgeError> {
        match &self.cartridge {
            Some(cartridge) => cartridge.borrow_mut().save(path),
            None => Ok(()),
        }
    }

    /// Installs the TMS5220 voice synthesis ROM, wiring the speech port
    /// (§4.7) onto the bus.
    pub fn install_speech(&mut self, rom: Vec<u8>) -> Result<(), SpeechError> {
        let vsm = Vsm::new(rom)?;
        let trap = SpeechTrap { port: SpeechPort::new(), vsm };
        let _ = self
            .cpu
            .bus
            .register_trap([SPEECH_READ_PORT, SPEECH_WRITE_PORT], Box::new(trap));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::{Bank, MemoryRegion};

    fn cartridge_with_one_rom_bank(byte: u8) -> Cartridge {
        Cartridge::from_regions(
            "TEST",
            0,
            {
                let mut regions = vec![MemoryRegion::default(); NUM_CPU_REGIONS];
                regions[6] = MemoryRegion {
                    banks: vec![Bank { kind: BankType::Rom, data: vec![byte; CPU_BANK_SIZE] }],
                    current_bank: 0,
                };
                regions
            },
            vec![MemoryRegion::default(); NUM_GROM_REGIONS],
        )
    }

    #[test]
    fn cartridge_rom_is_readable_through_the_bus() {
        let mut machine = Machine::new(44_100);
        machine.load_cartridge(cartridge_with_one_rom_bank(0xAB));
        assert_eq!(machine.cpu.bus.read_byte(0x6000), 0xAB);
    }

    #[test]
    fn psg_port_accepts_writes_and_returns_open_bus_on_read() {
        let machine = Machine::new(44_100);
        let mut bus_owner = machine;
        bus_owner.cpu.bus.write_byte(PSG_PORT, 0b1001_0000);
        assert_eq!(bus_owner.cpu.bus.read_byte(PSG_PORT), 0xFF);
    }

    #[test]
    fn vdp_status_read_is_routed_to_the_shared_vdp() {
        let machine = Machine::new(44_100);
        let mut bus_owner = machine;
        let _ = bus_owner.cpu.bus.read_byte(0x8802);
        assert!(!bus_owner.vdp().vram().is_empty());
    }
}
