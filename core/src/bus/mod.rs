//! Flat 64 KiB memory with trap-dispatched memory-mapped devices (§4.1, §4.4).
//!
//! Every address carries a trap index into a 16-slot handler table; index 0
//! means "use the raw byte array". A device claims a range by registering
//! itself under a nonzero slot and stamping that slot across its addresses.
//! 16-bit accesses call the handler twice (high byte, then low) and compose
//! the result big-endian, matching the TMS9900's byte order.

use std::fmt;

pub const MEMORY_SIZE: usize = 0x1_0000;
pub const MAX_TRAP_HANDLERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// PC was odd; word fetches/decodes require even alignment.
    MisalignedPc(u16),
    /// A caller tried to register a trap slot already in use by a different handler.
    TrapSlotConflict(u8),
    /// All 16 trap slots are in use.
    TrapTableFull,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MisalignedPc(pc) => write!(f, "misaligned PC: 0x{pc:04X}"),
            Self::TrapSlotConflict(slot) => write!(f, "trap slot {slot} already registered"),
            Self::TrapTableFull => write!(f, "no free trap handler slots"),
        }
    }
}

impl std::error::Error for BusError {}

/// Per-address flags alongside the raw byte array.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusFlags {
    /// Nonzero trap index; 0 means "no device is mapped here".
    pub trap: u8,
    /// Set by the debugger UI; checked before dispatching to a trap handler.
    pub breakpoint: bool,
}

/// A device that claims one or more addresses via a trap slot.
///
/// `read`/`write` receive the full 16-bit address (not an offset into the
/// device's own window) so one handler can serve a scattered or
/// non-power-of-two set of addresses, mirroring the GROM/VDP/PSG/speech
/// port layouts in §4.4.
pub trait TrapHandler {
    /// Called for a byte read. `address` is the CPU address that trapped.
    fn read(&mut self, address: u16) -> u8;
    /// Called for a byte write. Returns the byte that should be considered
    /// "stored" for any caller reading back the raw array (devices that
    /// don't back their state in the array can return 0).
    fn write(&mut self, address: u16, value: u8) -> u8;
}

struct TrapSlot {
    handler: Box<dyn TrapHandler>,
}

/// The flat memory bus: 64 KiB of bytes, per-address flags, and up to 16
/// concurrently registered trap handlers.
pub struct Bus {
    memory: Vec<u8>,
    flags: Vec<BusFlags>,
    slots: [Option<TrapSlot>; MAX_TRAP_HANDLERS],
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            memory: vec![0u8; MEMORY_SIZE],
            flags: vec![BusFlags::default(); MEMORY_SIZE],
            slots: Default::default(),
        }
    }

    /// Registers `handler` under the next free slot and stamps `addresses`
    /// with it. Returns the assigned slot for later [`Self::unregister`].
    pub fn register_trap(
        &mut self,
        addresses: impl IntoIterator<Item = u16>,
        handler: Box<dyn TrapHandler>,
    ) -> Result<u8, BusError> {
        let slot = (1..MAX_TRAP_HANDLERS as u8)
            .find(|&i| self.slots[i as usize].is_none())
            .ok_or(BusError::TrapTableFull)?;
        self.slots[slot as usize] = Some(TrapSlot { handler });
        for addr in addresses {
            self.flags[addr as usize].trap = slot;
        }
        Ok(slot)
    }

    pub fn unregister(&mut self, slot: u8) {
        self.slots[slot as usize] = None;
        for flag in self.flags.iter_mut() {
            if flag.trap == slot {
                flag.trap = 0;
            }
        }
    }

    pub fn set_breakpoint(&mut self, address: u16, enabled: bool) {
        self.flags[address as usize].breakpoint = enabled;
    }

    pub fn is_breakpoint(&self, address: u16) -> bool {
        self.flags[address as usize].breakpoint
    }

    /// Raw array access bypassing traps — used by device handlers operating
    /// on their own reserved VRAM/GRAM, and by snapshot save/load.
    pub fn raw(&self) -> &[u8] {
        &self.memory
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    pub fn read_byte(&mut self, address: u16) -> u8 {
        let trap = self.flags[address as usize].trap;
        if trap == 0 {
            self.memory[address as usize]
        } else {
            let slot = self.slots[trap as usize].as_mut().expect("trap flag without handler");
            slot.handler.read(address)
        }
    }

    pub fn write_byte(&mut self, address: u16, value: u8) {
        let trap = self.flags[address as usize].trap;
        if trap == 0 {
            self.memory[address as usize] = value;
        } else {
            let slot = self.slots[trap as usize].as_mut().expect("trap flag without handler");
            let stored = slot.handler.write(address, value);
            self.memory[address as usize] = stored;
        }
    }

    /// Big-endian word read, composed from two trapped byte reads.
    pub fn read_word(&mut self, address: u16) -> u16 {
        let hi = self.read_byte(address);
        let lo = self.read_byte(address.wrapping_add(1));
        u16::from_be_bytes([hi, lo])
    }

    pub fn write_word(&mut self, address: u16, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.write_byte(address, hi);
        self.write_byte(address.wrapping_add(1), lo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDevice {
        reads: u32,
        writes: u32,
        last_write: u8,
    }

    impl TrapHandler for CountingDevice {
        fn read(&mut self, _address: u16) -> u8 {
            self.reads += 1;
            0x42
        }

        fn write(&mut self, _address: u16, value: u8) -> u8 {
            self.writes += 1;
            self.last_write = value;
            value
        }
    }

    #[test]
    fn untrapped_addresses_use_raw_memory() {
        let mut bus = Bus::new();
        bus.write_byte(0x1000, 0xAB);
        assert_eq!(bus.read_byte(0x1000), 0xAB);
    }

    #[test]
    fn trapped_address_routes_through_handler() {
        let mut bus = Bus::new();
        let slot = bus
            .register_trap(
                [0x8400],
                Box::new(CountingDevice {
                    reads: 0,
                    writes: 0,
                    last_write: 0,
                }),
            )
            .unwrap();
        assert_eq!(bus.read_byte(0x8400), 0x42);
        bus.write_byte(0x8400, 0x99);
        bus.unregister(slot);
        // After unregistering, the same address falls back to raw memory,
        // which now holds the last trapped write's return value.
        assert_eq!(bus.read_byte(0x8400), 0x99);
    }

    #[test]
    fn word_access_is_big_endian_and_composed_from_two_byte_traps() {
        let mut bus = Bus::new();
        bus.write_word(0x2000, 0x1234);
        assert_eq!(bus.raw()[0x2000], 0x12);
        assert_eq!(bus.raw()[0x2001], 0x34);
        assert_eq!(bus.read_word(0x2000), 0x1234);
    }

    #[test]
    fn trap_table_enforces_sixteen_slot_cap() {
        let mut bus = Bus::new();
        for i in 0..(MAX_TRAP_HANDLERS as u16 - 1) {
            bus.register_trap(
                [i],
                Box::new(CountingDevice {
                    reads: 0,
                    writes: 0,
                    last_write: 0,
                }),
            )
            .unwrap();
        }
        let result = bus.register_trap(
            [999],
            Box::new(CountingDevice {
                reads: 0,
                writes: 0,
                last_write: 0,
            }),
        );
        assert_eq!(result, Err(BusError::TrapTableFull));
    }
}
