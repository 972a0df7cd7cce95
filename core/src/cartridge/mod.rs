//! Versioned cartridge container (§4.1, §4.2, §6).
//!
//! A cartridge owns two parallel arrays of [`MemoryRegion`]: 16 CPU 4 KiB
//! slots covering `0x0000..=0xFFFF`, and 8 GROM 8 KiB slots covering the
//! same range in GROM address space. Loading recognizes the three on-disk
//! versions in `format.rs`; saving always emits the current (v2) format,
//! matching `cartridge.cpp`'s `LoadImage`/`SaveImage`.

mod format;
pub mod region;

use std::fmt;
use std::path::{Path, PathBuf};

pub use region::{Bank, BankType, MemoryRegion, CPU_BANK_SIZE, GROM_BANK_SIZE, NUM_CPU_REGIONS, NUM_GROM_REGIONS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartridgeError {
    FileNotFound,
    BadBanner,
    BadVersion(u8),
    BadBankType,
    BadCompressedData,
    InvalidRegionIndex(u8),
    Truncated,
}

impl fmt::Display for CartridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound => write!(f, "cartridge file not found"),
            Self::BadBanner => write!(f, "missing or corrupt cartridge banner"),
            Self::BadVersion(v) => write!(f, "unrecognized cartridge version marker 0x{v:02X}"),
            Self::BadBankType => write!(f, "unrecognized bank type byte"),
            Self::BadCompressedData => write!(f, "corrupt compressed bank data"),
            Self::InvalidRegionIndex(i) => write!(f, "region index {i} out of range"),
            Self::Truncated => write!(f, "cartridge file truncated"),
        }
    }
}

impl std::error::Error for CartridgeError {}

pub struct Cartridge {
    title: String,
    base_cru: u16,
    cpu_regions: Vec<MemoryRegion>,
    grom_regions: Vec<MemoryRegion>,
    ram_path: Option<PathBuf>,
}

impl Cartridge {
    /// Builds a cartridge directly from its region arrays, bypassing file
    /// I/O. Used by tooling that constructs cartridges programmatically and
    /// by tests.
    pub fn from_regions(
        title: impl Into<String>,
        base_cru: u16,
        cpu_regions: Vec<MemoryRegion>,
        grom_regions: Vec<MemoryRegion>,
    ) -> Self {
        Self {
            title: title.into(),
            base_cru,
            cpu_regions,
            grom_regions,
            ram_path: None,
        }
    }

    /// Loads a cartridge from a `.ctg` file and replays its `.ram` sidecar
    /// (if any) over battery-backed banks.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CartridgeError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|_| CartridgeError::FileNotFound)?;

        let (title, rest) = format::parse_banner(&data)?;
        let version = *rest.first().ok_or(CartridgeError::Truncated)?;
        let body = &rest[1..];

        let loaded = if version & 0x80 != 0 {
            // v0 pushes the tag byte back into the stream: reparse `rest`
            // (the version byte we peeked IS the first record's tag).
            format::load_v0(title, rest)?
        } else {
            match version & 0xF0 {
                0x10 => format::load_v1(title, body)?,
                0x20 => format::load_v2(title, body)?,
                _ => return Err(CartridgeError::BadVersion(version)),
            }
        };

        let mut cart = Self {
            title: loaded.title,
            base_cru: loaded.base_cru,
            cpu_regions: loaded.cpu_regions,
            grom_regions: loaded.grom_regions,
            ram_path: ram_sidecar_path(path),
        };
        cart.load_ram();
        Ok(cart)
    }

    /// Saves the cartridge in the current (v2) container format. Does not
    /// touch the `.ram` sidecar; that's synced separately via [`Self::save_ram`]
    /// or dropped automatically via [`Drop`].
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), CartridgeError> {
        let path = path.as_ref();
        let bytes = format::save_v2(&self.title, self.base_cru, &self.cpu_regions, &self.grom_regions);
        std::fs::write(path, bytes).map_err(|_| CartridgeError::Truncated)?;
        self.ram_path = ram_sidecar_path(path);
        Ok(())
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn base_cru(&self) -> u16 {
        self.base_cru
    }

    pub fn is_valid(&self) -> bool {
        self.cpu_regions.iter().any(|r| !r.is_empty()) || self.grom_regions.iter().any(|r| !r.is_empty())
    }

    pub fn cpu_region(&self, index: usize) -> Option<&MemoryRegion> {
        self.cpu_regions.get(index)
    }

    pub fn cpu_region_mut(&mut self, index: usize) -> Option<&mut MemoryRegion> {
        self.cpu_regions.get_mut(index)
    }

    pub fn grom_region(&self, index: usize) -> Option<&MemoryRegion> {
        self.grom_regions.get(index)
    }

    pub fn grom_region_mut(&mut self, index: usize) -> Option<&mut MemoryRegion> {
        self.grom_regions.get_mut(index)
    }

    fn load_ram(&mut self) {
        let Some(path) = &self.ram_path else { return };
        let Ok(data) = std::fs::read(path) else { return };
        let mut pos = 0;
        for region in self.cpu_regions.iter_mut().chain(self.grom_regions.iter_mut()) {
            for bank in region.banks.iter_mut() {
                if bank.kind != BankType::BatteryBacked {
                    continue;
                }
                let Ok(raw) = super::codec::rle::decompress(&data[pos..], bank.data.len()) else {
                    return;
                };
                pos += rle_consumed_len(&data[pos..], bank.data.len());
                bank.data.copy_from_slice(&raw);
            }
        }
    }

    /// Writes battery-backed banks to the `.ram` sidecar, or removes it if
    /// every battery-backed byte is zero.
    pub fn save_ram(&self) {
        let Some(path) = &self.ram_path else { return };

        let banks: Vec<&Bank> = self
            .cpu_regions
            .iter()
            .chain(self.grom_regions.iter())
            .flat_map(|r| r.banks.iter())
            .filter(|b| b.kind == BankType::BatteryBacked)
            .collect();

        if banks.is_empty() || banks.iter().all(|b| b.data.iter().all(|&b| b == 0)) {
            let _ = std::fs::remove_file(path);
            return;
        }

        let mut out = Vec::new();
        for bank in banks {
            out.extend_from_slice(&super::codec::rle::compress(&bank.data));
        }
        let _ = std::fs::write(path, out);
    }
}

impl Drop for Cartridge {
    fn drop(&mut self) {
        self.save_ram();
    }
}

fn rle_consumed_len(data: &[u8], expected_len: usize) -> usize {
    let mut pos = 0;
    let mut produced = 0;
    while produced < expected_len && pos + 2 <= data.len() {
        let tag = u16::from_be_bytes([data[pos], data[pos + 1]]);
        pos += 2;
        if tag & 0x8000 != 0 {
            produced += (tag & 0x7FFF) as usize;
            pos += 1;
        } else {
            produced += tag as usize;
            pos += tag as usize;
        }
    }
    pos
}

/// `<basename>.ram` under the user-state directory, mirroring
/// `cCartridge::SetFileName`'s `m_RamFileName` derivation.
fn ram_sidecar_path(cartridge_path: &Path) -> Option<PathBuf> {
    let stem = cartridge_path.file_stem()?.to_string_lossy().into_owned();
    let state_dir = dirs::data_dir()?.join("ti99sim");
    let _ = std::fs::create_dir_all(&state_dir);
    Some(state_dir.join(format!("{stem}.ram")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cartridge() -> Cartridge {
        let mut cpu_regions = vec![MemoryRegion::default(); NUM_CPU_REGIONS];
        cpu_regions[6] = MemoryRegion {
            banks: vec![Bank {
                kind: BankType::Rom,
                data: (0..CPU_BANK_SIZE).map(|i| (i % 251) as u8).collect(),
            }],
            current_bank: 0,
        };
        Cartridge {
            title: "TEST CART".to_string(),
            base_cru: 0x1000,
            cpu_regions,
            grom_regions: vec![MemoryRegion::default(); NUM_GROM_REGIONS],
            ram_path: None,
        }
    }

    #[test]
    fn round_trips_through_v2_save_and_load() {
        let mut cart = sample_cartridge();
        let dir = std::env::temp_dir().join("ti99_cartridge_roundtrip_test");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("test.ctg");

        cart.save(&path).unwrap();
        let reloaded = Cartridge::load(&path).unwrap();

        assert_eq!(reloaded.title(), "TEST CART");
        assert_eq!(reloaded.base_cru(), 0x1000);
        assert_eq!(
            reloaded.cpu_region(6).unwrap().current().unwrap().data,
            cart.cpu_regions[6].banks[0].data
        );
        assert!(reloaded.is_valid());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_cartridge_is_invalid() {
        let cart = Cartridge {
            title: "EMPTY".to_string(),
            base_cru: 0,
            cpu_regions: vec![MemoryRegion::default(); NUM_CPU_REGIONS],
            grom_regions: vec![MemoryRegion::default(); NUM_GROM_REGIONS],
            ram_path: None,
        };
        assert!(!cart.is_valid());
    }

    #[test]
    fn rejects_bad_banner() {
        let bytes = vec![0u8; 100];
        let dir = std::env::temp_dir().join("ti99_cartridge_bad_banner_test");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("bad.ctg");
        std::fs::write(&path, &bytes).unwrap();

        let err = Cartridge::load(&path).unwrap_err();
        assert_eq!(err, CartridgeError::BadBanner);

        let _ = std::fs::remove_file(&path);
    }
}
