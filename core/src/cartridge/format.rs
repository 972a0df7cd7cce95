//! On-disk cartridge container versions (§4.2, §6).
//!
//! Grounded on `cartridge.cpp`'s `LoadImageV0`/`V1`/`V2` and `SaveImage`: the
//! banner, version byte, and per-region/per-bank record layout are carried
//! over exactly. V2 (the only version we can write) framing matches the
//! `SaveBufferLZW`/`LoadBufferLZW` fallback-to-uncompressed escape.

use std::io::{Cursor, Read};

use crate::codec::{lzw, rle};

use super::region::{Bank, BankType, MemoryRegion, CPU_BANK_SIZE, GROM_BANK_SIZE, NUM_CPU_REGIONS, NUM_GROM_REGIONS};
use super::CartridgeError;

pub const BANNER_PREFIX: &str = "TI-99/4A Module - ";
pub const BANNER_LEN: usize = 80;
pub const CURRENT_VERSION: u8 = 0x20;

pub struct Loaded {
    pub title: String,
    pub base_cru: u16,
    pub cpu_regions: Vec<MemoryRegion>,
    pub grom_regions: Vec<MemoryRegion>,
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, CartridgeError> {
    let mut b = [0u8; 1];
    cur.read_exact(&mut b).map_err(|_| CartridgeError::Truncated)?;
    Ok(b[0])
}

fn region_slot(index: u8) -> Result<(bool, usize), CartridgeError> {
    if (index as usize) < NUM_CPU_REGIONS {
        Ok((false, index as usize))
    } else if (index as usize) < NUM_CPU_REGIONS + NUM_GROM_REGIONS {
        Ok((true, index as usize - NUM_CPU_REGIONS))
    } else {
        Err(CartridgeError::InvalidRegionIndex(index))
    }
}

pub fn parse_banner(data: &[u8]) -> Result<(String, &[u8]), CartridgeError> {
    if data.len() < BANNER_LEN {
        return Err(CartridgeError::Truncated);
    }
    let (banner, rest) = data.split_at(BANNER_LEN);
    if !banner.starts_with(BANNER_PREFIX.as_bytes()) {
        return Err(CartridgeError::BadBanner);
    }
    let tail = &banner[BANNER_PREFIX.len()..];
    let end = tail.iter().position(|&b| b == b'\n').unwrap_or(tail.len());
    let title = String::from_utf8_lossy(&tail[..end]).into_owned();
    Ok((title, rest))
}

/// Version 0: tag-oriented, high bit of the tag byte always set. The low 6
/// bits are the region index; bit 6 marks a DSR cartridge carrying an
/// inline CRU base.
pub fn load_v0(title: String, data: &[u8]) -> Result<Loaded, CartridgeError> {
    let mut cur = Cursor::new(data);
    let mut cpu_regions = vec![MemoryRegion::default(); NUM_CPU_REGIONS];
    let mut grom_regions = vec![MemoryRegion::default(); NUM_GROM_REGIONS];
    let mut base_cru = 0u16;

    let mut next_tag = read_u8(&mut cur);
    while let Ok(tag) = next_tag {
        let dsr = tag & 0x40 != 0;
        let index = tag & 0x3F;
        let (is_grom, slot) = region_slot(index)?;
        let bank_size = if is_grom { GROM_BANK_SIZE } else { CPU_BANK_SIZE };

        if dsr {
            let hi = read_u8(&mut cur)?;
            let lo = read_u8(&mut cur)?;
            base_cru = u16::from_be_bytes([hi, lo]);
        }

        let kind = BankType::from_byte(read_u8(&mut cur)?).ok_or(CartridgeError::BadBankType)?;
        let num_banks = read_u8(&mut cur)? as usize;
        let mut sizes = [0u16; 4];
        for s in sizes.iter_mut() {
            let hi = read_u8(&mut cur)?;
            let lo = read_u8(&mut cur)?;
            *s = u16::from_be_bytes([hi, lo]);
        }

        let mut region = MemoryRegion::default();
        for i in 0..num_banks {
            let mut bank = Bank {
                kind,
                data: vec![0u8; bank_size],
            };
            if kind == BankType::Rom {
                let compressed_len = sizes[i] as usize;
                let mut compressed = vec![0u8; compressed_len];
                cur.read_exact(&mut compressed).map_err(|_| CartridgeError::Truncated)?;
                let raw = rle::decompress(&compressed, bank_size)
                    .map_err(|_| CartridgeError::BadCompressedData)?;
                bank.data.copy_from_slice(&raw);
            }
            region.banks.push(bank);
        }

        if is_grom {
            grom_regions[slot] = region;
        } else {
            cpu_regions[slot] = region;
        }

        next_tag = read_u8(&mut cur);
    }

    Ok(Loaded {
        title,
        base_cru,
        cpu_regions,
        grom_regions,
    })
}

/// Version 1: index-oriented, RLE-compressed data, region size implied by
/// the index range rather than an explicit size table.
pub fn load_v1(title: String, data: &[u8]) -> Result<Loaded, CartridgeError> {
    let mut cur = Cursor::new(data);
    let mut cpu_regions = vec![MemoryRegion::default(); NUM_CPU_REGIONS];
    let mut grom_regions = vec![MemoryRegion::default(); NUM_GROM_REGIONS];

    let hi = read_u8(&mut cur)?;
    let lo = read_u8(&mut cur)?;
    let base_cru = u16::from_be_bytes([hi, lo]);

    let mut next_index = read_u8(&mut cur);
    while let Ok(index) = next_index {
        let (is_grom, slot) = region_slot(index)?;
        let bank_size = if is_grom { GROM_BANK_SIZE } else { CPU_BANK_SIZE };

        let num_banks = read_u8(&mut cur)? as usize;
        let mut region = MemoryRegion::default();
        for _ in 0..num_banks {
            let kind = BankType::from_byte(read_u8(&mut cur)?).ok_or(CartridgeError::BadBankType)?;
            let mut bank = Bank {
                kind,
                data: vec![0u8; bank_size],
            };
            if kind == BankType::Rom {
                // Length isn't stored for v1; the RLE stream self-terminates
                // once `bank_size` bytes have been produced.
                let remaining = &data[cur.position() as usize..];
                let raw = rle::decompress(remaining, bank_size).map_err(|_| CartridgeError::BadCompressedData)?;
                bank.data.copy_from_slice(&raw);
                let consumed = rle_consumed(remaining, bank_size)?;
                cur.set_position(cur.position() + consumed as u64);
            }
            region.banks.push(bank);
        }

        if is_grom {
            grom_regions[slot] = region;
        } else {
            cpu_regions[slot] = region;
        }

        next_index = read_u8(&mut cur);
    }

    Ok(Loaded {
        title,
        base_cru,
        cpu_regions,
        grom_regions,
    })
}

/// Re-walks an RLE stream purely to discover how many input bytes a
/// `decompress` call of the given output length actually consumed, since
/// `rle::decompress` reports only the decoded bytes.
fn rle_consumed(data: &[u8], expected_len: usize) -> Result<usize, CartridgeError> {
    let mut pos = 0;
    let mut produced = 0;
    while produced < expected_len {
        if pos + 2 > data.len() {
            return Err(CartridgeError::Truncated);
        }
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
    Ok(pos)
}

/// Version 2 (current): index-oriented, per-bank LZW-compressed data with
/// an uncompressed-fallback escape.
pub fn load_v2(title: String, data: &[u8]) -> Result<Loaded, CartridgeError> {
    let mut cur = Cursor::new(data);
    let mut cpu_regions = vec![MemoryRegion::default(); NUM_CPU_REGIONS];
    let mut grom_regions = vec![MemoryRegion::default(); NUM_GROM_REGIONS];

    let hi = read_u8(&mut cur)?;
    let lo = read_u8(&mut cur)?;
    let base_cru = u16::from_be_bytes([hi, lo]);

    let mut next_index = read_u8(&mut cur);
    while let Ok(index) = next_index {
        let (is_grom, slot) = region_slot(index)?;
        let bank_size = if is_grom { GROM_BANK_SIZE } else { CPU_BANK_SIZE };

        let num_banks = read_u8(&mut cur)? as usize;
        let mut region = MemoryRegion::default();
        for _ in 0..num_banks {
            let kind = BankType::from_byte(read_u8(&mut cur)?).ok_or(CartridgeError::BadBankType)?;
            let mut bank = Bank {
                kind,
                data: vec![0u8; bank_size],
            };
            if kind == BankType::Rom {
                let hi = read_u8(&mut cur)?;
                let lo = read_u8(&mut cur)?;
                let tagged = u16::from_be_bytes([hi, lo]) as usize;
                if tagged & 0x8000 != 0 {
                    let len = tagged & 0x7FFF;
                    let mut raw = vec![0u8; len];
                    cur.read_exact(&mut raw).map_err(|_| CartridgeError::Truncated)?;
                    bank.data[..len.min(bank_size)].copy_from_slice(&raw[..len.min(bank_size)]);
                } else {
                    let len = tagged;
                    let mut compressed = vec![0u8; len];
                    cur.read_exact(&mut compressed).map_err(|_| CartridgeError::Truncated)?;
                    let mut out = Vec::with_capacity(bank_size);
                    lzw::decode(&compressed, 15, 4096, |chunk| {
                        out.extend_from_slice(chunk);
                        true
                    })
                    .map_err(|_| CartridgeError::BadCompressedData)?;
                    if out.len() != bank_size {
                        return Err(CartridgeError::BadCompressedData);
                    }
                    bank.data.copy_from_slice(&out);
                }
            }
            region.banks.push(bank);
        }

        if is_grom {
            grom_regions[slot] = region;
        } else {
            cpu_regions[slot] = region;
        }

        next_index = read_u8(&mut cur);
    }

    Ok(Loaded {
        title,
        base_cru,
        cpu_regions,
        grom_regions,
    })
}

/// Writes the 80-byte banner, version byte, base CRU, and every non-empty
/// region in canonical order. Always emits v2 (the current format).
pub fn save_v2(
    title: &str,
    base_cru: u16,
    cpu_regions: &[MemoryRegion],
    grom_regions: &[MemoryRegion],
) -> Vec<u8> {
    let mut out = Vec::new();

    let mut banner = vec![0u8; BANNER_LEN];
    let text = format!("{BANNER_PREFIX}{title}\n\x1A");
    let n = text.len().min(BANNER_LEN);
    banner[..n].copy_from_slice(&text.as_bytes()[..n]);
    out.extend_from_slice(&banner);

    out.push(CURRENT_VERSION);
    out.extend_from_slice(&base_cru.to_be_bytes());

    for (i, region) in cpu_regions.iter().enumerate() {
        if region.is_empty() {
            continue;
        }
        out.push(i as u8);
        write_region(&mut out, region);
    }
    for (i, region) in grom_regions.iter().enumerate() {
        if region.is_empty() {
            continue;
        }
        out.push((NUM_CPU_REGIONS + i) as u8);
        write_region(&mut out, region);
    }

    out
}

fn write_region(out: &mut Vec<u8>, region: &MemoryRegion) {
    out.push(region.banks.len() as u8);
    for bank in &region.banks {
        out.push(bank.kind.to_byte());
        if bank.kind == BankType::Rom {
            let mut compressed = Vec::with_capacity(bank.data.len());
            lzw::encode(&bank.data, 15, |chunk| {
                compressed.extend_from_slice(chunk);
                true
            });
            if compressed.len() >= bank.data.len() {
                let tagged = 0x8000u16 | bank.data.len() as u16;
                out.extend_from_slice(&tagged.to_be_bytes());
                out.extend_from_slice(&bank.data);
            } else {
                out.extend_from_slice(&(compressed.len() as u16).to_be_bytes());
                out.extend_from_slice(&compressed);
            }
        }
    }
}
