//! Run-length encoding for battery-backed RAM snapshots (§4.2, §6).
//!
//! Ported from `ti99sim`'s `compress.cpp`: a run of four or more identical
//! bytes is stored as a 16-bit big-endian tag with the high bit set and the
//! run length in the low 15 bits, followed by the single repeated byte.
//! Anything shorter is stored as a literal run: the tag (high bit clear)
//! gives the literal length, followed by that many raw bytes. Runs (and
//! literal spans) are capped at `0x7FFF` so the tag's high bit is never
//! ambiguous.

const MIN_RUN: usize = 4;
const MAX_RUN: usize = 0x7FFF;

fn run_length(data: &[u8]) -> usize {
    let Some(&first) = data.first() else {
        return 0;
    };
    let mut n = 0;
    for &b in data {
        if b != first || n >= MAX_RUN {
            break;
        }
        n += 1;
    }
    n
}

/// Compress `data` into RLE blocks. Never grows by more than 3 bytes per
/// `0x7FFF`-byte span (the testable bound from §8).
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 4 + 4);
    let mut pos = 0;
    while pos < data.len() {
        let remaining = &data[pos..];
        let run = run_length(remaining);
        if run >= MIN_RUN {
            let tag = (run as u16) | 0x8000;
            out.push((tag >> 8) as u8);
            out.push((tag & 0xFF) as u8);
            out.push(remaining[0]);
            pos += run;
            continue;
        }

        // Accumulate a literal span until we find another run of >= MIN_RUN,
        // or hit the cap.
        let mut literal_len = run.max(1);
        loop {
            if literal_len >= MAX_RUN || pos + literal_len >= data.len() {
                break;
            }
            let tail = &data[pos + literal_len..];
            let next_run = run_length(tail);
            if next_run >= MIN_RUN {
                break;
            }
            literal_len += next_run.max(1);
        }
        let literal_len = literal_len.min(MAX_RUN).min(data.len() - pos);
        let tag = literal_len as u16;
        out.push((tag >> 8) as u8);
        out.push((tag & 0xFF) as u8);
        out.extend_from_slice(&data[pos..pos + literal_len]);
        pos += literal_len;
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RleError {
    /// The block stream ended mid-tag or mid-payload.
    Truncated,
    /// A literal tag of zero, which the format never produces.
    ZeroLiteralTag,
    /// Decompressed output would exceed the caller's expected length.
    LengthMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for RleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated => write!(f, "RLE stream truncated"),
            Self::ZeroLiteralTag => write!(f, "invalid RLE block: zero-length literal tag"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "RLE output length {actual} != expected {expected}")
            }
        }
    }
}

impl std::error::Error for RleError {}

/// Decompress exactly `expected_len` bytes from an RLE stream produced by
/// [`compress`].
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>, RleError> {
    let mut out = Vec::with_capacity(expected_len);
    let mut pos = 0;
    while out.len() < expected_len {
        if pos + 2 > data.len() {
            return Err(RleError::Truncated);
        }
        let tag = u16::from_be_bytes([data[pos], data[pos + 1]]);
        pos += 2;
        if tag & 0x8000 != 0 {
            let count = (tag & 0x7FFF) as usize;
            let &byte = data.get(pos).ok_or(RleError::Truncated)?;
            pos += 1;
            out.resize(out.len() + count, byte);
        } else {
            if tag == 0 {
                return Err(RleError::ZeroLiteralTag);
            }
            let count = tag as usize;
            let end = pos + count;
            let chunk = data.get(pos..end).ok_or(RleError::Truncated)?;
            out.extend_from_slice(chunk);
            pos = end;
        }
    }
    if out.len() != expected_len {
        return Err(RleError::LengthMismatch {
            expected: expected_len,
            actual: out.len(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_runs_and_literals() {
        let mut data = vec![0u8; 10]; // a run
        data.extend_from_slice(b"hello world"); // literal span
        data.extend(std::iter::repeat_n(0xAAu8, 300)); // long run > 255
        data.push(1);
        data.push(2);

        let compressed = compress(&data);
        let decompressed = decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn round_trips_all_zero_bank() {
        let data = vec![0u8; 8192];
        let compressed = compress(&data);
        assert!(compressed.len() < data.len());
        let decompressed = decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn compressed_length_bound_holds() {
        // Worst case: no run is ever >= MIN_RUN, so it's one big literal
        // tag per 0x7FFF-byte span plus its 2-byte tag.
        let data: Vec<u8> = (0..0x10000u32).map(|i| (i % 251) as u8).collect();
        let compressed = compress(&data);
        let bound = data.len() + (data.len().div_ceil(MAX_RUN)) * 3;
        assert!(compressed.len() <= bound);
    }

    #[test]
    fn rejects_truncated_stream() {
        let bad = [0x80u8]; // tag byte missing its low byte
        assert_eq!(decompress(&bad, 4), Err(RleError::Truncated));
    }
}
