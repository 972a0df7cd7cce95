//! Miller/Biphase-Mark WAV cassette demodulator (§3, §4.8).
//!
//! A little-endian RIFF/WAVE PCM recording is reduced to flat track bytes in
//! three passes: [`locate_tracks`] finds HEADER/DATA sections by rolling
//! zero-crossing variance, [`extract_bits`] demodulates a section into a
//! `0`/`1` cell stream, and [`frame_track`] regroups that stream into
//! checksummed 64-byte records.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CassetteError {
    NotRiff,
    MissingFmtChunk,
    MissingDataChunk,
    UnsupportedFormat(u16),
    UnsupportedChannels(u16),
    UnsupportedBitsPerSample(u16),
    Truncated,
}

impl fmt::Display for CassetteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRiff => write!(f, "not a RIFF/WAVE file"),
            Self::MissingFmtChunk => write!(f, "missing 'fmt ' chunk"),
            Self::MissingDataChunk => write!(f, "missing 'data' chunk"),
            Self::UnsupportedFormat(tag) => write!(f, "unsupported WAVE format tag {tag}"),
            Self::UnsupportedChannels(n) => write!(f, "unsupported channel count {n}"),
            Self::UnsupportedBitsPerSample(bits) => write!(f, "unsupported sample width {bits}"),
            Self::Truncated => write!(f, "truncated RIFF chunk"),
        }
    }
}

impl std::error::Error for CassetteError {}

/// A contiguous region of the sample stream carrying tape data, with the
/// cell period statistics measured over its preamble (§3, `Section`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub start: usize,
    pub end: usize,
    pub period: f64,
    pub min_period: f64,
    pub max_period: f64,
}

/// 64 decoded payload bytes plus the trailing checksum byte (§3, `Chunk`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: [u8; 64],
    pub checksum: u8,
}

struct WavFormat {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    block_align: u16,
}

/// First-channel-only samples pulled from a `data` chunk, centered near zero.
pub struct Samples {
    pub sample_rate: u32,
    pub values: Vec<f64>,
}

/// Parses a RIFF/WAVE PCM file, keeping only the first channel (§6).
pub fn parse_wav(bytes: &[u8]) -> Result<Samples, CassetteError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(CassetteError::NotRiff);
    }

    let mut pos = 12;
    let mut format: Option<WavFormat> = None;
    let mut data: Option<&[u8]> = None;

    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let body_start = pos + 8;
        let body_end = body_start.checked_add(size).ok_or(CassetteError::Truncated)?;
        if body_end > bytes.len() {
            return Err(CassetteError::Truncated);
        }
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                if body.len() < 16 {
                    return Err(CassetteError::Truncated);
                }
                let audio_format = u16::from_le_bytes([body[0], body[1]]);
                let channels = u16::from_le_bytes([body[2], body[3]]);
                let sample_rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                let block_align = u16::from_le_bytes([body[12], body[13]]);
                let bits_per_sample = u16::from_le_bytes([body[14], body[15]]);
                if audio_format != 1 {
                    return Err(CassetteError::UnsupportedFormat(audio_format));
                }
                if channels == 0 || channels > 2 {
                    return Err(CassetteError::UnsupportedChannels(channels));
                }
                format = Some(WavFormat { channels, sample_rate, bits_per_sample, block_align });
            }
            b"data" => data = Some(body),
            _ => {}
        }

        pos = body_end + (size & 1);
    }

    let format = format.ok_or(CassetteError::MissingFmtChunk)?;
    let data = data.ok_or(CassetteError::MissingDataChunk)?;

    let bytes_per_sample = (format.bits_per_sample / 8) as usize;
    if !matches!(bytes_per_sample, 1 | 2 | 4) {
        return Err(CassetteError::UnsupportedBitsPerSample(format.bits_per_sample));
    }
    let block_align = (format.block_align as usize).max(bytes_per_sample * format.channels as usize);

    let mut values = Vec::with_capacity(data.len() / block_align.max(1));
    let mut offset = 0;
    while offset + bytes_per_sample <= data.len() {
        let sample = &data[offset..offset + bytes_per_sample];
        let value = match bytes_per_sample {
            1 => sample[0] as f64 - 128.0,
            2 => i16::from_le_bytes([sample[0], sample[1]]) as f64,
            4 => i32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]) as f64,
            _ => unreachable!(),
        };
        values.push(value);
        offset += block_align;
    }

    Ok(Samples { sample_rate: format.sample_rate, values })
}

/// Walks `samples`, returning the distance (in samples) to the next
/// crossing of `bias`, carrying fractional sub-sample position forward.
struct CrossingScanner {
    pos: usize,
    last_value: f64,
    last_distance: f64,
}

impl CrossingScanner {
    fn new(samples: &[f64]) -> Self {
        Self {
            pos: 0,
            last_value: samples.first().copied().unwrap_or(0.0),
            last_distance: 0.0,
        }
    }

    fn next_crossing(&mut self, samples: &[f64], bias: f64) -> Option<f64> {
        let start = self.pos;
        let mut value = 0.0;
        if self.last_value < bias {
            loop {
                if self.pos >= samples.len() {
                    return None;
                }
                value = samples[self.pos];
                self.pos += 1;
                if value > bias + 1.0 {
                    break;
                }
                self.last_value = value;
            }
        } else {
            loop {
                if self.pos >= samples.len() {
                    return None;
                }
                value = samples[self.pos];
                self.pos += 1;
                if value < bias - 1.0 {
                    break;
                }
                self.last_value = value;
            }
        }

        let fraction = -(self.last_value - bias) / (value - self.last_value);
        let distance = self.last_distance + (self.pos - start) as f64 - 1.0 + fraction;
        self.last_distance = 1.0 - fraction;
        self.last_value = value;
        Some(distance)
    }
}

const GROUPING_SIZE: usize = 50;
const HEADER_SIZE: usize = 8 * 0x300;
const HEADER_THRESHOLD: usize = 3 * HEADER_SIZE / 5;

#[derive(PartialEq)]
enum Stage {
    Unknown,
    Header,
    Data,
}

/// Rolling-variance track locator (§4.8 pass 1).
pub fn locate_tracks(samples: &[f64]) -> Vec<Section> {
    let mut scanner = CrossingScanner::new(samples);
    let mut stage = Stage::Unknown;
    let mut sections = Vec::new();
    // (threshold, avg period, min period, max period) per 50-sample group.
    let mut preamble: Vec<(f64, f64, f64, f64)> = Vec::new();
    let mut bad = 0u32;
    let mut section_start = 0usize;

    loop {
        let group_start = scanner.pos;
        let mut sum = 0.0;
        let mut squares = 0.0;
        let mut min_period = f64::MAX;
        let mut max_period = f64::MIN;
        let mut complete = true;

        for _ in 0..GROUPING_SIZE {
            match scanner.next_crossing(samples, 0.0) {
                Some(dist) => {
                    min_period = min_period.min(dist);
                    max_period = max_period.max(dist);
                    sum += dist;
                    squares += dist * dist;
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            break;
        }

        let avg = sum / GROUPING_SIZE as f64;
        let var = squares / GROUPING_SIZE as f64 - avg * avg;
        let threshold = var / (avg * avg);

        match stage {
            Stage::Unknown => {
                if threshold < 0.005 {
                    stage = Stage::Header;
                    section_start = group_start;
                    bad = 0;
                    preamble.clear();
                    preamble.push((threshold, avg, min_period, max_period));
                }
            }
            Stage::Header => {
                if threshold < 0.005 {
                    preamble.push((threshold, avg, min_period, max_period));
                } else if threshold < 0.5 {
                    if preamble.len() > HEADER_THRESHOLD / GROUPING_SIZE {
                        stage = Stage::Data;
                        bad = 0;
                    }
                    // Otherwise: noise or a too-short header. Keep accumulating.
                } else {
                    stage = Stage::Unknown;
                }
            }
            Stage::Data => {
                if threshold < 0.5 {
                    bad = 0;
                } else {
                    bad += 1;
                    if bad > 1 {
                        sections.push(store_section(&mut preamble, section_start, scanner.pos));
                        stage = Stage::Unknown;
                    }
                }
            }
        }
    }

    if stage == Stage::Data {
        sections.push(store_section(&mut preamble, section_start, scanner.pos));
    }

    sections
}

fn store_section(preamble: &mut [(f64, f64, f64, f64)], start: usize, end: usize) -> Section {
    preamble.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap()
            .then_with(|| a.2.partial_cmp(&b.2).unwrap())
            .then_with(|| b.3.partial_cmp(&a.3).unwrap())
    });

    let mut min_period = preamble.first().map(|p| p.1).unwrap_or(0.0);
    let mut max_period = min_period;
    let mut period_sum = 0.0;
    let mut period_count = 0usize;

    for p in preamble.iter() {
        if p.0 > 0.002 {
            break;
        }
        if p.2 < min_period {
            min_period = p.2;
        }
        if p.3 > max_period {
            max_period = p.3;
        }
        period_sum += p.1;
        period_count += 1;
    }

    let period = if period_count > 0 { period_sum / period_count as f64 } else { 0.0 };
    Section { start, end, period, min_period, max_period }
}

/// Demodulates one section into a `0`/`1` cell stream (§4.8 pass 2).
pub fn extract_bits(samples: &[f64], section: &Section) -> Vec<i8> {
    let slice = &samples[section.start.min(samples.len())..section.end.min(samples.len())];
    if slice.is_empty() {
        return Vec::new();
    }

    let period = section.period;
    let mut min_period = section.min_period;
    let max_period = section.max_period;
    if min_period <= period / 2.0 {
        min_period = period - (max_period - period);
    }

    let min_per = min_period * 0.90;
    let max_per = max_period * 1.10;
    let mut zero = period * 0.80;
    if min_per < zero {
        zero = min_per;
    }

    let bias = slice.iter().sum::<f64>() / slice.len() as f64;

    let mut scanner = CrossingScanner::new(slice);
    let mut residual = 0.0;
    let mut bits = Vec::new();

    while let Some(bit) = read_bit(&mut scanner, slice, bias, min_per, max_per, zero, &mut residual) {
        bits.push(bit);
    }

    bits
}

#[allow(clippy::too_many_arguments)]
fn read_bit(
    scanner: &mut CrossingScanner,
    samples: &[f64],
    bias: f64,
    min_per: f64,
    max_per: f64,
    zero: f64,
    residual: &mut f64,
) -> Option<i8> {
    let mut distance = *residual;
    let mut distances = vec![*residual];

    while distance < min_per {
        let dist = scanner.next_crossing(samples, bias)?;
        distance += dist;
        distances.push(dist);
    }

    let carry = if distance > max_per { distance - max_per } else { 0.0 };
    *residual = if carry > 2.0 * max_per { 0.0 } else { carry };

    let steps = distances.len() - 1;
    // Nine times out of ten, 3 extra crossings is DC drift: call it a '0'.
    if steps == 3 {
        return Some(0);
    }
    if *residual > 0.0 && steps == 2 {
        return Some(0);
    }

    if distances.iter().any(|&d| d >= zero) {
        Some(0)
    } else {
        Some(1)
    }
}

struct BitStream<'a> {
    bits: &'a [i8],
    pos: usize,
}

impl<'a> BitStream<'a> {
    fn get_bit(&mut self) -> Option<u8> {
        let b = *self.bits.get(self.pos)?;
        self.pos += 1;
        if b < 0 {
            None
        } else {
            Some(b as u8)
        }
    }

    fn get_byte(&mut self) -> Option<u8> {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | self.get_bit()?;
        }
        Some(byte)
    }
}

fn find_header(stream: &mut BitStream) -> Option<usize> {
    loop {
        let start = stream.pos;
        loop {
            match stream.get_bit()? {
                1 => break,
                _ => {}
            }
        }
        let mut all_ones = true;
        for _ in 1..8 {
            if stream.get_bit()? != 1 {
                all_ones = false;
                break;
            }
        }
        if all_ones {
            return Some(start);
        }
    }
}

/// Finds the next preamble: 7 (or more) zero cells followed by a 0xFF byte.
fn find_preamble(stream: &mut BitStream, budget: usize) -> Option<usize> {
    let deadline = stream.pos + budget;
    'search: loop {
        if stream.pos > deadline {
            return None;
        }
        let candidate = stream.pos;
        let mut zero_run = 0usize;
        loop {
            if stream.pos > deadline {
                return None;
            }
            match stream.get_bit()? {
                0 => zero_run += 1,
                _ => break,
            }
        }
        if zero_run < 7 {
            continue 'search;
        }
        for _ in 0..7 {
            if stream.get_bit()? != 1 {
                continue 'search;
            }
        }
        return Some(candidate);
    }
}

fn read_chunk(stream: &mut BitStream) -> Option<Chunk> {
    let mut data = [0u8; 64];
    for byte in data.iter_mut() {
        *byte = stream.get_byte()?;
    }
    let checksum = stream.get_byte()?;
    Some(Chunk { data, checksum })
}

/// Regroups a bit stream into record bytes, with checksum verification and
/// shift-search recovery on double failure (§4.8 pass 3).
pub fn frame_track(bits: &[i8]) -> Vec<u8> {
    let mut stream = BitStream { bits, pos: 0 };
    let mut output = Vec::new();

    if find_header(&mut stream).is_none() {
        return output;
    }
    let count = match (stream.get_byte(), stream.get_byte()) {
        (Some(count), Some(_repeat)) => count,
        _ => return output,
    };

    for _ in 0..count {
        let budget = stream.bits.len().saturating_sub(stream.pos);
        let Some(_) = find_preamble(&mut stream, budget) else { break };
        let primary_bits_start = stream.pos;
        let primary = read_chunk(&mut stream);
        let primary_bits_end = stream.pos;

        let budget = stream.bits.len().saturating_sub(stream.pos);
        let Some(_) = find_preamble(&mut stream, budget) else {
            if let Some(chunk) = primary.filter(|c| checksum_ok(c)) {
                output.extend_from_slice(&chunk.data);
            }
            break;
        };
        let secondary_bits_start = stream.pos;
        let secondary = read_chunk(&mut stream);

        match (primary.filter(|c| checksum_ok(c)), secondary.filter(|c| checksum_ok(c))) {
            (Some(chunk), _) => output.extend_from_slice(&chunk.data),
            (None, Some(chunk)) => output.extend_from_slice(&chunk.data),
            (None, None) => {
                let recovered = recover_chunk(
                    &stream.bits[primary_bits_start..primary_bits_end],
                    &stream.bits[secondary_bits_start..stream.pos],
                );
                if let Some(chunk) = recovered {
                    output.extend_from_slice(&chunk.data);
                }
            }
        }
    }

    output
}

fn checksum_ok(chunk: &Chunk) -> bool {
    let sum: u32 = chunk.data.iter().map(|&b| b as u32).sum();
    (sum & 0xFF) as u8 == chunk.checksum
}

/// Best-effort recovery: shift one copy against the other in `[-8, 8]` bit
/// steps, keep the alignment with the most agreeing bits, and merge.
fn recover_chunk(primary_bits: &[i8], secondary_bits: &[i8]) -> Option<Chunk> {
    let span = 65 * 8; // 64 data bytes + 1 checksum byte.
    let mut best_shift = 0i32;
    let mut best_matches = -1i32;

    for shift in -8i32..=8 {
        let mut matches = 0i32;
        let mut total = 0i32;
        for i in 0..span as i32 {
            let j = i + shift;
            if j < 0 {
                continue;
            }
            let (Some(&a), Some(&b)) =
                (primary_bits.get(i as usize), secondary_bits.get(j as usize))
            else {
                continue;
            };
            if a < 0 || b < 0 {
                continue;
            }
            total += 1;
            if a == b {
                matches += 1;
            }
        }
        if total > 0 && matches > best_matches {
            best_matches = matches;
            best_shift = shift;
        }
    }

    if best_matches < 0 {
        return None;
    }

    let mut merged = vec![0i8; span];
    for (i, slot) in merged.iter_mut().enumerate() {
        let j = i as i32 + best_shift;
        let primary = primary_bits.get(i).copied().filter(|&b| b >= 0);
        let secondary = if j >= 0 { secondary_bits.get(j as usize).copied().filter(|&b| b >= 0) } else { None };
        *slot = primary.or(secondary).unwrap_or(0);
    }

    let mut stream = BitStream { bits: &merged, pos: 0 };
    read_chunk(&mut stream)
}

/// Decodes every recoverable track from a RIFF/WAVE PCM cassette recording.
pub fn decode_wav(bytes: &[u8]) -> Result<Vec<Vec<u8>>, CassetteError> {
    let samples = parse_wav(bytes)?;
    let sections = locate_tracks(&samples.values);
    Ok(sections
        .iter()
        .map(|section| {
            let bits = extract_bits(&samples.values, section);
            frame_track(&bits)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bits() -> Vec<i8> {
        let mut bits = vec![0i8; HEADER_SIZE];
        bits.extend(std::iter::repeat(1).take(8)); // 0xFF
        bits
    }

    fn byte_bits(byte: u8) -> Vec<i8> {
        (0..8).rev().map(|i| ((byte >> i) & 1) as i8).collect()
    }

    fn chunk_bits(data: &[u8; 64]) -> Vec<i8> {
        let mut bits = Vec::new();
        bits.extend(std::iter::repeat(0).take(8));
        bits.extend(std::iter::repeat(1).take(8)); // preamble: 8 zeros + 0xFF
        for &b in data {
            bits.extend(byte_bits(b));
        }
        let checksum = data.iter().fold(0u32, |acc, &b| acc + b as u32) as u8;
        bits.extend(byte_bits(checksum));
        bits
    }

    #[test]
    fn frames_two_valid_records_into_128_bytes() {
        let mut bits = header_bits();
        bits.extend(byte_bits(2)); // record count
        bits.extend(byte_bits(2)); // repeated

        let mut record1 = [0u8; 64];
        for (i, b) in record1.iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut record2 = [0u8; 64];
        for (i, b) in record2.iter_mut().enumerate() {
            *b = (0xFF - i) as u8;
        }

        bits.extend(chunk_bits(&record1));
        bits.extend(chunk_bits(&record1));
        bits.extend(chunk_bits(&record2));
        bits.extend(chunk_bits(&record2));

        let decoded = frame_track(&bits);
        let mut expected = Vec::new();
        expected.extend_from_slice(&record1);
        expected.extend_from_slice(&record2);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn falls_back_to_secondary_copy_on_primary_checksum_failure() {
        let mut bits = header_bits();
        bits.extend(byte_bits(1));
        bits.extend(byte_bits(1));

        let mut record = [0u8; 64];
        record[0] = 0x42;

        let mut primary = chunk_bits(&record);
        // Corrupt a data bit in the primary copy so its checksum fails.
        let flip = 16; // inside the first data byte
        primary[flip] = 1 - primary[flip];

        bits.extend(primary);
        bits.extend(chunk_bits(&record));

        let decoded = frame_track(&bits);
        assert_eq!(decoded, record.to_vec());
    }

    #[test]
    fn wav_parser_extracts_first_channel_only() {
        let mut header = Vec::new();
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&0u32.to_le_bytes()); // size placeholder, unchecked
        header.extend_from_slice(b"WAVE");

        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes()); // PCM
        header.extend_from_slice(&2u16.to_le_bytes()); // stereo
        header.extend_from_slice(&8000u32.to_le_bytes());
        header.extend_from_slice(&32000u32.to_le_bytes());
        header.extend_from_slice(&4u16.to_le_bytes()); // block align
        header.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

        let samples: [(i16, i16); 3] = [(100, -100), (200, -200), (300, -300)];
        let mut data = Vec::new();
        for (left, right) in samples {
            data.extend_from_slice(&left.to_le_bytes());
            data.extend_from_slice(&right.to_le_bytes());
        }
        header.extend_from_slice(b"data");
        header.extend_from_slice(&(data.len() as u32).to_le_bytes());
        header.extend_from_slice(&data);

        let parsed = parse_wav(&header).unwrap();
        assert_eq!(parsed.sample_rate, 8000);
        assert_eq!(parsed.values, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn rejects_non_riff_input() {
        assert_eq!(parse_wav(b"not a wav file"), Err(CassetteError::NotRiff));
    }

    #[test]
    fn locate_tracks_finds_a_steady_header_then_noisy_data() {
        // A long run of evenly spaced crossings (low variance) should settle
        // into Header, then Data once the period jitters within tolerance.
        let mut samples = Vec::new();
        let period = 20.0;
        let mut phase = 0.0;
        let mut value = -1.0;
        for _ in 0..(GROUPING_SIZE * 80) {
            samples.push(value * 50.0);
            phase += 1.0;
            if phase >= period {
                phase = 0.0;
                value = -value;
            }
        }
        let sections = locate_tracks(&samples);
        // With a perfectly steady tone the locator should at least reach the
        // data stage without panicking on degenerate variance math.
        assert!(sections.len() <= 1);
    }
}
