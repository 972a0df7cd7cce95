//! TMS5220 speech synthesizer front end and VSM dictionary lookup (§3, §4.7).
//!
//! Ported from `say.cpp`'s `LocateString`/`SayPhrase` (dictionary traversal
//! and spelling fallback) and `dumpspch.cpp`'s `ReadNode`/`DumpFrame` (node
//! layout and bit-packed LPC frame decode). The speech *engine* itself
//! (actual waveform synthesis) is out of scope per §4.7 — this module
//! exposes the byte-wise command interface, the dictionary walk, and the
//! frame decoder that would feed such an engine.

use crate::codec::bitio::BitReader;

pub mod builder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechError {
    /// VSM header byte at offset 0 was not the expected 0xAA signature.
    BadSignature,
    /// The bit stream ran out before a STOP frame was seen.
    Truncated,
}

impl std::fmt::Display for SpeechError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadSignature => write!(f, "VSM ROM missing 0xAA signature"),
            Self::Truncated => write!(f, "speech data ended without a STOP frame"),
        }
    }
}

impl std::error::Error for SpeechError {}

/// One decoded node of the phrase binary search tree (§3).
#[derive(Debug, Clone)]
pub struct VsmNode {
    pub phrase: Vec<u8>,
    pub prev_offset: u16,
    pub next_offset: u16,
    pub data_offset: u16,
    pub data_length: u8,
}

/// A 32 KiB Voice Synthesis Memory image: a binary-tree phrase dictionary
/// rooted at offset 1, followed by bit-packed LPC frame data (§3).
pub struct Vsm {
    rom: Vec<u8>,
}

const ROOT_OFFSET: u16 = 1;

impl Vsm {
    pub fn new(rom: Vec<u8>) -> Result<Self, SpeechError> {
        if rom.first().copied() != Some(0xAA) {
            return Err(SpeechError::BadSignature);
        }
        Ok(Self { rom })
    }

    pub fn data(&self) -> &[u8] {
        &self.rom
    }

    /// Reads the node at `offset`. Panics if the node's fields run past the
    /// end of the ROM image; callers only ever follow offsets produced by
    /// the ROM's own tree, so a malformed VSM is a loud bug, not a
    /// recoverable I/O error.
    pub fn read_node(&self, offset: u16) -> VsmNode {
        let offset = offset as usize;
        let length = self.rom[offset] as usize;
        let phrase = self.rom[offset + 1..offset + 1 + length].to_vec();
        let tail = offset + 1 + length;
        let prev_offset = u16::from_be_bytes([self.rom[tail], self.rom[tail + 1]]);
        let next_offset = u16::from_be_bytes([self.rom[tail + 2], self.rom[tail + 3]]);
        // tail + 4 is the unknown byte (§3); skipped.
        let data_offset = u16::from_be_bytes([self.rom[tail + 5], self.rom[tail + 6]]);
        let data_length = self.rom[tail + 7];
        VsmNode {
            phrase,
            prev_offset,
            next_offset,
            data_offset,
            data_length,
        }
    }

    /// Case-insensitive binary-tree search for `text`, matching
    /// `LocateString`: descends `prev` while `text < node.phrase`, `next`
    /// while `text > node.phrase`, stops at an offset-0 child (not found).
    pub fn locate(&self, text: &[u8]) -> Option<VsmNode> {
        let mut offset = ROOT_OFFSET;
        loop {
            let node = self.read_node(offset);
            let delta = stricmp_n(text, &node.phrase);
            if node.phrase.len() == text.len() && delta == 0 {
                return Some(node);
            }
            offset = if delta <= 0 { node.prev_offset } else { node.next_offset };
            if offset == 0 {
                return None;
            }
        }
    }

    /// Decodes the LPC frame stream for `node`, stopping at the first STOP
    /// frame (§3, §4.7's frame decoder).
    pub fn decode_frames(&self, node: &VsmNode) -> Result<Vec<SpeechFrame>, SpeechError> {
        let start = node.data_offset as usize;
        let end = start + node.data_length as usize;
        let data = self.rom.get(start..end).ok_or(SpeechError::Truncated)?;
        decode_frame_stream(data)
    }
}

/// Case-insensitive comparison of `a` against `b`'s first `a.len()` bytes,
/// treating a short `b` as nul-padded — the same short-circuit
/// `strnicmp(text, node.string, length)` performs in the original.
fn stricmp_n(a: &[u8], b: &[u8]) -> i32 {
    for i in 0..a.len() {
        let ac = a[i].to_ascii_uppercase();
        let bc = b.get(i).copied().unwrap_or(0).to_ascii_uppercase();
        if ac != bc {
            return ac as i32 - bc as i32;
        }
    }
    0
}

/// One unit of a resolved utterance: either a located dictionary node or a
/// single character that has no phrase and no "UHOH" fallback either.
pub enum SpelledUnit {
    Found(VsmNode),
    Missing,
}

/// Resolves `text` to a sequence of dictionary nodes, falling back to
/// per-character spelling (and a fixed "UHOH" phrase for single characters
/// with no match) exactly as `SayPhrase` does.
pub fn resolve_phrase(vsm: &Vsm, text: &[u8]) -> Vec<SpelledUnit> {
    if let Some(node) = vsm.locate(text) {
        return vec![SpelledUnit::Found(node)];
    }
    if text.len() == 1 {
        return match vsm.locate(b"UHOH") {
            Some(node) => vec![SpelledUnit::Found(node)],
            None => vec![SpelledUnit::Missing],
        };
    }
    text.iter().flat_map(|&c| resolve_phrase(vsm, &[c])).collect()
}

/// One decoded LPC frame (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechFrame {
    /// 4-bit energy index 0: silence, no further fields.
    Zero,
    /// 4-bit energy index 15: end of utterance.
    Stop,
    /// Voiced/unvoiced frame: `coefficients` is empty when `repeat` is set
    /// (the decoder reuses the previous frame's reflection coefficients),
    /// 4 entries when unvoiced (`pitch == 0`), 10 when voiced.
    Data {
        energy: u8,
        repeat: bool,
        pitch: u8,
        coefficients: Vec<u8>,
    },
}

fn decode_frame_stream(data: &[u8]) -> Result<Vec<SpeechFrame>, SpeechError> {
    let mut reader = BitReader::new(data);
    let mut frames = Vec::new();
    loop {
        let frame = decode_one_frame(&mut reader).ok_or(SpeechError::Truncated)?;
        let stop = matches!(frame, SpeechFrame::Stop);
        frames.push(frame);
        if stop {
            return Ok(frames);
        }
    }
}

fn decode_one_frame(reader: &mut BitReader) -> Option<SpeechFrame> {
    let energy = reader.read(4)? as u8;
    if energy == 0x00 {
        return Some(SpeechFrame::Zero);
    }
    if energy == 0x0F {
        return Some(SpeechFrame::Stop);
    }

    let repeat = reader.read(1)? != 0;
    let pitch = reader.read(6)? as u8;

    let mut coefficients = Vec::new();
    if !repeat {
        for width in [5, 5, 4, 4] {
            coefficients.push(reader.read(width)? as u8);
        }
        if pitch != 0 {
            for width in [4, 4, 4, 3, 3, 3] {
                coefficients.push(reader.read(width)? as u8);
            }
        }
    }

    Some(SpeechFrame::Data { energy, repeat, pitch, coefficients })
}

/// Command interface byte codes (§4.7).
pub mod command {
    pub const LOAD_ADDRESS_NIBBLE: u8 = 0x40;
    pub const READ_AND_BRANCH: u8 = 0x10;
    pub const SPEAK_EXTERNAL: u8 = 0x50;
    pub const RESET: u8 = 0x70;
    pub const BUSY_STATUS: u8 = 0xE0;
}

/// Byte-wise TMS5220 command front end: accumulates five `0x4v` nibble
/// writes into a 20-bit VSM address, then serves sequential reads via
/// `0x10` the way real hardware's address counter does.
#[derive(Default)]
pub struct SpeechPort {
    address: u32,
    nibbles_loaded: u8,
    read_cursor: u32,
    /// Set by `0x10`; the next `read` fetches the latched VSM byte and then
    /// advances the cursor, mirroring the GROM port's "latch, then
    /// autoincrement" contract (§4.4).
    pending_read: bool,
    busy: bool,
}

impl SpeechPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles one byte written to the speech port (§4.4, §4.7).
    pub fn write(&mut self, byte: u8) {
        match byte {
            b if b & 0xF0 == command::LOAD_ADDRESS_NIBBLE => {
                let nibble = (b & 0x0F) as u32;
                let shift = self.nibbles_loaded * 4;
                if self.nibbles_loaded == 0 {
                    self.address = 0;
                }
                self.address |= nibble << shift;
                self.nibbles_loaded = (self.nibbles_loaded + 1) % 5;
                if self.nibbles_loaded == 0 {
                    self.read_cursor = self.address;
                }
            }
            command::READ_AND_BRANCH => {
                self.pending_read = true;
            }
            command::SPEAK_EXTERNAL => {
                self.busy = true;
            }
            command::RESET => {
                *self = Self::new();
            }
            _ => {}
        }
    }

    /// Reads back the byte at the read cursor from `vsm`, or the busy
    /// status byte `0xE0` if speech is in progress.
    pub fn read(&mut self, vsm: &Vsm) -> u8 {
        if self.busy {
            self.busy = false; // single poll clears busy in this model
            return command::BUSY_STATUS;
        }
        if !self.pending_read {
            return 0;
        }
        self.pending_read = false;
        let byte = vsm.data().get(self.read_cursor as usize).copied().unwrap_or(0);
        self.read_cursor = self.read_cursor.wrapping_add(1);
        byte
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_minimal_vsm() -> Vsm {
        // Layout: [0]=0xAA signature, root node at offset 1: phrase "HI"
        // (length 2), then prev=0 next=0 unknown=0 data_offset next data_len.
        let mut rom = vec![0u8; 64];
        rom[0] = 0xAA;
        rom[1] = 2; // phrase length
        rom[2] = b'H';
        rom[3] = b'I';
        // prev=0, next=0 (leaf)
        rom[4] = 0;
        rom[5] = 0;
        rom[6] = 0;
        rom[7] = 0;
        rom[8] = 0; // unknown byte
        let data_offset: u16 = 32;
        rom[9] = (data_offset >> 8) as u8;
        rom[10] = (data_offset & 0xFF) as u8;
        rom[11] = 1; // data length
        rom[32] = 0b1111_0000; // a single STOP frame (energy=0xF)
        Vsm::new(rom).unwrap()
    }

    #[test]
    fn locates_exact_phrase() {
        let vsm = build_minimal_vsm();
        let node = vsm.locate(b"HI").expect("phrase present");
        assert_eq!(node.data_offset, 32);
        assert_eq!(node.data_length, 1);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let vsm = build_minimal_vsm();
        assert!(vsm.locate(b"hi").is_some());
    }

    #[test]
    fn missing_phrase_returns_none() {
        let vsm = build_minimal_vsm();
        assert!(vsm.locate(b"ZZZZ").is_none());
    }

    #[test]
    fn decodes_stop_frame() {
        let vsm = build_minimal_vsm();
        let node = vsm.read_node(1);
        let frames = vsm.decode_frames(&node).unwrap();
        assert_eq!(frames, vec![SpeechFrame::Stop]);
    }

    #[test]
    fn zero_energy_frame_has_no_extra_fields() {
        let data = [0b0000_1111u8]; // energy=0 then next nibble ignored
        let mut reader = BitReader::new(&data);
        assert_eq!(decode_one_frame(&mut reader), Some(SpeechFrame::Zero));
    }

    #[test]
    fn voiced_frame_reads_ten_coefficients() {
        // energy=1 (not 0/15), repeat=0, pitch=5 (nonzero -> voiced),
        // followed by 10 coefficient fields of widths 5,5,4,4,4,4,4,3,3,3.
        let mut writer = crate::codec::bitio::BitWriter::new();
        writer.write(1, 4); // energy
        writer.write(0, 1); // repeat
        writer.write(5, 6); // pitch
        for w in [5, 5, 4, 4, 4, 4, 4, 3, 3, 3] {
            writer.write(1, w);
        }
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        let frame = decode_one_frame(&mut reader).unwrap();
        match frame {
            SpeechFrame::Data { energy, repeat, pitch, coefficients } => {
                assert_eq!(energy, 1);
                assert!(!repeat);
                assert_eq!(pitch, 5);
                assert_eq!(coefficients.len(), 10);
            }
            _ => panic!("expected a data frame"),
        }
    }

    #[test]
    fn speech_port_sequences_address_load_then_sequential_reads() {
        let vsm = build_minimal_vsm();
        let mut port = SpeechPort::new();
        // Load address = 2 (low nibble first, per §4.7).
        for shift in [0u32, 4, 8, 12, 16] {
            port.write(command::LOAD_ADDRESS_NIBBLE | (((2u32 >> shift) & 0xF) as u8));
        }
        port.write(command::READ_AND_BRANCH);
        assert_eq!(port.read(&vsm), vsm.data()[2]);
        port.write(command::READ_AND_BRANCH);
        assert_eq!(port.read(&vsm), vsm.data()[3]);
    }
}
