//! VSM ROM construction from the `.dat` text format, and the inverse
//! tree-to-text dump (§6 "Speech data file (.dat)").
//!
//! Grounded on `mkspch.cpp` (`ReadNode`/`ParseFrame`/`SplitList`/
//! `CalculateOffsets`/`StoreNode`/`MakeROM`) for the builder direction and
//! `dumpspch.cpp` (`ReadNode`/`DumpPhrase`) for the dump direction. Both
//! sides share the node layout already used by [`super::Vsm::read_node`]:
//! `{length byte, phrase bytes, prev-offset word, next-offset word, unknown
//! byte, data-offset word, data-length byte}`.

use crate::codec::bitio::BitWriter;

const ROM_SIZE: usize = 0x8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A `.dat` line didn't start with a quoted or bare phrase token.
    MissingPhrase { line: usize },
    /// The data portion of a line (hex bytes, symbolic frames, `<null>`) failed to parse.
    BadData { line: usize, reason: String },
    /// A phrase's encoded speech data is longer than a `u8` length field can hold.
    DataTooLong { phrase: String },
    /// The assembled ROM image exceeds the 32 KiB VSM address space.
    RomOverflow { needed: usize },
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPhrase { line } => write!(f, "line {line}: missing phrase"),
            Self::BadData { line, reason } => write!(f, "line {line}: {reason}"),
            Self::DataTooLong { phrase } => {
                write!(f, "phrase \"{phrase}\" contains too much speech data")
            }
            Self::RomOverflow { needed } => {
                write!(f, "too much data for a 32 KiB VSM image (over by {} bytes)", needed - ROM_SIZE)
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// One parsed `.dat` entry: a phrase string and its encoded LPC/raw data,
/// still unpositioned (§6's three data-line shapes already reduced to bytes).
#[derive(Debug, Clone)]
pub struct PhraseSource {
    pub phrase: Vec<u8>,
    pub data: Vec<u8>,
}

/// Parses the `.dat` grammar from §6: one phrase per non-blank,
/// non-`#`-comment line, each followed by `-` and either hex bytes, a
/// symbolic frame sequence, or the literal `<null>`.
pub fn parse_dat(text: &str) -> Result<Vec<PhraseSource>, BuildError> {
    let mut phrases = Vec::new();
    for (line_no, raw_line) in text.lines().enumerate() {
        let line_no = line_no + 1;
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (phrase, rest) = read_phrase(trimmed).ok_or(BuildError::MissingPhrase { line: line_no })?;
        let data = read_data(rest.trim_start()).map_err(|reason| BuildError::BadData { line: line_no, reason })?;
        if data.len() > 255 {
            return Err(BuildError::DataTooLong { phrase: String::from_utf8_lossy(&phrase).into_owned() });
        }
        phrases.push(PhraseSource { phrase, data });
    }
    Ok(phrases)
}

/// Reads a phrase token: a `"quoted phrase"` (which may contain spaces) or a
/// single whitespace-delimited bare word, mirroring `ReadPhrase`.
fn read_phrase(line: &str) -> Option<(Vec<u8>, &str)> {
    if let Some(rest) = line.strip_prefix('"') {
        let end = rest.find('"')?;
        let phrase = rest[..end].as_bytes().to_vec();
        Some((phrase, &rest[end + 1..]))
    } else {
        let end = line.find(char::is_whitespace).unwrap_or(line.len());
        Some((line[..end].as_bytes().to_vec(), &line[end..]))
    }
}

fn read_data(rest: &str) -> Result<Vec<u8>, String> {
    let rest = rest.strip_prefix('-').ok_or_else(|| "expected '-' before speech data".to_string())?;
    let rest = rest.trim_start();
    if rest.starts_with("<null>") {
        return Ok(vec![0xF0]);
    }
    if rest.starts_with(|c: char| c.is_ascii_hexdigit()) {
        read_hex_data(rest)
    } else {
        read_symbolic_frames(rest)
    }
}

fn read_hex_data(rest: &str) -> Result<Vec<u8>, String> {
    rest.split_whitespace()
        .map(|tok| u8::from_str_radix(tok, 16).map_err(|_| format!("bad hex byte {tok:?}")))
        .collect()
}

/// Encodes symbolic frames (`Z`, `S`, `Pn En [R] [Kn Kn ...]`) into bit-packed
/// LPC data, mirroring `ParseFrame`/`WriteBits`.
fn read_symbolic_frames(rest: &str) -> Result<Vec<u8>, String> {
    let mut tokens = rest.split_whitespace().peekable();
    let mut writer = BitWriter::new();
    while let Some(tok) = tokens.next() {
        match tok.as_bytes().first() {
            Some(b'Z') => writer.write(0x00, 4),
            Some(b'S') => writer.write(0x0F, 4),
            Some(b'P') => {
                let pitch: u32 = tok[1..].parse().map_err(|_| format!("bad pitch token {tok:?}"))?;
                let energy_tok = tokens.next().ok_or("expected energy token after pitch")?;
                if !energy_tok.starts_with('E') {
                    return Err(format!("expected 'E<n>' after pitch, got {energy_tok:?}"));
                }
                let energy: u32 = energy_tok[1..].parse().map_err(|_| format!("bad energy token {energy_tok:?}"))?;
                writer.write(energy, 4);

                let repeat = tokens.peek().map(|t| *t == "R").unwrap_or(false);
                if repeat {
                    tokens.next();
                    writer.write(1, 1);
                    writer.write(pitch, 6);
                    continue;
                }
                writer.write(0, 1);
                writer.write(pitch, 6);

                for width in [5u32, 5, 4, 4] {
                    writer.write(read_coefficient(&mut tokens)?, width);
                }
                if pitch != 0 {
                    for width in [4u32, 4, 4, 3, 3, 3] {
                        writer.write(read_coefficient(&mut tokens)?, width);
                    }
                }
            }
            _ => return Err(format!("unrecognized frame token {tok:?}")),
        }
    }
    Ok(writer.finish())
}

fn read_coefficient<'a>(tokens: &mut std::iter::Peekable<std::str::SplitWhitespace<'a>>) -> Result<u32, String> {
    let tok = tokens.next().ok_or("expected a K<n> coefficient token")?;
    let tok = tok.strip_prefix('K').ok_or_else(|| format!("expected 'K<n>', got {tok:?}"))?;
    tok.parse().map_err(|_| format!("bad coefficient value {tok:?}"))
}

/// A node in the in-memory binary search tree built from a sorted phrase
/// list (`SplitList`), before offsets are assigned.
struct TreeNode {
    phrase: Vec<u8>,
    data: Vec<u8>,
    prev: Option<usize>,
    next: Option<usize>,
    phrase_offset: usize,
    data_offset: usize,
    owns_data: bool,
}

/// Recursively splits a sorted `list[..]` into a balanced binary tree the
/// way `SplitList` does: root is the middle element, left half becomes
/// `prev`, right half becomes `next`.
fn split_list(order: &[usize], nodes: &mut [TreeNode]) -> Option<usize> {
    if order.is_empty() {
        return None;
    }
    let mid = order.len() / 2;
    let root = order[mid];
    nodes[root].prev = split_list(&order[..mid], nodes);
    nodes[root].next = split_list(&order[mid + 1..], nodes);
    Some(root)
}

/// Builds a 32 KiB VSM ROM image from parsed phrases: sorts by phrase,
/// builds the balanced binary tree, assigns phrase/data offsets (reusing an
/// earlier phrase's data when it's an exact suffix, per `CalculateOffsets`),
/// and serializes.
pub fn build_vsm(phrases: &[PhraseSource]) -> Result<Vec<u8>, BuildError> {
    let mut order: Vec<usize> = (0..phrases.len()).collect();
    order.sort_by(|&a, &b| phrases[a].phrase.cmp(&phrases[b].phrase));

    let mut nodes: Vec<TreeNode> = phrases
        .iter()
        .map(|p| TreeNode {
            phrase: p.phrase.clone(),
            data: p.data.clone(),
            prev: None,
            next: None,
            phrase_offset: 0,
            data_offset: 0,
            owns_data: false,
        })
        .collect();

    let root = match split_list(&order, &mut nodes) {
        Some(root) => root,
        None => return Ok(vec![0u8; ROM_SIZE]),
    };

    // Phrase offsets: root first, then the rest of `order` (matching
    // `CalculateOffsets`'s root-then-list traversal).
    let mut offset = 1usize;
    nodes[root].phrase_offset = offset;
    offset += node_phrase_size(&nodes[root]);
    for &i in &order {
        if i == root {
            continue;
        }
        nodes[i].phrase_offset = offset;
        offset += node_phrase_size(&nodes[i]);
    }

    // Data offsets: reuse an earlier phrase's data if this phrase's data is
    // an exact suffix of it (the original's "phrase at the end of a previous
    // one" dedup).
    for i in 0..order.len() {
        let node_i = order[i];
        let mut reused = None;
        for &node_j in &order[..i] {
            let (dj, di) = (nodes[node_j].data.len(), nodes[node_i].data.len());
            if dj >= di && nodes[node_j].data[dj - di..] == nodes[node_i].data[..] {
                reused = Some(nodes[node_j].data_offset);
                break;
            }
        }
        match reused {
            Some(off) => nodes[node_i].data_offset = off,
            None => {
                nodes[node_i].data_offset = offset;
                nodes[node_i].owns_data = true;
                offset += nodes[node_i].data.len();
            }
        }
    }

    if offset > ROM_SIZE {
        return Err(BuildError::RomOverflow { needed: offset });
    }

    let mut rom = vec![0u8; ROM_SIZE];
    rom[0] = 0xAA;
    store_node(&nodes, root, &mut rom);
    for &i in &order {
        if i != root {
            store_node(&nodes, i, &mut rom);
        }
    }
    for &i in &order {
        if nodes[i].owns_data {
            let start = nodes[i].data_offset;
            rom[start..start + nodes[i].data.len()].copy_from_slice(&nodes[i].data);
        }
    }

    Ok(rom)
}

fn node_phrase_size(node: &TreeNode) -> usize {
    1 + node.phrase.len() + 2 + 2 + 4
}

fn store_node(nodes: &[TreeNode], index: usize, rom: &mut [u8]) {
    let node = &nodes[index];
    let mut ptr = node.phrase_offset;
    rom[ptr] = node.phrase.len() as u8;
    ptr += 1;
    rom[ptr..ptr + node.phrase.len()].copy_from_slice(&node.phrase);
    ptr += node.phrase.len();

    let prev_offset = node.prev.map(|p| nodes[p].phrase_offset).unwrap_or(0) as u16;
    rom[ptr] = (prev_offset >> 8) as u8;
    rom[ptr + 1] = (prev_offset & 0xFF) as u8;
    ptr += 2;

    let next_offset = node.next.map(|n| nodes[n].phrase_offset).unwrap_or(0) as u16;
    rom[ptr] = (next_offset >> 8) as u8;
    rom[ptr + 1] = (next_offset & 0xFF) as u8;
    ptr += 2;

    rom[ptr] = 0; // unknown byte
    let data_offset = node.data_offset as u16;
    rom[ptr + 1] = (data_offset >> 8) as u8;
    rom[ptr + 2] = (data_offset & 0xFF) as u8;
    rom[ptr + 3] = node.data.len() as u8;
}

/// Renders a VSM ROM's tree back to `.dat` text in hex-data form, in-order
/// (`prev`, self, `next`) starting from the root — the inverse of
/// [`build_vsm`], matching `DumpPhrase` with `dataFormat == 0`.
pub fn dump_tree(vsm: &super::Vsm) -> String {
    let mut out = String::from("# TMS5220 Speech ROM data file\n\n");
    dump_node(vsm, 1, &mut out);
    out
}

fn dump_node(vsm: &super::Vsm, offset: u16, out: &mut String) {
    if offset == 0 {
        return;
    }
    let node = vsm.read_node(offset);
    if node.prev_offset != 0 {
        dump_node(vsm, node.prev_offset, out);
    }
    let phrase = String::from_utf8_lossy(&node.phrase);
    let pad = 20usize.saturating_sub(node.phrase.len());
    out.push_str(&format!("\"{phrase}\"{:pad$} -", "", pad = pad));
    let start = node.data_offset as usize;
    let end = start + node.data_length as usize;
    for &byte in &vsm.data()[start..end] {
        out.push_str(&format!(" {byte:02X}"));
    }
    out.push('\n');
    if node.next_offset != 0 {
        dump_node(vsm, node.next_offset, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::Vsm;

    #[test]
    fn hex_phrase_round_trips_through_the_tree() {
        let phrases = vec![
            PhraseSource { phrase: b"HELLO".to_vec(), data: vec![0xF0] },
            PhraseSource { phrase: b"WORLD".to_vec(), data: vec![0xAB, 0xF0] },
        ];
        let rom = build_vsm(&phrases).unwrap();
        let vsm = Vsm::new(rom).unwrap();
        let node = vsm.locate(b"HELLO").expect("phrase present");
        assert_eq!(vsm.data()[node.data_offset as usize], 0xF0);
        let node = vsm.locate(b"WORLD").expect("phrase present");
        assert_eq!(&vsm.data()[node.data_offset as usize..][..2], &[0xAB, 0xF0]);
    }

    #[test]
    fn parses_hex_null_and_symbolic_lines() {
        let text = "# comment\n\"A\" - 01 02\nB - <null>\n\"C\" - Z S\n";
        let phrases = parse_dat(text).unwrap();
        assert_eq!(phrases.len(), 3);
        assert_eq!(phrases[0].phrase, b"A");
        assert_eq!(phrases[0].data, vec![0x01, 0x02]);
        assert_eq!(phrases[1].phrase, b"B");
        assert_eq!(phrases[1].data, vec![0xF0]);
        assert_eq!(phrases[2].data, vec![0b0000_1111]);
    }

    #[test]
    fn identical_data_is_deduplicated() {
        let phrases = vec![
            PhraseSource { phrase: b"A".to_vec(), data: vec![0x11, 0x22] },
            PhraseSource { phrase: b"B".to_vec(), data: vec![0x11, 0x22] },
        ];
        let rom = build_vsm(&phrases).unwrap();
        let vsm = Vsm::new(rom).unwrap();
        let a = vsm.locate(b"A").unwrap();
        let b = vsm.locate(b"B").unwrap();
        assert_eq!(a.data_offset, b.data_offset);
    }

    #[test]
    fn dump_and_rebuild_preserves_phrases() {
        let phrases = vec![
            PhraseSource { phrase: b"ONE".to_vec(), data: vec![0x01, 0xF0] },
            PhraseSource { phrase: b"TWO".to_vec(), data: vec![0x02, 0xF0] },
            PhraseSource { phrase: b"THREE".to_vec(), data: vec![0x03, 0xF0] },
        ];
        let rom = build_vsm(&phrases).unwrap();
        let vsm = Vsm::new(rom).unwrap();
        let dumped = dump_tree(&vsm);
        let reparsed = parse_dat(&dumped).unwrap();
        assert_eq!(reparsed.len(), 3);
        let rebuilt = build_vsm(&reparsed).unwrap();
        let vsm2 = Vsm::new(rebuilt).unwrap();
        for phrase in [&b"ONE"[..], b"TWO", b"THREE"] {
            assert!(vsm2.locate(phrase).is_some());
        }
    }
}
