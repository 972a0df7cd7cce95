//! Bit I/O primitives and the codecs layered on top of them.
//!
//! [`bitio`] provides the variable-width bit reader/writer shared by the
//! LZW codec and the cassette demodulator's frame unpacker. [`lzw`] and
//! [`rle`] are the two compression schemes used by cartridge persistence
//! (§4.2, §4.3 of the original design).

pub mod bitio;
pub mod lzw;
pub mod rle;
