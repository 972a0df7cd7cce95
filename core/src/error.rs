//! Error kinds shared across the emulation core.
//!
//! Each subsystem defines its own narrow error enum close to where it's
//! raised (see [`crate::codec::lzw::LzwError`], [`crate::cartridge::CartridgeError`],
//! [`crate::cassette::CassetteError`]); this module aggregates them for
//! callers that cross subsystem boundaries, e.g. a frontend loading a
//! cartridge and then wiring it onto the bus.

use std::fmt;

use crate::cartridge::CartridgeError;
use crate::cassette::CassetteError;
use crate::codec::lzw::LzwError;
use crate::speech::SpeechError;

/// Top-level error kinds named by the core's error handling design.
#[derive(Debug)]
pub enum Error {
    /// A referenced file does not exist.
    FileNotFound(String),
    /// A file exists but its contents don't match the expected format.
    FileFormatInvalid(String),
    /// A codec rejected its input as corrupt.
    Decode(LzwError),
    /// Misaligned PC or a conflicting trap registration.
    Bus(String),
    /// Speech dictionary lookup failed to find a phrase (recoverable by spelling).
    SpeechDictMiss(String),
    /// A cartridge container failed to parse.
    Cartridge(CartridgeError),
    /// A cassette WAV file failed to decode.
    Cassette(CassetteError),
    /// Underlying I/O error.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound(path) => write!(f, "file not found: {path}"),
            Self::FileFormatInvalid(msg) => write!(f, "invalid file format: {msg}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Bus(msg) => write!(f, "bus error: {msg}"),
            Self::SpeechDictMiss(phrase) => write!(f, "speech dictionary miss: {phrase}"),
            Self::Cartridge(e) => write!(f, "cartridge error: {e}"),
            Self::Cassette(e) => write!(f, "cassette error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<LzwError> for Error {
    fn from(e: LzwError) -> Self {
        Self::Decode(e)
    }
}

impl From<CartridgeError> for Error {
    fn from(e: CartridgeError) -> Self {
        Self::Cartridge(e)
    }
}

impl From<CassetteError> for Error {
    fn from(e: CassetteError) -> Self {
        Self::Cassette(e)
    }
}

impl From<SpeechError> for Error {
    fn from(e: SpeechError) -> Self {
        Self::SpeechDictMiss(e.to_string())
    }
}
