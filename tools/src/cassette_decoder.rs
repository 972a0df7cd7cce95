//! TI cassette WAV decoder (§4.8, §6 "cassette decoder" CLI).
//!
//! A thin wrapper around `ti99_core::cassette::decode_wav`, which owns the
//! three-pass Miller/biphase-mark demodulation pipeline (track location,
//! bit extraction, record framing/recovery). This binary's job is purely
//! I/O: read the WAV, call the pipeline, write one flat byte file per
//! successfully decoded track.

use clap::Parser;
use std::path::Path;
use ti99_core::cassette::decode_wav;

/// Decodes a TI cassette WAV recording into one `.bin` file per track.
#[derive(Parser)]
#[command(name = "cassette_decoder")]
struct Args {
    /// Path to a RIFF/WAVE (PCM) cassette recording.
    wav_path: String,

    /// Display extra information (`-v` or `-v=N`).
    #[arg(short = 'v', value_name = "N", num_args = 0..=1, default_missing_value = "1")]
    verbose: Option<u8>,
}

fn main() {
    let args = Args::parse();
    let verbosity = args.verbose.unwrap_or(0);

    let bytes = match std::fs::read(&args.wav_path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("cassette_decoder: unable to open input file \"{}\": {e}", args.wav_path);
            std::process::exit(-1);
        }
    };

    let tracks = match decode_wav(&bytes) {
        Ok(tracks) => tracks,
        Err(e) => {
            eprintln!("cassette_decoder: {e}");
            std::process::exit(-1);
        }
    };

    if tracks.is_empty() {
        println!("Unable to find any valid data");
        return;
    }

    let stem = Path::new(&args.wav_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("track")
        .to_string();

    println!("Searching for data tracks...");
    println!();

    for (index, track) in tracks.iter().enumerate() {
        let out_path = format!("{stem}-{:02}.bin", index + 1);
        if let Err(e) = std::fs::write(&out_path, track) {
            eprintln!("cassette_decoder: unable to write \"{out_path}\": {e}");
            std::process::exit(-1);
        }
        println!("Track {:2}: {} bytes ({:#04X}) -> {out_path}", index + 1, track.len(), track.len() / 64);
        if verbosity > 0 {
            eprintln!("  {} chunks recovered", track.len() / 64);
        }
    }
}
