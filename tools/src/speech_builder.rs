//! Speech ROM utility: builds a VSM binary from a `.dat` text dictionary,
//! or dumps an existing VSM binary back to `.dat` text (§6 "speech builder"
//! CLI, `.dat` file grammar).
//!
//! Grounded on `mkspch.cpp` (build direction) and `dumpspch.cpp` (dump
//! direction); both are thin wrappers around `ti99_core::speech::builder`,
//! which owns the actual tree construction/traversal.

use clap::Parser;
use ti99_core::speech::builder;
use ti99_core::speech::Vsm;

/// Builds or dumps a TMS5220 Voice Synthesis Memory image.
#[derive(Parser)]
#[command(name = "speech_builder")]
struct Args {
    /// Input file: a `.dat` phrase dictionary (build mode) or a 32 KiB VSM
    /// binary (`--dump` mode).
    input: String,

    /// Output file. Defaults to `spchrom.bin` in build mode, `spchrom.dat`
    /// in dump mode.
    #[arg(short = 'o', long = "output", value_name = "file")]
    output: Option<String>,

    /// Reverse direction: read a VSM binary and emit `.dat` text instead of
    /// building a binary from text.
    #[arg(long = "dump")]
    dump: bool,

    /// Display extra information (phrase/byte-usage statistics).
    #[arg(short = 'v', value_name = "N", num_args = 0..=1, default_missing_value = "1")]
    verbose: Option<u8>,
}

fn main() {
    let args = Args::parse();
    println!("TI-99/4A Speech ROM Utility");

    let result = if args.dump {
        run_dump(&args)
    } else {
        run_build(&args)
    };

    if let Err(msg) = result {
        eprintln!("speech_builder: {msg}");
        std::process::exit(-1);
    }
}

fn run_build(args: &Args) -> Result<(), String> {
    let text = std::fs::read_to_string(&args.input).map_err(|e| format!("unable to open input file \"{}\": {e}", args.input))?;
    let phrases = builder::parse_dat(&text).map_err(|e| e.to_string())?;

    let rom = builder::build_vsm(&phrases).map_err(|e| e.to_string())?;

    let output = args.output.clone().unwrap_or_else(|| "spchrom.bin".to_string());
    std::fs::write(&output, &rom).map_err(|e| format!("unable to open output file \"{output}\": {e}"))?;

    println!();
    println!("{:5} Phrases read", phrases.len());
    println!("{:7} Bytes used", rom.iter().rposition(|&b| b != 0).map(|p| p + 1).unwrap_or(0));
    println!();

    if args.verbose.unwrap_or(0) > 0 {
        let total: usize = phrases.iter().map(|p| p.data.len()).sum();
        eprintln!("{total} bytes of raw phrase data across {} phrases", phrases.len());
    }

    Ok(())
}

fn run_dump(args: &Args) -> Result<(), String> {
    let rom = std::fs::read(&args.input).map_err(|e| format!("unable to open input file \"{}\": {e}", args.input))?;
    let vsm = Vsm::new(rom).map_err(|e| e.to_string())?;

    let text = builder::dump_tree(&vsm);

    let output = args.output.clone().unwrap_or_else(|| "spchrom.dat".to_string());
    std::fs::write(&output, &text).map_err(|e| format!("unable to open output file \"{output}\": {e}"))?;

    println!();
    println!("{:7} bytes written to {output}", text.len());
    println!();

    Ok(())
}
