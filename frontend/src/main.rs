use clap::Parser;
use ti99_core::cartridge::Cartridge;
use ti99_core::machine::Machine;

mod audio;
mod config;
mod emulator;
mod overlay;
mod video;

/// TI-99/4A emulator front end: loads a cartridge, drives the
/// device-emulation core in real time, and presents its video/audio output
/// through SDL2.
#[derive(Parser)]
#[command(name = "ti99-emulator")]
struct Args {
    /// Path to a `.ctg` cartridge container.
    rom_path: String,

    /// Run at NTSC timing (60 Hz). Default unless `--PAL` is given.
    #[arg(long = "NTSC")]
    ntsc: bool,

    /// Run at PAL timing (50 Hz).
    #[arg(long = "PAL")]
    pal: bool,

    /// Disk image for DSK1.
    #[arg(long = "dsk1", value_name = "file")]
    dsk1: Option<String>,

    /// Disk image for DSK2.
    #[arg(long = "dsk2", value_name = "file")]
    dsk2: Option<String>,

    /// Disk image for DSK3.
    #[arg(long = "dsk3", value_name = "file")]
    dsk3: Option<String>,

    /// Verbosity level (`-v` or `-v=N`).
    #[arg(short = 'v', value_name = "N", num_args = 0..=1, default_missing_value = "1")]
    verbose: Option<u8>,
}

fn main() {
    let args = Args::parse();
    let verbosity = args.verbose.unwrap_or(0);
    let refresh_hz = if args.pal { 50 } else { 60 };

    let mut cfg = config::Config::load();
    if args.dsk1.is_some() || args.dsk2.is_some() || args.dsk3.is_some() {
        cfg.dsk1 = args.dsk1.clone().or(cfg.dsk1);
        cfg.dsk2 = args.dsk2.clone().or(cfg.dsk2);
        cfg.dsk3 = args.dsk3.clone().or(cfg.dsk3);
    }
    cfg.pal = args.pal;
    cfg.save();

    if verbosity > 0 {
        for (n, dsk) in [(1, &cfg.dsk1), (2, &cfg.dsk2), (3, &cfg.dsk3)] {
            if let Some(path) = dsk {
                eprintln!("DSK{n}: {path}");
            }
        }
        eprintln!("timing: {refresh_hz} Hz");
    }

    let cartridge = match Cartridge::load(&args.rom_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ti99-emulator: {e}");
            std::process::exit(-1);
        }
    };

    let title = cartridge.title().to_string();

    let mut machine = Machine::new(44_100);
    machine.load_cartridge(cartridge);
    machine.cpu.reset();

    emulator::run(&mut machine, &title, refresh_hz);

    machine.save_cartridge_ram();
}
