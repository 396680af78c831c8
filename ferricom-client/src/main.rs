mod audio_out;
mod config;
mod window;

use log::{error, info};
use std::{fs::File, io::prelude::*, path::Path};

use ferricom_core::snes::Snes;

use crate::{audio_out::AudioOut, config::Config, window::EmuWindow};

fn unwrap<T, E>(result: Result<T, E>) -> T
where
    E: std::fmt::Display,
{
    match result {
        Ok(value) => value,
        Err(why) => {
            error!("{}", why);
            panic!();
        }
    }
}

fn setup_logger() -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}:{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.level(),
                record.target(),
                record.line().unwrap_or(0),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stdout())
        .chain(std::fs::File::create("ferricom.log")?)
        .apply()?;
    Ok(())
}

const HELP: &str = "\
--rom [FILE]      Rom file to run, previous file used if not given
--turbo [N]       Emulated frames per displayed frame
--cheat [CODE]    Activate a cheat code, may be repeated
";

struct Args {
    rom: Option<String>,
    turbo: Option<u32>,
    cheats: Vec<String>,
}

fn parse_args() -> Result<Args, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();
    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    let args = Args {
        rom: pargs.opt_value_from_str("--rom")?,
        turbo: pargs.opt_value_from_str("--turbo")?,
        cheats: pargs.values_from_str("--cheat")?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Unused arguments: {:?}", remaining);
    }

    Ok(args)
}

fn sram_path(rom_path: &str) -> std::path::PathBuf {
    Path::new(rom_path).with_extension("srm")
}

fn main() {
    let args = unwrap(parse_args());

    if let Err(why) = setup_logger() {
        panic!("{}", why);
    }

    let mut config = Config::load();
    if let Some(rom_path) = args.rom {
        config.rom_path = rom_path;
    }
    if let Some(turbo) = args.turbo {
        config.turbo = turbo;
    }
    if config.rom_path.is_empty() {
        error!("No rom given in args or in config");
        panic!();
    }

    let rom_bytes = {
        let mut rom_file = unwrap(File::open(&config.rom_path));
        let mut rom_bytes = Vec::new();
        let read_bytes = unwrap(rom_file.read_to_end(&mut rom_bytes));
        info!("Read {} bytes from {}", read_bytes, config.rom_path);
        rom_bytes
    };

    let mut snes = unwrap(Snes::with_rom(rom_bytes));
    snes.set_turbo(config.turbo);

    // Battery ram from the previous run
    if let Ok(mut sram_file) = File::open(sram_path(&config.rom_path)) {
        let mut bytes = Vec::new();
        if sram_file.read_to_end(&mut bytes).is_ok() {
            snes.load_sram(&bytes);
            info!("Restored {} bytes of battery ram", bytes.len());
        }
    }

    for code in &args.cheats {
        match snes.add_cheat(code) {
            Ok(patch) => info!("Cheat armed at ${:06X}", patch.addr),
            Err(why) => error!("Rejected cheat '{}': {}", code, why),
        }
    }

    let _audio = AudioOut::start(snes.audio());

    let mut window = EmuWindow::new("ferricom", config.scale);
    window.main_loop(&mut snes);

    if let Some(sram) = snes.sram() {
        if let Err(why) = std::fs::write(sram_path(&config.rom_path), sram) {
            error!("Saving battery ram failed: {}", why);
        }
    }
    config.save();
}
