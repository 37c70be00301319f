// rec6502 - 6502 static recompiler
//
// Translates an NES cartridge into SSA IR text, one function per
// subroutine reachable from the reset vector.
//
// Usage:
//   rec6502 game.nes -o game.ll
//   rec6502 game.nes --listing --entry C000 --platform flat

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{info, LevelFilter};
use rec6502::{cfg, rom, translate, DecodeConfig, Decoder, Memory, PlatformKind};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rec6502")]
#[command(about = "6502 static recompiler")]
#[command(version)]
struct Args {
    /// Input iNES ROM
    input: PathBuf,

    /// Output IR file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Entry point in hex (defaults to the reset vector)
    #[arg(long, value_parser = parse_hex)]
    entry: Option<u16>,

    /// Memory model: flat or nes
    #[arg(long, default_value_t = PlatformKind::Nes)]
    platform: PlatformKind,

    /// Print the disassembly of every reachable function to stderr
    #[arg(long)]
    listing: bool,

    /// Fail on unsupported opcodes and reads outside PRG ROM
    #[arg(long)]
    strict: bool,

    /// Name recorded in the output module
    #[arg(long, default_value = "rom")]
    module_name: String,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_hex(s: &str) -> Result<u16, String> {
    let digits = s
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .trim_start_matches('$');
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    // Load ROM
    let data = std::fs::read(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let rom = rom::parse(&data).context("Failed to parse iNES image")?;

    info!(
        "PRG ROM: {} bytes at 0x{:04X}, mapper {}",
        rom.header.prg_rom_size,
        rom.prg_offset(),
        rom.header.mapper
    );

    let entry = args.entry.unwrap_or_else(|| rom.reset_vector());
    let config = if args.strict {
        DecodeConfig::strict()
    } else {
        DecodeConfig::default()
    };
    let decoder = Decoder::with_config(&rom, config);

    if args.listing {
        let functions = cfg::find_reachable_functions(entry, &decoder)?;
        for addr in functions {
            eprint!("{}", cfg::listing(addr, &decoder)?);
            eprintln!();
        }
    }

    // Translate
    let platform = args.platform.build();
    let module = translate(&decoder, platform.as_ref(), entry, &args.module_name)
        .with_context(|| format!("Failed to translate from entry 0x{:04X}", entry))?;

    info!("Translated {} functions", module.function_count());
    let unmapped = decoder.unmapped_reads();
    if !unmapped.is_empty() {
        info!("Decoding read {} unmapped bytes as 0", unmapped.len());
    }

    // Write output
    let text = module.to_string();
    match &args.output {
        Some(path) => std::fs::write(path, text).context("Failed to write output")?,
        None => print!("{}", text),
    }

    Ok(())
}
