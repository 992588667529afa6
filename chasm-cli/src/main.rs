use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chasm::{compile, Options};
use clap::Parser;
use tracing::Level;


#[derive(Parser)]
#[command(version, about = "Assembles Octo source into a CHIP-8 image", long_about = None)]
struct Args {
    /// Source file (default: stdin)
    input: Option<PathBuf>,

    /// Output file (default: the input with a `.ch8` extension, or stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Predeclared constants (repeatable)
    #[arg(short = 'D', long, value_name = "NAME=VALUE", value_parser = parse_define)]
    define: Vec<(String, i64)>,

    /// Write a listing of labels, breakpoints and monitors
    #[arg(long, value_name = "FILE")]
    symbols: Option<PathBuf>,

    /// Address of the first emitted byte
    #[arg(long, value_parser = parse_address, default_value = "0x200")]
    origin: u16,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::WARN)]
    log_level: Level,
}

/// Decimal, `0x` hexadecimal or `0b` binary, optionally negative.
fn parse_int(s: &str) -> Result<i64, String> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x") {
        (16, hex)
    } else if let Some(bin) = digits.strip_prefix("0b") {
        (2, bin)
    } else {
        (10, digits)
    };
    let value = i64::from_str_radix(digits, radix).map_err(|e| format!("`{s}`: {e}"))?;
    Ok(if negative { -value } else { value })
}

fn parse_define(s: &str) -> Result<(String, i64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("`{s}`: expected NAME=VALUE"))?;
    if name.is_empty() {
        return Err(format!("`{s}`: empty name"));
    }
    Ok((name.to_owned(), parse_int(value)?))
}

fn parse_address(s: &str) -> Result<u16, String> {
    let value = parse_int(s)?;
    u16::try_from(value)
        .ok()
        .filter(|&a| a < 0x1000)
        .ok_or_else(|| format!("`{s}`: not an address below 0x1000"))
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let src = match &args.input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?,
        None => {
            let mut src = String::new();
            io::stdin()
                .read_to_string(&mut src)
                .context("cannot read stdin")?;
            src
        }
    };
    let options = Options {
        origin: args.origin,
        defines: args.define,
        ..Options::default()
    };

    tracing::info!(bytes = src.len(), defines = options.defines.len(), "compiling");
    let rom = compile(&src, &options)?;
    tracing::info!(bytes = rom.bytes.len(), "compiled");

    let output = args
        .output
        .or_else(|| args.input.as_ref().map(|path| path.with_extension("ch8")));
    match output {
        Some(path) => {
            anyhow::ensure!(
                args.input.as_ref() != Some(&path),
                "output would overwrite the input {}",
                path.display()
            );
            fs::write(&path, &rom.bytes)
                .with_context(|| format!("cannot write {}", path.display()))?;
        }
        None => io::stdout()
            .lock()
            .write_all(&rom.bytes)
            .context("cannot write stdout")?,
    }
    if let Some(path) = &args.symbols {
        fs::write(path, rom.symbols())
            .with_context(|| format!("cannot write {}", path.display()))?;
    }
    Ok(())
}
