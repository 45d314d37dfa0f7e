//! vCPU assembly compiler CLI.
//!
//! Thin wrapper around [`vasmc::compile_file_with_config`]: read a `--optimize
//! off|on|<rule,rule,...>`-style flag set, build a `CompilerConfig`, compile,
//! and turn a `Result<(), String>` into a printed diagnostic and exit code
//! (spec.md section 6).

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process;
use vasmc::config::{CompilerConfig, OptimizeMode, RomTarget};

#[derive(Parser)]
#[command(name = "vasmc")]
#[command(about = "Compile a line-numbered SL source file to vCPU assembly", long_about = None)]
struct Cli {
    /// SL source file to compile
    input: PathBuf,

    /// Path to write the rendered assembly to
    output: PathBuf,

    /// Target ROM revision (ROM1..ROM5)
    #[arg(long, default_value = "ROM5")]
    rom: String,

    /// Peephole optimizer mode: "on", "off", or a comma-separated rule name list
    #[arg(long, default_value = "on")]
    optimize: String,

    /// Runtime macro library to resolve %includePath against and pass through
    #[arg(long)]
    include: Option<PathBuf>,

    /// Index base for DIM-declared arrays
    #[arg(long, default_value_t = 0)]
    array_base: u8,

    /// Emit the numeric-label lookup table
    #[arg(long)]
    numeric_label_lut: bool,

    /// Reserve the fixed-size TIMEDATA buffer
    #[arg(long)]
    time_data: bool,

    /// TOML file of per-rule peephole toggles, merged over the built-in
    /// defaults by rule name
    #[arg(long)]
    rules_config: Option<PathBuf>,
}

fn parse_optimize(raw: &str) -> OptimizeMode {
    match raw.to_ascii_lowercase().as_str() {
        "on" => OptimizeMode::On,
        "off" => OptimizeMode::Off,
        rules => OptimizeMode::Rules(rules.split(',').map(|s| s.trim().to_string()).collect()),
    }
}

fn main() {
    let cli = Cli::parse();

    let rom_target = match RomTarget::parse(&cli.rom) {
        Some(target) => target,
        None => {
            eprintln!("Error: unrecognised ROM target '{}'", cli.rom);
            process::exit(1);
        }
    };

    let mut config = CompilerConfig::new()
        .with_rom_target(rom_target)
        .with_optimize(parse_optimize(&cli.optimize))
        .with_array_base(cli.array_base);
    if let Some(include) = cli.include {
        config = config.with_include_path(include);
    }
    config.numeric_label_lut = cli.numeric_label_lut;
    config.time_data = cli.time_data;

    if let Some(rules_path) = cli.rules_config {
        let toml_str = match fs::read_to_string(&rules_path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Error: failed to read rules config {}: {e}", rules_path.display());
                process::exit(1);
            }
        };
        config = match config.with_rules_config(&toml_str) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        };
    }

    match vasmc::compile_file_with_config(&cli.input, &cli.output, config) {
        Ok(()) => {
            println!("Compiled {} -> {}", cli.input.display(), cli.output.display());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
