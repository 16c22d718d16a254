//! Command-line driver: loads a compiled unit and runs it to completion.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use vhlrt::config::RuntimeConfig;
use vhlrt::interp::engine::Engine;
use vhlrt::loader::load_unit_from_bytes;
use vhlrt::unit::UnitKind;

#[derive(Parser)]
#[command(name = "vhlrt-driver")]
#[command(about = "Loads and runs a compiled unit")]
struct Cli {
    /// Path to the compiled unit (`<name>.vhlu`)
    library: PathBuf,

    /// Restrict file access to File1..File5
    #[arg(long)]
    safe_mode: bool,

    /// Additional directories to search when resolving inherits/imports
    #[arg(long = "search-path")]
    search_path: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let name = match cli.library.file_stem().and_then(|s| s.to_str()) {
        Some(n) => n.to_string(),
        None => {
            eprintln!("vhlrt-driver: cannot derive a unit name from {}", cli.library.display());
            return ExitCode::FAILURE;
        }
    };

    let bytes = match std::fs::read(&cli.library) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("vhlrt-driver: cannot read {}: {e}", cli.library.display());
            return ExitCode::FAILURE;
        }
    };

    let mut search_path = cli.search_path;
    if let Some(parent) = cli.library.parent() {
        search_path.push(parent.to_path_buf());
    }
    let config = RuntimeConfig::new().with_safe_mode(cli.safe_mode).with_search_path(search_path);
    let mut engine = Engine::new(config);

    let unit_id = match load_unit_from_bytes(&mut engine, &name, &bytes) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("vhlrt-driver: {e}");
            return ExitCode::FAILURE;
        }
    };

    if engine.units.get(unit_id).kind != UnitKind::Program {
        eprintln!("vhlrt-driver: {name} is not a program unit");
        return ExitCode::FAILURE;
    }

    if let Err(e) = engine.run_body(unit_id) {
        eprintln!("vhlrt-driver: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = engine.run_scheduler() {
        eprintln!("vhlrt-driver: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
