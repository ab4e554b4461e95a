use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use savedump::logging::{init_logging, LogLevel};
use savedump::{
    preflight, Compression, Config, DumpInspector, HostToolInspector, InventoryInspector, Pipeline,
};

/// Archive a crash dump with the binaries and debug info needed to open it.
#[derive(Debug, Parser)]
#[command(name = "savedump", version, about)]
struct Cli {
    /// Kernel crash dump or userland core file.
    #[arg(required_unless_present = "check_tools")]
    dump: Option<PathBuf>,

    /// JSON inventory describing the dump, instead of asking host tools.
    #[arg(long, value_name = "FILE")]
    inventory: Option<PathBuf>,

    /// Configuration file [default: $XDG_CONFIG_HOME/savedump/config.toml].
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Root of the build-id debug-info tree.
    #[arg(long, value_name = "DIR")]
    debug_root: Option<PathBuf>,

    #[arg(long, value_parser = parse_compression)]
    compression: Option<Compression>,

    #[arg(long, value_name = "LEVEL")]
    compression_level: Option<i32>,

    /// Parallel copy workers.
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Keep the staging tree next to the archive.
    #[arg(long)]
    keep_staging: bool,

    /// error, warn, info, debug or trace [default: warn, or RUST_LOG].
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Check that the host tools used for inspection are installed, then exit.
    #[arg(long)]
    check_tools: bool,
}

fn parse_compression(s: &str) -> std::result::Result<Compression, String> {
    s.parse()
}

fn parse_log_level(s: &str) -> std::result::Result<LogLevel, String> {
    s.parse().map_err(|err: savedump::logging::LoggingError| err.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    if cli.check_tools {
        preflight::check_host_tools()?;
        println!("[preflight] all host tools present");
        return Ok(());
    }

    let config = load_config(&cli)?;
    let Some(dump) = cli.dump else {
        anyhow::bail!("no dump given");
    };

    let inspector: Box<dyn DumpInspector> = match cli.inventory {
        Some(path) => Box::new(InventoryInspector::new(path)),
        None => {
            preflight::check_host_tools()
                .context("inspecting a dump without --inventory needs host tools")?;
            Box::new(HostToolInspector::new())
        }
    };

    eprintln!("[savedump] archiving {}", dump.display());
    let result = Pipeline::new(config, inspector)
        .run(&dump)
        .with_context(|| format!("archiving '{}'", dump.display()))?;

    if !result.report.is_empty() {
        eprintln!("[savedump] {} warning(s):", result.report.len());
        for warning in result.report.warnings() {
            eprintln!("  {warning}");
        }
    }
    eprintln!(
        "[savedump] {} files archived, sha256 {}",
        result.archived.len(),
        result.sha256
    );
    println!("{}", result.archive_path.display());
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(root) = &cli.debug_root {
        config.debug_root = root.clone();
    }
    if let Some(compression) = cli.compression {
        config.compression = compression;
    }
    if let Some(level) = cli.compression_level {
        config.compression_level = Some(level);
    }
    if let Some(jobs) = cli.jobs {
        config.copy_jobs = jobs;
    }
    if cli.keep_staging {
        config.keep_staging = true;
    }
    config.validate()?;
    Ok(config)
}
