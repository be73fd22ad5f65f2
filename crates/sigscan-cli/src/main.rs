mod commands;
mod config;
mod logging;
mod paths;

use std::{path::PathBuf, process::ExitCode};

use clap::{Args, Parser, Subcommand};
use eyre::Result;
use owo_colors::OwoColorize;
use sigscan::scan::{ScanAlignment, ScanHint, ScanMode};
use tracing::debug;

use commands::{Hit, ScanOptions};
use config::Config;
use logging::setup_logging;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_CARGO_TARGET_TRIPLE"),
    ", built ",
    env!("VERGEN_BUILD_TIMESTAMP"),
    ")"
);

/// Find IDA-style byte signatures in files and in loaded modules
#[derive(Debug, Parser)]
#[command(name = "sigscan", version = VERSION, about)]
struct Cli {
    /// config file to use instead of `<config dir>/sigscan/sigscan.toml`
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// log filter, e.g. `debug` or `sigscan=trace`. SIGSCAN_LOG takes precedence
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check a signature and show how it is understood
    Parse {
        signature: String,
    },

    /// Scan a file, or one section of an executable file
    Scan {
        file: PathBuf,
        signature: String,

        /// only scan this section, addresses are then virtual addresses
        #[arg(long, short)]
        section: Option<String>,

        #[command(flatten)]
        options: ScanArgs,
    },

    /// List the sections of an executable file
    Sections {
        file: PathBuf,
    },

    /// Scan a module loaded into this process
    #[command(name = "self")]
    SelfScan {
        signature: String,

        /// module file name, the executable itself if not given
        #[arg(long, short)]
        module: Option<String>,

        #[arg(long, short, default_value = ".text")]
        section: String,

        #[command(flatten)]
        options: ScanArgs,
    },
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// match start alignment [x1, x16]
    #[arg(long)]
    align: Option<ScanAlignment>,

    /// what the data is [none, x86-64]
    #[arg(long)]
    hint: Option<ScanHint>,

    /// backend [auto, single, avx2]
    #[arg(long)]
    mode: Option<ScanMode>,

    /// print every match, not only the first
    #[arg(long, short)]
    all: bool,
}

impl ScanArgs {
    fn merge(&self, config: &Config) -> ScanOptions {
        ScanOptions {
            alignment: self.align.unwrap_or(config.scan.alignment),
            hint: self.hint.unwrap_or(config.scan.hint),
            mode: self.mode.unwrap_or(config.scan.mode),
            all: self.all,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => paths::get_config_filepath()?,
    };

    let config = Config::load(&config_path)?;
    setup_logging(&config, cli.log.as_deref())?;
    debug!(path = %config_path.display(), ?config, "loaded config");

    run(cli.command, &config)
}

fn run(command: Command, config: &Config) -> Result<ExitCode> {
    match command {
        Command::Parse { signature } => {
            let signature = commands::parse_signature(&signature)?;
            let elements = signature.elements();

            let known = elements.iter().filter(|e| e.is_byte()).count();
            let wildcards = elements.iter().filter(|e| e.is_wildcard()).count();

            println!("{}", signature.green());
            println!(
                "{} elements: {known} known, {wildcards} wildcard, {} partial",
                elements.len(),
                elements.len() - known - wildcards
            );
        }

        Command::Scan {
            file,
            signature,
            section,
            options,
        } => {
            let signature = commands::parse_signature(&signature)?;
            let options = options.merge(config);

            let hits = commands::scan_file(&file, &signature, section.as_deref(), options)?;
            return Ok(report(&hits));
        }

        Command::Sections { file } => {
            let image = commands::sections(&file)?;

            println!("{} ({})", file.display(), image.format().cyan());
            for section in image.sections() {
                let file_range = match &section.file_range {
                    Some(range) => format!("{:#010x}..{:#010x}", range.start, range.end),
                    None => "-".to_owned(),
                };

                println!(
                    "  {:<24} {:#018x} {:>10} {}",
                    section.name.bold(),
                    section.address,
                    section.size,
                    file_range.dimmed()
                );
            }
        }

        Command::SelfScan {
            signature,
            module,
            section,
            options,
        } => {
            let signature = commands::parse_signature(&signature)?;
            let options = options.merge(config);

            let Some((module, hits)) =
                commands::scan_module(module.as_deref(), &section, &signature, options)?
            else {
                println!("{}", "module is not loaded".red());
                return Ok(ExitCode::FAILURE);
            };

            println!("{}", module.cyan());
            for hit in &hits {
                println!(
                    "{} {}",
                    format!("{:#x}", hit.address).green(),
                    format!("{}+{:#x}", module.name(), hit.address - module.base()).dimmed()
                );
            }

            if hits.is_empty() {
                println!("{}", "no match".red());
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Print file scan results, failing like grep when nothing matched
fn report(hits: &[Hit]) -> ExitCode {
    for hit in hits {
        let file_offset = match hit.file_offset {
            Some(offset) => format!("file {offset:#x}"),
            None => String::new(),
        };

        println!(
            "{} {} {}",
            format!("{:#x}", hit.address).green(),
            format!("+{:#x}", hit.offset).dimmed(),
            file_offset.dimmed()
        );
    }

    if hits.is_empty() {
        println!("{}", "no match".red());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "sigscan", "self", "48 8B", "--align", "x16", "--mode", "single", "--all",
        ])
        .unwrap();

        let Command::SelfScan {
            options, section, ..
        } = cli.command
        else {
            panic!("wrong subcommand");
        };

        let config = Config::default();
        let options = options.merge(&config);

        assert_eq!(section, ".text");
        assert_eq!(options.alignment, ScanAlignment::X16);
        assert_eq!(options.mode, ScanMode::Single);
        assert_eq!(options.hint, config.scan.hint);
        assert!(options.all);
    }

    #[test]
    fn rejects_unknown_alignment() {
        assert!(Cli::try_parse_from(["sigscan", "scan", "file", "48", "--align", "x3"]).is_err());
    }
}
