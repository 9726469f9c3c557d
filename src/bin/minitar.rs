//! minitar command line
//!
//! ```text
//! minitar -c|-a|-t|-u|-x -f ARCHIVE [FILE...]
//! ```

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use minitar::{Archive, Config};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "minitar")]
#[command(about = "Create, append to, list, update and extract ustar archives")]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["create", "append", "list", "update", "extract"]),
))]
struct Args {
    /// Create a new archive from FILEs
    #[arg(short = 'c', long)]
    create: bool,

    /// Append FILEs to an existing archive
    #[arg(short = 'a', long)]
    append: bool,

    /// List the names stored in the archive
    #[arg(short = 't', long)]
    list: bool,

    /// Append newer copies of FILEs already in the archive
    #[arg(short = 'u', long)]
    update: bool,

    /// Extract all entries
    #[arg(short = 'x', long)]
    extract: bool,

    /// Archive path
    #[arg(short = 'f', long = "file", value_name = "ARCHIVE")]
    archive: PathBuf,

    /// Resolve FILEs against, and extract into, this directory
    #[arg(short = 'C', long = "directory", value_name = "DIR")]
    directory: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fail on headers whose checksum does not match
    #[arg(long)]
    verify: bool,

    /// Verbose output (long listing, per-file progress)
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print listings and extraction reports as JSON
    #[arg(long)]
    json: bool,

    /// Files to archive
    #[arg(value_name = "FILE")]
    files: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = &args.directory {
        config.working_dir = dir.clone();
    }
    if args.verify {
        config.verify_checksums = true;
    }

    let archive = Archive::builder(&args.archive).config(config).build();
    info!("Archive path: {:?}", archive.path());

    if args.create {
        archive
            .create(&args.files)
            .context("Archive creation failed")?;
    } else if args.append {
        archive
            .append(&args.files)
            .context("Appending to archive failed")?;
    } else if args.update {
        archive
            .update(&args.files)
            .context("Updating archive failed")?;
    } else if args.list {
        print_listing(&archive, &args)?;
    } else if args.extract {
        let report = archive.extract().context("Extraction failed")?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if args.verbose {
            for name in &report.extracted {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

fn print_listing(archive: &Archive, args: &Args) -> Result<()> {
    let entries = archive.entries().context("Listing archive failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        if args.verbose {
            println!(
                "{:04o} {}/{} {:>10} {} {}",
                entry.mode, entry.uname, entry.gname, entry.size, entry.mtime, entry.name
            );
        } else {
            println!("{}", entry.name);
        }
    }
    Ok(())
}
