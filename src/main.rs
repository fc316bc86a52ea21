mod cmd;
mod config;
mod error;
mod image;
mod mounts;
mod ui;
mod util;

#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cmd::make::{resolve_request, run_make, MakeOptions};
use crate::config::ConfigFile;
use crate::ui::UX;

#[derive(Parser, Debug)]
#[command(
    name = "vol_imager",
    version,
    about = "Bundle a mounted volume into a bootable, loop-mountable ext3 image"
)]
struct Cli {
    /// Config file (TOML or YAML); defaults to /etc/vol_imager.toml when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level and stream tool output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress progress output
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build an image from a volume
    Make(MakeArgs),
    /// Unmount a scratch mountpoint left behind by an interrupted build
    Release {
        #[arg(long)]
        scratch: Option<PathBuf>,
    },
    /// Check the host for required tools and a free scratch mountpoint
    Doctor {
        #[arg(long)]
        scratch: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct MakeArgs {
    /// Volume to copy from (default: /)
    #[arg(long, short = 'v')]
    volume: Option<PathBuf>,

    /// Image file to create
    #[arg(long, short = 'i')]
    image: Option<PathBuf>,

    /// Image size in MiB
    #[arg(long, short = 's')]
    size: Option<u64>,

    /// Absolute path to leave out of the copy (repeatable)
    #[arg(long, short = 'e')]
    exclude: Vec<PathBuf>,

    /// `legacy`, `default`, `none`, or a file holding a literal fstab
    #[arg(long)]
    fstab: Option<String>,

    /// Scratch mountpoint for the image
    #[arg(long)]
    scratch: Option<PathBuf>,

    /// Do not try to preserve extended attributes
    #[arg(long)]
    no_xattrs: bool,
}

impl From<MakeArgs> for MakeOptions {
    fn from(args: MakeArgs) -> Self {
        MakeOptions {
            volume: args.volume,
            image: args.image,
            size_mb: args.size,
            exclude: args.exclude,
            fstab: args.fstab,
            scratch: args.scratch,
            no_xattrs: args.no_xattrs,
        }
    }
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
    {
        eprintln!("failed to initialise logging: {e}");
    }
}

fn main() {
    let cli = Cli::parse();
    let loaded = ConfigFile::discover(cli.config.as_deref());
    let (debug, quiet) = match &loaded {
        Ok(cfg) => (
            cli.debug || cfg.runtime.debug,
            cli.quiet || cfg.runtime.quiet,
        ),
        Err(_) => (cli.debug, cli.quiet),
    };
    init_tracing(debug);
    let ui = UX::new(quiet);

    if let Err(e) = dispatch(&ui, cli, loaded, debug) {
        ui.error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn dispatch(ui: &UX, cli: Cli, loaded: Result<ConfigFile>, debug: bool) -> Result<()> {
    match cli.command {
        Commands::Make(args) => {
            let cfg = loaded?;
            debug!(config = %cfg.path.display(), "configuration loaded");
            let request = resolve_request(&args.into(), &cfg)?;
            run_make(ui, request, debug)
        }
        Commands::Release { scratch } => {
            let cfg = loaded?;
            let scratch = scratch.unwrap_or(cfg.image.scratch_mountpoint);
            cmd::release::run_release(ui, &scratch, debug)
        }
        // doctor reports config problems itself
        Commands::Doctor { scratch } => {
            cmd::doctor::run_doctor(ui, cli.config.as_deref(), scratch.as_deref())
        }
    }
}
