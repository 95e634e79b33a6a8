use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nxt-loader")]
#[command(about = "NXT brick flasher CLI (SAM-BA boot ROM)")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Flash a raw firmware image to a brick in SAM-BA boot mode.
    Flash(FlashArgs),

    /// Dump flash pages to a file.
    Read(ReadArgs),

    /// Show boot ROM facts for a SAM-BA target.
    Info(InfoArgs),

    /// Query the display name of a brick running its firmware.
    Name(NameArgs),

    /// List bricks currently in SAM-BA boot mode.
    List(ListArgs),
}

#[derive(Parser)]
pub struct FlashArgs {
    /// Path to the raw firmware image.
    pub image: PathBuf,

    /// Path to the flash-writer routine uploaded into RAM.
    #[arg(long)]
    pub helper: PathBuf,

    /// Serial port of the SAM-BA target (e.g. /dev/ttyACM0 or COM6).
    #[arg(long)]
    pub port: Option<String>,

    /// Wait for a SAM-BA target to appear.
    #[arg(long)]
    pub wait: bool,

    /// Max time to wait for a target (0 = forever).
    #[arg(long, default_value_t = 0)]
    pub wait_timeout_ms: u64,

    /// First flash page to program.
    #[arg(long, default_value_t = 0)]
    pub start_page: u32,

    /// Leave the lock regions as they are.
    #[arg(long)]
    pub no_unlock: bool,

    /// Read the programmed range back and compare it against the image.
    #[arg(long)]
    pub verify: bool,

    /// Do not boot the firmware after programming.
    #[arg(long)]
    pub no_reboot: bool,

    /// Validate inputs and target selection without flashing.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit JSON line events to stdout.
    #[arg(long)]
    pub json: bool,

    /// Reduce output (only errors).
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct ReadArgs {
    /// Output file for the dumped pages.
    pub out: PathBuf,

    /// Serial port of the SAM-BA target.
    #[arg(long)]
    pub port: Option<String>,

    /// Wait for a SAM-BA target to appear.
    #[arg(long)]
    pub wait: bool,

    /// Max time to wait for a target (0 = forever).
    #[arg(long, default_value_t = 0)]
    pub wait_timeout_ms: u64,

    /// First flash page to read.
    #[arg(long, default_value_t = 0)]
    pub start_page: u32,

    /// Number of pages to read.
    #[arg(long)]
    pub pages: u32,

    /// Emit JSON line events to stdout.
    #[arg(long)]
    pub json: bool,

    /// Reduce output (only errors).
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct InfoArgs {
    /// Serial port of the SAM-BA target.
    #[arg(long)]
    pub port: Option<String>,

    /// Wait for a SAM-BA target to appear.
    #[arg(long)]
    pub wait: bool,

    /// Max time to wait for a target (0 = forever).
    #[arg(long, default_value_t = 0)]
    pub wait_timeout_ms: u64,

    /// Emit JSON output.
    #[arg(long)]
    pub json: bool,

    /// More logs to stderr.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct NameArgs {
    /// Serial port of a brick running its firmware (e.g. a Bluetooth
    /// RFCOMM port).
    #[arg(long)]
    pub port: String,

    /// Emit JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ListArgs {
    /// Emit JSON line output.
    #[arg(long)]
    pub json: bool,
}
