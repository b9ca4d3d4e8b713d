use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "eds",
    about = "Operate a shard-based store of extended data squares",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store directory; overrides `base_path` from the config file
    #[arg(long, global = true)]
    pub base_path: Option<PathBuf>,

    /// Give up waiting after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a random square and store it
    Put(PutArgs),
    /// Decode a stored square and verify its root
    Get(RootArgs),
    /// Show the availability header of a stored square
    Header(RootArgs),
    /// Check whether a square is stored
    Has(RootArgs),
    /// List stored squares
    List,
    /// Remove a stored square
    Remove(RootArgs),
    /// Reclaim transient state of idle shards
    Gc,
}

#[derive(Args)]
pub struct PutArgs {
    /// Width of the extended square (power of two, at least 2)
    #[arg(short, long, default_value = "4")]
    pub width: usize,
    #[arg(short, long, default_value = "0")]
    pub seed: u64,
    #[arg(long, default_value = "512")]
    pub share_size: usize,
}

#[derive(Args)]
pub struct RootArgs {
    /// Data root, hex encoded
    pub root: String,
}
