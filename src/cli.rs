//! Command-line entry point overrides (spec.md §7, "Invocation").

use std::path::PathBuf;

use clap::Parser;

use crate::config::ReplicationMode;

#[derive(Debug, Parser)]
#[command(name = "redo-replicator", about = "Tails a redo log and streams row-level change events")]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "OLR_CONFIG")]
    pub config: PathBuf,

    /// Overrides the configured database name.
    #[arg(long)]
    pub database: Option<String>,

    /// Overrides the configured replication mode.
    #[arg(long, value_enum)]
    pub mode: Option<CliMode>,

    /// Disables block-checksum and sequence verification, overriding the
    /// configured value.
    #[arg(long)]
    pub disable_checks: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliMode {
    ArchiveOnly,
    Online,
}

impl From<CliMode> for ReplicationMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::ArchiveOnly => ReplicationMode::ArchiveOnly,
            CliMode::Online => ReplicationMode::Online,
        }
    }
}
