//! Pipeline configuration, deserialized from JSON and merged with CLI
//! overrides in `main` (spec.md §1.1 "Configuration"). Mirrors
//! `DiskBufferConfig`'s per-field-doc-comment style: each knob documents its
//! unit and what it gates, defaults live as named constants rather than
//! inline literals.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use redo_format::charset::CharacterSet;
use redo_format::metadata::{ColumnDef, ColumnKind, InMemorySchema, TableDef};
use redo_memory::Module;
use redo_replicator::DbIncarnation;
use redo_common::Scn;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    Read { path: PathBuf, source: std::io::Error },
    #[snafu(display("malformed config: {source}"))]
    Parse { source: serde_json::Error },
}

const DEFAULT_MEMORY_MAX_CHUNKS: usize = 512;
const DEFAULT_READER_RING_CHUNKS: u64 = 16;
const DEFAULT_BUILDER_RING_CHUNKS: u64 = 16;
const DEFAULT_TRANSACTION_SIZE_MAX: u64 = 1024 * 1024 * 1024;
const DEFAULT_COMPAT_VERSION: u32 = 0x1300_0500;
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_VERIFY_DELAY_MS: u64 = 0;
const DEFAULT_WRITER_QUEUE_SIZE: usize = 4096;
const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    ArchiveOnly,
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Json,
    TaggedBinary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnOversizePolicy {
    Skip,
    Fatal,
}

impl From<TxnOversizePolicy> for redo_txn::OversizePolicy {
    fn from(policy: TxnOversizePolicy) -> Self {
        match policy {
            TxnOversizePolicy::Skip => redo_txn::OversizePolicy::Skip,
            TxnOversizePolicy::Fatal => redo_txn::OversizePolicy::Fatal,
        }
    }
}

/// Memory-manager sizing (spec.md §4.1): a global chunk budget plus optional
/// per-module minimums that must stay satisfiable even once every other
/// module has saturated the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Total `CHUNK_SIZE` chunks the manager may hand out across all modules.
    #[serde(default = "default_memory_max_chunks")]
    pub max_chunks: usize,
    /// Per-module reserved minimum, keyed by `"reader"`, `"parser"`,
    /// `"transactions"`, `"builder"`, `"writer"`, or `"misc"`.
    #[serde(default)]
    pub min_chunks: HashMap<String, usize>,
}

fn default_memory_max_chunks() -> usize {
    DEFAULT_MEMORY_MAX_CHUNKS
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig { max_chunks: DEFAULT_MEMORY_MAX_CHUNKS, min_chunks: HashMap::new() }
    }
}

impl MemoryConfig {
    pub fn min_by_module(&self) -> HashMap<Module, usize> {
        self.min_chunks.iter().filter_map(|(name, count)| Some((module_from_name(name)?, *count))).collect()
    }
}

fn module_from_name(name: &str) -> Option<Module> {
    match name {
        "reader" => Some(Module::Reader),
        "parser" => Some(Module::Parser),
        "transactions" => Some(Module::Transactions),
        "builder" => Some(Module::Builder),
        "writer" => Some(Module::Writer),
        "misc" => Some(Module::Misc),
        _ => None,
    }
}

/// One `DbIncarnation` entry, as it would be supplied by whatever catalog
/// loader is wired in front of this binary (spec.md §1, "database-metadata
/// loader ... out of scope" — here a static config list stands in for it,
/// same as `InMemorySchema` stands in for a live catalog).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncarnationConfig {
    pub incarnation: u32,
    pub resetlogs_scn: u64,
    #[serde(default)]
    pub prior_resetlogs_scn: u64,
    pub status: String,
    pub resetlogs: u32,
    #[serde(default)]
    pub prior_incarnation: u32,
}

impl From<&IncarnationConfig> for DbIncarnation {
    fn from(c: &IncarnationConfig) -> Self {
        DbIncarnation::new(
            c.incarnation,
            Scn::new(c.resetlogs_scn),
            Scn::new(c.prior_resetlogs_scn),
            c.status.clone(),
            c.resetlogs,
            c.prior_incarnation,
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKindConfig {
    Number,
    Varchar,
    Date,
    Timestamp,
    TimestampTz,
    Raw,
}

impl From<ColumnKindConfig> for ColumnKind {
    fn from(kind: ColumnKindConfig) -> Self {
        match kind {
            ColumnKindConfig::Number => ColumnKind::Number,
            ColumnKindConfig::Varchar => ColumnKind::Varchar,
            ColumnKindConfig::Date => ColumnKind::Date,
            ColumnKindConfig::Timestamp => ColumnKind::Timestamp,
            ColumnKindConfig::TimestampTz => ColumnKind::TimestampTz,
            ColumnKindConfig::Raw => ColumnKind::Raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub col_no: u16,
    pub name: String,
    pub kind: ColumnKindConfig,
    #[serde(default)]
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub obj: u32,
    pub owner: String,
    pub name: String,
    pub columns: Vec<ColumnConfig>,
}

impl From<&TableConfig> for TableDef {
    fn from(t: &TableConfig) -> Self {
        TableDef {
            obj: t.obj,
            owner: t.owner.clone(),
            name: t.name.clone(),
            columns: t
                .columns
                .iter()
                .map(|c| ColumnDef {
                    col_no: c.col_no,
                    name: c.name.clone(),
                    kind: c.kind.into(),
                    charset: CharacterSet::Utf8,
                    nullable: c.nullable,
                })
                .collect(),
        }
    }
}

fn default_compat_version() -> u32 {
    DEFAULT_COMPAT_VERSION
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_verify_delay_ms() -> u64 {
    DEFAULT_VERIFY_DELAY_MS
}
fn default_writer_queue_size() -> usize {
    DEFAULT_WRITER_QUEUE_SIZE
}
fn default_checkpoint_interval_ms() -> u64 {
    DEFAULT_CHECKPOINT_INTERVAL_MS
}
fn default_transaction_size_max() -> u64 {
    DEFAULT_TRANSACTION_SIZE_MAX
}
fn default_reader_ring_bytes() -> u64 {
    DEFAULT_READER_RING_CHUNKS * redo_common::constants::CHUNK_SIZE as u64
}
fn default_builder_ring_bytes() -> u64 {
    DEFAULT_BUILDER_RING_CHUNKS * redo_common::constants::CHUNK_SIZE as u64
}
fn default_checks_enabled() -> bool {
    true
}
fn default_block_size() -> u32 {
    512
}
fn default_output_format() -> OutputFormat {
    OutputFormat::Json
}
fn default_oversize_policy() -> TxnOversizePolicy {
    TxnOversizePolicy::Skip
}

/// The pipeline's full configuration. Only enough of a schema exists here to
/// parametrize the core pipeline for tests and this example binary — full
/// field validation and JSON-schema generation are out of scope (spec.md §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The database name the Replicator, Writer, and checkpoint store all
    /// key their state under.
    pub database: String,

    pub mode: ReplicationMode,

    /// Required when `mode` is `online`; the directory holding the
    /// currently-active (non-archived) redo log files.
    #[serde(default)]
    pub online_dir: Option<PathBuf>,

    /// Directory holding archived redo log files.
    pub archive_dir: PathBuf,

    /// `strings`-style filename pattern (`%s`/`%S`/`%t`/`%T`/`%r`/`%a`/`%d`/
    /// `%h` wildcards) the Replicator matches archive filenames against.
    pub log_archive_format: String,

    /// The 4-byte compatibility version every opened log file's header must
    /// fall within one of the hard-coded ranges for (spec.md §6).
    #[serde(default = "default_compat_version")]
    pub compat_version: u32,

    /// The database's redo block size, one of `VALID_BLOCK_SIZES` (spec.md
    /// §3). Every file opened for this database is expected to declare the
    /// same size; the pipeline uses it to strip the 14-byte block header the
    /// Reader leaves intact on each published block.
    #[serde(default = "default_block_size")]
    pub block_size: u32,

    /// Disables block-checksum and sequence validation when false — an
    /// escape hatch for known-bad but still-usable log files (spec.md §7,
    /// `disable-checks`).
    #[serde(default = "default_checks_enabled")]
    pub checks_enabled: bool,

    /// How long a freshly-read online-log block is held back before being
    /// published, to guard against reading a block the database is still
    /// overwriting (spec.md §4.2, "Header reload" / verification delay).
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,

    /// If set, every redo block read is also appended to a mirror file
    /// under this directory (spec.md §4.2, "redo-copy mirror").
    #[serde(default)]
    pub redo_copy_dir: Option<PathBuf>,

    /// How long the Replicator sleeps between file-selection and
    /// end-of-file polling attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// The log file sequence the Replicator starts selecting from. A prior
    /// checkpoint fixes `scn`/`idx`/`resetlogs`/`activation` but not which
    /// physical file to open next, since the sequence isn't part of the
    /// durable checkpoint tuple (spec.md §3 "Checkpoint").
    #[serde(default)]
    pub start_sequence: u32,

    /// Directory the durable checkpoint is written to (spec.md §4.8).
    pub state_dir: PathBuf,

    /// Directory `TransactionBuffer` swaps cold transaction pages to
    /// (spec.md §4.1, §4.4).
    pub swap_dir: PathBuf,

    #[serde(default)]
    pub memory: MemoryConfig,

    /// Byte budget of the Reader/Parser ring buffer (spec.md §4.2).
    #[serde(default = "default_reader_ring_bytes")]
    pub reader_ring_bytes: u64,

    /// Byte budget of the Builder/Writer output ring (spec.md §4.5).
    #[serde(default = "default_builder_ring_bytes")]
    pub builder_ring_bytes: u64,

    /// Per-transaction byte ceiling before `oversize_policy` applies
    /// (spec.md §4.4).
    #[serde(default = "default_transaction_size_max")]
    pub transaction_size_max: u64,

    #[serde(default = "default_oversize_policy")]
    pub oversize_policy: TxnOversizePolicy,

    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,

    /// Path `FileTransport` appends outbound frames to.
    pub transport_outbound_path: PathBuf,

    /// Path `FileTransport` reads client acknowledgments from.
    pub transport_inbound_path: PathBuf,

    #[serde(default = "default_writer_queue_size")]
    pub writer_queue_size: usize,

    #[serde(default = "default_checkpoint_interval_ms")]
    pub writer_checkpoint_interval_ms: u64,

    /// Known incarnations, for resetlogs-change detection (spec.md §4.7).
    #[serde(default)]
    pub incarnations: Vec<IncarnationConfig>,

    /// A static schema snapshot, standing in for a live catalog loader
    /// (spec.md §1 Non-goals; spec.md §2.1 `SchemaProvider`).
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(path).context(ReadSnafu { path: path.to_path_buf() })?;
        serde_json::from_str(&raw).context(ParseSnafu)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn writer_checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.writer_checkpoint_interval_ms)
    }

    pub fn schema(&self) -> InMemorySchema {
        self.tables.iter().fold(InMemorySchema::new(), |schema, table| schema.with_table(table.into()))
    }

    pub fn incarnation_list(&self) -> Vec<DbIncarnation> {
        self.incarnations.iter().map(DbIncarnation::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_archive_only_config() {
        let json = r#"{
            "database": "orcl",
            "mode": "archive_only",
            "archive_dir": "/data/arch",
            "log_archive_format": "arch_%t_%s.arc",
            "state_dir": "/data/state",
            "swap_dir": "/data/swap",
            "transport_outbound_path": "/tmp/out",
            "transport_inbound_path": "/tmp/in"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.database, "orcl");
        assert_eq!(config.mode, ReplicationMode::ArchiveOnly);
        assert_eq!(config.compat_version, DEFAULT_COMPAT_VERSION);
        assert!(config.online_dir.is_none());
    }

    #[test]
    fn memory_config_maps_module_names() {
        let mut min_chunks = HashMap::new();
        min_chunks.insert("reader".to_string(), 4usize);
        min_chunks.insert("nonsense".to_string(), 9usize);
        let memory = MemoryConfig { max_chunks: 64, min_chunks };
        let mapped = memory.min_by_module();
        assert_eq!(mapped.get(&Module::Reader), Some(&4));
        assert_eq!(mapped.len(), 1);
    }
}
