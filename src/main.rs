//! Wires the pipeline's components together (spec.md §2, §5): one thread
//! each for the Replicator (which drives the Reader inline), the Parser
//! (which runs the Builder synchronously as its callee), and the Writer,
//! coordinated through a single [`ClockGuardedShutdown`] and woken by a
//! background signal-handling thread.

mod cli;
mod config;
mod trace;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser as _;
use redo_builder::{Builder, FrameEncoder, JsonEncoder, TaggedBinaryEncoder};
use redo_checkpoint::{DirectoryStateStore, Metadata, StateStore};
use redo_common::ClockGuardedShutdown;
use redo_memory::MemoryManager;
use redo_parser::{Parser as RedoParser, Pump};
use redo_reader::RingBuffer;
use redo_replicator::{IncarnationSink, Mode, Replicator, ReplicatorConfig};
use redo_txn::TransactionBuffer;
use redo_writer::{FileTransport, IncarnationHandle, Writer};
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::{Config, OutputFormat, ReplicationMode};

/// Adapts the Writer's [`IncarnationHandle`] to `redo-replicator`'s
/// [`IncarnationSink`] seam. Neither crate can implement the other's trait
/// for the other's type (orphan rule), so the binary that wires both is
/// where the adapter belongs (spec.md §9, "Cyclic references").
struct WriterIncarnationSink(IncarnationHandle);

impl IncarnationSink for WriterIncarnationSink {
    fn set_incarnation(&self, resetlogs: u32, activation: u32) {
        self.0.set(resetlogs, activation);
    }
}

fn main() {
    trace::init();

    let cli = Cli::parse();
    let outcome = load_config(&cli).and_then(run);

    if let Err(err) = outcome {
        error!(%err, "fatal error");
        eprintln!("redo-replicator: {err:#}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config).context("loading configuration")?;
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if cli.disable_checks {
        config.checks_enabled = false;
    }
    Ok(config)
}

/// Builds every component, spawns the Replicator/Parser/Writer threads,
/// and blocks until a shutdown signal drains them (spec.md §5).
fn run(config: Config) -> Result<()> {
    let manager = Arc::new(MemoryManager::new(config.memory.min_by_module(), config.memory.max_chunks));
    let shutdown = ClockGuardedShutdown::new();

    let store: Arc<dyn StateStore> =
        Arc::new(DirectoryStateStore::new(&config.state_dir).context("opening checkpoint state directory")?);
    let metadata = Arc::new(Metadata::load(config.database.clone(), store).context("loading durable checkpoint")?);

    let reader_ring = Arc::new(RingBuffer::new(Arc::clone(&manager), config.reader_ring_bytes));

    let mut txn_buffer = TransactionBuffer::new(
        Arc::clone(&manager),
        config.swap_dir.clone(),
        config.transaction_size_max,
        config.oversize_policy.into(),
    );

    let encoder: Box<dyn FrameEncoder> = match config.output_format {
        OutputFormat::Json => Box::new(JsonEncoder),
        OutputFormat::TaggedBinary => Box::new(TaggedBinaryEncoder),
    };
    let mut builder = Builder::new(config.schema(), encoder, Arc::clone(&manager), config.builder_ring_bytes);
    let output_ring = builder.ring();

    let transport = FileTransport::open(&config.transport_outbound_path, &config.transport_inbound_path)
        .context("opening client transport files")?;
    let writer = Writer::new(
        config.database.clone(),
        output_ring,
        Arc::clone(&metadata),
        Box::new(transport),
        config.writer_queue_size,
        config.writer_checkpoint_interval(),
    );
    let incarnation_sink: Arc<dyn IncarnationSink> = Arc::new(WriterIncarnationSink(writer.incarnation_handle()));

    let replicator_mode = match config.mode {
        ReplicationMode::ArchiveOnly => Mode::ArchiveOnly,
        ReplicationMode::Online => Mode::Online,
    };
    let replicator_config = ReplicatorConfig {
        database: config.database.clone(),
        mode: replicator_mode,
        online_dir: config.online_dir.clone(),
        archive_dir: config.archive_dir.clone(),
        log_archive_format: config.log_archive_format.clone(),
        compat_version: config.compat_version,
        checks_enabled: config.checks_enabled,
        verify_delay: config.verify_delay(),
        redo_copy_dir: config.redo_copy_dir.clone(),
        poll_interval: config.poll_interval(),
    };
    let mut replicator = Replicator::new(
        replicator_config,
        Arc::clone(&metadata),
        Arc::clone(&reader_ring),
        shutdown.clone(),
        incarnation_sink,
        config.incarnation_list(),
        config.start_sequence,
    );

    install_signal_handler(shutdown.clone());

    let block_size = config.block_size as usize;
    let parser_ring = Arc::clone(&reader_ring);
    let parser_shutdown = shutdown.clone();
    let parser_handle = std::thread::Builder::new()
        .name("redo-parser".into())
        .spawn(move || {
            let mut pump = Pump::new(block_size);
            let mut analyzer = RedoParser::new();
            pump.run(&parser_ring, &mut analyzer, &mut txn_buffer, &mut builder, &parser_shutdown);
        })
        .context("spawning parser thread")?;

    let replicator_shutdown = shutdown.clone();
    let replicator_handle = std::thread::Builder::new()
        .name("redo-replicator-loop".into())
        .spawn(move || {
            if let Err(err) = replicator.run() {
                error!(%err, "replicator thread failed");
                replicator_shutdown.hard_shutdown();
            }
        })
        .context("spawning replicator thread")?;

    let writer_shutdown = shutdown.clone();
    let writer_handle = std::thread::Builder::new()
        .name("redo-writer".into())
        .spawn(move || {
            if let Err(err) = writer.run(&writer_shutdown) {
                error!(%err, "writer thread failed");
                writer_shutdown.hard_shutdown();
            }
        })
        .context("spawning writer thread")?;

    info!(database = %config.database, "redo-replicator started");

    for (name, handle) in [("parser", parser_handle), ("replicator", replicator_handle), ("writer", writer_handle)] {
        if handle.join().is_err() {
            warn!(thread = name, "thread panicked");
            shutdown.hard_shutdown();
        }
    }

    info!("redo-replicator stopped");
    Ok(())
}

/// The first Ctrl-C requests a soft shutdown (spec.md §4.9: finish emitting
/// the transaction in flight, then stop); a second forces a hard shutdown.
/// Runs on a tiny dedicated `tokio` runtime since `tokio::signal` is the
/// only portable SIGINT hook in the dependency set; every other thread in
/// the pipeline is a plain OS thread (spec.md §5).
fn install_signal_handler(shutdown: ClockGuardedShutdown) {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                error!(%err, "failed to start signal-handling runtime, Ctrl-C will not be caught");
                return;
            }
        };
        rt.block_on(async {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                if shutdown.is_soft() {
                    info!("second interrupt received, forcing shutdown");
                    shutdown.hard_shutdown();
                    return;
                }
                info!("interrupt received, finishing in-flight transactions before stopping");
                shutdown.soft_shutdown();
            }
        });
    });
}
