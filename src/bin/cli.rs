//! rewindlog CLI
//!
//! Offline inspection of a rewindlog data directory.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rewindlog::checkpoint::CheckpointStore;
use rewindlog::recovery::{self, RecoverCriteria};
use rewindlog::wal::{WalRepair, WalSource};
use rewindlog::{Config, MemoryStorage, RecoveryManager};
use tracing_subscriber::{fmt, EnvFilter};

/// rewindlog CLI
#[derive(Parser, Debug)]
#[command(name = "rewindlog-cli")]
#[command(about = "Inspect and maintain a rewindlog write-ahead log")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./rewindlog_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print every durable log record
    Dump,

    /// Check the WAL for corruption without modifying it
    Verify,

    /// Take a checkpoint now
    Checkpoint,

    /// Print the recovery plan without applying it (crash recovery by default)
    Plan {
        /// Restore to just before this transaction started
        #[arg(long)]
        transaction_id: Option<u64>,

        /// Restore to this timestamp (milliseconds since the Unix epoch)
        #[arg(long)]
        timestamp: Option<u64>,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rewindlog=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> rewindlog::Result<()> {
    let wal_path = args.data_dir.join("wal.log");
    let checkpoint_path = args.data_dir.join("last_checkpoint.json");

    match args.command {
        Commands::Dump => {
            for record in WalSource::new(&wal_path).iter()? {
                println!("{}", record?);
            }
        }

        Commands::Verify => {
            let report = WalRepair::verify(&wal_path)?;
            println!("records:    {}", report.records_recovered);
            println!("last lsn:   {}", report.last_lsn);
            if report.was_truncated {
                println!("torn final line (removed on next open)");
            }
            if report.was_terminated {
                println!("final line lacks its newline (added on next open)");
            }
            println!("ok");
        }

        Commands::Checkpoint => {
            let config = Config::builder().data_dir(&args.data_dir).build();
            let manager = RecoveryManager::open(config, MemoryStorage::new())?;
            let checkpoint = manager.save_checkpoint()?;
            println!(
                "checkpoint at LSN {} (active: {:?})",
                checkpoint.checkpoint_lsn, checkpoint.active_tx
            );
        }

        Commands::Plan {
            transaction_id,
            timestamp,
        } => {
            let criteria = RecoverCriteria {
                transaction_id,
                timestamp,
            };
            let mode = criteria.mode()?;
            let history = WalSource::new(&wal_path).read_all()?;
            let checkpoint = CheckpointStore::new(checkpoint_path).load()?;

            let plan = recovery::plan(&history, checkpoint.as_ref(), mode)?;
            println!(
                "{:?}: {} instructions ({} redo, {} undo)",
                plan.mode,
                plan.len(),
                plan.redo_count(),
                plan.undo_count()
            );
            for instruction in &plan.instructions {
                println!("{}", instruction);
            }
            if !plan.rolled_back.is_empty() {
                println!("rolled back: {:?}", plan.rolled_back);
            }
        }
    }

    Ok(())
}
