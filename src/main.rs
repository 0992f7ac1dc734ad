//! shard-master - Coordinator for a sharded search cluster
//!
//! Entry point for the daemon.

use anyhow::{Context, Result};
use clap::Parser;
use shard_master::client::{ClientListener, Request, SessionContext};
use shard_master::cluster::{KmerSearcher, LocalCluster, WorkerNode};
use shard_master::command_queue::CommandQueue;
use shard_master::config::{CliArgs, MasterConfig};
use shard_master::shard::{Database, DatabaseCatalog};
use shard_master::summary::print_header;
use shard_master::{Master, MasterContext, MasterSettings};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();
    setup_logging(args.verbose)?;

    let config = MasterConfig::from_args(args).context("Invalid configuration")?;

    let databases = config
        .databases
        .iter()
        .map(|path| Database::open(path).with_context(|| format!("Failed to load {}", path.display())))
        .collect::<Result<Vec<_>>>()?;
    let databases = Arc::new(databases);

    if config.show_summary {
        print_header(
            &config.client_addr(),
            config.worker_count,
            config.num_shards,
            &databases,
        );
    }

    // Worker nodes
    let (cluster, links) = LocalCluster::new(config.worker_count);
    let searcher = Arc::new(KmerSearcher::new(config.kmer, 2));
    let workers = links
        .into_iter()
        .map(|link| {
            WorkerNode::new(link, Arc::clone(&databases), searcher.clone(), config.num_shards).spawn()
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to start worker nodes")?;

    // Client intake
    let queue = Arc::new(CommandQueue::new());
    let session_ctx = SessionContext {
        queue: Arc::clone(&queue),
        catalog: Arc::new(DatabaseCatalog::from_databases(&databases)),
    };
    let listener = ClientListener::bind(config.client_addr(), session_ctx)
        .with_context(|| format!("Failed to bind client port {}", config.client_addr()))?;
    listener.spawn().context("Failed to start client listener")?;

    // Interrupt queues a shutdown like a client would
    let signal_queue = Arc::clone(&queue);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        signal_queue.push(Request::shutdown());
    })
    .context("Failed to set signal handler")?;

    let ctx = MasterContext::new(MasterSettings::from(&config), Arc::clone(&databases));
    let mut master = Master::new(ctx, cluster).context("Failed to start coordinator")?;
    master.run(&queue).context("Coordinator failed")?;

    for handle in workers {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Worker exited with error"),
            Err(_) => warn!("Worker panicked"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("shard_master=debug,warn")
    } else {
        EnvFilter::new("shard_master=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
