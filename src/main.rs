//! SlabPool Stress Runner - Entry Point
//!
//! Hammers the diagnostic pool from many worker tasks, drains outstanding
//! leases on shutdown, and reports counters and protocol violations.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use slabpool::config::StressConfig;
use slabpool::metrics::METRICS;
use slabpool::{BufferSource, Config, DiagnosticPool, Lease, SlabPool, VERSION};

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    // Load configuration (defaults when no file is given or present)
    let config = match config_path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None if Path::new("config.toml").exists() => Config::load(Path::new("config.toml"))?,
        None => Config::default(),
    };

    // Initialize tracing/logging
    slabpool::util::init_tracing(&config.logging)?;

    info!(version = VERSION, "Starting SlabPool stress runner");

    let pool = SlabPool::from_config(&config.pool);
    let diagnostics = if config.diagnostics.allow_late_return {
        DiagnosticPool::with_late_return(pool)
    } else {
        DiagnosticPool::new(pool)
    };

    let workers = config.stress.effective_workers();
    info!(
        workers,
        block_size = config.pool.block_size,
        blocks_per_slab = config.pool.blocks_per_slab,
        "Workers starting"
    );

    let mut tasks = JoinSet::new();
    for worker_id in 0..workers {
        let pool = diagnostics.clone();
        let stress = config.stress.clone();
        tasks.spawn(async move { run_worker(worker_id, pool, stress).await });
    }

    // Run workers with graceful shutdown
    tokio::select! {
        _ = join_all(&mut tasks) => {
            info!("All workers finished");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, draining leases...");
        }
    }
    // Aborts any workers still running and waits for their leases to drop.
    tasks.shutdown().await;

    let timeout = Duration::from_secs(config.diagnostics.drain_timeout_secs);
    if let Err(e) = diagnostics.await_all_returned(timeout).await {
        warn!(error = %e, "Drain did not complete");
    }

    match diagnostics.dispose() {
        Ok(()) => info!("Pool disposed cleanly"),
        Err(e) => error!(error = %e, "Pool disposed with violations"),
    }

    let snapshot = METRICS.snapshot();
    info!(
        rented = snapshot.blocks_rented,
        returned = snapshot.blocks_returned,
        abandoned = snapshot.blocks_abandoned,
        slabs = snapshot.slabs_allocated,
        violations = snapshot.violations_recorded,
        "Final counters"
    );

    Ok(())
}

/// One stress worker: rent, write, batch-release, repeat.
///
/// Written against the capability trait so it runs identically over the
/// plain or the instrumented pool.
async fn run_worker<P>(worker_id: usize, pool: P, stress: StressConfig)
where
    P: BufferSource,
{
    let mut held: Vec<P::Lease> = Vec::with_capacity(stress.max_blocks_held);

    for i in 0..stress.iterations_per_worker {
        match pool.rent(64) {
            Ok(mut lease) => {
                match lease.memory_mut() {
                    Ok(memory) => memory[..8].copy_from_slice(&i.to_le_bytes()),
                    Err(e) => warn!(worker_id, error = %e, "memory access failed"),
                }
                held.push(lease);
                if held.len() >= stress.max_blocks_held {
                    held.clear();
                }
            }
            Err(e) => {
                warn!(worker_id, error = %e, "rent failed");
                break;
            }
        }
        if i % 64 == 0 {
            tokio::task::yield_now().await;
        }
    }

    debug!(worker_id, "worker finished");
}

/// Wait for every worker task to finish
async fn join_all(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            if !e.is_cancelled() {
                error!(error = %e, "worker panicked");
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
