//! Pinned worker pool driver.
//!
//! Loads the configuration, discovers the CPU topology, spawns one pinned worker per
//! requested slot and prints the resulting load snapshot as JSON.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use worker_affinity::{
    config::Config,
    platform::{create_topology_source, AffinityEngine},
    reliability::{init_tracing, AffinityMetrics},
    types::CpuId,
};

fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    init_tracing(&config.tracing_config())?;

    let metrics = if config.print_metrics {
        Some(AffinityMetrics::install()?)
    } else {
        None
    };

    let source = create_topology_source(config.topology_source, config.topology_file.as_deref())?;
    let engine = Arc::new(
        AffinityEngine::init_platform_info(source.as_ref(), &config)
            .context("CPU topology initialization failed")?,
    );
    info!("Topology: {}", engine.topology());

    let workers = if config.workers == 0 {
        engine.topology().len()
    } else {
        config.workers
    };
    info!("Spawning {} pinned workers", workers);

    let mut handles = Vec::with_capacity(workers);
    for idx in 0..workers {
        let handle = engine.spawn_pinned(format!("worker-{}", idx), move |cpu: CpuId| {
            info!("worker-{} running on {}", idx, cpu);
            cpu
        })?;
        handles.push(handle);
    }

    for (idx, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() {
            warn!("worker-{} panicked", idx);
        }
    }

    println!("{}", serde_json::to_string_pretty(&engine.load_snapshot())?);

    if let Some(metrics) = metrics {
        println!("{}", metrics.render());
    }

    Ok(())
}
