//! Print the placement order for a topology file.
//!
//! The file holds `lscpu --parse=CPU,CORE,SOCKET,NODE` output. No CPU affinity is
//! changed; the tool only shows which CPUs the engine would hand out, in order.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use worker_affinity::{
    config::Config,
    platform::{AffinityEngine, FileSource},
    reliability::{init_tracing, TracingConfig},
};

#[derive(Parser)]
#[command(version, name = "placement-plan", about, long_about = None)]
struct Cli {
    /// lscpu-format topology file
    topology_file: PathBuf,

    /// Number of picks to show (default: one per logical CPU)
    count: Option<usize>,

    /// Log level filter
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingConfig {
        log_level: cli.log_level.clone(),
        json: false,
    })?;

    let config = Config {
        cpu_pin: false,
        ..Config::default()
    };
    let engine = AffinityEngine::init_platform_info(&FileSource::new(&cli.topology_file), &config)
        .with_context(|| format!("reading topology from {}", cli.topology_file.display()))?;

    let count = cli.count.unwrap_or_else(|| engine.topology().len());

    println!("{:>5} {:>5} {:>5} {:>6} {:>5}", "pick", "cpu", "core", "socket", "node");
    for (pick, cpu) in engine.plan(count).into_iter().enumerate() {
        let Some(info) = cpu.logical().and_then(|logical| engine.topology().cpu(logical)) else {
            continue;
        };
        println!(
            "{:>5} {:>5} {:>5} {:>6} {:>5}",
            pick, info.logical_cpu_num, info.core_id, info.socket_id, info.node_id
        );
    }

    println!("{}", serde_json::to_string_pretty(&engine.load_snapshot())?);
    Ok(())
}
