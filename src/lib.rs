//! The `worker_affinity` core library.
//!
//! Topology-aware CPU placement for worker threads and processes. The engine reads
//! the machine's CPU topology once, then hands out one logical CPU per request,
//! spreading workers across physical cores while packing them onto sockets and NUMA
//! nodes that are already in use.
//!
//! ```no_run
//! use worker_affinity::{config::Config, platform::{AffinityEngine, AutoSource}};
//!
//! # fn main() -> worker_affinity::error::Result<()> {
//! let engine = AffinityEngine::init_platform_info(&AutoSource::default(), &Config::default())?;
//! let cpu = engine.pick_worker_cpu();
//! let effective = engine.apply_affinity(0, cpu, worker_affinity::types::CpuId::UNINIT);
//! # let _ = effective;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod performance;
pub mod platform;
pub mod reliability;
pub mod types;

pub use error::{AffinityError, Result};
pub use platform::AffinityEngine;
pub use types::CpuId;
