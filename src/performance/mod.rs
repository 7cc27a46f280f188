//! Placement machinery.
//!
//! - `ledger`: per-core, per-socket and per-node assignment counters
//! - `policy`: the order CPUs are handed out in
//! - `queue`: priority queue of CPUs under a policy
//! - `affinity`: the OS binding primitive

pub mod affinity;
pub mod ledger;
pub mod policy;
pub mod queue;

pub use affinity::{current_thread_cpus, AffinityBinder, CpuSet, SchedBinder};
pub use ledger::{LoadLedger, LoadSnapshot};
pub use policy::{LocalityPolicy, PlacementPolicy};
pub use queue::AffinityQueue;
