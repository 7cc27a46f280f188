//! Domain constants for worker-affinity.
//!
//! This module contains compile-time constants used throughout the crate.
//! These are separated from runtime configuration to provide clear distinction
//! between values that never change and those that can be configured.

/// Topology discovery constants.
pub mod topology {
    /// Program used to list the online CPU topology.
    pub const LSCPU_PROGRAM: &str = "lscpu";

    /// Arguments selecting the four columns the engine consumes.
    pub const LSCPU_ARGS: [&str; 2] = ["--online", "--parse=CPU,CORE,SOCKET,NODE"];

    /// Prefix of comment lines in `lscpu --parse` output.
    pub const COMMENT_PREFIX: char = '#';

    /// Field separator in `lscpu --parse` output.
    pub const FIELD_SEPARATOR: char = ',';

    /// Number of fields in one topology record.
    pub const FIELDS_PER_RECORD: usize = 4;

    /// Highest logical CPU number accepted from a topology source.
    ///
    /// The Linux kernel caps `NR_CPUS` at 8192, so no online CPU is numbered above 8191.
    pub const MAX_LOGICAL_CPU: usize = 8191;

    /// Root of the per-CPU sysfs tree.
    pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

    /// Root of the NUMA node sysfs tree.
    pub const SYSFS_NODE_ROOT: &str = "/sys/devices/system/node";
}

/// CPU set construction constants.
pub mod cpuset {
    /// Bits in one word of a dynamically sized CPU mask.
    pub const BITS_PER_WORD: usize = std::mem::size_of::<libc::c_ulong>() * 8;

    /// `pid` value addressing the calling thread.
    pub const CALLING_THREAD: i32 = 0;
}

/// Configuration constants.
pub mod config {
    /// Environment variable prefix for configuration overrides.
    pub const ENV_PREFIX: &str = "WORKER_AFFINITY_";

    /// TOML configuration file name.
    pub const TOML_FILE: &str = "affinity.toml";

    /// YAML configuration file name.
    pub const YAML_FILE: &str = "affinity.yaml";
}

/// Metric names.
pub mod metrics {
    pub const PICKS_TOTAL: &str = "worker_affinity_picks_total";
    pub const APPLIED_TOTAL: &str = "worker_affinity_applied_total";
    pub const SKIPPED_TOTAL: &str = "worker_affinity_apply_skipped_total";
    pub const EVENTS_TOTAL: &str = "worker_affinity_events_total";
}
