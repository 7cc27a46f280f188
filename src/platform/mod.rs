//! Platform topology discovery and the affinity engine built on it.

pub mod affinity_management;
pub mod detection;
pub mod topology;

pub use affinity_management::{AffinityEngine, EngineBuilder};
pub use detection::{
    create_topology_source, AutoSource, CoreIdsSource, FileSource, LscpuSource, StaticSource,
    SysfsSource, TopologySource, TopologySourceKind,
};
pub use topology::{build_topology, parse_topology_records, CpuInfo, MalformedRecordPolicy, PlatformTopology};
