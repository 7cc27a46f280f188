//! Per-core, per-socket and per-node load accounting.
//!
//! A load is the number of workers assigned to an id so far. Loads only grow:
//! workers are assumed to live as long as the process.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::platform::topology::{CpuInfo, PlatformTopology};
use crate::types::TopologyLevel;

/// Mutable load counters for every topology level.
#[derive(Debug, Clone, Default)]
pub struct LoadLedger {
    core_loads: HashMap<usize, usize>,
    socket_loads: HashMap<usize, usize>,
    node_loads: HashMap<usize, usize>,
    assignments: usize,
}

impl LoadLedger {
    /// Seed every core, socket and node id in the topology with zero.
    pub fn new(topology: &PlatformTopology) -> Self {
        let mut ledger = Self::default();
        for cpu in topology.cpus() {
            ledger.core_loads.entry(cpu.core_id).or_insert(0);
            ledger.socket_loads.entry(cpu.socket_id).or_insert(0);
            ledger.node_loads.entry(cpu.node_id).or_insert(0);
        }
        ledger
    }

    fn table(&self, level: TopologyLevel) -> &HashMap<usize, usize> {
        match level {
            TopologyLevel::Core => &self.core_loads,
            TopologyLevel::Socket => &self.socket_loads,
            TopologyLevel::Node => &self.node_loads,
        }
    }

    fn table_mut(&mut self, level: TopologyLevel) -> &mut HashMap<usize, usize> {
        match level {
            TopologyLevel::Core => &mut self.core_loads,
            TopologyLevel::Socket => &mut self.socket_loads,
            TopologyLevel::Node => &mut self.node_loads,
        }
    }

    /// Current load of an id. Unknown ids read as zero.
    pub fn load(&self, level: TopologyLevel, id: usize) -> usize {
        self.table(level).get(&id).copied().unwrap_or(0)
    }

    pub fn core_load(&self, core: usize) -> usize {
        self.load(TopologyLevel::Core, core)
    }

    pub fn socket_load(&self, socket: usize) -> usize {
        self.load(TopologyLevel::Socket, socket)
    }

    pub fn node_load(&self, node: usize) -> usize {
        self.load(TopologyLevel::Node, node)
    }

    /// Add one worker to a single id.
    pub fn increment(&mut self, level: TopologyLevel, id: usize) {
        *self.table_mut(level).entry(id).or_insert(0) += 1;
    }

    /// Account for one worker placed on `cpu`, at every level.
    pub fn record_assignment(&mut self, cpu: &CpuInfo) {
        for level in TopologyLevel::ALL {
            self.increment(level, cpu.id_at(level));
        }
        self.assignments += 1;
    }

    /// Number of committed assignments.
    pub fn total_assignments(&self) -> usize {
        self.assignments
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot {
            assignments: self.assignments,
            cores: self.core_loads.iter().map(|(&k, &v)| (k, v)).collect(),
            sockets: self.socket_loads.iter().map(|(&k, &v)| (k, v)).collect(),
            nodes: self.node_loads.iter().map(|(&k, &v)| (k, v)).collect(),
        }
    }
}

/// Point-in-time copy of the ledger, ordered by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub assignments: usize,
    pub cores: BTreeMap<usize, usize>,
    pub sockets: BTreeMap<usize, usize>,
    pub nodes: BTreeMap<usize, usize>,
}

impl LoadSnapshot {
    pub fn level(&self, level: TopologyLevel) -> &BTreeMap<usize, usize> {
        match level {
            TopologyLevel::Core => &self.cores,
            TopologyLevel::Socket => &self.sockets,
            TopologyLevel::Node => &self.nodes,
        }
    }
}
