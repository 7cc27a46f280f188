//! CPU topology model: ingestion, validation and read-only queries.
//!
//! One core has one or more logical CPUs, one socket has one or more cores and
//! one node has one or more sockets. The logical CPU number is the unique key.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::constants::topology::{COMMENT_PREFIX, FIELDS_PER_RECORD, FIELD_SEPARATOR, MAX_LOGICAL_CPU};
use crate::error::{AffinityError, Result};
use crate::types::{RawCpuRecord, TopologyLevel};

/// What to do with a topology line that is not four integer fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedRecordPolicy {
    /// Fail ingestion on the first malformed record.
    #[default]
    Abort,
    /// Drop malformed records and keep going.
    Skip,
}

/// One logical CPU and its place in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuInfo {
    pub logical_cpu_num: usize,
    pub core_id: usize,
    pub socket_id: usize,
    pub node_id: usize,
}

impl CpuInfo {
    /// Id of this CPU at the given topology level.
    pub fn id_at(&self, level: TopologyLevel) -> usize {
        match level {
            TopologyLevel::Core => self.core_id,
            TopologyLevel::Socket => self.socket_id,
            TopologyLevel::Node => self.node_id,
        }
    }
}

impl From<RawCpuRecord> for CpuInfo {
    fn from(record: RawCpuRecord) -> Self {
        Self {
            logical_cpu_num: record.logical_cpu,
            core_id: record.core,
            socket_id: record.socket,
            node_id: record.node,
        }
    }
}

/// Immutable table of every logical CPU on the platform.
#[derive(Debug, Clone)]
pub struct PlatformTopology {
    cpus: Vec<CpuInfo>,
    by_logical: HashMap<usize, usize>,
    max_cpu_num: usize,
}

impl PlatformTopology {
    /// All CPUs, in ingestion order.
    pub fn cpus(&self) -> &[CpuInfo] {
        &self.cpus
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    /// Always false for a constructed topology; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// Largest logical CPU number. Bounds every CPU set built for this platform.
    pub fn max_cpu_num(&self) -> usize {
        self.max_cpu_num
    }

    /// Look up a CPU by logical number.
    pub fn cpu(&self, logical: usize) -> Option<&CpuInfo> {
        self.by_logical.get(&logical).map(|&idx| &self.cpus[idx])
    }

    pub(crate) fn cpu_at(&self, index: usize) -> &CpuInfo {
        &self.cpus[index]
    }

    /// Distinct ids at a topology level, sorted ascending.
    pub fn ids(&self, level: TopologyLevel) -> Vec<usize> {
        self.cpus
            .iter()
            .map(|cpu| cpu.id_at(level))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn cores(&self) -> Vec<usize> {
        self.ids(TopologyLevel::Core)
    }

    pub fn sockets(&self) -> Vec<usize> {
        self.ids(TopologyLevel::Socket)
    }

    pub fn nodes(&self) -> Vec<usize> {
        self.ids(TopologyLevel::Node)
    }

    /// Logical CPUs sharing the given id at a level, sorted ascending.
    pub fn cpus_at(&self, level: TopologyLevel, id: usize) -> Vec<usize> {
        let mut cpus: Vec<usize> = self
            .cpus
            .iter()
            .filter(|cpu| cpu.id_at(level) == id)
            .map(|cpu| cpu.logical_cpu_num)
            .collect();
        cpus.sort_unstable();
        cpus
    }

    pub fn cpus_on_core(&self, core: usize) -> Vec<usize> {
        self.cpus_at(TopologyLevel::Core, core)
    }

    pub fn cpus_on_socket(&self, socket: usize) -> Vec<usize> {
        self.cpus_at(TopologyLevel::Socket, socket)
    }

    pub fn cpus_on_node(&self, node: usize) -> Vec<usize> {
        self.cpus_at(TopologyLevel::Node, node)
    }
}

impl std::fmt::Display for PlatformTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} CPUs, {} cores, {} sockets, {} nodes (max cpu {})",
            self.len(),
            self.cores().len(),
            self.sockets().len(),
            self.nodes().len(),
            self.max_cpu_num
        )
    }
}

/// Build the topology model from raw records.
///
/// # Errors
///
/// Returns [`AffinityError::TopologyUnavailable`] if `records` is empty.
/// Returns [`AffinityError::TopologyMalformed`] if a logical CPU number repeats or
/// exceeds [`MAX_LOGICAL_CPU`].
pub fn build_topology(records: impl IntoIterator<Item = RawCpuRecord>) -> Result<PlatformTopology> {
    let mut cpus = Vec::new();
    let mut by_logical = HashMap::new();

    for (idx, record) in records.into_iter().enumerate() {
        if record.logical_cpu > MAX_LOGICAL_CPU {
            return Err(AffinityError::malformed(
                idx + 1,
                format!(
                    "logical CPU {} exceeds the maximum of {}",
                    record.logical_cpu, MAX_LOGICAL_CPU
                ),
            ));
        }
        if by_logical.insert(record.logical_cpu, cpus.len()).is_some() {
            return Err(AffinityError::malformed(
                idx + 1,
                format!("logical CPU {} listed more than once", record.logical_cpu),
            ));
        }
        cpus.push(CpuInfo::from(record));
    }

    let max_cpu_num = cpus
        .iter()
        .map(|cpu| cpu.logical_cpu_num)
        .max()
        .ok_or_else(|| AffinityError::TopologyUnavailable("no CPU records".to_string()))?;

    let topology = PlatformTopology {
        cpus,
        by_logical,
        max_cpu_num,
    };
    info!("CPU topology built: {}", topology);
    Ok(topology)
}

/// Parse `lscpu --parse=CPU,CORE,SOCKET,NODE` text into raw records.
///
/// Blank lines and `#` comments are ignored. An empty NODE column reads as node 0,
/// which is how lscpu reports machines without NUMA.
pub fn parse_topology_records(
    contents: &str,
    policy: MalformedRecordPolicy,
) -> Result<Vec<RawCpuRecord>> {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(COMMENT_PREFIX) {
            continue;
        }

        match parse_record_line(line) {
            Ok(record) => records.push(record),
            Err(reason) => match policy {
                MalformedRecordPolicy::Abort => {
                    return Err(AffinityError::malformed(idx + 1, reason));
                }
                MalformedRecordPolicy::Skip => {
                    warn!("Skipping malformed topology line {}: {}", idx + 1, reason);
                    skipped += 1;
                }
            },
        }
    }

    if skipped > 0 {
        info!(
            "Parsed {} topology records, skipped {} malformed",
            records.len(),
            skipped
        );
    } else {
        debug!("Parsed {} topology records", records.len());
    }
    Ok(records)
}

fn parse_record_line(line: &str) -> std::result::Result<RawCpuRecord, String> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();
    if fields.len() != FIELDS_PER_RECORD {
        return Err(format!(
            "expected {} fields, found {}",
            FIELDS_PER_RECORD,
            fields.len()
        ));
    }

    let parse = |name: &str, value: &str| {
        value
            .parse::<usize>()
            .map_err(|_| format!("{} field {:?} is not a non-negative integer", name, value))
    };

    let node = if fields[3].is_empty() {
        0
    } else {
        parse("NODE", fields[3])?
    };

    Ok(RawCpuRecord {
        logical_cpu: parse("CPU", fields[0])?,
        core: parse("CORE", fields[1])?,
        socket: parse("SOCKET", fields[2])?,
        node,
    })
}
