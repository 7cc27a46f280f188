//! Topology sources: where the raw `(cpu, core, socket, node)` records come from.
//!
//! The engine does not care how the records were produced. This module ships the
//! usual producers: `lscpu`, the Linux sysfs tree, an lscpu-format file, a static
//! list, and a flat fallback built from `core_affinity`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use super::topology::{parse_topology_records, MalformedRecordPolicy};
use crate::constants::topology::{LSCPU_ARGS, LSCPU_PROGRAM, SYSFS_CPU_ROOT, SYSFS_NODE_ROOT};
use crate::error::{AffinityError, Result};
use crate::types::RawCpuRecord;

/// Producer of raw topology records.
pub trait TopologySource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Read every online logical CPU as a raw record.
    fn read_records(&self, policy: MalformedRecordPolicy) -> Result<Vec<RawCpuRecord>>;
}

/// Which topology source the configuration selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologySourceKind {
    /// lscpu, then sysfs, then a flat topology.
    #[default]
    Auto,
    Lscpu,
    Sysfs,
    File,
}

/// Build the topology source selected by configuration.
pub fn create_topology_source(
    kind: TopologySourceKind,
    file: Option<&Path>,
) -> Result<Box<dyn TopologySource>> {
    let source: Box<dyn TopologySource> = match kind {
        TopologySourceKind::Auto => Box::new(AutoSource::default()),
        TopologySourceKind::Lscpu => Box::new(LscpuSource),
        TopologySourceKind::Sysfs => Box::new(SysfsSource::default()),
        TopologySourceKind::File => {
            let path = file.ok_or_else(|| {
                AffinityError::Configuration(
                    "topology_source = \"file\" requires topology_file".to_string(),
                )
            })?;
            Box::new(FileSource::new(path))
        }
    };
    debug!("Using topology source: {}", source.name());
    Ok(source)
}

/// Runs `lscpu --online --parse=CPU,CORE,SOCKET,NODE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LscpuSource;

impl TopologySource for LscpuSource {
    fn name(&self) -> &'static str {
        "lscpu"
    }

    fn read_records(&self, policy: MalformedRecordPolicy) -> Result<Vec<RawCpuRecord>> {
        let output = Command::new(LSCPU_PROGRAM)
            .args(LSCPU_ARGS)
            .output()
            .map_err(|e| {
                AffinityError::TopologyUnavailable(format!(
                    "could not run `{}`, which is required for CPU pinning: {}",
                    LSCPU_PROGRAM, e
                ))
            })?;

        if !output.status.success() {
            return Err(AffinityError::TopologyUnavailable(format!(
                "`{}` exited with {}: {}",
                LSCPU_PROGRAM,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_topology_records(&String::from_utf8_lossy(&output.stdout), policy)
    }
}

/// Reads lscpu-format text from a file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TopologySource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn read_records(&self, policy: MalformedRecordPolicy) -> Result<Vec<RawCpuRecord>> {
        let contents = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                AffinityError::TopologyUnavailable(format!("{}: {}", self.path.display(), e))
            }
            _ => AffinityError::Io(e),
        })?;
        parse_topology_records(&contents, policy)
    }
}

/// In-memory records, for tests and embedders that discover topology themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    records: Vec<RawCpuRecord>,
}

impl StaticSource {
    pub fn new(records: impl IntoIterator<Item = RawCpuRecord>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    /// Build from `(cpu, core, socket, node)` tuples.
    pub fn from_tuples(tuples: &[(usize, usize, usize, usize)]) -> Self {
        Self::new(tuples.iter().copied().map(RawCpuRecord::from))
    }
}

impl TopologySource for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    fn read_records(&self, _policy: MalformedRecordPolicy) -> Result<Vec<RawCpuRecord>> {
        Ok(self.records.clone())
    }
}

/// Reads the Linux sysfs CPU and node trees.
///
/// sysfs `core_id` values are only unique within a package, so cores are renumbered
/// globally by `(package, core_id)`.
#[derive(Debug, Clone)]
pub struct SysfsSource {
    cpu_root: PathBuf,
    node_root: PathBuf,
}

impl Default for SysfsSource {
    fn default() -> Self {
        Self::with_roots(SYSFS_CPU_ROOT, SYSFS_NODE_ROOT)
    }
}

impl SysfsSource {
    /// Use alternative sysfs roots (tests, chroots).
    pub fn with_roots(cpu_root: impl Into<PathBuf>, node_root: impl Into<PathBuf>) -> Self {
        Self {
            cpu_root: cpu_root.into(),
            node_root: node_root.into(),
        }
    }

    fn read_trimmed(path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .map(|s| s.trim().to_string())
            .map_err(|e| AffinityError::TopologyUnavailable(format!("{}: {}", path.display(), e)))
    }

    fn read_id(path: &Path) -> Result<usize> {
        let raw = Self::read_trimmed(path)?;
        let value = raw.parse::<i64>().map_err(|_| {
            AffinityError::TopologyUnavailable(format!(
                "{}: {:?} is not an integer",
                path.display(),
                raw
            ))
        })?;
        // Some platforms report -1 for an unknown package.
        Ok(usize::try_from(value).unwrap_or(0))
    }

    /// Map each CPU to its NUMA node. Empty when the node tree is absent.
    fn cpu_to_node(&self) -> HashMap<usize, usize> {
        let mut mapping = HashMap::new();
        let Ok(entries) = fs::read_dir(&self.node_root) else {
            debug!("No NUMA node tree at {}", self.node_root.display());
            return mapping;
        };

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            let Some(node_id) = name.strip_prefix("node").and_then(|id| id.parse::<usize>().ok())
            else {
                continue;
            };

            let cpulist_path = entry.path().join("cpulist");
            match fs::read_to_string(&cpulist_path) {
                Ok(cpulist) => match parse_cpu_list(cpulist.trim()) {
                    Ok(cpus) => {
                        for cpu in cpus {
                            mapping.insert(cpu, node_id);
                        }
                    }
                    Err(e) => warn!("Ignoring {}: {}", cpulist_path.display(), e),
                },
                Err(e) => warn!("Could not read {}: {}", cpulist_path.display(), e),
            }
        }
        mapping
    }
}

impl TopologySource for SysfsSource {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn read_records(&self, _policy: MalformedRecordPolicy) -> Result<Vec<RawCpuRecord>> {
        let online = Self::read_trimmed(&self.cpu_root.join("online"))?;
        let cpus = parse_cpu_list(&online).map_err(|e| {
            AffinityError::TopologyUnavailable(format!("unreadable online CPU list: {}", e))
        })?;
        let nodes = self.cpu_to_node();

        let mut raw = Vec::with_capacity(cpus.len());
        for cpu in cpus {
            let topo = self.cpu_root.join(format!("cpu{cpu}")).join("topology");
            let core = Self::read_id(&topo.join("core_id"))?;
            let socket = Self::read_id(&topo.join("physical_package_id"))?;
            raw.push((cpu, core, socket));
        }

        let mut global_cores: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for &(_, core, socket) in &raw {
            global_cores.entry((socket, core)).or_insert(0);
        }
        for (idx, id) in global_cores.values_mut().enumerate() {
            *id = idx;
        }

        Ok(raw
            .into_iter()
            .map(|(cpu, core, socket)| {
                RawCpuRecord::new(
                    cpu,
                    global_cores[&(socket, core)],
                    socket,
                    nodes.get(&cpu).copied().unwrap_or(0),
                )
            })
            .collect())
    }
}

/// Flat topology from `core_affinity`: every CPU is its own core, one socket, one node.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreIdsSource;

impl TopologySource for CoreIdsSource {
    fn name(&self) -> &'static str {
        "core_affinity"
    }

    fn read_records(&self, _policy: MalformedRecordPolicy) -> Result<Vec<RawCpuRecord>> {
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        if core_ids.is_empty() {
            return Err(AffinityError::TopologyUnavailable(
                "no CPU cores reported by the platform".to_string(),
            ));
        }
        Ok(core_ids
            .into_iter()
            .map(|core| RawCpuRecord::new(core.id, core.id, 0, 0))
            .collect())
    }
}

/// Tries each source in turn and returns the first that yields records.
pub struct AutoSource {
    sources: Vec<Box<dyn TopologySource>>,
}

impl Default for AutoSource {
    fn default() -> Self {
        Self::new(vec![
            Box::new(LscpuSource),
            Box::new(SysfsSource::default()),
            Box::new(CoreIdsSource),
        ])
    }
}

impl AutoSource {
    pub fn new(sources: Vec<Box<dyn TopologySource>>) -> Self {
        Self { sources }
    }
}

impl TopologySource for AutoSource {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn read_records(&self, policy: MalformedRecordPolicy) -> Result<Vec<RawCpuRecord>> {
        let mut failures = Vec::new();
        for source in &self.sources {
            match source.read_records(policy) {
                Ok(records) if !records.is_empty() => {
                    info!(
                        "Topology read from {} ({} CPUs)",
                        source.name(),
                        records.len()
                    );
                    return Ok(records);
                }
                Ok(_) => failures.push(format!("{}: no records", source.name())),
                // A malformed record is a hard failure; falling back would hide it.
                Err(e @ AffinityError::TopologyMalformed { .. }) => return Err(e),
                Err(e) => {
                    debug!("Topology source {} failed: {}", source.name(), e);
                    failures.push(format!("{}: {}", source.name(), e));
                }
            }
        }
        Err(AffinityError::TopologyUnavailable(failures.join("; ")))
    }
}

/// Parse CPU list format (e.g., "0-3,8-11" -> [0,1,2,3,8,9,10,11]).
pub fn parse_cpu_list(cpulist: &str) -> std::result::Result<Vec<usize>, String> {
    let mut cpus = Vec::new();
    if cpulist.is_empty() {
        return Ok(cpus);
    }

    for range in cpulist.split(',') {
        let range = range.trim();
        if let Some((start, end)) = range.split_once('-') {
            let start = start
                .parse::<usize>()
                .map_err(|_| format!("bad range start in {:?}", range))?;
            let end = end
                .parse::<usize>()
                .map_err(|_| format!("bad range end in {:?}", range))?;
            if start > end {
                return Err(format!("descending range {:?}", range));
            }
            cpus.extend(start..=end);
        } else {
            cpus.push(
                range
                    .parse::<usize>()
                    .map_err(|_| format!("bad CPU id {:?}", range))?,
            );
        }
    }

    Ok(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8-11").unwrap(), vec![0, 1, 2, 3, 8, 9, 10, 11]);
        assert_eq!(parse_cpu_list("5").unwrap(), vec![5]);
        assert_eq!(parse_cpu_list("").unwrap(), Vec::<usize>::new());
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("a-b").is_err());
    }

    #[test]
    fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# CPU,Core,Socket,Node").unwrap();
        writeln!(file, "0,0,0,0").unwrap();
        writeln!(file, "1,0,0,0").unwrap();

        let records = FileSource::new(file.path())
            .read_records(MalformedRecordPolicy::Abort)
            .unwrap();
        assert_eq!(records, vec![RawCpuRecord::new(0, 0, 0, 0), RawCpuRecord::new(1, 0, 0, 0)]);
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::new(dir.path().join("missing.csv"))
            .read_records(MalformedRecordPolicy::Abort)
            .unwrap_err();
        assert!(matches!(err, AffinityError::TopologyUnavailable(_)));
    }

    #[test]
    fn test_sysfs_source_renumbers_cores_per_package() {
        let dir = tempfile::tempdir().unwrap();
        let cpu_root = dir.path().join("cpu");
        let node_root = dir.path().join("node");

        write(&cpu_root.join("online"), "0-3\n");
        // Two packages, each with core ids 0 and 1.
        for (cpu, core, package) in [(0, 0, 0), (1, 1, 0), (2, 0, 1), (3, 1, 1)] {
            let topo = cpu_root.join(format!("cpu{cpu}/topology"));
            write(&topo.join("core_id"), &format!("{core}\n"));
            write(&topo.join("physical_package_id"), &format!("{package}\n"));
        }
        write(&node_root.join("node0/cpulist"), "0-1\n");
        write(&node_root.join("node1/cpulist"), "2-3\n");

        let records = SysfsSource::with_roots(&cpu_root, &node_root)
            .read_records(MalformedRecordPolicy::Abort)
            .unwrap();

        assert_eq!(
            records,
            vec![
                RawCpuRecord::new(0, 0, 0, 0),
                RawCpuRecord::new(1, 1, 0, 0),
                RawCpuRecord::new(2, 2, 1, 1),
                RawCpuRecord::new(3, 3, 1, 1),
            ]
        );
    }

    #[test]
    fn test_sysfs_without_node_tree_defaults_to_node_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cpu_root = dir.path().join("cpu");
        write(&cpu_root.join("online"), "0-1");
        for cpu in 0..2 {
            let topo = cpu_root.join(format!("cpu{cpu}/topology"));
            write(&topo.join("core_id"), "0");
            write(&topo.join("physical_package_id"), "-1");
        }

        let records = SysfsSource::with_roots(&cpu_root, dir.path().join("absent"))
            .read_records(MalformedRecordPolicy::Abort)
            .unwrap();
        assert_eq!(records, vec![RawCpuRecord::new(0, 0, 0, 0), RawCpuRecord::new(1, 0, 0, 0)]);
    }

    #[test]
    fn test_sysfs_missing_online_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = SysfsSource::with_roots(dir.path(), dir.path())
            .read_records(MalformedRecordPolicy::Abort)
            .unwrap_err();
        assert!(matches!(err, AffinityError::TopologyUnavailable(_)));
    }

    #[test]
    fn test_auto_source_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let auto = AutoSource::new(vec![
            Box::new(FileSource::new(dir.path().join("missing"))),
            Box::new(StaticSource::from_tuples(&[(0, 0, 0, 0), (1, 1, 0, 0)])),
        ]);
        let records = auto.read_records(MalformedRecordPolicy::Abort).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_auto_source_reports_all_failures() {
        let dir = tempfile::tempdir().unwrap();
        let auto = AutoSource::new(vec![
            Box::new(FileSource::new(dir.path().join("a"))),
            Box::new(StaticSource::default()),
        ]);
        match auto.read_records(MalformedRecordPolicy::Abort).unwrap_err() {
            AffinityError::TopologyUnavailable(msg) => {
                assert!(msg.contains("file:"));
                assert!(msg.contains("static: no records"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_auto_source_does_not_mask_malformed_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0,0,0").unwrap();
        let auto = AutoSource::new(vec![
            Box::new(FileSource::new(file.path())),
            Box::new(StaticSource::from_tuples(&[(0, 0, 0, 0)])),
        ]);
        assert!(matches!(
            auto.read_records(MalformedRecordPolicy::Abort).unwrap_err(),
            AffinityError::TopologyMalformed { .. }
        ));
    }

    #[test]
    fn test_create_file_source_requires_path() {
        assert!(matches!(
            create_topology_source(TopologySourceKind::File, None).err(),
            Some(AffinityError::Configuration(_))
        ));
        let source = create_topology_source(TopologySourceKind::Sysfs, None).unwrap();
        assert_eq!(source.name(), "sysfs");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_core_ids_source() {
        match CoreIdsSource.read_records(MalformedRecordPolicy::Abort) {
            Ok(records) => {
                assert!(!records.is_empty());
                assert!(records.iter().all(|r| r.socket == 0 && r.node == 0));
            }
            Err(AffinityError::TopologyUnavailable(_)) => {}
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
}
