//! Strong typing with newtypes for domain concepts.
//!
//! This module provides type-safe wrappers around primitive types to prevent
//! common errors and provide better API design through the type system.

use serde::{Deserialize, Serialize};

/// A logical CPU number as handed to callers, or the `UNINIT` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CpuId(pub i32);

impl CpuId {
    /// Sentinel for a worker that has never been placed.
    pub const UNINIT: Self = Self(-1);

    /// Create a CPU id from a logical CPU number.
    ///
    /// A number that does not fit an `i32` yields [`CpuId::UNINIT`] rather than
    /// wrapping onto another CPU.
    pub fn new(logical: usize) -> Self {
        i32::try_from(logical).map_or(Self::UNINIT, Self)
    }

    /// Check whether this is the `UNINIT` sentinel (or any negative value).
    pub fn is_uninit(self) -> bool {
        self.0 < 0
    }

    /// Get the logical CPU number, if this id refers to a CPU.
    pub fn logical(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl Default for CpuId {
    fn default() -> Self {
        Self::UNINIT
    }
}

impl From<usize> for CpuId {
    fn from(logical: usize) -> Self {
        Self::new(logical)
    }
}

impl std::fmt::Display for CpuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_uninit() {
            write!(f, "uninit")
        } else {
            write!(f, "cpu{}", self.0)
        }
    }
}

/// A level of the CPU topology that carries its own load counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyLevel {
    Core,
    Socket,
    Node,
}

impl TopologyLevel {
    pub const ALL: [TopologyLevel; 3] = [TopologyLevel::Core, TopologyLevel::Socket, TopologyLevel::Node];

    pub fn as_str(self) -> &'static str {
        match self {
            TopologyLevel::Core => "core",
            TopologyLevel::Socket => "socket",
            TopologyLevel::Node => "node",
        }
    }
}

impl std::fmt::Display for TopologyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw `(logical_cpu, core, socket, node)` record from a topology source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCpuRecord {
    pub logical_cpu: usize,
    pub core: usize,
    pub socket: usize,
    pub node: usize,
}

impl RawCpuRecord {
    pub fn new(logical_cpu: usize, core: usize, socket: usize, node: usize) -> Self {
        Self {
            logical_cpu,
            core,
            socket,
            node,
        }
    }
}

impl From<(usize, usize, usize, usize)> for RawCpuRecord {
    fn from((logical_cpu, core, socket, node): (usize, usize, usize, usize)) -> Self {
        Self::new(logical_cpu, core, socket, node)
    }
}
