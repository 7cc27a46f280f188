//! Placement policy: the total order the affinity queue keeps its CPUs in.

use std::cmp::Ordering;

use super::ledger::LoadLedger;
use crate::platform::topology::CpuInfo;

/// A total order over CPUs given the current loads. `Less` means "place here first".
pub trait PlacementPolicy: Send + Sync {
    fn compare(&self, lhs: &CpuInfo, rhs: &CpuInfo, loads: &LoadLedger) -> Ordering;
}

/// Spread across cores, pack onto already busy sockets and nodes.
///
/// 1. lower core load first,
/// 2. then the *more* loaded socket,
/// 3. then the *more* loaded node,
/// 4. then the lower logical CPU number.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalityPolicy;

impl PlacementPolicy for LocalityPolicy {
    fn compare(&self, lhs: &CpuInfo, rhs: &CpuInfo, loads: &LoadLedger) -> Ordering {
        loads
            .core_load(lhs.core_id)
            .cmp(&loads.core_load(rhs.core_id))
            .then_with(|| {
                loads
                    .socket_load(rhs.socket_id)
                    .cmp(&loads.socket_load(lhs.socket_id))
            })
            .then_with(|| loads.node_load(rhs.node_id).cmp(&loads.node_load(lhs.node_id)))
            .then_with(|| lhs.logical_cpu_num.cmp(&rhs.logical_cpu_num))
    }
}

impl<P: PlacementPolicy + ?Sized> PlacementPolicy for Box<P> {
    fn compare(&self, lhs: &CpuInfo, rhs: &CpuInfo, loads: &LoadLedger) -> Ordering {
        (**self).compare(lhs, rhs, loads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::topology::{build_topology, PlatformTopology};
    use crate::types::{RawCpuRecord, TopologyLevel};

    // cpu, core, socket, node
    fn topology() -> PlatformTopology {
        build_topology([
            RawCpuRecord::new(0, 0, 0, 0),
            RawCpuRecord::new(1, 1, 0, 0),
            RawCpuRecord::new(2, 2, 1, 1),
            RawCpuRecord::new(3, 3, 1, 1),
            RawCpuRecord::new(4, 0, 0, 0),
        ])
        .unwrap()
    }

    fn cmp(topology: &PlatformTopology, loads: &LoadLedger, a: usize, b: usize) -> Ordering {
        LocalityPolicy.compare(topology.cpu(a).unwrap(), topology.cpu(b).unwrap(), loads)
    }

    #[test]
    fn test_lower_core_load_wins() {
        let topology = topology();
        let mut loads = LoadLedger::new(&topology);
        loads.increment(TopologyLevel::Core, 0);
        // Socket 0 is now hotter but core load dominates.
        loads.increment(TopologyLevel::Socket, 0);

        assert_eq!(cmp(&topology, &loads, 1, 4), Ordering::Less);
        assert_eq!(cmp(&topology, &loads, 0, 2), Ordering::Greater);
    }

    #[test]
    fn test_hotter_socket_wins_on_core_tie() {
        let topology = topology();
        let mut loads = LoadLedger::new(&topology);
        loads.increment(TopologyLevel::Socket, 1);

        assert_eq!(cmp(&topology, &loads, 2, 1), Ordering::Less);
        assert_eq!(cmp(&topology, &loads, 1, 2), Ordering::Greater);
    }

    #[test]
    fn test_hotter_node_wins_on_socket_tie() {
        let topology = topology();
        let mut loads = LoadLedger::new(&topology);
        loads.increment(TopologyLevel::Node, 1);

        assert_eq!(cmp(&topology, &loads, 3, 0), Ordering::Less);
    }

    #[test]
    fn test_lower_cpu_number_breaks_full_tie() {
        let topology = topology();
        let loads = LoadLedger::new(&topology);

        assert_eq!(cmp(&topology, &loads, 0, 1), Ordering::Less);
        assert_eq!(cmp(&topology, &loads, 3, 2), Ordering::Greater);
        assert_eq!(cmp(&topology, &loads, 2, 2), Ordering::Equal);
    }

    #[test]
    fn test_order_is_antisymmetric() {
        let topology = topology();
        let mut loads = LoadLedger::new(&topology);
        loads.record_assignment(topology.cpu(0).unwrap());
        loads.record_assignment(topology.cpu(2).unwrap());

        for a in 0..5 {
            for b in 0..5 {
                assert_eq!(
                    cmp(&topology, &loads, a, b),
                    cmp(&topology, &loads, b, a).reverse()
                );
            }
        }
    }
}
