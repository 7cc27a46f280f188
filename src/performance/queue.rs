//! Affinity queue: a binary heap of CPUs ordered by a [`PlacementPolicy`].
//!
//! Entries are indices into the [`PlatformTopology`]; the queue never owns the CPU
//! records and caches no priority. Every comparison consults the live
//! [`LoadLedger`], so ordering is recomputed on each sift. An assignment changes the
//! load of every CPU that shares the chosen core, socket or node, so the heap is
//! re-priced as a whole after each one.

use std::cmp::Ordering;

use super::ledger::LoadLedger;
use super::policy::PlacementPolicy;
use crate::platform::topology::{CpuInfo, PlatformTopology};

struct Pricing<'a, P: ?Sized> {
    topology: &'a PlatformTopology,
    loads: &'a LoadLedger,
    policy: &'a P,
}

impl<P: PlacementPolicy + ?Sized> Pricing<'_, P> {
    fn less(&self, a: usize, b: usize) -> bool {
        self.policy.compare(
            self.topology.cpu_at(a),
            self.topology.cpu_at(b),
            self.loads,
        ) == Ordering::Less
    }
}

/// Priority queue holding exactly one entry per CPU in the topology.
#[derive(Debug, Clone)]
pub struct AffinityQueue {
    heap: Vec<usize>,
}

impl AffinityQueue {
    /// Populate the queue with every CPU of the topology.
    pub fn new<P: PlacementPolicy + ?Sized>(
        topology: &PlatformTopology,
        loads: &LoadLedger,
        policy: &P,
    ) -> Self {
        let mut queue = Self {
            heap: (0..topology.len()).collect(),
        };
        queue.reprice(topology, loads, policy);
        queue
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Logical CPU numbers currently queued, sorted ascending.
    pub fn logical_cpus(&self, topology: &PlatformTopology) -> Vec<usize> {
        let mut cpus: Vec<usize> = self
            .heap
            .iter()
            .map(|&idx| topology.cpu_at(idx).logical_cpu_num)
            .collect();
        cpus.sort_unstable();
        cpus
    }

    /// The CPU that would be chosen next, without committing to it.
    pub fn peek<'t>(&self, topology: &'t PlatformTopology) -> Option<&'t CpuInfo> {
        self.heap.first().map(|&idx| topology.cpu_at(idx))
    }

    /// Pop the best CPU, record one assignment on it, push it back.
    ///
    /// Returns `None` only for an empty queue, which a queue built from a valid
    /// topology never is.
    pub fn assign_next<'t, P: PlacementPolicy + ?Sized>(
        &mut self,
        topology: &'t PlatformTopology,
        loads: &mut LoadLedger,
        policy: &P,
    ) -> Option<&'t CpuInfo> {
        let best = self.pop(&Pricing {
            topology,
            loads: &*loads,
            policy,
        })?;
        let cpu = topology.cpu_at(best);
        loads.record_assignment(cpu);
        self.heap.push(best);
        self.reprice(topology, loads, policy);
        Some(cpu)
    }

    /// Restore heap order after loads changed.
    pub(crate) fn reprice<P: PlacementPolicy + ?Sized>(
        &mut self,
        topology: &PlatformTopology,
        loads: &LoadLedger,
        policy: &P,
    ) {
        let pricing = Pricing {
            topology,
            loads,
            policy,
        };
        for pos in (0..self.heap.len() / 2).rev() {
            self.sift_down(pos, &pricing);
        }
    }

    fn pop<P: PlacementPolicy + ?Sized>(&mut self, pricing: &Pricing<'_, P>) -> Option<usize> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0, pricing);
        }
        Some(top)
    }

    fn sift_down<P: PlacementPolicy + ?Sized>(&mut self, mut pos: usize, pricing: &Pricing<'_, P>) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < len && pricing.less(self.heap[right], self.heap[left]) {
                child = right;
            }
            if !pricing.less(self.heap[child], self.heap[pos]) {
                break;
            }
            self.heap.swap(pos, child);
            pos = child;
        }
    }
}
