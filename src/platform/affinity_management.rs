//! The affinity engine: topology-aware worker placement.
//!
//! The engine owns the topology, the load ledger and the affinity queue. Callers ask it
//! for the next CPU with [`AffinityEngine::pick_worker_cpu`] and bind a pid to that CPU
//! with [`AffinityEngine::apply_affinity`]. Binding failures never reach the caller as
//! errors: the previous CPU stays in effect and one event goes to the failure sink.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::detection::TopologySource;
use super::topology::{build_topology, MalformedRecordPolicy, PlatformTopology};
use crate::config::Config;
use crate::constants::cpuset::CALLING_THREAD;
use crate::error::{AffinityError, Result};
use crate::performance::affinity::{AffinityBinder, SchedBinder};
use crate::performance::ledger::{LoadLedger, LoadSnapshot};
use crate::performance::policy::{LocalityPolicy, PlacementPolicy};
use crate::performance::queue::AffinityQueue;
use crate::reliability::events::{clone_error, AffinityEvent, FailureSink, TracingSink};
use crate::reliability::metrics::{record_applied, record_pick, record_skipped, MetricsSink};
use crate::types::CpuId;

/// Loads and queue change together, so they share one lock.
struct PlacementState {
    loads: LoadLedger,
    queue: AffinityQueue,
}

/// Topology-aware CPU placement for workers.
///
/// Share it through `Arc`; every method takes `&self`.
pub struct AffinityEngine<P: PlacementPolicy = LocalityPolicy> {
    topology: PlatformTopology,
    state: Mutex<PlacementState>,
    /// Whether affinity operations are disabled
    disabled: AtomicBool,
    binder: Box<dyn AffinityBinder>,
    sink: Box<dyn FailureSink>,
    policy: P,
}

impl AffinityEngine {
    /// Discover the topology and build an engine with the default binder, sink and
    /// placement policy.
    ///
    /// # Errors
    ///
    /// Returns [`AffinityError::TopologyUnavailable`] if the source produced nothing and
    /// [`AffinityError::TopologyMalformed`] if a record was rejected. The same error is
    /// also reported to the failure sink.
    pub fn init_platform_info(source: &dyn TopologySource, config: &Config) -> Result<Self> {
        Self::builder().config(config).build(source)
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }
}

impl<P: PlacementPolicy> AffinityEngine<P> {
    /// Choose the CPU for the next worker and account for it.
    ///
    /// Pop, increment and push happen under one lock, so concurrent callers never
    /// observe a half-applied assignment.
    pub fn pick_worker_cpu(&self) -> CpuId {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state
            .queue
            .assign_next(&self.topology, &mut state.loads, &self.policy)
        {
            Some(cpu) => {
                let logical = cpu.logical_cpu_num;
                drop(guard);
                record_pick(logical);
                debug!(
                    "Picked cpu {} (core {}, socket {}, node {})",
                    logical, cpu.core_id, cpu.socket_id, cpu.node_id
                );
                CpuId::new(logical)
            }
            // Unreachable for an engine built from a non-empty topology.
            None => {
                warn!("Affinity queue is empty, no CPU to pick");
                CpuId::UNINIT
            }
        }
    }

    /// Bind `pid` to `new_cpu`, returning the CPU that is in effect afterwards.
    ///
    /// No system call is made when affinity is disabled, `new_cpu` is
    /// [`CpuId::UNINIT`], or `new_cpu == old_cpu`; `old_cpu` is returned. When the
    /// binding fails `old_cpu` is returned and exactly one
    /// [`AffinityError::AffinityApplyFailed`] event is reported.
    pub fn apply_affinity(&self, pid: i32, new_cpu: CpuId, old_cpu: CpuId) -> CpuId {
        if !self.is_enabled() {
            record_skipped("disabled");
            return old_cpu;
        }
        let Some(cpu) = new_cpu.logical() else {
            record_skipped("uninit");
            return old_cpu;
        };
        if new_cpu == old_cpu {
            record_skipped("unchanged");
            return old_cpu;
        }

        let max_cpu = self.topology.max_cpu_num();
        let outcome = if cpu > max_cpu {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("CPU {} is invalid (max CPU is {})", cpu, max_cpu),
            ))
        } else {
            self.binder.bind(pid, cpu, max_cpu)
        };

        match outcome {
            Ok(()) => {
                record_applied(cpu);
                debug!("Bound pid {} to cpu {} (was {})", pid, cpu, old_cpu);
                new_cpu
            }
            Err(source) => {
                self.sink
                    .report(AffinityError::AffinityApplyFailed { pid, cpu, source }.into());
                old_cpu
            }
        }
    }

    /// Perform `n` picks and return them in order.
    pub fn plan(&self, n: usize) -> Vec<CpuId> {
        (0..n).map(|_| self.pick_worker_cpu()).collect()
    }

    /// Check if CPU affinity operations are enabled
    pub fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self) {
        info!("Enabling CPU affinity operations");
        self.disabled.store(false, Ordering::Relaxed);
    }

    /// Disable CPU affinity operations. Picks still update the loads.
    pub fn disable(&self, reason: &str) {
        info!("Disabling CPU affinity operations: {}", reason);
        self.disabled.store(true, Ordering::Relaxed);
    }

    pub fn topology(&self) -> &PlatformTopology {
        &self.topology
    }

    /// Point-in-time copy of every load counter.
    pub fn load_snapshot(&self) -> LoadSnapshot {
        self.state.lock().loads.snapshot()
    }
}

impl<P: PlacementPolicy + 'static> AffinityEngine<P> {
    /// Spawn a named thread pinned to the next CPU.
    ///
    /// The CPU is picked before the thread starts, so spawn order equals pick order.
    /// The closure receives the CPU actually in effect, which is [`CpuId::UNINIT`] if
    /// binding was skipped or failed.
    pub fn spawn_pinned<F, T>(
        self: &Arc<Self>,
        name: impl Into<String>,
        f: F,
    ) -> Result<JoinHandle<T>>
    where
        F: FnOnce(CpuId) -> T + Send + 'static,
        T: Send + 'static,
    {
        let cpu = self.pick_worker_cpu();
        let engine = Arc::clone(self);
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            let effective = engine.apply_affinity(CALLING_THREAD, cpu, CpuId::UNINIT);
            drop(engine);
            f(effective)
        })?;
        Ok(handle)
    }
}

/// Builds an [`AffinityEngine`] with injectable collaborators.
pub struct EngineBuilder<P: PlacementPolicy = LocalityPolicy> {
    binder: Box<dyn AffinityBinder>,
    sink: Box<dyn FailureSink>,
    policy: P,
    cpu_pin: bool,
    malformed_records: MalformedRecordPolicy,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            binder: Box::new(SchedBinder),
            sink: Box::new(MetricsSink::new(TracingSink)),
            policy: LocalityPolicy,
            cpu_pin: true,
            malformed_records: MalformedRecordPolicy::default(),
        }
    }
}

impl<P: PlacementPolicy> EngineBuilder<P> {
    /// Take `cpu_pin` and `malformed_records` from configuration.
    pub fn config(mut self, config: &Config) -> Self {
        self.cpu_pin = config.cpu_pin;
        self.malformed_records = config.malformed_records;
        self
    }

    pub fn cpu_pin(mut self, enabled: bool) -> Self {
        self.cpu_pin = enabled;
        self
    }

    pub fn malformed_records(mut self, policy: MalformedRecordPolicy) -> Self {
        self.malformed_records = policy;
        self
    }

    pub fn binder(mut self, binder: impl AffinityBinder + 'static) -> Self {
        self.binder = Box::new(binder);
        self
    }

    pub fn sink(mut self, sink: impl FailureSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Replace the placement policy.
    pub fn policy<Q: PlacementPolicy>(self, policy: Q) -> EngineBuilder<Q> {
        EngineBuilder {
            binder: self.binder,
            sink: self.sink,
            policy,
            cpu_pin: self.cpu_pin,
            malformed_records: self.malformed_records,
        }
    }

    /// Read the topology from `source` and build the engine.
    pub fn build(self, source: &dyn TopologySource) -> Result<AffinityEngine<P>> {
        info!("Initializing CPU affinity engine from {}", source.name());

        let topology = match source
            .read_records(self.malformed_records)
            .and_then(|records| build_topology(records))
        {
            Ok(topology) => topology,
            Err(e) => {
                self.sink.report(AffinityEvent::new(clone_error(&e)));
                return Err(e);
            }
        };

        let loads = LoadLedger::new(&topology);
        let queue = AffinityQueue::new(&topology, &loads, &self.policy);

        if !self.cpu_pin {
            info!("CPU affinity disabled by configuration (cpu_pin = false)");
        }
        info!(
            "CPU affinity engine ready: {} CPUs, {} cores, {} sockets, {} nodes",
            topology.len(),
            topology.cores().len(),
            topology.sockets().len(),
            topology.nodes().len()
        );

        Ok(AffinityEngine {
            topology,
            state: Mutex::new(PlacementState { loads, queue }),
            disabled: AtomicBool::new(!self.cpu_pin),
            binder: self.binder,
            sink: self.sink,
            policy: self.policy,
        })
    }
}
