//! End-to-end placement behaviour through the public API.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use worker_affinity::{
    error::AffinityError,
    performance::AffinityBinder,
    platform::{AffinityEngine, StaticSource},
    reliability::RecordingSink,
    types::{CpuId, TopologyLevel},
};

#[derive(Default)]
struct CountingBinder {
    calls: AtomicUsize,
}

impl AffinityBinder for CountingBinder {
    fn bind(&self, _pid: i32, _cpu: usize, _max_cpu: usize) -> io::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct DenyingBinder;

impl AffinityBinder for DenyingBinder {
    fn bind(&self, _pid: i32, _cpu: usize, _max_cpu: usize) -> io::Result<()> {
        Err(io::Error::from_raw_os_error(libc::EINVAL))
    }
}

/// 2 nodes x 2 sockets x 2 cores x 2 hyperthreads, lscpu numbering.
fn numa_box() -> StaticSource {
    let mut tuples = Vec::new();
    for cpu in 0..16usize {
        let core = cpu % 8;
        let socket = core / 2;
        let node = socket / 2;
        tuples.push((cpu, core, socket, node));
    }
    StaticSource::from_tuples(&tuples)
}

fn engine(source: &StaticSource) -> AffinityEngine {
    AffinityEngine::builder()
        .binder(CountingBinder::default())
        .sink(RecordingSink::new())
        .build(source)
        .unwrap()
}

#[test]
fn test_every_core_used_before_any_core_repeats() {
    let engine = engine(&numa_box());
    let plan = engine.plan(16);

    let core_of = |cpu: &CpuId| engine.topology().cpu(cpu.logical().unwrap()).unwrap().core_id;
    for pass in plan.chunks(8) {
        let mut cores: Vec<usize> = pass.iter().map(core_of).collect();
        cores.sort_unstable();
        assert_eq!(cores, (0..8).collect::<Vec<_>>(), "pass {pass:?}");
    }

    // Siblings carry identical loads, so the lower-numbered hyperthread keeps winning.
    assert_eq!(plan[..8], plan[8..]);
}

#[test]
fn test_busy_socket_and_node_are_filled_first() {
    let engine = engine(&numa_box());
    // cpus 0,1 sit on socket 0 (node 0); 2,3 on socket 1 (node 0); 4..7 on node 1.
    assert_eq!(engine.plan(4), [0, 1, 2, 3].map(CpuId).to_vec());
    assert_eq!(engine.pick_worker_cpu(), CpuId(4));

    let snapshot = engine.load_snapshot();
    assert_eq!(snapshot.level(TopologyLevel::Node)[&0], 4);
    assert_eq!(snapshot.level(TopologyLevel::Node)[&1], 1);
}

#[test]
fn test_identical_engines_produce_identical_plans() {
    let a = engine(&numa_box());
    let b = engine(&numa_box());
    assert_eq!(a.plan(40), b.plan(40));
}

#[test]
fn test_loads_match_pick_history() {
    let engine = engine(&numa_box());
    let mut expected: HashMap<(TopologyLevel, usize), usize> = HashMap::new();
    let mut previous = engine.load_snapshot();

    for _ in 0..37 {
        let cpu = engine.pick_worker_cpu();
        let info = *engine.topology().cpu(cpu.logical().unwrap()).unwrap();
        for level in TopologyLevel::ALL {
            *expected.entry((level, info.id_at(level))).or_default() += 1;
        }

        let current = engine.load_snapshot();
        for level in TopologyLevel::ALL {
            for (id, load) in current.level(level) {
                assert!(*load >= previous.level(level)[id], "load decreased");
            }
        }
        previous = current;
    }

    for ((level, id), count) in expected {
        assert_eq!(previous.level(level)[&id], count, "{level} {id}");
    }
    assert_eq!(previous.assignments, 37);
}

#[test]
fn test_concurrent_picks_are_balanced() {
    const THREADS: usize = 8;
    const PICKS: usize = 64;

    let engine = Arc::new(engine(&numa_box()));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                (0..PICKS)
                    .map(|_| engine.pick_worker_cpu())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut picked = 0;
    for handle in handles {
        let picks = handle.join().unwrap();
        assert!(picks.iter().all(|cpu| !cpu.is_uninit()));
        picked += picks.len();
    }
    assert_eq!(picked, THREADS * PICKS);

    let snapshot = engine.load_snapshot();
    assert_eq!(snapshot.assignments, THREADS * PICKS);
    for level in TopologyLevel::ALL {
        let total: usize = snapshot.level(level).values().sum();
        assert_eq!(total, THREADS * PICKS);
    }

    // 512 picks over 8 cores: perfectly even.
    let cores = snapshot.level(TopologyLevel::Core);
    let min = cores.values().min().unwrap();
    let max = cores.values().max().unwrap();
    assert!(max - min <= 1, "core loads {cores:?}");
}

#[test]
fn test_failed_bind_falls_back_once_per_call() {
    let sink = Arc::new(RecordingSink::new());
    let engine = AffinityEngine::builder()
        .binder(DenyingBinder)
        .sink(sink.clone())
        .build(&numa_box())
        .unwrap();

    let mut current = CpuId::UNINIT;
    for _ in 0..3 {
        let next = engine.pick_worker_cpu();
        current = engine.apply_affinity(1234, next, current);
        assert_eq!(current, CpuId::UNINIT);
    }

    let events = sink.take();
    assert_eq!(events.len(), 3);
    assert!(events
        .iter()
        .all(|event| matches!(event.error, AffinityError::AffinityApplyFailed { pid: 1234, .. })));
}

#[test]
fn test_no_syscall_on_fast_paths() {
    let binder = Arc::new(CountingBinder::default());
    let engine = AffinityEngine::builder()
        .binder(binder.clone())
        .sink(RecordingSink::new())
        .build(&numa_box())
        .unwrap();

    for cpu in 0..16 {
        let cpu = CpuId(cpu);
        assert_eq!(engine.apply_affinity(0, cpu, cpu), cpu);
        assert_eq!(engine.apply_affinity(0, CpuId::UNINIT, cpu), cpu);
    }
    assert_eq!(binder.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_pinned_workers_on_this_machine() {
    // Real sched_setaffinity; a sandbox may refuse it, in which case the worker
    // reports UNINIT and the engine logs the failure.
    let sink = Arc::new(RecordingSink::new());
    let engine = Arc::new(
        AffinityEngine::builder()
            .sink(sink.clone())
            .build(&StaticSource::from_tuples(&[(0, 0, 0, 0)]))
            .unwrap(),
    );

    let handle = engine
        .spawn_pinned("pinned-test", |cpu| {
            let allowed = worker_affinity::performance::current_thread_cpus().ok();
            (cpu, allowed)
        })
        .unwrap();
    let (cpu, allowed) = handle.join().unwrap();

    if cpu == CpuId(0) {
        if let Some(allowed) = allowed {
            assert_eq!(allowed, vec![0]);
        }
        assert!(sink.is_empty());
    } else {
        assert_eq!(cpu, CpuId::UNINIT);
        assert_eq!(sink.kinds(), vec!["affinity_apply_failed"]);
    }
}
