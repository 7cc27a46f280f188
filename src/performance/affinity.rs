//! OS CPU-affinity primitive.
//!
//! This module binds a process or thread to exactly one logical CPU. The CPU mask is
//! sized against the platform's highest CPU number rather than glibc's fixed
//! 1024-bit `cpu_set_t`, so machines with more CPUs are handled too.

use std::io;

use crate::constants::cpuset::BITS_PER_WORD;

/// Binds a pid to a single CPU. `pid` 0 is the calling thread.
pub trait AffinityBinder: Send + Sync {
    fn bind(&self, pid: i32, cpu: usize, max_cpu: usize) -> io::Result<()>;
}

impl<B: AffinityBinder + ?Sized> AffinityBinder for std::sync::Arc<B> {
    fn bind(&self, pid: i32, cpu: usize, max_cpu: usize) -> io::Result<()> {
        (**self).bind(pid, cpu, max_cpu)
    }
}

/// Dynamically sized CPU mask (the `CPU_ALLOC` equivalent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuSet {
    words: Vec<libc::c_ulong>,
    max_cpu: usize,
}

impl CpuSet {
    /// Empty set able to hold CPUs `0..=max_cpu`.
    ///
    /// Fails with `ErrorKind::OutOfMemory` if the mask cannot be allocated.
    pub fn with_max_cpu(max_cpu: usize) -> io::Result<Self> {
        let len = max_cpu / BITS_PER_WORD + 1;
        let mut words = Vec::new();
        words.try_reserve_exact(len).map_err(|e| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("cannot allocate CPU mask for max CPU {}: {}", max_cpu, e),
            )
        })?;
        words.resize(len, 0);
        Ok(Self { words, max_cpu })
    }

    /// Set holding exactly `cpu`.
    pub fn single(cpu: usize, max_cpu: usize) -> io::Result<Self> {
        let mut set = Self::with_max_cpu(max_cpu)?;
        if !set.insert(cpu) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("CPU {} is invalid (max CPU is {})", cpu, max_cpu),
            ));
        }
        Ok(set)
    }

    /// Add a CPU. Returns false if it is beyond `max_cpu`.
    pub fn insert(&mut self, cpu: usize) -> bool {
        if cpu > self.max_cpu {
            return false;
        }
        self.words[cpu / BITS_PER_WORD] |= 1 << (cpu % BITS_PER_WORD);
        true
    }

    pub fn contains(&self, cpu: usize) -> bool {
        cpu <= self.max_cpu && self.words[cpu / BITS_PER_WORD] & (1 << (cpu % BITS_PER_WORD)) != 0
    }

    /// CPUs in the set, ascending.
    pub fn cpus(&self) -> Vec<usize> {
        (0..=self.max_cpu).filter(|&cpu| self.contains(cpu)).collect()
    }

    /// Size of the mask in bytes, as passed to the kernel.
    pub fn byte_len(&self) -> usize {
        self.words.len() * std::mem::size_of::<libc::c_ulong>()
    }

    #[cfg(target_os = "linux")]
    fn as_ptr(&self) -> *const libc::cpu_set_t {
        self.words.as_ptr().cast()
    }
}

/// `sched_setaffinity(2)`-backed binder.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedBinder;

#[cfg(target_os = "linux")]
impl AffinityBinder for SchedBinder {
    fn bind(&self, pid: i32, cpu: usize, max_cpu: usize) -> io::Result<()> {
        let set = CpuSet::single(cpu, max_cpu)?;

        // safety: the pointer covers `byte_len()` initialized bytes for the whole call
        let rc = unsafe { libc::sched_setaffinity(pid as libc::pid_t, set.byte_len(), set.as_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl AffinityBinder for SchedBinder {
    fn bind(&self, _pid: i32, _cpu: usize, _max_cpu: usize) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "CPU affinity operations are not supported on this platform",
        ))
    }
}

/// CPUs the calling thread may currently run on.
#[cfg(target_os = "linux")]
pub fn current_thread_cpus() -> io::Result<Vec<usize>> {
    // safety: cpu_set_t is a POD type, zero-initialization is standard
    let mut cpu_set: libc::cpu_set_t = unsafe { std::mem::zeroed() };

    // safety: the buffer is a valid, writable cpu_set_t
    let rc = unsafe {
        libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut cpu_set)
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let max = std::mem::size_of::<libc::cpu_set_t>() * 8;
    // safety: every index is below CPU_SETSIZE
    Ok((0..max)
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &cpu_set) })
        .collect())
}

#[cfg(not(target_os = "linux"))]
pub fn current_thread_cpus() -> io::Result<Vec<usize>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "CPU affinity operations are not supported on this platform",
    ))
}
