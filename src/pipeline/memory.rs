//! Between-batch memory backpressure.
//!
//! The orchestrator asks the guard before each batch. Above the threshold the
//! guard returns freed heap to the OS, pauses, and re-reads resident memory,
//! up to a bounded number of cycles. It never blocks the run indefinitely.
use std::fs;
use std::thread;
use std::time::Duration;

/// Source of the process resident set size.
pub trait MemoryProbe: Send + Sync {
    /// Resident memory in MiB, `None` when the platform cannot report it.
    fn resident_mb(&self) -> Option<u64>;
    /// Release what can be released.
    fn relieve(&self);
}

/// Reads `/proc/self/statm` and trims the glibc heap.
#[derive(Debug, Default)]
pub struct ProcessMemory;

impl MemoryProbe for ProcessMemory {
    fn resident_mb(&self) -> Option<u64> {
        let statm = fs::read_to_string("/proc/self/statm").ok()?;
        let pages = parse_statm_resident(&statm)?;
        Some(pages.saturating_mul(page_size()) / (1024 * 1024))
    }

    fn relieve(&self) {
        trim_heap();
    }
}

/// Second field of `statm`: resident pages.
pub fn parse_statm_resident(statm: &str) -> Option<u64> {
    statm.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(unix)]
fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|size| *size > 0).unwrap_or(4096)
}

#[cfg(not(unix))]
fn page_size() -> u64 {
    4096
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn trim_heap() {
    // SAFETY: malloc_trim only walks allocator state.
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn trim_heap() {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCheck {
    /// Limit disabled or probe unavailable.
    Unchecked,
    Within { resident_mb: u64 },
    Relieved { resident_mb: u64, pauses: u32 },
    /// Still above the limit after every pause; the run continues.
    StillHigh { resident_mb: u64, pauses: u32 },
}

pub struct MemoryGuard {
    probe: Box<dyn MemoryProbe>,
    limit_mb: u64,
    pause: Duration,
    max_pauses: u32,
}

impl MemoryGuard {
    /// A `limit_mb` of zero disables the guard.
    pub fn new(
        probe: Box<dyn MemoryProbe>,
        limit_mb: u64,
        pause: Duration,
        max_pauses: u32,
    ) -> Self {
        Self {
            probe,
            limit_mb,
            pause,
            max_pauses,
        }
    }

    pub fn check(&self) -> MemoryCheck {
        if self.limit_mb == 0 {
            return MemoryCheck::Unchecked;
        }
        let Some(mut resident_mb) = self.probe.resident_mb() else {
            return MemoryCheck::Unchecked;
        };
        if resident_mb <= self.limit_mb {
            return MemoryCheck::Within { resident_mb };
        }
        tracing::warn!(
            resident_mb,
            limit_mb = self.limit_mb,
            "memory above limit, pausing"
        );
        for pause in 1..=self.max_pauses {
            self.probe.relieve();
            thread::sleep(self.pause);
            resident_mb = match self.probe.resident_mb() {
                Some(resident_mb) => resident_mb,
                None => return MemoryCheck::Unchecked,
            };
            tracing::info!(resident_mb, pause, "memory after relief");
            if resident_mb <= self.limit_mb {
                return MemoryCheck::Relieved {
                    resident_mb,
                    pauses: pause,
                };
            }
        }
        tracing::warn!(
            resident_mb,
            limit_mb = self.limit_mb,
            pauses = self.max_pauses,
            "memory still above limit, continuing"
        );
        MemoryCheck::StillHigh {
            resident_mb,
            pauses: self.max_pauses,
        }
    }
}
