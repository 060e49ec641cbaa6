//! Folds one procfs collection cycle -- aggregate/per-core CPU, meminfo, and
//! the process tracker -- into a single [`Snapshot`].
//!
//! Follows a best-effort, partial-failure-tolerant sampling pattern: a
//! source that errors leaves its block zeroed rather than aborting the
//! whole cycle, since a dump with one missing block is still useful
//! forensic evidence.

use log::warn;

use crate::snapshot::{CpuBlock, ProcessBlock, Snapshot};
use crate::sources::{cpu, mem};
use crate::tracker::{ProcSample, ProcessTracker};
use crate::util::system::{get_system_clock, Clock};

fn monotonic_now_ns() -> u64 {
    get_system_clock(Clock::Monotonic).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

impl From<ProcSample> for crate::snapshot::ProcEntry {
    fn from(s: ProcSample) -> Self {
        crate::snapshot::ProcEntry {
            pid: s.pid,
            comm: s.comm,
            cpu_pct: s.cpu_pct,
            rss_kib: s.rss_kib,
        }
    }
}

pub struct SnapshotBuilder {
    prev_cpu: Option<cpu::CpuReading>,
    tracker: ProcessTracker,
}

impl SnapshotBuilder {
    pub fn new(process_baseline_alpha: f64, max_tracked: usize, top_n: usize) -> Self {
        SnapshotBuilder {
            prev_cpu: None,
            tracker: ProcessTracker::new(process_baseline_alpha, max_tracked, top_n),
        }
    }

    pub fn reconfigure(&mut self, process_baseline_alpha: f64, max_tracked: usize, top_n: usize) {
        self.tracker.reconfigure(process_baseline_alpha, max_tracked, top_n);
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    /// Reads CPU/mem/process sources and folds them into one [`Snapshot`].
    /// Any individual source error is logged and leaves its block zeroed;
    /// the timestamp is always set from the monotonic clock.
    pub fn collect(&mut self) -> Snapshot {
        let mut snapshot = Snapshot {
            timestamp_ns: monotonic_now_ns(),
            ..Default::default()
        };

        let cpu_reading = match cpu::read_cpu_stat() {
            Ok(r) => Some(r),
            Err(e) => {
                warn!("failed to read cpu stats, leaving cpu block zeroed: {e:#}");
                None
            }
        };

        if let Some(curr) = &cpu_reading {
            if let Some(prev) = &self.prev_cpu {
                snapshot.cpu = CpuBlock {
                    global_pct: cpu::usage_pct(prev.aggregate, curr.aggregate),
                    per_core_pct: prev
                        .per_core
                        .iter()
                        .zip(curr.per_core.iter())
                        .map(|(p, c)| cpu::usage_pct(*p, *c))
                        .collect(),
                };
            }
        }

        let total_jiffies = cpu_reading.as_ref().map(|r| r.aggregate.total).unwrap_or(0);
        self.prev_cpu = cpu_reading;

        match mem::read_meminfo() {
            Ok(mem_block) => snapshot.mem = mem_block,
            Err(e) => warn!("failed to read meminfo, leaving mem block zeroed: {e:#}"),
        }

        self.tracker.collect(total_jiffies);
        snapshot.procs = ProcessBlock {
            by_cpu: self.tracker.top_by_cpu().into_iter().map(Into::into).collect(),
            by_rss: self.tracker.top_by_rss().into_iter().map(Into::into).collect(),
        };

        snapshot
    }
}
