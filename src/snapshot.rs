//! The value types that flow from a single collection cycle through the ring
//! buffer and into a dump: [`Snapshot`], its `cpu`/`mem` sub-blocks, and the
//! ranked process entries.

use serde::{Deserialize, Serialize};

/// The ten meminfo counters this daemon tracks, all in KiB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemBlock {
    pub total_kib: u64,
    pub available_kib: u64,
    pub free_kib: u64,
    pub active_kib: u64,
    pub inactive_kib: u64,
    pub dirty_kib: u64,
    pub slab_kib: u64,
    pub swap_total_kib: u64,
    pub swap_free_kib: u64,
    pub shmem_kib: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuBlock {
    pub global_pct: f64,
    pub per_core_pct: Vec<f64>,
}

/// One ranked process entry stored in a [`Snapshot`]'s process block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcEntry {
    pub pid: i32,
    pub comm: String,
    pub cpu_pct: f64,
    pub rss_kib: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessBlock {
    /// Ranked by CPU%, descending.
    pub by_cpu: Vec<ProcEntry>,
    /// Ranked by RSS, descending.
    pub by_rss: Vec<ProcEntry>,
}

/// One point-in-time sample of the whole system, as produced by
/// [`crate::snapshot_builder::SnapshotBuilder::collect`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp_ns: u64,
    pub cpu: CpuBlock,
    pub mem: MemBlock,
    pub procs: ProcessBlock,
}
