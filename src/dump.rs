//! Serializes a trigger plus its trailing window of snapshots to a single
//! JSON file, published atomically via write-tmp + fsync + rename.
//!
//! Follows a tmp-file-plus-fsync-then-rename publish pattern so a reader
//! never observes a partially written file.

use std::fs::{self, File};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;
use eyre::{eyre, Result, WrapErr};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::detector::{AnomalyResult, Scope};
use crate::snapshot::Snapshot;
use crate::util::path::AbsolutePath;
use crate::util::serialization::local_rfc3339;

/// Hard cap on one dump's serialized size; hitting it fails the dump rather
/// than truncating it, per the "no partial file is ever produced" contract.
const MAX_DUMP_BYTES: usize = 1024 * 1024;

const SCHEMA_VERSION: u32 = 3;

#[derive(Debug, Serialize, Deserialize)]
pub struct DumpFile {
    pub schema_version: u32,
    #[serde(with = "local_rfc3339")]
    pub created_at: chrono::DateTime<Local>,
    pub uptime_seconds: f64,
    pub dump_timestamp_ns: u64,
    pub trigger: TriggerInfo,
    pub snapshots: Vec<DumpSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub scope: Scope,
    pub scope_key: i32,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub pid: i32,
    pub comm: String,
    pub metrics: serde_json::Value,
    pub policy: PolicyInfo,
}

impl TriggerInfo {
    pub fn from_result(result: &AnomalyResult) -> Option<Self> {
        match result {
            AnomalyResult::None => None,
            AnomalyResult::CpuDelta {
                pid,
                comm,
                cpu_pct,
                baseline_cpu_pct,
                delta,
                scope,
                scope_key,
            } => Some(TriggerInfo {
                kind: "cpu_delta".into(),
                pid: *pid,
                comm: comm.clone(),
                metrics: serde_json::json!({
                    "cpu_pct": cpu_pct,
                    "baseline_cpu_pct": baseline_cpu_pct,
                    "delta": delta,
                }),
                policy: PolicyInfo {
                    scope: *scope,
                    scope_key: *scope_key,
                    description: "per-process CPU usage exceeded its smoothed baseline".into(),
                },
            }),
            AnomalyResult::CpuNewProc {
                pid,
                comm,
                cpu_pct,
                scope,
                scope_key,
            } => Some(TriggerInfo {
                kind: "cpu_new_process".into(),
                pid: *pid,
                comm: comm.clone(),
                metrics: serde_json::json!({ "cpu_pct": cpu_pct, "is_new_process_spike": true }),
                policy: PolicyInfo {
                    scope: *scope,
                    scope_key: *scope_key,
                    description: "newly-observed process crossed the new-process CPU threshold".into(),
                },
            }),
            AnomalyResult::MemDrop {
                pid,
                comm,
                available_kib,
                baseline_kib,
                delta_kib,
            } => Some(TriggerInfo {
                kind: "mem_drop".into(),
                pid: *pid,
                comm: comm.clone(),
                metrics: serde_json::json!({
                    "available_kib": available_kib,
                    "baseline_kib": baseline_kib,
                    "delta_kib": delta_kib,
                }),
                policy: PolicyInfo {
                    scope: Scope::System,
                    scope_key: 0,
                    description: "available memory dropped below its smoothed baseline".into(),
                },
            }),
            AnomalyResult::MemPressure { pid, comm, used_pct } => Some(TriggerInfo {
                kind: "mem_pressure".into(),
                pid: *pid,
                comm: comm.clone(),
                metrics: serde_json::json!({ "used_pct": used_pct }),
                policy: PolicyInfo {
                    scope: Scope::System,
                    scope_key: 0,
                    description: "system memory utilization crossed the pressure threshold".into(),
                },
            }),
            AnomalyResult::SwapSpike {
                pid,
                comm,
                swap_used_kib,
                baseline_kib,
                delta_kib,
            } => Some(TriggerInfo {
                kind: "swap_spike".into(),
                pid: *pid,
                comm: comm.clone(),
                metrics: serde_json::json!({
                    "swap_used_kib": swap_used_kib,
                    "baseline_kib": baseline_kib,
                    "delta_kib": delta_kib,
                }),
                policy: PolicyInfo {
                    scope: Scope::System,
                    scope_key: 0,
                    description: "swap usage spiked above its smoothed baseline".into(),
                },
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DumpCpuBlock {
    pub global_pct: f64,
    pub per_core_pct: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DumpMemBlock {
    pub total_kib: u64,
    pub total_mib: f64,
    pub available_kib: u64,
    pub available_mib: f64,
    pub free_kib: u64,
    pub free_mib: f64,
    pub active_kib: u64,
    pub active_mib: f64,
    pub inactive_kib: u64,
    pub inactive_mib: f64,
    pub dirty_kib: u64,
    pub dirty_mib: f64,
    pub slab_kib: u64,
    pub slab_mib: f64,
    pub swap_total_kib: u64,
    pub swap_total_mib: f64,
    pub swap_free_kib: u64,
    pub swap_free_mib: f64,
    pub shmem_kib: u64,
    pub shmem_mib: f64,
    pub used_pct: f64,
}

impl From<&crate::snapshot::MemBlock> for DumpMemBlock {
    fn from(mem: &crate::snapshot::MemBlock) -> Self {
        fn mib(kib: u64) -> f64 {
            kib as f64 / 1024.0
        }
        let used_pct = if mem.total_kib == 0 {
            0.0
        } else {
            100.0 * (mem.total_kib.saturating_sub(mem.available_kib)) as f64 / mem.total_kib as f64
        };
        DumpMemBlock {
            total_kib: mem.total_kib,
            total_mib: mib(mem.total_kib),
            available_kib: mem.available_kib,
            available_mib: mib(mem.available_kib),
            free_kib: mem.free_kib,
            free_mib: mib(mem.free_kib),
            active_kib: mem.active_kib,
            active_mib: mib(mem.active_kib),
            inactive_kib: mem.inactive_kib,
            inactive_mib: mib(mem.inactive_kib),
            dirty_kib: mem.dirty_kib,
            dirty_mib: mib(mem.dirty_kib),
            slab_kib: mem.slab_kib,
            slab_mib: mib(mem.slab_kib),
            swap_total_kib: mem.swap_total_kib,
            swap_total_mib: mib(mem.swap_total_kib),
            swap_free_kib: mem.swap_free_kib,
            swap_free_mib: mib(mem.swap_free_kib),
            shmem_kib: mem.shmem_kib,
            shmem_mib: mib(mem.shmem_kib),
            used_pct,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DumpSnapshot {
    pub timestamp_ns: u64,
    pub uptime_seconds: f64,
    /// Negative for snapshots older than the trigger; `0` for the trigger
    /// snapshot itself, which is always `snapshots[0]`.
    pub offset_seconds: f64,
    pub cpu: DumpCpuBlock,
    pub mem: DumpMemBlock,
    pub procs: Vec<crate::snapshot::ProcEntry>,
    pub top_rss_procs: Vec<crate::snapshot::ProcEntry>,
}

impl DumpSnapshot {
    fn from_snapshot(snap: &Snapshot, trigger_ns: u64, process_start_ns: u64) -> Self {
        let offset_seconds = (snap.timestamp_ns as i64 - trigger_ns as i64) as f64 / 1_000_000_000.0;
        let uptime_seconds = snap.timestamp_ns.saturating_sub(process_start_ns) as f64 / 1_000_000_000.0;
        DumpSnapshot {
            timestamp_ns: snap.timestamp_ns,
            uptime_seconds,
            offset_seconds,
            cpu: DumpCpuBlock {
                global_pct: snap.cpu.global_pct,
                per_core_pct: snap.cpu.per_core_pct.clone(),
            },
            mem: DumpMemBlock::from(&snap.mem),
            procs: snap.procs.by_cpu.clone(),
            top_rss_procs: snap.procs.by_rss.clone(),
        }
    }
}

/// Write target that fails once more than `MAX_DUMP_BYTES` have been
/// buffered, so an oversized dump errors out instead of silently growing
/// past the hard cap.
struct BoundedBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl Write for BoundedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "dump exceeded size cap"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct DumpWriter {
    output_dir: AbsolutePath,
    counter: AtomicU64,
    process_start_ns: u64,
}

impl DumpWriter {
    pub fn new(output_dir: AbsolutePath, process_start_ns: u64) -> Self {
        DumpWriter {
            output_dir,
            counter: AtomicU64::new(0),
            process_start_ns,
        }
    }

    /// Serializes `snapshots` (newest-first, trigger snapshot first) plus
    /// `trigger` to a new file in the output directory. Returns the final
    /// path on success. A non-fatal failure at any step leaves no file
    /// behind (including no stray `.tmp`).
    pub fn write(&self, trigger: &AnomalyResult, snapshots: &[Snapshot], trigger_ns: u64) -> Result<std::path::PathBuf> {
        let trigger_info = TriggerInfo::from_result(trigger)
            .ok_or_else(|| eyre!("refusing to write a dump for a None trigger"))?;

        let dump = DumpFile {
            schema_version: SCHEMA_VERSION,
            created_at: Local::now(),
            uptime_seconds: trigger_ns.saturating_sub(self.process_start_ns) as f64 / 1_000_000_000.0,
            dump_timestamp_ns: trigger_ns,
            trigger: trigger_info,
            snapshots: snapshots
                .iter()
                .map(|s| DumpSnapshot::from_snapshot(s, trigger_ns, self.process_start_ns))
                .collect(),
        };

        let mut bounded = BoundedBuffer {
            buf: Vec::new(),
            limit: MAX_DUMP_BYTES,
        };
        serde_json::to_writer(&mut bounded, &dump).wrap_err("failed to serialize spike dump")?;

        let filename = self.next_filename();
        let final_path = std::path::PathBuf::from(&self.output_dir).join(&filename);
        let tmp_path = final_path.with_extension("json.tmp");

        let result = (|| -> Result<()> {
            let mut file = File::create(&tmp_path)
                .wrap_err_with(|| format!("failed to create {}", tmp_path.display()))?;
            file.write_all(&bounded.buf)
                .wrap_err_with(|| format!("failed to write {}", tmp_path.display()))?;
            file.flush().wrap_err("failed to flush dump file")?;
            file.sync_all().wrap_err("failed to fsync dump file")?;
            drop(file);
            fs::rename(&tmp_path, &final_path).wrap_err_with(|| {
                format!("failed to rename {} to {}", tmp_path.display(), final_path.display())
            })?;
            Ok(())
        })();

        if let Err(e) = &result {
            let _ = fs::remove_file(&tmp_path);
            warn!("dump write failed, discarding: {e:#}");
        }
        result?;
        Ok(final_path)
    }

    fn next_filename(&self) -> String {
        let now = Local::now();
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("spike_{}_{}.json", now.format("%Y-%m-%d_%H-%M-%S"), counter)
    }
}
