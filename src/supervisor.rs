//! Ties the snapshot builder, ring buffer, detector, dump writer, and
//! housekeeper together into the single-threaded tick loop.
//!
//! Reuses the `loop_with_exponential_error_backoff`/`LoopContinuation`
//! helper for the run/stop decision, but unlike a background-thread metrics
//! collector, the whole pipeline here runs on the calling task -- no worker
//! threads are spawned.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use eyre::{Result, WrapErr};
use log::{debug, info, trace, warn};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::flag as signal_flag;

use crate::config::ConfigFile;
use crate::detector::{self, AnomalyResult, DetectorParams, DetectorState};
use crate::dump::DumpWriter;
use crate::housekeeper::Housekeeper;
use crate::ring_buffer::RingBuffer;
use crate::snapshot_builder::SnapshotBuilder;
use crate::util::system::{get_system_clock, Clock};
use crate::util::task::{loop_with_exponential_error_backoff, LoopContinuation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Starting,
    Running,
    Reloading,
    Stopping,
}

fn monotonic_now_ns() -> u64 {
    get_system_clock(Clock::Monotonic).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

fn detector_params(config: &ConfigFile) -> DetectorParams {
    DetectorParams {
        cpu_delta_threshold_pct: config.anomaly_detection.cpu_delta_threshold_pct,
        new_process_threshold_pct: config.anomaly_detection.new_process_threshold_pct,
        mem_drop_threshold_kib: config.anomaly_detection.mem_drop_threshold_kib as f64,
        mem_pressure_threshold_pct: config.anomaly_detection.mem_pressure_threshold_pct,
        swap_spike_threshold_kib: config.anomaly_detection.swap_spike_threshold_kib as f64,
        cooldown_ns: config.anomaly_detection.cooldown_ns(),
        memory_baseline_alpha: config.advanced.memory_baseline_alpha,
        scope: config.trigger.scope,
        enable_cpu_detection: config.features.enable_cpu_detection,
        enable_memory_detection: config.features.enable_memory_detection,
        enable_swap_detection: config.features.enable_swap_detection,
    }
}

fn anomaly_kind_enabled(config: &ConfigFile, result: &AnomalyResult) -> bool {
    match result {
        AnomalyResult::None => false,
        AnomalyResult::CpuDelta { .. } | AnomalyResult::CpuNewProc { .. } => config.features.enable_cpu_detection,
        AnomalyResult::MemDrop { .. } | AnomalyResult::MemPressure { .. } => config.features.enable_memory_detection,
        AnomalyResult::SwapSpike { .. } => config.features.enable_swap_detection,
    }
}

/// Owns every piece of runtime state across the daemon's lifetime: the two
/// signal-driven flags, the config (behind a mutex so `--show-settings`-style
/// introspection could read it from another thread), and the sampling
/// pipeline itself.
pub struct Supervisor {
    config: Arc<Mutex<ConfigFile>>,
    builder: SnapshotBuilder,
    ring: RingBuffer,
    detector_state: DetectorState,
    dump_writer: DumpWriter,
    housekeeper: Housekeeper,
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    state: State,
}

impl Supervisor {
    pub fn new(config: ConfigFile) -> Result<Self> {
        let process_start_ns = monotonic_now_ns();

        let shutdown = Arc::new(AtomicBool::new(false));
        let reload = Arc::new(AtomicBool::new(false));
        signal_flag::register(SIGINT, Arc::clone(&shutdown)).wrap_err("failed to install SIGINT handler")?;
        signal_flag::register(SIGTERM, Arc::clone(&shutdown)).wrap_err("failed to install SIGTERM handler")?;
        signal_flag::register(SIGHUP, Arc::clone(&reload)).wrap_err("failed to install SIGHUP handler")?;

        let builder = SnapshotBuilder::new(
            config.advanced.process_baseline_alpha,
            config.process_collection.max_processes_tracked,
            config.process_collection.top_processes_stored,
        );
        let ring = RingBuffer::new(config.sampling.ring_buffer_capacity);
        let output_dir: PathBuf = config.output.output_directory.clone().into();
        std::fs::create_dir_all(&output_dir)
            .wrap_err_with(|| format!("failed to create output directory {}", output_dir.display()))?;
        let dump_writer = DumpWriter::new(config.output.output_directory.clone(), process_start_ns);
        let housekeeper = Housekeeper::new(config.log_management.cleanup_interval());

        Ok(Supervisor {
            config: Arc::new(Mutex::new(config)),
            builder,
            ring,
            detector_state: DetectorState::new(),
            dump_writer,
            housekeeper,
            shutdown,
            reload,
            state: State::Starting,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        self.state = State::Running;
        info!("spiketraced starting, pid {}", std::process::id());

        let shutdown = Arc::clone(&self.shutdown);

        let period = {
            let config = self.config.lock().expect("config mutex poisoned");
            config.sampling.sampling_interval()
        };

        loop_with_exponential_error_backoff(
            || self.tick(),
            || {
                if shutdown.load(Ordering::SeqCst) {
                    LoopContinuation::Stop
                } else {
                    LoopContinuation::KeepRunning
                }
            },
            period,
            Duration::from_millis(100),
        );

        self.state = State::Stopping;
        info!("spiketraced shutting down");
        Ok(())
    }

    /// Reloads config from the documented lookup order. Re-seats the
    /// detector (its baselines would otherwise be judged against thresholds
    /// that may have just changed) and reconfigures the tracker in place;
    /// the ring buffer and dump writer's counters survive a reload.
    fn reload_config(&mut self) {
        self.state = State::Reloading;
        info!("reloading configuration on SIGHUP");
        let fresh = ConfigFile::read_from_system(None);

        self.builder.reconfigure(
            fresh.advanced.process_baseline_alpha,
            fresh.process_collection.max_processes_tracked,
            fresh.process_collection.top_processes_stored,
        );
        self.detector_state = DetectorState::new();
        self.housekeeper = Housekeeper::new(fresh.log_management.cleanup_interval());

        {
            let mut config = self.config.lock().expect("config mutex poisoned");
            *config = fresh;
        }
        self.state = State::Running;
    }

    fn tick(&mut self) -> Result<()> {
        if self.reload.swap(false, Ordering::SeqCst) {
            self.reload_config();
        }
        trace!("tick in state {:?}", self.state);

        let (params, context_n, log_mgmt, output_dir) = {
            let config = self.config.lock().expect("config mutex poisoned");
            (
                detector_params(&config),
                config.sampling.context_snapshots_per_dump,
                config.log_management.clone(),
                PathBuf::from(config.output.output_directory.clone()),
            )
        };

        let snapshot = self.builder.collect();
        let now_ns = snapshot.timestamp_ns;
        let mem = snapshot.mem;
        self.ring.push(snapshot);

        let samples = self.builder.tracker().samples();
        let result = detector::evaluate(&params, &mut self.detector_state, samples, &mem, now_ns);

        if anomaly_kind_enabled(&self.config.lock().expect("config mutex poisoned"), &result) {
            let window = self.ring.get_recent(context_n);
            match self.dump_writer.write(&result, &window, now_ns) {
                Ok(path) => debug!("wrote spike dump to {}", path.display()),
                Err(e) => warn!("failed to write spike dump: {e:#}"),
            }
        }

        if let Err(e) = self.housekeeper.maybe_run(
            &output_dir,
            log_mgmt.effective_policy(),
            log_mgmt.max_age(),
            log_mgmt.log_max_count,
            log_mgmt.max_total_bytes(),
            SystemTime::now(),
        ) {
            warn!("housekeeper sweep failed: {e:#}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sighup_sets_only_the_reload_flag() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let reload = Arc::new(AtomicBool::new(false));
        signal_flag::register(SIGHUP, Arc::clone(&reload)).unwrap();

        unsafe {
            libc::raise(SIGHUP);
        }
        std::thread::sleep(Duration::from_millis(50));

        assert!(reload.load(Ordering::SeqCst));
        assert!(!shutdown.load(Ordering::SeqCst));
    }

    #[test]
    fn sigterm_sets_only_the_shutdown_flag() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let reload = Arc::new(AtomicBool::new(false));
        signal_flag::register(SIGTERM, Arc::clone(&shutdown)).unwrap();

        unsafe {
            libc::raise(SIGTERM);
        }
        std::thread::sleep(Duration::from_millis(50));

        assert!(shutdown.load(Ordering::SeqCst));
        assert!(!reload.load(Ordering::SeqCst));
    }
}
