//! TOML-backed configuration, validated and clamped at load time.
//!
//! One `Deserialize` struct per TOML table, `#[serde(default)]` backed by a
//! `Default` impl. Out-of-range values are not load errors: each is clamped
//! to its nearest valid bound and logged with `warn!`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::detector::Scope;
use crate::housekeeper::CleanupPolicy;
use crate::util::path::AbsolutePath;

const SYSTEM_CONFIG_PATH: &str = "/etc/spiketrace/config.toml";

fn clamp_f64(field: &str, value: f64, min: f64, max: f64) -> f64 {
    if value < min || value > max || value.is_nan() {
        let clamped = value.clamp(min, max);
        warn!("config field `{field}` = {value} out of range [{min}, {max}], clamped to {clamped}");
        clamped
    } else {
        value
    }
}

fn clamp_usize(field: &str, value: usize, min: usize, max: usize) -> usize {
    if value < min || value > max {
        let clamped = value.clamp(min, max);
        warn!("config field `{field}` = {value} out of range [{min}, {max}], clamped to {clamped}");
        clamped
    } else {
        value
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyDetectionConfig {
    pub cpu_delta_threshold_pct: f64,
    pub new_process_threshold_pct: f64,
    #[serde(with = "crate::util::serialization::mib_to_kib", rename = "mem_drop_threshold_mib")]
    pub mem_drop_threshold_kib: u64,
    pub mem_pressure_threshold_pct: f64,
    #[serde(with = "crate::util::serialization::mib_to_kib", rename = "swap_spike_threshold_mib")]
    pub swap_spike_threshold_kib: u64,
    pub cooldown_seconds: f64,
}

impl Default for AnomalyDetectionConfig {
    fn default() -> Self {
        AnomalyDetectionConfig {
            cpu_delta_threshold_pct: 15.0,
            new_process_threshold_pct: 10.0,
            mem_drop_threshold_kib: 512 * 1024,
            mem_pressure_threshold_pct: 90.0,
            swap_spike_threshold_kib: 256 * 1024,
            cooldown_seconds: 30.0,
        }
    }
}

impl AnomalyDetectionConfig {
    fn validate(mut self) -> Self {
        self.cpu_delta_threshold_pct = clamp_f64(
            "anomaly_detection.cpu_delta_threshold_pct",
            self.cpu_delta_threshold_pct,
            0.1,
            100.0,
        );
        self.new_process_threshold_pct = clamp_f64(
            "anomaly_detection.new_process_threshold_pct",
            self.new_process_threshold_pct,
            0.1,
            100.0,
        );
        self.mem_drop_threshold_kib = clamp_usize(
            "anomaly_detection.mem_drop_threshold_mib",
            self.mem_drop_threshold_kib as usize,
            1024,
            1_048_576 * 1024,
        ) as u64;
        self.mem_pressure_threshold_pct = clamp_f64(
            "anomaly_detection.mem_pressure_threshold_pct",
            self.mem_pressure_threshold_pct,
            50.0,
            100.0,
        );
        self.swap_spike_threshold_kib = clamp_usize(
            "anomaly_detection.swap_spike_threshold_mib",
            self.swap_spike_threshold_kib as usize,
            1024,
            1_048_576 * 1024,
        ) as u64;
        self.cooldown_seconds = clamp_f64("anomaly_detection.cooldown_seconds", self.cooldown_seconds, 0.1, 300.0);
        self
    }

    pub fn cooldown_ns(&self) -> u64 {
        (self.cooldown_seconds * 1_000_000_000.0) as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub sampling_interval_seconds: f64,
    pub ring_buffer_capacity: usize,
    pub context_snapshots_per_dump: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            sampling_interval_seconds: 1.0,
            ring_buffer_capacity: 300,
            context_snapshots_per_dump: 30,
        }
    }
}

impl SamplingConfig {
    fn validate(mut self) -> Self {
        self.sampling_interval_seconds =
            clamp_f64("sampling.sampling_interval_seconds", self.sampling_interval_seconds, 0.1, 10.0);
        self.ring_buffer_capacity = clamp_usize("sampling.ring_buffer_capacity", self.ring_buffer_capacity, 10, 600);
        self.context_snapshots_per_dump = clamp_usize(
            "sampling.context_snapshots_per_dump",
            self.context_snapshots_per_dump,
            1,
            60,
        );
        if self.context_snapshots_per_dump > self.ring_buffer_capacity {
            warn!(
                "sampling.context_snapshots_per_dump ({}) exceeds ring_buffer_capacity ({}), clamping",
                self.context_snapshots_per_dump, self.ring_buffer_capacity
            );
            self.context_snapshots_per_dump = self.ring_buffer_capacity;
        }
        self
    }

    pub fn sampling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sampling_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessCollectionConfig {
    pub max_processes_tracked: usize,
    pub top_processes_stored: usize,
}

impl Default for ProcessCollectionConfig {
    fn default() -> Self {
        ProcessCollectionConfig {
            max_processes_tracked: 512,
            top_processes_stored: 10,
        }
    }
}

impl ProcessCollectionConfig {
    fn validate(mut self) -> Self {
        self.max_processes_tracked = clamp_usize(
            "process_collection.max_processes_tracked",
            self.max_processes_tracked,
            10,
            1024,
        );
        self.top_processes_stored = clamp_usize(
            "process_collection.top_processes_stored",
            self.top_processes_stored,
            1,
            50,
        );
        if self.top_processes_stored > self.max_processes_tracked {
            warn!(
                "process_collection.top_processes_stored ({}) exceeds max_processes_tracked ({}), clamping",
                self.top_processes_stored, self.max_processes_tracked
            );
            self.top_processes_stored = self.max_processes_tracked;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_directory: AbsolutePath,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            output_directory: AbsolutePath::try_from(PathBuf::from("/var/lib/spiketrace/dumps"))
                .expect("default output directory is a valid absolute path"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub enable_cpu_detection: bool,
    pub enable_memory_detection: bool,
    pub enable_swap_detection: bool,
    pub aggregate_related_processes: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        FeaturesConfig {
            enable_cpu_detection: true,
            enable_memory_detection: true,
            enable_swap_detection: true,
            aggregate_related_processes: false,
        }
    }
}

impl FeaturesConfig {
    fn validate(mut self) -> Self {
        if !self.enable_cpu_detection && !self.enable_memory_detection && !self.enable_swap_detection {
            warn!("features: at least one detector must be enabled, re-enabling cpu detection");
            self.enable_cpu_detection = true;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub memory_baseline_alpha: f64,
    pub process_baseline_alpha: f64,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        AdvancedConfig {
            memory_baseline_alpha: 0.2,
            process_baseline_alpha: 0.3,
        }
    }
}

impl AdvancedConfig {
    fn validate(mut self) -> Self {
        self.memory_baseline_alpha = clamp_f64("advanced.memory_baseline_alpha", self.memory_baseline_alpha, 0.01, 0.9);
        self.process_baseline_alpha =
            clamp_f64("advanced.process_baseline_alpha", self.process_baseline_alpha, 0.01, 0.9);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub scope: Scope,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        TriggerConfig {
            scope: Scope::PerProcess,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogManagementConfig {
    pub enable_auto_cleanup: bool,
    pub cleanup_policy: CleanupPolicy,
    pub log_max_age_days: f64,
    pub log_max_count: usize,
    pub log_max_total_size_mib: u64,
    pub cleanup_interval_minutes: f64,
}

impl Default for LogManagementConfig {
    fn default() -> Self {
        LogManagementConfig {
            enable_auto_cleanup: true,
            cleanup_policy: CleanupPolicy::ByAge,
            log_max_age_days: 7.0,
            log_max_count: 500,
            log_max_total_size_mib: 512,
            cleanup_interval_minutes: 15.0,
        }
    }
}

impl LogManagementConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs_f64((self.log_max_age_days * 86_400.0).max(0.0))
    }

    pub fn max_total_bytes(&self) -> u64 {
        self.log_max_total_size_mib * 1024 * 1024
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs_f64((self.cleanup_interval_minutes * 60.0).max(1.0))
    }

    pub fn effective_policy(&self) -> CleanupPolicy {
        if self.enable_auto_cleanup {
            self.cleanup_policy
        } else {
            CleanupPolicy::Disabled
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub anomaly_detection: AnomalyDetectionConfig,
    pub sampling: SamplingConfig,
    pub process_collection: ProcessCollectionConfig,
    pub output: OutputConfig,
    pub features: FeaturesConfig,
    pub advanced: AdvancedConfig,
    pub trigger: TriggerConfig,
    pub log_management: LogManagementConfig,
}

impl ConfigFile {
    fn validate(self) -> Self {
        ConfigFile {
            anomaly_detection: self.anomaly_detection.validate(),
            sampling: self.sampling.validate(),
            process_collection: self.process_collection.validate(),
            output: self.output,
            features: self.features.validate(),
            advanced: self.advanced.validate(),
            trigger: self.trigger,
            log_management: self.log_management,
        }
    }

    fn parse(contents: &str) -> eyre::Result<Self> {
        let raw: ConfigFile = toml::from_str(contents)?;
        Ok(raw.validate())
    }

    /// Loads the configuration following the documented lookup order,
    /// falling back to full defaults on any missing file or load error --
    /// this function never fails.
    pub fn read_from_system(explicit_path: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = match explicit_path {
            Some(p) => vec![p.to_path_buf()],
            None => {
                let mut v = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
                if let Ok(home) = std::env::var("HOME") {
                    v.push(PathBuf::from(home).join(".config/spiketrace/config.toml"));
                }
                v
            }
        };

        for path in &candidates {
            match std::fs::read_to_string(path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        warn!("failed to parse config at {}: {e:#}, falling back to defaults", path.display());
                        return ConfigFile::default().validate();
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!("failed to read config at {}: {e}, trying next candidate", path.display());
                    continue;
                }
            }
        }

        ConfigFile::default().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 0.1)]
    #[case(150.0, 100.0)]
    #[case(50.0, 50.0)]
    fn cpu_delta_threshold_is_clamped(#[case] input: f64, #[case] expected: f64) {
        let mut cfg = AnomalyDetectionConfig::default();
        cfg.cpu_delta_threshold_pct = input;
        let validated = cfg.validate();
        assert!((validated.cpu_delta_threshold_pct - expected).abs() < 1e-9);
    }

    #[test]
    fn context_snapshots_clamped_to_ring_capacity() {
        let mut cfg = SamplingConfig::default();
        cfg.ring_buffer_capacity = 20;
        cfg.context_snapshots_per_dump = 60;
        let validated = cfg.validate();
        assert_eq!(validated.context_snapshots_per_dump, 20);
    }

    #[test]
    fn top_n_clamped_to_max_tracked() {
        let mut cfg = ProcessCollectionConfig::default();
        cfg.max_processes_tracked = 10;
        cfg.top_processes_stored = 50;
        let validated = cfg.validate();
        assert_eq!(validated.top_processes_stored, 10);
    }

    #[test]
    fn at_least_one_detector_is_forced_enabled() {
        let cfg = FeaturesConfig {
            enable_cpu_detection: false,
            enable_memory_detection: false,
            enable_swap_detection: false,
            aggregate_related_processes: false,
        };
        let validated = cfg.validate();
        assert!(validated.enable_cpu_detection || validated.enable_memory_detection || validated.enable_swap_detection);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = ConfigFile::read_from_system(Some(Path::new("/nonexistent/path/config.toml")));
        assert_eq!(config.sampling.ring_buffer_capacity, SamplingConfig::default().ring_buffer_capacity);
    }

    #[test]
    fn explicit_path_is_parsed_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[anomaly_detection]\ncpu_delta_threshold_pct = 25.0\n",
        )
        .unwrap();
        let config = ConfigFile::read_from_system(Some(&path));
        assert!((config.anomaly_detection.cpu_delta_threshold_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn output_directory_rejects_relative_and_dotdot_paths() {
        assert!(AbsolutePath::try_from(PathBuf::from("relative")).is_err());
        assert!(AbsolutePath::try_from(PathBuf::from("/a/../b")).is_err());
        assert!(AbsolutePath::try_from(PathBuf::from("/a/b")).is_ok());
    }
}
