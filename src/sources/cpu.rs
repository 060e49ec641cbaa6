//! Decodes `/proc/stat` CPU lines into jiffy totals, following the
//! line-oriented nom grammar used throughout this crate's `sources` module.
//!
//! Example `/proc/stat` contents:
//! ```text
//! cpu  326218 0 178980 36612114 6054 0 11961 0 0 0
//! cpu0 77186 0 73689 9126238 1353 0 6352 0 0 0
//! intr 95400676 0 9795 ...
//! ```
//! Only lines beginning with `cpu` are used; the first (`cpu`, no digit
//! suffix) is the aggregate, `cpuN` lines are per-core.

use std::fs::read_to_string;

use eyre::{eyre, Result};
use nom::{
    bytes::complete::tag,
    character::complete::{digit0, space1, u64 as parse_u64},
    combinator::opt,
    sequence::{pair, preceded},
    IResult,
};

const PROC_STAT_PATH: &str = "/proc/stat";

/// One `cpu`/`cpuN` line's jiffy counters, with total/idle already folded
/// (guest/guest_nice excluded from the total -- they're already counted
/// inside user/nice on Linux).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuJiffies {
    pub total: u64,
    pub idle: u64,
}

impl CpuJiffies {
    fn from_fields(fields: &[u64]) -> Self {
        // fields: user nice system idle iowait irq softirq steal [guest guest_nice]
        let user = fields.first().copied().unwrap_or(0);
        let nice = fields.get(1).copied().unwrap_or(0);
        let system = fields.get(2).copied().unwrap_or(0);
        let idle = fields.get(3).copied().unwrap_or(0);
        let iowait = fields.get(4).copied().unwrap_or(0);
        let irq = fields.get(5).copied().unwrap_or(0);
        let softirq = fields.get(6).copied().unwrap_or(0);
        let steal = fields.get(7).copied().unwrap_or(0);

        CpuJiffies {
            total: user + nice + system + idle + iowait + irq + softirq + steal,
            idle: idle + iowait,
        }
    }
}

/// One reading of `/proc/stat`: the aggregate line plus one entry per core,
/// in core-index order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuReading {
    pub aggregate: CpuJiffies,
    pub per_core: Vec<CpuJiffies>,
}

fn parse_cpu_label(input: &str) -> IResult<&str, Option<u32>> {
    let (rest, (_, digits)) = pair(tag("cpu"), digit0)(input)?;
    Ok((rest, digits.parse::<u32>().ok()))
}

fn parse_cpu_fields(input: &str) -> Vec<u64> {
    // At least 4 fields are required (user nice system idle); accept up to 8,
    // tolerating shorter lines by taking whatever is present.
    let mut fields = Vec::new();
    let mut rest = input;
    for _ in 0..8 {
        match preceded(space1, parse_u64::<&str, nom::error::Error<&str>>)(rest) {
            Ok((r, v)) => {
                fields.push(v);
                rest = r;
            }
            Err(_) => break,
        }
    }
    fields
}

fn parse_cpu_line(line: &str) -> Option<(Option<u32>, CpuJiffies)> {
    let (rest, core) = opt(parse_cpu_label)(line).ok()?;
    let core = core.flatten();
    let fields = parse_cpu_fields(rest);
    if fields.len() < 4 {
        return None;
    }
    Some((core, CpuJiffies::from_fields(&fields)))
}

/// Reads and parses `/proc/stat`, returning the aggregate and per-core jiffy
/// counters. Per-core lines are ordered by core index; a gap in numbering is
/// preserved as encountered (the kernel does not skip indices in practice).
pub fn read_cpu_stat() -> Result<CpuReading> {
    read_cpu_stat_from(PROC_STAT_PATH)
}

fn read_cpu_stat_from(path: &str) -> Result<CpuReading> {
    let contents = read_to_string(path).map_err(|e| eyre!("failed to read {}: {}", path, e))?;
    parse_cpu_stat_str(&contents)
}

fn parse_cpu_stat_str(contents: &str) -> Result<CpuReading> {
    let mut aggregate = None;
    let mut per_core = Vec::new();

    for line in contents.lines() {
        if !line.starts_with("cpu") {
            continue;
        }
        if let Some((core, jiffies)) = parse_cpu_line(line) {
            match core {
                None => aggregate = Some(jiffies),
                Some(_) => per_core.push(jiffies),
            }
        }
    }

    Ok(CpuReading {
        aggregate: aggregate.unwrap_or_default(),
        per_core,
    })
}

/// Per-core usage% over an interval: `100 * (1 - delta_idle/delta_total)`,
/// clamped to `[0, 100]`; zero (not an error) when `delta_total` is zero or
/// `delta_idle` exceeds `delta_total`.
pub fn usage_pct(prev: CpuJiffies, curr: CpuJiffies) -> f64 {
    let delta_total = curr.total.saturating_sub(prev.total);
    let delta_idle = curr.idle.saturating_sub(prev.idle);
    if delta_total == 0 || delta_idle > delta_total {
        return 0.0;
    }
    let pct = 100.0 * (1.0 - (delta_idle as f64 / delta_total as f64));
    pct.clamp(0.0, 100.0)
}
