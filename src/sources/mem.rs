//! Decodes `/proc/meminfo` into a [`crate::snapshot::MemBlock`].
//!
//! `/proc/meminfo` lines look like:
//! ```text
//! MemTotal:       16269312 kB
//! MemFree:         1234567 kB
//! ```
//! Every label this crate tracks is matched case-sensitively against the full
//! line prefix; labels not present default to zero rather than erroring, since
//! kernels vary in which counters they expose (e.g. `Dirty` is universal,
//! `SwapTotal` may read 0 on swapless systems already).

use std::collections::HashMap;
use std::fs::read_to_string;

use eyre::{eyre, Result};
use nom::{
    bytes::complete::{is_not, tag},
    character::complete::{multispace1, space1},
    combinator::opt,
    sequence::terminated,
    IResult,
};

use crate::snapshot::MemBlock;

const PROC_MEMINFO_PATH: &str = "/proc/meminfo";

fn parse_meminfo_line(line: &str) -> Option<(&str, u64)> {
    fn label(input: &str) -> IResult<&str, &str> {
        terminated(is_not(":"), tag(":"))(input)
    }
    let (rest, key) = label(line).ok()?;
    let (rest, _) = multispace1::<&str, nom::error::Error<&str>>(rest).ok()?;
    let (rest, digits) = nom::character::complete::digit1::<&str, nom::error::Error<&str>>(rest)
        .ok()?;
    let _ = opt(nom::sequence::pair(space1, nom::bytes::complete::tag("kB")))(rest);
    digits.parse::<u64>().ok().map(|v| (key, v))
}

fn parse_meminfo_str(contents: &str) -> HashMap<&str, u64> {
    contents
        .lines()
        .filter_map(parse_meminfo_line)
        .collect()
}

/// Reads and parses `/proc/meminfo`, filling in the ten tracked counters.
/// Values default to `0` KiB when the label is absent from the file.
pub fn read_meminfo() -> Result<MemBlock> {
    let contents =
        read_to_string(PROC_MEMINFO_PATH).map_err(|e| eyre!("failed to read {}: {}", PROC_MEMINFO_PATH, e))?;
    Ok(meminfo_from_str(&contents))
}

fn meminfo_from_str(contents: &str) -> MemBlock {
    let fields = parse_meminfo_str(contents);
    let get = |label: &str| fields.get(label).copied().unwrap_or(0);

    MemBlock {
        total_kib: get("MemTotal"),
        available_kib: get("MemAvailable"),
        free_kib: get("MemFree"),
        active_kib: get("Active"),
        inactive_kib: get("Inactive"),
        dirty_kib: get("Dirty"),
        slab_kib: get("Slab"),
        swap_total_kib: get("SwapTotal"),
        swap_free_kib: get("SwapFree"),
        shmem_kib: get("Shmem"),
    }
}
