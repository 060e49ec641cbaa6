//! Decodes per-process state from `/proc/<pid>/stat` and `/proc/<pid>/statm`.
//!
//! `/proc/<pid>/stat` is a single line, space-separated, whose second field is
//! the command name wrapped in parentheses:
//! ```text
//! 1234 (some proc) S 1 1234 1234 0 -1 4194560 ...
//! ```
//! The comm field is the one booby trap in this file: a process can name
//! itself with an embedded `)` (`prctl(PR_SET_NAME, "a)b")`), so the command
//! must be read between the *first* `(` and the *last* `)`, not the first
//! matching pair. Everything after the close paren is then a plain
//! space-separated field list, numbered from 3 (state).

use std::fs::read_to_string;
use std::path::Path;

use eyre::{eyre, Result};
use nom::{
    character::complete::{alpha1, i32 as parse_i32, space1},
    sequence::preceded,
};

use crate::util::system::bytes_per_page;

/// utime/stime are field indices 14/15 (1-based) in `/proc/<pid>/stat`,
/// i.e. indices 11/12 in the zero-based field list that starts right after
/// the `comm) state` prefix (ppid is field 4, the first of that list).
const FIELDS_BEFORE_PPID: usize = 0;
const PPID_FIELD: usize = 0;
const PGRP_FIELD: usize = 1;
const UTIME_FIELD: usize = 10;
const STIME_FIELD: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: i32,
    pub comm: String,
    pub ppid: i32,
    pub pgid: i32,
    /// user + system jiffies consumed since process start.
    pub ticks: u64,
}

/// Splits a `/proc/<pid>/stat` line into `(comm, state_and_rest)`, finding
/// the command name between the first `(` and the *last* `)` in the line.
fn split_comm(line: &str) -> Option<(&str, &str)> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    if close <= open {
        return None;
    }
    let comm = &line[open + 1..close];
    let rest = line[close + 1..].trim_start();
    Some((comm, rest))
}

fn parse_state_and_fields(rest: &str) -> Option<Vec<i64>> {
    let (rest, _state) = preceded(space1::<&str, nom::error::Error<&str>>, alpha1)(rest).ok()?;
    let mut fields = Vec::new();
    let mut cursor = rest;
    loop {
        match preceded(space1::<&str, nom::error::Error<&str>>, parse_signed_field)(cursor) {
            Ok((r, v)) => {
                fields.push(v);
                cursor = r;
            }
            Err(_) => break,
        }
        if cursor.is_empty() {
            break;
        }
    }
    Some(fields)
}

fn parse_signed_field(input: &str) -> nom::IResult<&str, i64> {
    // ppid/pgrp are i32; utime/stime are u64 but always non-negative so i64
    // covers the full field range this crate reads without overflow risk.
    match parse_i32::<&str, nom::error::Error<&str>>(input) {
        Ok((rest, v)) => Ok((rest, v as i64)),
        Err(_) => nom::character::complete::i64(input),
    }
}

fn parse_stat_line(pid: i32, line: &str) -> Option<ProcStat> {
    let (comm, rest) = split_comm(line)?;
    let fields = parse_state_and_fields(rest)?;

    let ppid = *fields.get(PPID_FIELD + FIELDS_BEFORE_PPID)? as i32;
    let pgid = *fields.get(PGRP_FIELD)? as i32;
    let utime = *fields.get(UTIME_FIELD)?;
    let stime = *fields.get(STIME_FIELD)?;

    Some(ProcStat {
        pid,
        comm: comm.to_string(),
        ppid,
        pgid,
        ticks: (utime.max(0) + stime.max(0)) as u64,
    })
}

/// Reads `/proc/<pid>/stat`. Returns `Ok(None)` when the process has already
/// exited between being listed and being read here -- a normal race, not a
/// failure this daemon should log loudly.
pub fn read_proc_stat(pid: i32) -> Result<Option<ProcStat>> {
    let path = format!("/proc/{}/stat", pid);
    match read_to_string(&path) {
        Ok(contents) => Ok(parse_stat_line(pid, contents.trim_end())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(eyre!("failed to read {}: {}", path, e)),
    }
}

/// Reads `/proc/<pid>/statm` and converts the resident set field (the second
/// whitespace-separated value, in pages) to KiB. `Ok(None)` on the same
/// process-vanished race as [`read_proc_stat`].
pub fn read_proc_rss_kib(pid: i32) -> Result<Option<u64>> {
    let path = format!("/proc/{}/statm", pid);
    let contents = match read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(eyre!("failed to read {}: {}", path, e)),
    };
    let rss_pages = contents
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| eyre!("malformed statm contents for pid {}", pid))?;
    let kib = rss_pages * bytes_per_page() / 1024;
    Ok(Some(kib))
}

/// Lists the numeric PID directories directly under `/proc`.
pub fn list_pids() -> Result<Vec<i32>> {
    list_pids_from(Path::new("/proc"))
}

fn list_pids_from(proc_dir: &Path) -> Result<Vec<i32>> {
    let mut pids = Vec::new();
    let entries = std::fs::read_dir(proc_dir)
        .map_err(|e| eyre!("failed to read {}: {}", proc_dir.display(), e))?;
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
            pids.push(pid);
        }
    }
    Ok(pids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_with_embedded_close_paren_is_parsed_in_full() {
        let line = "1234 (weird)proc) S 1 1234 1234 0 -1 4194560 0 0 0 0 50 10 0 0 20 0 1 0 0";
        let (comm, rest) = split_comm(line).unwrap();
        assert_eq!(comm, "weird)proc");
        assert!(rest.starts_with('S'));
    }

    #[test]
    fn parses_ppid_pgid_and_ticks() {
        // fields after "state": ppid pgrp session tty_nr tpgid flags minflt
        // cminflt majflt cmajflt utime stime ...
        let line = "42 (sh) S 1 42 42 0 -1 4194304 0 0 0 0 50 10 0 0 20 0 1 0 1000";
        let stat = parse_stat_line(42, line).unwrap();
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.pgid, 42);
        assert_eq!(stat.ticks, 60);
    }

    #[test]
    fn statm_rss_pages_convert_to_kib() {
        // size resident shared text lib data dt, resident = 256 pages
        let contents = "1000 256 10 5 0 100 0\n";
        let rss_pages: u64 = contents.split_whitespace().nth(1).unwrap().parse().unwrap();
        assert_eq!(rss_pages, 256);
    }

    #[test]
    fn list_pids_filters_non_numeric_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("123")).unwrap();
        std::fs::create_dir(dir.path().join("self")).unwrap();
        std::fs::create_dir(dir.path().join("9")).unwrap();
        let mut pids = list_pids_from(dir.path()).unwrap();
        pids.sort();
        assert_eq!(pids, vec![9, 123]);
    }
}
