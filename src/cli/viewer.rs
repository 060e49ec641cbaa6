//! `spktrace`: a read-only viewer over spike dump JSON files.
//!
//! Grounded on the original `spktrace_view.c`'s two jobs -- list dumps in a
//! directory, and print one dump's trigger plus its leading snapshot's top
//! processes -- reimplemented against `serde_json` instead of a hand-rolled
//! streaming JSON reader, since the dump is already bounded in size.

use std::path::PathBuf;

use argh::FromArgs;
use eyre::{Result, WrapErr};

use crate::dump::DumpFile;

#[derive(FromArgs)]
/// Inspects spiketrace dump files.
pub struct SpktraceArgs {
    #[argh(subcommand)]
    pub command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
pub enum Command {
    List(ListArgs),
    Show(ShowArgs),
}

#[derive(FromArgs)]
/// List dump files in a directory, newest first.
#[argh(subcommand, name = "list")]
pub struct ListArgs {
    /// directory containing spike dump files
    #[argh(positional)]
    pub directory: PathBuf,
}

#[derive(FromArgs)]
/// Print a human-readable summary of one dump file.
#[argh(subcommand, name = "show")]
pub struct ShowArgs {
    /// path to a spike dump JSON file
    #[argh(positional)]
    pub path: PathBuf,
}

pub fn main() -> Result<()> {
    let args: SpktraceArgs = argh::from_env();
    match args.command {
        Command::List(list_args) => run_list(&list_args.directory),
        Command::Show(show_args) => run_show(&show_args.path),
    }
}

fn run_list(directory: &std::path::Path) -> Result<()> {
    let mut entries: Vec<(PathBuf, std::fs::Metadata)> = std::fs::read_dir(directory)
        .wrap_err_with(|| format!("failed to read directory {}", directory.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|ext| ext == "json").unwrap_or(false))
        .filter_map(|e| e.metadata().ok().map(|m| (e.path(), m)))
        .collect();

    entries.sort_by(|a, b| {
        b.1.modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            .cmp(&a.1.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH))
    });

    if entries.is_empty() {
        println!("no dump files found in {}", directory.display());
        return Ok(());
    }

    for (path, metadata) in &entries {
        let trigger_kind = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str::<DumpFile>(&s).ok())
            .map(|d| d.trigger.kind)
            .unwrap_or_else(|| "unreadable".to_string());
        println!(
            "{:>10} bytes  {:<16} {}",
            metadata.len(),
            trigger_kind,
            path.display()
        );
    }
    Ok(())
}

fn run_show(path: &std::path::Path) -> Result<()> {
    let contents =
        std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    let dump: DumpFile =
        serde_json::from_str(&contents).wrap_err_with(|| format!("failed to parse {}", path.display()))?;

    println!("Spike Dump: {}", path.display());
    println!("Schema version: {}", dump.schema_version);
    println!("Created at: {}", dump.created_at);
    println!("Dump timestamp (monotonic): {} ns", dump.dump_timestamp_ns);

    println!("\n=== SPIKE TRIGGER ===");
    println!("Type: {}", dump.trigger.kind);
    println!("Process: [{}] {}", dump.trigger.pid, dump.trigger.comm);
    println!("Scope: {:?} (key {})", dump.trigger.policy.scope, dump.trigger.policy.scope_key);
    println!("{}", dump.trigger.policy.description);
    println!("Metrics: {}", dump.trigger.metrics);

    if let Some(first) = dump.snapshots.first() {
        if !first.procs.is_empty() {
            println!("\n=== TOP PROCESSES BY CPU ===");
            for (i, p) in first.procs.iter().enumerate() {
                println!(
                    "{:2}. [{:5}] {:<15} {:6.1}%  (RSS: {} MiB)",
                    i + 1,
                    p.pid,
                    p.comm,
                    p.cpu_pct,
                    p.rss_kib / 1024
                );
            }
        }
        if !first.top_rss_procs.is_empty() {
            println!("\n=== TOP PROCESSES BY RSS ===");
            for (i, p) in first.top_rss_procs.iter().enumerate() {
                println!(
                    "{:2}. [{:5}] {:<15} {:6} MiB  (CPU: {:.1}%)",
                    i + 1,
                    p.pid,
                    p.comm,
                    p.rss_kib / 1024,
                    p.cpu_pct
                );
            }
        }
    }

    println!("\n{} snapshot(s) in this dump.", dump.snapshots.len());
    Ok(())
}
