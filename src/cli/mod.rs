//! Shared CLI plumbing for the two binaries: logger setup using a
//! module-scoped-verbosity `stderrlog` pattern.

pub mod daemon;
pub mod viewer;

/// Initializes `stderrlog` so every runtime failure is a stderr line
/// prefixed with the originating module path, matching this crate's
/// "component-prefixed" logging contract. `verbosity` follows `stderrlog`'s
/// own scale: 0 = error, 1 = warn, 2 = info, 3 = debug, 4+ = trace.
pub fn init_logger(verbose: bool, quiet: bool) {
    let verbosity: usize = if quiet {
        0
    } else if verbose {
        3
    } else {
        2
    };

    stderrlog::new()
        .module(env!("CARGO_PKG_NAME").replace('-', "_"))
        .verbosity(verbosity)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .expect("logger can only be initialized once");
}
