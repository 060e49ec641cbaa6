//! `spiketraced`: the sampler daemon's argument surface and entry point.

use std::path::PathBuf;

use argh::FromArgs;
use eyre::Result;
use log::error;

use crate::config::ConfigFile;
use crate::supervisor::Supervisor;

#[derive(FromArgs)]
/// Samples CPU/memory/process stats, detects anomalies, and writes forensic dumps.
pub struct SpikeTracedArgs {
    /// path to a TOML configuration file (overrides the default lookup order)
    #[argh(option, short = 'c')]
    pub config_file: Option<PathBuf>,

    /// enable verbose (debug-level) logging
    #[argh(switch, short = 'V')]
    pub verbose: bool,

    /// suppress all but error-level logging
    #[argh(switch, short = 'q')]
    pub quiet: bool,

    /// print version and exit
    #[argh(switch, short = 'v')]
    pub version: bool,

    /// print the effective, clamped configuration and exit
    #[argh(switch, short = 's')]
    pub show_settings: bool,
}

pub fn main() -> Result<()> {
    let args: SpikeTracedArgs = argh::from_env();

    if args.version {
        println!("spiketraced {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    crate::cli::init_logger(args.verbose, args.quiet);

    let config = ConfigFile::read_from_system(args.config_file.as_deref());

    if args.show_settings {
        match toml::to_string_pretty(&config) {
            Ok(s) => println!("{s}"),
            Err(e) => error!("failed to render configuration: {e}"),
        }
        return Ok(());
    }

    let mut supervisor = Supervisor::new(config)?;
    supervisor.run()
}
