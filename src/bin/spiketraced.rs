use eyre::Result;

fn main() -> Result<()> {
    spiketrace::cli::daemon::main()
}
