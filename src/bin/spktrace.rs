use eyre::Result;

fn main() -> Result<()> {
    spiketrace::cli::viewer::main()
}
