//! Test utilities shared across unit tests.

mod test_instant;
pub use test_instant::*;

#[cfg(test)]
use rstest::fixture;

#[cfg(test)]
#[fixture]
/// Simple fixture to add to a test when you want the logger to work.
pub fn setup_logger() {
    let _ = stderrlog::new().module("spiketrace").verbosity(10).init();
}
