use eyre::Result;
use std::time::{Duration, Instant};

use log::{trace, warn};

use super::time_measure::TimeMeasure;

/// Run `work` every `repeat_interval` while `condition` returns true.
///
/// On error, wait `error_retry` and multiply `error_retry` by 2 every
/// time the error is repeated but never exceeding repeat_interval.
///
/// This is useful if you need (for example) to make a network request at a
/// fixed interval (1 hour) and want to retry sooner (1 minute) if the connection fails.
/// If the connection keeps on failing, the retry time will be increased (2min, 4min, etc).
///
/// When the process receives a signal we will immediately check the condition
/// and run the work if the condition is still true.
/// (You have to catch the signal somewhere - otherwise the process will be terminated.)
pub fn loop_with_exponential_error_backoff<
    W: FnMut() -> Result<()>,
    T: FnMut() -> LoopContinuation,
>(
    work: W,
    condition: T,
    period: Duration,
    error_retry: Duration,
) {
    loop_with_exponential_error_backoff_internal::<_, _, Instant>(
        work,
        condition,
        period,
        error_retry,
        interruptiple_sleep,
    )
}

// std::thread::sleep automatically continues sleeping on SIGINT but we want to be interrupted so we use shuteye::sleep.
fn interruptiple_sleep(d: Duration) {
    shuteye::sleep(d);
}

/// Specify how to continue execution
#[derive(PartialEq, Eq)]
pub enum LoopContinuation {
    /// Continue running the loop normally
    KeepRunning,
    /// Immediately re-process the loop
    RerunImmediately,
    /// Stop running the loop
    Stop,
}

fn loop_with_exponential_error_backoff_internal<
    W: FnMut() -> Result<()>,
    T: FnMut() -> LoopContinuation,
    Time: TimeMeasure,
>(
    mut work: W,
    mut condition: T,
    period: Duration,
    error_retry: Duration,
    sleep: fn(Duration),
) {
    const BACKOFF_MULTIPLIER: u32 = 2;
    let mut count_errors_since_success = 0;
    while condition() != LoopContinuation::Stop {
        let start_work = Time::now();
        let next_run_in = match work() {
            Ok(_) => {
                count_errors_since_success = 0;
                period
            }
            Err(e) => {
                let next_run = Duration::min(
                    error_retry.saturating_mul(
                        BACKOFF_MULTIPLIER.saturating_pow(count_errors_since_success),
                    ),
                    period,
                );

                count_errors_since_success += 1;
                warn!("Error in main loop: {}", e);
                next_run
            }
        };

        if condition() == LoopContinuation::KeepRunning {
            let sleep_maybe = next_run_in.checked_sub(start_work.elapsed());
            if let Some(howlong) = sleep_maybe {
                trace!("Sleep for {:?}", howlong);
                sleep(howlong);
            }
        }
    }
}
