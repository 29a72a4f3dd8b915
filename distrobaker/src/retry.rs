//! A small retry-with-backoff helper shared by every remote-facing module.
//!
//! Retry counts throughout this crate are advisory upper bounds (§5 of the
//! design notes), not wall-clock budgets: callers pass an `attempts` count
//! read from `Engine::retry` and a closure that performs one attempt.

use std::time::Duration;

/// Receives progress narration from long-running operations. Mirrors the
/// three standard numeric log levels the embedder can observe.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// A [`Reporter`] that discards everything, for call sites (tests, one-off
/// scripts) with nowhere to send narration.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

/// Exponential backoff with 0.5x-1.5x jitter, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let pow = attempt.saturating_sub(1).min(16);
    let mut delay = base.saturating_mul(2_u32.saturating_pow(pow));
    if delay > max {
        delay = max;
    }
    let jitter = 0.5 + rand::random::<f64>();
    let millis = (delay.as_millis() as f64 * jitter).round() as u64;
    Duration::from_millis(millis)
}

/// Runs `attempt` up to `attempts` times, sleeping a backoff delay between
/// failures, and returns the last error if every attempt failed.
///
/// `attempts` of `0` or `1` both mean "try exactly once" — the retry count
/// counts *extra* tries beyond the first.
pub fn with_retry<T, E>(
    attempts: u32,
    reporter: &mut dyn Reporter,
    operation: &str,
    mut attempt: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E>
where
    E: std::fmt::Display,
{
    let total = attempts.max(1);
    let mut last_err = None;
    for try_no in 1..=total {
        match attempt(try_no) {
            Ok(v) => return Ok(v),
            Err(e) => {
                if try_no < total {
                    let delay = backoff_delay(Duration::from_millis(200), Duration::from_secs(30), try_no);
                    reporter.warn(&format!(
                        "{operation} failed on attempt {try_no}/{total}: {e}; retrying in {}",
                        humantime::format_duration(delay)
                    ));
                    std::thread::sleep(delay);
                } else {
                    reporter.error(&format!(
                        "{operation} failed on attempt {try_no}/{total}: {e}; giving up"
                    ));
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_is_bounded_with_jitter() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        let d1 = backoff_delay(base, max, 1);
        let d20 = backoff_delay(base, max, 20);
        assert!(d1 >= Duration::from_millis(50));
        assert!(d1 <= Duration::from_millis(150));
        assert!(d20 >= Duration::from_millis(250));
        assert!(d20 <= Duration::from_millis(750));
    }

    #[test]
    fn with_retry_succeeds_after_transient_failures() {
        let mut reporter = NullReporter;
        let mut calls = 0;
        let result: Result<i32, &str> = with_retry(3, &mut reporter, "test-op", |_| {
            calls += 1;
            if calls < 3 { Err("transient") } else { Ok(42) }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 3);
    }

    #[test]
    fn with_retry_exhausts_and_surfaces_last_error() {
        let mut reporter = NullReporter;
        let mut calls = 0;
        let result: Result<i32, &str> = with_retry(2, &mut reporter, "test-op", |_| {
            calls += 1;
            Err("permanent")
        });
        assert_eq!(result, Err("permanent"));
        assert_eq!(calls, 2);
    }
}
