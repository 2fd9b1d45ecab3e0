//! Wall-clock timing of a single invocation.

use std::time::{Duration, Instant};

/// The result of a timed invocation together with its duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Measured<T> {
    pub elapsed: Duration,
    pub value: T,
}

impl<T> Measured<T> {
    /// Elapsed time in seconds.
    pub fn seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Time one invocation of `op` against a monotonic clock.
///
/// A failing invocation propagates its error and yields no duration.
pub fn measure<T, E, F>(op: F) -> Result<Measured<T>, E>
where
    F: FnOnce() -> Result<T, E>,
{
    let start = Instant::now();
    let value = op()?;
    let elapsed = start.elapsed();

    Ok(Measured { elapsed, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_returns_value() {
        let measured = measure(|| Ok::<_, ()>(42)).unwrap();
        assert_eq!(measured.value, 42);
        assert!(measured.seconds() >= 0.0);
    }

    #[test]
    fn test_measure_covers_sleep() {
        let measured = measure(|| {
            std::thread::sleep(Duration::from_millis(5));
            Ok::<_, ()>(())
        })
        .unwrap();
        assert!(measured.elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn test_measure_propagates_failure() {
        let result: Result<Measured<()>, &str> = measure(|| Err("boom"));
        assert_eq!(result.unwrap_err(), "boom");
    }
}
