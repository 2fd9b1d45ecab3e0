//! Descriptive statistics over timing samples.

use crate::error::{Error, Result};

/// Ordered elapsed times, in seconds, of repeated executions of one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    samples: Vec<f64>,
}

impl SampleSet {
    /// Create an empty sample set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty sample set sized for `repetitions` samples.
    pub fn with_capacity(repetitions: usize) -> Self {
        Self {
            samples: Vec::with_capacity(repetitions),
        }
    }

    /// Append one sample.
    pub fn push(&mut self, seconds: f64) {
        self.samples.push(seconds);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }

    /// Aggregate into a [`Summary`].
    pub fn summarize(&self) -> Result<Summary> {
        summarize(&self.samples)
    }
}

/// Mean, sample standard deviation and count of a sample set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    /// Sample (n - 1) standard deviation; 0 when `count < 2`.
    pub std_dev: f64,
    pub count: usize,
}

impl Summary {
    /// Whether `std_dev` was actually measured.
    ///
    /// A single sample reports a spread of 0 that says nothing about
    /// consistency.
    pub fn is_spread_known(&self) -> bool {
        self.count >= 2
    }
}

/// Summarize a non-empty sequence of samples.
pub fn summarize(samples: &[f64]) -> Result<Summary> {
    if samples.is_empty() {
        return Err(Error::EmptyInput);
    }

    let count = samples.len();
    let mean = samples.iter().sum::<f64>() / count as f64;

    let std_dev = if count < 2 {
        0.0
    } else {
        let squared: f64 = samples.iter().map(|x| (x - mean).powi(2)).sum();
        (squared / (count - 1) as f64).sqrt()
    };

    Ok(Summary {
        mean,
        std_dev,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-12;

    #[test]
    fn test_empty_input() {
        assert!(matches!(summarize(&[]), Err(Error::EmptyInput)));
        assert!(matches!(SampleSet::new().summarize(), Err(Error::EmptyInput)));
    }

    #[test]
    fn test_single_sample() {
        let summary = summarize(&[0.25]).unwrap();
        assert_eq!(summary.mean, 0.25);
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.count, 1);
        assert!(!summary.is_spread_known());
    }

    #[test]
    fn test_mean_is_sum_over_len() {
        let samples = [0.1, 0.4, 0.2, 0.7, 0.35];
        let summary = summarize(&samples).unwrap();
        let expected = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((summary.mean - expected).abs() < EPSILON);
        assert_eq!(summary.count, 5);
    }

    #[test]
    fn test_sample_std_dev() {
        // mean 5, squared deviations sum to 32, n - 1 = 7
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let summary = summarize(&samples).unwrap();
        assert!((summary.mean - 5.0).abs() < EPSILON);
        assert!((summary.std_dev - (32.0f64 / 7.0).sqrt()).abs() < EPSILON);
        assert!(summary.is_spread_known());
    }

    #[test]
    fn test_two_identical_samples() {
        let summary = summarize(&[1.5, 1.5]).unwrap();
        assert_eq!(summary.std_dev, 0.0);
        assert!(summary.is_spread_known());
    }

    #[test]
    fn test_sample_set_accumulates() {
        let mut set = SampleSet::with_capacity(3);
        assert!(set.is_empty());
        set.push(1.0);
        set.push(2.0);
        set.push(3.0);
        assert_eq!(set.len(), 3);
        assert_eq!(set.as_slice(), &[1.0, 2.0, 3.0]);

        let summary = set.summarize().unwrap();
        assert!((summary.mean - 2.0).abs() < EPSILON);
        assert!((summary.std_dev - 1.0).abs() < EPSILON);
    }
}
