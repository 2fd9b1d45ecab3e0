//! Benchmark runner.
//!
//! One run is a strictly sequential loop: reset, execute under the timer,
//! record. Reset runs before every iteration including the first, so `R`
//! repetitions with a reset scope perform exactly `R` resets. Iterations are
//! numbered from 1 in reports and errors; iteration 0 in an error means the
//! one-time setup failed.
//!
//! A failure in reset or execute aborts the run. No sample is substituted
//! and nothing is aggregated.

use std::io::Write;

use crate::backends::Backend;
use crate::error::{BackendError, Error, Result};
use crate::operation::RegisteredOperation;
use crate::report::ReportPrinter;
use crate::stats::{SampleSet, Summary};
use crate::timer::measure;

/// Samples and summary of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub samples: SampleSet,
    pub summary: Summary,
}

/// Runs repetitions of one operation against one backend.
pub struct BenchmarkRunner<'p, W: Write> {
    printer: &'p mut ReportPrinter<W>,
}

impl<'p, W: Write> BenchmarkRunner<'p, W> {
    pub fn new(printer: &'p mut ReportPrinter<W>) -> Self {
        Self { printer }
    }

    /// Time `execute` `repetitions` times, calling `reset` before each call.
    pub fn run<B, T, R, X>(
        &mut self,
        backend_name: &str,
        operation: &str,
        backend: &mut B,
        repetitions: usize,
        mut reset: R,
        mut execute: X,
    ) -> Result<Measurement>
    where
        B: ?Sized,
        R: FnMut(&mut B) -> std::result::Result<(), BackendError>,
        X: FnMut(&mut B) -> std::result::Result<T, BackendError>,
    {
        let failed = |iteration: usize, source: BackendError| Error::Operation {
            backend: backend_name.to_string(),
            operation: operation.to_string(),
            iteration,
            source,
        };

        let mut samples = SampleSet::with_capacity(repetitions);
        for iteration in 1..=repetitions {
            reset(&mut *backend).map_err(|e| failed(iteration, e))?;

            let measured = measure(|| execute(&mut *backend)).map_err(|e| failed(iteration, e))?;
            let seconds = measured.seconds();
            samples.push(seconds);

            tracing::debug!(
                backend = backend_name,
                operation,
                iteration,
                seconds,
                "iteration recorded"
            );
            self.printer.run_line(operation, iteration, seconds);
        }

        let summary = samples.summarize()?;
        self.printer.summary_line(operation, &summary);

        Ok(Measurement { samples, summary })
    }

    /// Run a registered operation: its setup once, then `repetitions`
    /// iterations each preceded by its reset scope.
    pub fn run_operation<B>(
        &mut self,
        entry: &RegisteredOperation,
        backend: &mut B,
        repetitions: usize,
    ) -> Result<Measurement>
    where
        B: Backend + ?Sized,
    {
        let backend_name = backend.name().to_string();
        let operation = entry.name();

        if let Some(setup) = &entry.setup {
            backend.reset(setup).map_err(|source| Error::Operation {
                backend: backend_name.clone(),
                operation: operation.to_string(),
                iteration: 0,
                source,
            })?;
        }

        self.run(
            &backend_name,
            operation,
            backend,
            repetitions,
            |b| match &entry.reset {
                Some(scope) => b.reset(scope),
                None => Ok(()),
            },
            |b| b.execute(&entry.operation),
        )
    }
}
