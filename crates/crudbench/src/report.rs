//! Human-readable benchmark output.
//!
//! Line formats are fixed so output can be parsed back:
//!
//! ```text
//! == <backend> ==
//! <operation> - Run <i>: <seconds>
//! <operation> - Average: <mean>s, StdDev: <stddev>s
//! ```
//!
//! Writes are best-effort: a failed write is logged and never aborts a run.

use std::fmt::Display;
use std::io::{self, Write};

use comfy_table::{Cell, Table};

use crate::session::SessionReport;
use crate::stats::Summary;

/// Writes progress, summary and comparison output.
pub struct ReportPrinter<W: Write> {
    out: W,
}

impl ReportPrinter<io::Stdout> {
    /// Printer writing to standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ReportPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Consume the printer and return the writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, line: impl Display) {
        if let Err(e) = writeln!(self.out, "{}", line) {
            tracing::warn!(error = %e, "failed to write report line");
        }
    }

    /// Banner printed once per session.
    pub fn banner(&mut self, scenario: &str, records: usize, runs: usize) {
        self.line(format_args!(
            "Running {} benchmarks with {} records, {} runs each.",
            scenario, records, runs
        ));
    }

    /// Start of one backend's section.
    pub fn backend_header(&mut self, backend: &str) {
        self.line("");
        self.line(format_args!("== {} ==", backend));
    }

    /// One timed iteration; `run` is 1-based.
    pub fn run_line(&mut self, operation: &str, run: usize, seconds: f64) {
        self.line(format_run_line(operation, run, seconds));
    }

    pub fn summary_line(&mut self, operation: &str, summary: &Summary) {
        self.line(format_summary_line(operation, summary));
    }

    /// Comparison across backends, backend-only operations and failures.
    pub fn comparison(&mut self, report: &SessionReport) {
        let backends = report.backend_names();

        self.line("");
        self.line("Comparison:");

        let rows = report.comparison();
        if rows.is_empty() {
            self.line("  (no operation completed on every backend)");
        } else {
            let mut table = Table::new();
            let mut header = vec![Cell::new("Operation")];
            for backend in &backends {
                header.push(Cell::new(format!("{} avg (s)", backend)));
                header.push(Cell::new(format!("{} stddev (s)", backend)));
            }
            table.set_header(header);

            for row in &rows {
                let mut cells = vec![Cell::new(&row.operation)];
                for summary in &row.summaries {
                    cells.push(Cell::new(format!("{:.4}", summary.mean)));
                    cells.push(Cell::new(format_std_dev(summary)));
                }
                table.add_row(cells);
            }
            self.line(table);
        }

        let only = report.backend_only();
        if !only.is_empty() {
            self.line("");
            self.line("Backend-only operations:");
            for entry in &only {
                self.line(format_args!(
                    "  {}: {}",
                    entry.operation,
                    entry.backends.join(", ")
                ));
            }
        }

        if !report.failures.is_empty() {
            self.line("");
            self.line("Failed operations:");
            for failure in &report.failures {
                self.line(format_args!(
                    "  {} {}: {}",
                    failure.backend, failure.operation, failure.error
                ));
            }
        }

        if let Err(e) = self.out.flush() {
            tracing::warn!(error = %e, "failed to flush report");
        }
    }
}

/// `<operation> - Run <i>: <seconds>`
pub fn format_run_line(operation: &str, run: usize, seconds: f64) -> String {
    format!("{} - Run {}: {:.4}", operation, run, seconds)
}

/// `<operation> - Average: <mean>s, StdDev: <stddev>s`
pub fn format_summary_line(operation: &str, summary: &Summary) -> String {
    format!(
        "{} - Average: {:.4}s, StdDev: {:.4}s",
        operation, summary.mean, summary.std_dev
    )
}

fn format_std_dev(summary: &Summary) -> String {
    if summary.is_spread_known() {
        format!("{:.4}", summary.std_dev)
    } else {
        format!("{:.4} (n=1)", summary.std_dev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{FailedRun, ResultTable};

    fn summary(mean: f64, std_dev: f64, count: usize) -> Summary {
        Summary {
            mean,
            std_dev,
            count,
        }
    }

    fn render(f: impl FnOnce(&mut ReportPrinter<Vec<u8>>)) -> String {
        let mut printer = ReportPrinter::new(Vec::new());
        f(&mut printer);
        String::from_utf8(printer.into_inner()).unwrap()
    }

    #[test]
    fn test_line_formats() {
        assert_eq!(format_run_line("bulk_insert", 2, 0.12345), "bulk_insert - Run 2: 0.1235");
        assert_eq!(
            format_summary_line("bulk_insert", &summary(1.5, 0.25, 5)),
            "bulk_insert - Average: 1.5000s, StdDev: 0.2500s"
        );
    }

    #[test]
    fn test_comparison_intersection_and_backend_only() {
        let mut document = ResultTable::new();
        document.insert("bulk_insert", summary(0.5, 0.1, 5));
        document.insert("join", summary(0.2, 0.0, 1));

        let mut sqlite = ResultTable::new();
        sqlite.insert("bulk_insert", summary(0.3, 0.05, 5));

        let mut report = SessionReport::default();
        report.push_backend("document", document);
        report.push_backend("sqlite", sqlite);
        report.failures.push(FailedRun {
            backend: "sqlite".to_string(),
            operation: "join".to_string(),
            error: "boom".to_string(),
        });

        let output = render(|p| p.comparison(&report));
        assert!(output.contains("Comparison:"));
        assert!(output.contains("bulk_insert"));
        assert!(output.contains("document avg (s)"));
        assert!(output.contains("0.3000"));
        assert!(output.contains("Backend-only operations:\n  join: document"));
        assert!(output.contains("Failed operations:\n  sqlite join: boom"));
    }

    #[test]
    fn test_write_failure_does_not_panic() {
        struct Broken;

        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
        }

        let mut printer = ReportPrinter::new(Broken);
        printer.run_line("join", 1, 0.5);
        printer.summary_line("join", &summary(0.5, 0.0, 1));
        printer.comparison(&SessionReport::default());
    }
}
