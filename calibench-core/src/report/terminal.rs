use std::io::{self, Write};

use colored::{ColoredString, Colorize};

use super::{BaselineComparison, RelativeSpeed, ReportError, Reporter, RunSummary};
use crate::clock::Timer;
use crate::result::{BenchmarkResult, Measurement};
use crate::stats::Verdict;

const NAME_WIDTH: usize = 45;

/// A reporter that writes one line per benchmark to the terminal.
#[derive(Debug, Clone)]
pub struct TerminalReporter {
    /// Whether to use colors in output (defaults to true).
    use_colors: bool,
}

impl Default for TerminalReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalReporter {
    /// Create a new terminal reporter with default settings.
    pub fn new() -> Self {
        Self { use_colors: true }
    }

    /// Create a terminal reporter with color output disabled.
    pub fn without_colors() -> Self {
        Self { use_colors: false }
    }

    fn paint(&self, text: String, style: fn(String) -> ColoredString) -> String {
        if self.use_colors {
            style(text).to_string()
        } else {
            text
        }
    }

    /// Format operations per second, two decimals below 100.
    fn format_ops(ops_sec: f64) -> String {
        if ops_sec < 100.0 {
            format!("{:.2}", ops_sec)
        } else {
            group_thousands(ops_sec.round() as u64)
        }
    }

    /// Format a relative speed such as `2.50x faster`.
    fn format_relative(relative: RelativeSpeed) -> String {
        match relative {
            RelativeSpeed::Baseline => "(baseline)".to_string(),
            RelativeSpeed::Faster(x) => format!("({:.2}x faster)", x),
            RelativeSpeed::Slower(x) => format!("({:.2}x slower)", x),
        }
    }

    fn truncate_name(name: &str) -> String {
        if name.chars().count() > NAME_WIDTH {
            let head: String = name.chars().take(NAME_WIDTH - 3).collect();
            format!("{}...", head)
        } else {
            name.to_string()
        }
    }

    /// Print a single benchmark line.
    fn print_result(&self, writer: &mut impl Write, result: &BenchmarkResult) -> io::Result<()> {
        let name = format!("{:<width$}", Self::truncate_name(&result.name), width = NAME_WIDTH);
        let name = if result.baseline {
            self.paint(name, |s| s.magenta().bold())
        } else {
            name
        };

        let headline = match &result.measurement {
            Measurement::Throughput { ops_sec, .. } => {
                format!("{} ops/sec", Self::format_ops(*ops_sec))
            }
            Measurement::Latency { total_time_secs } => {
                format!("{} total time", Timer::format(total_time_secs * Timer::SCALE))
            }
        };
        write!(
            writer,
            "{} x {}",
            name,
            self.paint(headline, |s| s.cyan().bold())
        )?;

        let histogram = &result.histogram;
        write!(
            writer,
            " +/- {:.2}% ({} runs sampled) ",
            histogram.cv * 100.0,
            histogram.samples
        )?;

        for plugin in &result.plugins {
            if let Some(report) = &plugin.report {
                write!(writer, "{} ", self.paint(report.clone(), |s| s.dimmed()))?;
            }
        }

        let p75 = histogram.percentile(75.0).unwrap_or(histogram.max);
        let p99 = histogram.percentile(99.0).unwrap_or(histogram.max);
        writeln!(
            writer,
            "min..max=({}...{}) p75={} p99={}",
            self.paint(Timer::format(histogram.min), |s| s.green()),
            self.paint(Timer::format(histogram.max), |s| s.red()),
            Timer::format(p75),
            Timer::format(p99),
        )
    }

    /// Print the significance table header.
    fn print_comparison_header(&self, writer: &mut impl Write) -> io::Result<()> {
        writeln!(writer)?;
        let header = format!(
            "{:<40} {:>24} {:>10} {:>12} {:>14}",
            "Benchmark", "Baseline", "p-value", "Confidence", "Result"
        );
        writeln!(writer, "{}", self.paint(header, |s| s.bold()))?;
        writeln!(writer, "{}", "-".repeat(104))
    }

    /// Print a single comparison row.
    fn print_comparison_row(
        &self,
        writer: &mut impl Write,
        row: &BaselineComparison,
    ) -> io::Result<()> {
        let comparison = &row.comparison;
        let name = if row.name.len() > 38 {
            format!("{}...", &row.name[..35])
        } else {
            row.name.clone()
        };

        let verdict = format!("{} {}", comparison.verdict, comparison.stars);
        // Pad before coloring so ANSI escapes don't break alignment
        let verdict = format!("{:>14}", verdict.trim_end());
        let verdict = match comparison.verdict {
            Verdict::Faster => self.paint(verdict, |s| s.green().bold()),
            Verdict::Slower => self.paint(verdict, |s| s.red().bold()),
            Verdict::Same => self.paint(verdict, |s| s.yellow()),
        };

        writeln!(
            writer,
            "{:<40} {:>24} {:>10} {:>11.2}% {}",
            name,
            row.baseline,
            format!("{:.4}", comparison.p_value),
            comparison.confidence,
            verdict,
        )
    }

    /// Print the relative speed of every benchmark against the baseline.
    fn print_baseline_summary(
        &self,
        writer: &mut impl Write,
        summary: &RunSummary,
    ) -> io::Result<()> {
        if summary.baseline().is_none() {
            return Ok(());
        }

        writeln!(writer)?;
        writeln!(
            writer,
            "{}",
            self.paint("Summary (vs. baseline):".to_string(), |s| s.bold())
        )?;

        let standings = summary.analyze();
        let width = standings.iter().map(|s| s.name.len()).max().unwrap_or(0);

        for standing in &standings {
            let Some(relative) = standing.relative else {
                continue;
            };
            let text = Self::format_relative(relative);
            let text = match relative {
                RelativeSpeed::Baseline => self.paint(text, |s| s.magenta()),
                RelativeSpeed::Faster(_) => self.paint(text, |s| s.green()),
                RelativeSpeed::Slower(_) => self.paint(text, |s| s.red()),
            };
            write!(writer, "  {:<width$}  {}", standing.name, text, width = width)?;
            if standing.fastest {
                write!(writer, " fastest")?;
            }
            if standing.slowest {
                write!(writer, " slowest")?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Print isolation failures and elimination warnings.
    fn print_diagnostics(&self, writer: &mut impl Write, summary: &RunSummary) -> io::Result<()> {
        for failure in &summary.failures {
            let label = self.paint("FAILED".to_string(), |s| s.red().bold());
            writeln!(writer, "{} {}: {}", label, failure.name, failure.error)?;
        }

        if summary.warnings.is_empty() {
            return Ok(());
        }

        writeln!(writer)?;
        let label = self.paint(
            "Dead code elimination warnings:".to_string(),
            |s| s.yellow().bold(),
        );
        writeln!(writer, "{}", label)?;
        for warning in &summary.warnings {
            writeln!(
                writer,
                "  {} ran at {} per op, {:.1}x the empty baseline of {}; its work may have been optimized away",
                warning.name,
                Timer::format(warning.time_per_op_ns),
                warning.ratio,
                Timer::format(warning.baseline_ns),
            )?;
        }
        Ok(())
    }

    /// Write the full report for `summary`.
    pub fn write_to(&self, writer: &mut impl Write, summary: &RunSummary) -> io::Result<()> {
        for result in &summary.results {
            self.print_result(writer, result)?;
        }

        if !summary.comparisons.is_empty() {
            self.print_comparison_header(writer)?;
            for row in &summary.comparisons {
                self.print_comparison_row(writer, row)?;
            }
        }

        self.print_baseline_summary(writer, summary)?;
        self.print_diagnostics(writer, summary)?;
        writer.flush()
    }
}

/// `1234567` as `1,234,567`.
fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

impl Reporter for TerminalReporter {
    fn report(&self, summary: &RunSummary) -> Result<(), ReportError> {
        let stdout = io::stdout();
        let mut writer = stdout.lock();
        self.write_to(&mut writer, summary)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::HistogramSummary;
    use crate::report::IsolationFailure;
    use crate::result::{EliminationWarning, PluginResult};
    use crate::stats::compare_benchmarks;

    fn histogram() -> HistogramSummary {
        HistogramSummary {
            samples: 4,
            min: 100.0,
            max: 400.0,
            mean: 250.0,
            stddev: 129.1,
            cv: 0.5164,
            sample_data: vec![100.0, 200.0, 300.0, 400.0],
        }
    }

    fn throughput(name: &str, ops_sec: f64, baseline: bool) -> BenchmarkResult {
        BenchmarkResult {
            name: name.to_string(),
            iterations: 1000,
            measurement: Measurement::Throughput {
                ops_sec,
                ops_sec_per_run: vec![ops_sec],
            },
            histogram: histogram(),
            plugins: vec![],
            baseline,
        }
    }

    fn render(summary: &RunSummary) -> String {
        let mut buffer = Vec::new();
        TerminalReporter::without_colors()
            .write_to(&mut buffer, summary)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_format_ops() {
        assert_eq!(TerminalReporter::format_ops(19.876), "19.88");
        assert_eq!(TerminalReporter::format_ops(1_234_567.4), "1,234,567");
        assert_eq!(TerminalReporter::format_ops(100.0), "100");
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(12_345_678), "12,345,678");
    }

    #[test]
    fn test_format_relative() {
        assert_eq!(
            TerminalReporter::format_relative(RelativeSpeed::Faster(2.5)),
            "(2.50x faster)"
        );
        assert_eq!(
            TerminalReporter::format_relative(RelativeSpeed::Slower(10.0)),
            "(10.00x slower)"
        );
    }

    #[test]
    fn test_truncate_long_name() {
        let name = "x".repeat(60);
        let truncated = TerminalReporter::truncate_name(&name);
        assert_eq!(truncated.len(), NAME_WIDTH);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_result_line() {
        let mut result = throughput("sum", 2_000_000.0, false);
        result.plugins.push(PluginResult {
            name: "memory".to_string(),
            report: Some("heap usage=12 B".to_string()),
            result: serde_json::Value::Null,
        });

        let output = render(&RunSummary {
            results: vec![result],
            ..Default::default()
        });

        assert!(output.starts_with("sum"));
        assert!(output.contains("x 2,000,000 ops/sec"));
        assert!(output.contains("+/- 51.64%"));
        assert!(output.contains("(4 runs sampled)"));
        assert!(output.contains("heap usage=12 B"));
        assert!(output.contains("min..max=(100 ns...400 ns)"));
        assert!(output.contains("p75=300 ns"));
        assert!(output.contains("p99=400 ns"));
    }

    #[test]
    fn test_latency_line() {
        let result = BenchmarkResult {
            name: "read".to_string(),
            iterations: 3,
            measurement: Measurement::Latency {
                total_time_secs: 0.0125,
            },
            histogram: histogram(),
            plugins: vec![],
            baseline: false,
        };

        let output = render(&RunSummary {
            results: vec![result],
            ..Default::default()
        });
        assert!(output.contains("12.50 ms total time"));
    }

    #[test]
    fn test_report_with_baseline_and_comparisons() {
        let candidate = [50.0, 51.0, 49.0, 50.0, 52.0, 48.0, 51.0, 49.0, 50.0, 51.0];
        let baseline = [100.0, 101.0, 99.0, 100.0, 102.0, 98.0, 101.0, 99.0, 100.0, 101.0];

        let summary = RunSummary {
            results: vec![throughput("base", 100.0, true), throughput("cand", 50.0, false)],
            comparisons: vec![BaselineComparison {
                name: "cand".to_string(),
                baseline: "base".to_string(),
                comparison: compare_benchmarks(&candidate, &baseline, 0.05),
            }],
            failures: vec![IsolationFailure {
                name: "crashy".to_string(),
                error: "worker exited with status 1".to_string(),
            }],
            warnings: vec![EliminationWarning {
                name: "noop".to_string(),
                time_per_op_ns: 2.0,
                baseline_ns: 1.0,
                ratio: 2.0,
            }],
        };

        let output = render(&summary);
        assert!(output.contains("p-value"));
        assert!(output.contains("slower ***"));
        assert!(output.contains("Summary (vs. baseline):"));
        assert!(output.contains("(baseline) fastest"));
        assert!(output.contains("(2.00x slower) slowest"));
        assert!(output.contains("FAILED crashy: worker exited with status 1"));
        assert!(output.contains("Dead code elimination warnings:"));
        assert!(output.contains("noop ran at 2.00 ns per op, 2.0x"));
    }

    #[test]
    fn test_no_baseline_section_without_baseline() {
        let output = render(&RunSummary {
            results: vec![throughput("a", 10.0, false)],
            ..Default::default()
        });
        assert!(!output.contains("Summary (vs. baseline):"));
        assert!(!output.contains("Result"));
    }
}
