//! Coverage reports and pytest output interpretation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

/// XML report file for one environment. Matrix entries share a workspace,
/// so each writes its own.
pub fn xml_report_file(env_name: &str) -> String {
    format!("coverage-{env_name}.xml")
}

/// pytest-cov data file for one environment, passed as `COVERAGE_FILE`.
pub fn coverage_data_file(env_name: &str) -> String {
    format!(".coverage.{env_name}")
}

/// Output encoding of a coverage report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportFormat {
    /// Terminal summary.
    Term,
    /// Terminal summary listing missed lines.
    TermMissing,
    /// Cobertura XML exchange format.
    Xml,
}

impl ReportFormat {
    /// Report type name as pytest-cov spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Term => "term",
            ReportFormat::TermMissing => "term-missing",
            ReportFormat::Xml => "xml",
        }
    }

    /// Value for pytest-cov's `--cov-report`. Exchange formats are written
    /// to `output` when one is given.
    pub fn cov_report_arg(&self, output: Option<&str>) -> String {
        match output {
            Some(path) if self.is_exchange() => format!("{}:{path}", self.as_str()),
            _ => self.as_str().to_string(),
        }
    }

    /// Whether the report is a machine-readable file rather than terminal output.
    pub fn is_exchange(&self) -> bool {
        matches!(self, ReportFormat::Xml)
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coverage report produced by one successful test step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub format: ReportFormat,
    /// Total line coverage in percent, when it could be parsed.
    pub total_percent: Option<f64>,
    /// Report file, for exchange formats.
    pub path: Option<PathBuf>,
}

/// Test counts from pytest's final summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: u32,
    pub failed: u32,
    pub errors: u32,
    pub skipped: u32,
}

impl TestSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errors > 0
    }
}

/// How a test command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestExit {
    Passed,
    TestsFailed,
    CoverageFailed,
}

fn total_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^TOTAL\s.*?(\d+(?:\.\d+)?)%\s*$").expect("valid TOTAL regex")
    })
}

fn file_row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(\S+)[ \t]+\d+[ \t]+\d+(?:[ \t]+\d+[ \t]+\d+)?[ \t]+(\d+(?:\.\d+)?)%")
            .expect("valid file row regex")
    })
}

fn line_rate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<coverage\b[^>]*?\bline-rate="([0-9]*\.?[0-9]+)""#)
            .expect("valid line-rate regex")
    })
}

fn summary_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+) (passed|failed|errors?|skipped)\b").expect("valid summary regex")
    })
}

/// Total percentage from a terminal coverage table (`TOTAL ... 85%`).
///
/// coverage.py omits the TOTAL row when a single file was measured; that
/// file's row is the total then.
pub fn parse_terminal_total(output: &str) -> Option<f64> {
    if let Some(total) = total_re().captures_iter(output).last() {
        return total[1].parse().ok();
    }
    let mut rows = file_row_re()
        .captures_iter(output)
        .filter(|c| &c[1] != "TOTAL");
    match (rows.next(), rows.next()) {
        (Some(only), None) => only[2].parse().ok(),
        _ => None,
    }
}

/// Total percentage from a Cobertura XML report's `line-rate`.
pub fn parse_xml_total(xml: &str) -> Option<f64> {
    line_rate_re()
        .captures(xml)
        .and_then(|c| c[1].parse::<f64>().ok())
        .filter(|rate| (0.0..=1.0).contains(rate))
        .map(|rate| (rate * 10_000.0).round() / 100.0)
}

/// Counts from the last pytest summary line (`=== 1 failed, 2 passed in 0.1s ===`).
pub fn parse_test_summary(output: &str) -> Option<TestSummary> {
    let line = output
        .lines()
        .rev()
        .find(|l| l.starts_with('=') && l.contains(" in ") && summary_count_re().is_match(l))?;

    let mut summary = TestSummary::default();
    for cap in summary_count_re().captures_iter(line) {
        let n: u32 = cap[1].parse().unwrap_or(0);
        match &cap[2] {
            "passed" => summary.passed += n,
            "failed" => summary.failed += n,
            "error" | "errors" => summary.errors += n,
            "skipped" => summary.skipped += n,
            _ => {}
        }
    }
    Some(summary)
}

const COVERAGE_FAILURE_MARKERS: [&str; 5] = [
    "FAIL Required test coverage",
    "CoverageException",
    "coverage.exceptions",
    "Failed to generate report",
    "Couldn't write report",
];

/// Whether pytest-cov reported that it could not measure or report coverage.
pub fn coverage_failure_detected(output: &str) -> bool {
    COVERAGE_FAILURE_MARKERS.iter().any(|m| output.contains(m))
}

/// Classify a pytest exit.
///
/// Failing tests win over coverage problems; a non-zero exit with neither
/// failing tests nor a coverage marker (interrupted, usage error, nothing
/// collected) counts as a test failure.
pub fn classify_test_exit(exit_code: i32, output: &str) -> TestExit {
    if exit_code == 0 {
        return TestExit::Passed;
    }
    let tests_failed = parse_test_summary(output)
        .map(|s| s.has_failures())
        .unwrap_or(false);
    if !tests_failed && coverage_failure_detected(output) {
        TestExit::CoverageFailed
    } else {
        TestExit::TestsFailed
    }
}
