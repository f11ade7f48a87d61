//! TAP-style report parsing.
//!
//! The test container prints a line-oriented report:
//!
//! ```text
//! TAP version 13
//! ok 1 - localhost can reach 8.8.8.8:53
//! not ok 2 - localhost cannot reach 10.0.0.1:22
//! 1..2
//! # tests 2
//! # pass  1
//! # fail  1
//! ```
//!
//! Output without a version header is unstructured and always fails.

/// Prefix the runner uses when it records a target-level error in a sink.
pub const ERROR_PREFIX: &str = "# netassert error:";

/// Parsed view of one sink's content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapReport {
    /// Version from the `TAP version N` header, if present.
    pub version: Option<u32>,
    /// Plan count from a `1..N` line.
    pub planned: Option<u64>,
    /// `# tests N` summary.
    pub tests: Option<u64>,
    /// `# pass N` summary.
    pub pass: Option<u64>,
    /// `# fail N` summary.
    pub fail: Option<u64>,
    /// Number of `ok` test lines.
    pub ok_lines: u64,
    /// Number of `not ok` test lines.
    pub not_ok_lines: u64,
    /// Errors recorded by the runner (`# netassert error: ...`).
    pub errors: Vec<String>,
    /// First non-blank line, kept for unstructured output.
    pub first_line: Option<String>,
}

impl TapReport {
    /// Parse sink content. Never fails: anything unrecognised is ignored.
    pub fn parse(content: &str) -> Self {
        let mut report = TapReport::default();

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if report.first_line.is_none() {
                report.first_line = Some(line.to_string());
            }

            if let Some(rest) = line.strip_prefix(ERROR_PREFIX) {
                report.errors.push(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("TAP version") {
                report.version = rest.trim().parse().ok().or(Some(0));
            } else if let Some(rest) = line.strip_prefix('#') {
                report.parse_summary(rest.trim());
            } else if is_test_line(line, "not ok") {
                report.not_ok_lines += 1;
            } else if is_test_line(line, "ok") {
                report.ok_lines += 1;
            } else if let Some(count) = parse_plan(line) {
                report.planned = Some(count);
            }
        }

        report
    }

    fn parse_summary(&mut self, body: &str) {
        let mut words = body.split_whitespace();
        let (Some(label), Some(count)) = (words.next(), words.next()) else {
            return;
        };
        let Ok(count) = count.parse::<u64>() else {
            return;
        };
        // Later summaries override earlier ones (subtests print their own).
        match label {
            "tests" => self.tests = Some(count),
            "pass" => self.pass = Some(count),
            "fail" => self.fail = Some(count),
            _ => {}
        }
    }

    /// True when a version header was seen.
    pub fn is_tap(&self) -> bool {
        self.version.is_some()
    }

    /// True when the report states how many tests ran.
    pub fn has_summary(&self) -> bool {
        self.tests.is_some() || self.planned.is_some()
    }

    /// Reported test count.
    pub fn test_count(&self) -> u64 {
        self.tests
            .or(self.planned)
            .unwrap_or(self.ok_lines + self.not_ok_lines)
    }

    /// Reported failure count (summary or `not ok` lines, whichever is larger).
    pub fn failure_count(&self) -> u64 {
        self.fail.unwrap_or(0).max(self.not_ok_lines)
    }

    /// A report passes iff it is TAP, carries a summary, reports zero
    /// failures, and the runner recorded no errors.
    pub fn passed(&self) -> bool {
        self.is_tap() && self.has_summary() && self.failure_count() == 0 && self.errors.is_empty()
    }

    /// One-line reason for a failing report.
    pub fn failure_reason(&self) -> Option<String> {
        if self.passed() {
            return None;
        }
        if self.is_tap() && self.has_summary() && self.failure_count() > 0 {
            return Some(format!(
                "{} of {} tests failed",
                self.failure_count(),
                self.test_count()
            ));
        }
        if let Some(error) = self.errors.first() {
            return Some(error.clone());
        }
        if !self.is_tap() {
            return Some(match &self.first_line {
                Some(line) => format!("unstructured output: {}", line),
                None => "empty output".to_string(),
            });
        }
        Some("report has no summary line".to_string())
    }
}

fn is_test_line(line: &str, status: &str) -> bool {
    line.strip_prefix(status)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

fn parse_plan(line: &str) -> Option<u64> {
    let rest = line.strip_prefix("1..")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
