//! Post-hoc counting of per-test results in a captured listener log.

use serde::{Deserialize, Serialize};

use crate::line::{parse_result_line, ResultState};

/// Element names that denote an individual test (as opposed to a suite).
const TEST_ELEMENTS: &[&str] = &["test", "test-case"];

/// Per-outcome test counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: usize,
    pub failed: usize,
    /// Results with an unrecognized outcome
    pub inconclusive: usize,
    /// Skipped or filtered-out tests
    pub filtered: usize,
}

impl TestCounts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.inconclusive + self.filtered
    }
}

/// Accumulates counts line by line.
#[derive(Debug, Default)]
pub struct ResultTally {
    counts: TestCounts,
    dropped: usize,
}

impl ResultTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every per-test line in `text`.
    pub fn observe_text(&mut self, text: &str) {
        for line in text.lines() {
            self.observe_line(line);
        }
    }

    pub fn observe_line(&mut self, line: &str) {
        match parse_result_line(line) {
            Ok(Some(test)) if TEST_ELEMENTS.contains(&test.element.as_str()) => {
                match test.state {
                    ResultState::Pass => self.counts.passed += 1,
                    ResultState::Fail => self.counts.failed += 1,
                    ResultState::Skip => self.counts.filtered += 1,
                    ResultState::Unknown => self.counts.inconclusive += 1,
                }
            }
            Ok(_) => {}
            Err(_) => self.dropped += 1,
        }
    }

    pub fn counts(&self) -> TestCounts {
        self.counts
    }

    /// Lines that carried the test marker but could not be parsed.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
