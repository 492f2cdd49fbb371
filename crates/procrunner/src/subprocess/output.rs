//! Bounded FIFO buffer of captured output rows.

use std::collections::VecDeque;

/// Default number of rows kept per process.
pub const DEFAULT_MAX_OUTPUT_ROWS: usize = 1000;

/// Ordered output rows with a hard cap; the oldest row is evicted first.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    rows: VecDeque<String>,
    max_rows: usize,
}

impl OutputBuffer {
    /// Create a buffer keeping at most `max_rows` rows (at least one).
    pub fn new(max_rows: usize) -> Self {
        let max_rows = max_rows.max(1);
        Self {
            rows: VecDeque::with_capacity(max_rows.min(64)),
            max_rows,
        }
    }

    /// Append a row, evicting from the front once the cap is reached.
    pub fn push(&mut self, row: impl Into<String>) {
        while self.rows.len() >= self.max_rows {
            self.rows.pop_front();
        }
        self.rows.push_back(row.into());
    }

    /// The last `n` rows joined by newlines, oldest first.
    pub fn tail(&self, n: usize) -> String {
        let skip = self.rows.len().saturating_sub(n);
        join_rows(self.rows.iter().skip(skip))
    }

    /// All buffered rows joined by newlines.
    pub fn all(&self) -> String {
        join_rows(self.rows.iter())
    }

    pub fn last(&self) -> Option<&str> {
        self.rows.back().map(String::as_str)
    }

    pub fn rows(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub const fn max_rows(&self) -> usize {
        self.max_rows
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_ROWS)
    }
}

fn join_rows<'a>(rows: impl Iterator<Item = &'a String>) -> String {
    rows.map(String::as_str).collect::<Vec<_>>().join("\n")
}
