//! Partial-match tracking for the fixed character sequences the lexer watches for.

/// Tracks how much of a fixed pattern the most recent characters have matched.
#[derive(Debug, Clone)]
pub struct Marker {
    pattern: Vec<char>,
    matched: usize,
}

impl Marker {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.chars().collect(),
            matched: 0,
        }
    }

    /// Feeds one character and returns true when it completes the pattern.
    ///
    /// A character that breaks the current candidate but begins the pattern
    /// starts a new candidate instead of resetting to zero.
    pub fn feed(&mut self, c: char) -> bool {
        if self.pattern.get(self.matched) == Some(&c) {
            self.matched += 1;
        } else if self.pattern.first() == Some(&c) {
            self.matched = 1;
        } else {
            self.matched = 0;
        }

        if self.matched == self.pattern.len() {
            self.matched = 0;
            true
        } else {
            false
        }
    }

    /// True while a candidate match is in progress.
    pub fn is_partial(&self) -> bool {
        self.matched > 0
    }

    pub fn reset(&mut self) {
        self.matched = 0;
    }

    /// Number of pattern characters.
    pub fn width(&self) -> usize {
        self.pattern.len()
    }
}
