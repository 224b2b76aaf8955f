//! Statement lexer for sqlbatch.
//!
//! Splits raw SQL text from an ordered list of sources into individual
//! statements. Only comments, quoted literals and the statement separator are
//! recognised; the SQL itself is never interpreted.
//!
//! - Single-line comments: `-- ...` up to and including the newline
//! - Block comments: `/* ... */`
//! - Quoted regions: `'...'` and `"..."` (backslash escapes only inside `"`)
//! - A configurable separator of one or more characters (default `;`)

mod chars;
mod marker;

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;

use tracing::trace;

use crate::error::{Result, SqlBatchError};
use chars::CharSource;
use marker::Marker;

const LINE_COMMENT: &str = "--";
const BLOCK_COMMENT_START: &str = "/*";
const BLOCK_COMMENT_END: &str = "*/";

/// Default statement separator.
pub const DEFAULT_SEPARATOR: &str = ";";

/// How the lexer splits its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexerConfig {
    /// Drop comment text from returned statements.
    pub strip_comments: bool,
    /// Statement separator, one or more characters.
    pub separator: String,
    /// When false, each source is returned whole as a single statement.
    pub split_statements: bool,
}

impl Default for LexerConfig {
    fn default() -> Self {
        Self {
            strip_comments: true,
            separator: DEFAULT_SEPARATOR.to_string(),
            split_statements: true,
        }
    }
}

impl LexerConfig {
    /// Checks the configuration for values the lexer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.separator.is_empty() {
            return Err(SqlBatchError::config(
                "Statement separator must contain at least one character",
            ));
        }
        Ok(())
    }
}

/// Lazily yields SQL statements from a list of character sources.
///
/// Sources are consumed in the order they were added and dropped once
/// exhausted. Segments that contain nothing but whitespace and comments are
/// skipped rather than returned as empty statements.
pub struct StatementLexer {
    sources: VecDeque<CharSource>,
    split_statements: bool,
    scanner: Scanner,
}

impl StatementLexer {
    /// Creates a lexer with no sources.
    pub fn new(config: LexerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sources: VecDeque::new(),
            split_statements: config.split_statements,
            scanner: Scanner::new(config.strip_comments, &config.separator),
        })
    }

    /// Appends a reader to the end of the source list.
    pub fn add_source<R: Read + Send + 'static>(&mut self, reader: R) {
        self.sources.push_back(CharSource::new(Box::new(reader)));
    }

    /// Appends literal SQL text.
    pub fn add_str(&mut self, sql: impl Into<String>) {
        self.add_source(Cursor::new(sql.into()));
    }

    /// Appends the contents of a file.
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| {
            SqlBatchError::input(format!("Cannot open {}: {e}", path.display()))
        })?;
        self.add_source(file);
        Ok(())
    }

    /// Appends standard input.
    pub fn add_stdin(&mut self) {
        self.add_source(io::stdin());
    }

    /// Number of sources not yet exhausted.
    pub fn remaining_sources(&self) -> usize {
        self.sources.len()
    }

    /// Returns the next statement, or `None` once every source is exhausted.
    pub fn next_statement(&mut self) -> Result<Option<String>> {
        loop {
            let Some(source) = self.sources.front_mut() else {
                return Ok(None);
            };

            if !self.split_statements {
                let text = source.read_remaining().map_err(read_error)?;
                self.sources.pop_front();
                return Ok(Some(text));
            }

            let segment = self.scanner.scan(source).map_err(read_error)?;
            if segment.boundary == Boundary::EndOfSource {
                self.sources.pop_front();
            }

            if segment.has_code && !segment.text.trim().is_empty() {
                return Ok(Some(segment.text));
            }
            trace!("Skipping segment without code: {:?}", segment.text);
        }
    }
}

impl Iterator for StatementLexer {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_statement().transpose()
    }
}

fn read_error(e: io::Error) -> SqlBatchError {
    SqlBatchError::input(format!("Failed to read SQL input: {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Separator,
    EndOfSource,
}

/// Text accumulated between two statement boundaries.
#[derive(Debug)]
struct Segment {
    text: String,
    /// At least one character outside comments, whitespace and partial markers.
    has_code: bool,
    boundary: Boundary,
}

#[derive(Debug)]
enum Mode {
    Normal,
    LineComment,
    BlockComment { close: Marker },
    Quote { closer: char, escaped: bool },
}

/// Character-level state machine. State is reset at the start of each segment.
struct Scanner {
    strip_comments: bool,
    separator: Marker,
    line_open: Marker,
    block_open: Marker,
    mode: Mode,
}

impl Scanner {
    fn new(strip_comments: bool, separator: &str) -> Self {
        Self {
            strip_comments,
            separator: Marker::new(separator),
            line_open: Marker::new(LINE_COMMENT),
            block_open: Marker::new(BLOCK_COMMENT_START),
            mode: Mode::Normal,
        }
    }

    fn reset_markers(&mut self) {
        self.separator.reset();
        self.line_open.reset();
        self.block_open.reset();
    }

    fn in_candidate(&self) -> bool {
        self.separator.is_partial() || self.line_open.is_partial() || self.block_open.is_partial()
    }

    /// Reads from `source` up to the next separator or the end of the source.
    fn scan(&mut self, source: &mut CharSource) -> io::Result<Segment> {
        self.reset_markers();
        self.mode = Mode::Normal;

        let mut text = String::new();
        let mut has_code = false;

        while let Some(c) = source.next_char()? {
            match &mut self.mode {
                Mode::Normal => {
                    let opens_block = self.block_open.feed(c);
                    let opens_line = self.line_open.feed(c);

                    if opens_block || opens_line {
                        // The opener's first character was already appended
                        if self.strip_comments {
                            text.pop();
                        } else {
                            text.push(c);
                        }
                        self.mode = if opens_block {
                            Mode::BlockComment {
                                close: Marker::new(BLOCK_COMMENT_END),
                            }
                        } else {
                            Mode::LineComment
                        };
                        continue;
                    }

                    if self.separator.feed(c) {
                        for _ in 1..self.separator.width() {
                            text.pop();
                        }
                        return Ok(Segment {
                            text,
                            has_code,
                            boundary: Boundary::Separator,
                        });
                    }

                    if !c.is_whitespace() && !self.in_candidate() {
                        has_code = true;
                    }
                    if c == '\'' || c == '"' {
                        self.mode = Mode::Quote {
                            closer: c,
                            escaped: false,
                        };
                    }
                    text.push(c);
                }
                Mode::LineComment => {
                    let ends = c == '\n';
                    if ends || !self.strip_comments {
                        text.push(c);
                    }
                    if ends {
                        self.mode = Mode::Normal;
                        self.reset_markers();
                    }
                }
                Mode::BlockComment { close } => {
                    if !self.strip_comments {
                        text.push(c);
                    }
                    if close.feed(c) {
                        self.mode = Mode::Normal;
                        self.reset_markers();
                    }
                }
                Mode::Quote { closer, escaped } => {
                    text.push(c);
                    if c == *closer && !*escaped {
                        self.mode = Mode::Normal;
                    } else {
                        *escaped = *closer == '"' && c == '\\';
                    }
                }
            }
        }

        Ok(Segment {
            text,
            has_code,
            boundary: Boundary::EndOfSource,
        })
    }
}
