//! Rendering of query results and statement echo.
//!
//! Results are written in one of four formats: delimited text (the default),
//! CSV, CSV tuned for MS-DOS spreadsheets, and SQL insert statements.

use csv::{QuoteStyle, Terminator, WriterBuilder};
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use crate::db::sql::literal;
use crate::db::{ColumnInfo, ResultCursor, Value};
use crate::error::{Result, SqlBatchError};
use crate::handler::{Exclusive, ResultProcessor, RowHandler};

/// Default text between columns.
pub const DEFAULT_COLUMN_SEPARATOR: &str = "\t";

/// Default text written for NULL values.
pub const DEFAULT_NULL_TEXT: &str = "null";

/// Default text after every row.
pub const DEFAULT_ROW_SEPARATOR: &str = "\n";

fn write_error(e: impl fmt::Display) -> SqlBatchError {
    SqlBatchError::handler(format!("Failed to write output: {e}"))
}

/// How query results are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Delimited text with backslash escapes.
    #[default]
    Text,
    Csv,
    /// CSV with CRLF rows; numeric-looking text is written as `="..."` so
    /// spreadsheets keep leading zeroes.
    MsDosCsv,
    /// One `insert into` statement per row.
    Inserts,
}

impl FromStr for OutputFormat {
    type Err = SqlBatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "text" => Ok(Self::Text),
            "csv" => Ok(Self::Csv),
            "msdoscsv" => Ok(Self::MsDosCsv),
            "inserts" => Ok(Self::Inserts),
            _ => Err(SqlBatchError::config(format!(
                "Invalid file format: {s}. Expected: none, csv, msdoscsv or inserts"
            ))),
        }
    }
}

/// When a value is enclosed in quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteMode {
    Always,
    Never,
    /// Quote everything that does not look like a number.
    Text,
    /// Quote values containing the column separator.
    #[default]
    Necessary,
}

impl FromStr for QuoteMode {
    type Err = SqlBatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "text" => Ok(Self::Text),
            "necessary" => Ok(Self::Necessary),
            _ => Err(SqlBatchError::config(format!(
                "Invalid quote mode: {s}. Expected: always, never, text or necessary"
            ))),
        }
    }
}

/// Turns the escapes `\n`, `\t`, `\r`, `\b` and `\f` typed on a command line
/// into the characters they name.
pub fn unescape_separator(text: &str) -> String {
    text.replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\r", "\r")
        .replace("\\b", "\u{8}")
        .replace("\\f", "\u{c}")
}

/// Plain decimal numbers: an optional minus, digits and at most one point,
/// which may not come last.
fn looks_numeric(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    !digits.is_empty()
        && !text.ends_with('.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn is_text_column(column: &ColumnInfo) -> bool {
    let data_type = column.data_type.to_uppercase();
    data_type.contains("CHAR") || matches!(data_type.as_str(), "TEXT" | "NAME" | "STRING")
}

/// Every rendering setting, resolved from a format's defaults and any
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub column_separator: String,
    pub row_separator: String,
    pub null_text: String,
    /// Empty disables quoting.
    pub quote: String,
    /// Empty disables escaping.
    pub escape: String,
    pub quote_mode: QuoteMode,
    pub include_headers: bool,
    pub true_text: String,
    pub false_text: String,
    /// Target table of the inserts format.
    pub table_name: Option<String>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self::for_format(OutputFormat::Text)
    }
}

impl OutputOptions {
    pub fn for_format(format: OutputFormat) -> Self {
        let text = Self {
            format,
            column_separator: DEFAULT_COLUMN_SEPARATOR.to_string(),
            row_separator: DEFAULT_ROW_SEPARATOR.to_string(),
            null_text: DEFAULT_NULL_TEXT.to_string(),
            quote: String::new(),
            escape: "\\".to_string(),
            quote_mode: QuoteMode::Necessary,
            include_headers: false,
            true_text: "true".to_string(),
            false_text: "false".to_string(),
            table_name: None,
        };

        match format {
            OutputFormat::Text => text,
            OutputFormat::Csv | OutputFormat::MsDosCsv => Self {
                column_separator: ",".to_string(),
                row_separator: if format == OutputFormat::MsDosCsv {
                    "\r\n".to_string()
                } else {
                    DEFAULT_ROW_SEPARATOR.to_string()
                },
                null_text: String::new(),
                quote: "\"".to_string(),
                escape: "\"".to_string(),
                quote_mode: QuoteMode::Text,
                include_headers: true,
                ..text
            },
            OutputFormat::Inserts => Self {
                column_separator: ", ".to_string(),
                quote: "'".to_string(),
                escape: "'".to_string(),
                quote_mode: QuoteMode::Text,
                ..text
            },
        }
    }

    /// Builds the row handler writing to `writer` in the configured format.
    pub fn handler(&self, writer: Box<dyn Write + Send>) -> Result<Arc<dyn RowHandler>> {
        Ok(match self.format {
            OutputFormat::Text => Arc::new(Exclusive::new(TextOutput::with_options(writer, self))),
            OutputFormat::Csv | OutputFormat::MsDosCsv => {
                Arc::new(Exclusive::new(CsvOutput::new(writer, self)?))
            }
            OutputFormat::Inserts => {
                let table = self.table_name.clone().ok_or_else(|| {
                    SqlBatchError::config("The inserts file format needs a table name")
                })?;
                Arc::new(Exclusive::new(InsertsOutput::new(writer, table, self)))
            }
        })
    }

    fn bool_text(&self, value: bool) -> &str {
        if value {
            &self.true_text
        } else {
            &self.false_text
        }
    }

    /// Text of a non-null value.
    fn value_text(&self, value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(self.bool_text(*b).to_string()),
            other => Some(other.render("")),
        }
    }
}

/// Writes every row of a result as one line of delimited text.
pub struct TextOutput<W> {
    writer: W,
    options: OutputOptions,
    rows_written: usize,
}

impl<W: Write + Send> TextOutput<W> {
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, &OutputOptions::default())
    }

    pub fn with_options(writer: W, options: &OutputOptions) -> Self {
        Self {
            writer,
            options: options.clone(),
            rows_written: 0,
        }
    }

    pub fn with_column_separator(mut self, separator: impl Into<String>) -> Self {
        self.options.column_separator = separator.into();
        self
    }

    pub fn with_null_text(mut self, null_text: impl Into<String>) -> Self {
        self.options.null_text = null_text.into();
        self
    }

    /// Writes a line of column names before the rows of each result.
    pub fn with_headers(mut self, include_headers: bool) -> Self {
        self.options.include_headers = include_headers;
        self
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Quotes or escapes `text` following the quote mode.
    fn field(&self, text: &str) -> String {
        let options = &self.options;
        let separator = options.column_separator.as_str();
        let quote = options.quote.as_str();
        let escape = options.escape.as_str();

        let quoted = !quote.is_empty()
            && match options.quote_mode {
                QuoteMode::Never => false,
                QuoteMode::Always => true,
                QuoteMode::Necessary => !separator.is_empty() && text.contains(separator),
                QuoteMode::Text => !looks_numeric(text),
            };

        if quoted {
            let body = if escape.is_empty() {
                text.to_string()
            } else {
                text.replace(quote, &format!("{escape}{quote}"))
            };
            return format!("{quote}{body}{quote}");
        }

        let mut out = text.to_string();
        if !escape.is_empty() {
            if !separator.is_empty() {
                out = out.replace(separator, &format!("{escape}{separator}"));
            }
            if options.quote_mode != QuoteMode::Never && !quote.is_empty() {
                out = out.replace(quote, &format!("{escape}{quote}"));
            }
        }
        out
    }

    fn write_line(&mut self, fields: &[String]) -> Result<()> {
        let line = fields.join(&self.options.column_separator);
        self.writer.write_all(line.as_bytes()).map_err(write_error)?;
        self.writer
            .write_all(self.options.row_separator.as_bytes())
            .map_err(write_error)
    }
}

impl<W: Write + Send> ResultProcessor for TextOutput<W> {
    fn process(&mut self, cursor: &mut dyn ResultCursor) -> Result<()> {
        if self.options.include_headers {
            let names: Vec<String> = cursor.columns().iter().map(|c| self.field(&c.name)).collect();
            self.write_line(&names)?;
        }

        while let Some(row) = cursor.next_row()? {
            let fields: Vec<String> = row
                .iter()
                .map(|v| match self.options.value_text(v) {
                    Some(text) => self.field(&text),
                    None => self.options.null_text.clone(),
                })
                .collect();
            self.write_line(&fields)?;
            self.rows_written += 1;
        }

        self.writer.flush().map_err(write_error)
    }
}

fn single_byte(text: &str, what: &str) -> Result<u8> {
    match text.as_bytes() {
        [byte] => Ok(*byte),
        _ => Err(SqlBatchError::config(format!(
            "CSV output needs a single-byte {what}, got '{}'",
            text.escape_default()
        ))),
    }
}

/// Writes results as CSV records.
///
/// In text quote mode the quoting is decided per field here, so NULLs stay
/// unquoted and the MS-DOS `="..."` form is written as is.
pub struct CsvOutput<W: Write> {
    writer: csv::Writer<W>,
    options: OutputOptions,
    rows_written: usize,
}

impl<W: Write + Send> CsvOutput<W> {
    pub fn new(writer: W, options: &OutputOptions) -> Result<Self> {
        let delimiter = single_byte(&options.column_separator, "column separator")?;
        let quote = single_byte(&options.quote, "quote")?;
        let escape = single_byte(&options.escape, "escape character")?;
        let terminator = match options.row_separator.as_str() {
            "\r\n" => Terminator::CRLF,
            other => Terminator::Any(single_byte(other, "row separator")?),
        };
        let quote_style = match options.quote_mode {
            QuoteMode::Always => QuoteStyle::Always,
            QuoteMode::Necessary => QuoteStyle::Necessary,
            QuoteMode::Never | QuoteMode::Text => QuoteStyle::Never,
        };

        let writer = WriterBuilder::new()
            .delimiter(delimiter)
            .quote(quote)
            .escape(escape)
            .double_quote(escape == quote)
            .terminator(terminator)
            .quote_style(quote_style)
            .flexible(true)
            .from_writer(writer);

        Ok(Self {
            writer,
            options: options.clone(),
            rows_written: 0,
        })
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| write_error(e.error()))
    }

    fn quote_text(&self, text: &str) -> String {
        let quote = &self.options.quote;
        let escaped = text.replace(quote.as_str(), &format!("{}{quote}", self.options.escape));
        format!("{quote}{escaped}{quote}")
    }

    fn field(&self, text: String, text_column: bool) -> String {
        let ms_dos = self.options.format == OutputFormat::MsDosCsv;
        if ms_dos && text_column && looks_numeric(&text) {
            let quote = &self.options.quote;
            return format!("={quote}{text}{quote}");
        }
        if self.options.quote_mode == QuoteMode::Text && !looks_numeric(&text) {
            return self.quote_text(&text);
        }
        text
    }
}

impl<W: Write + Send> ResultProcessor for CsvOutput<W> {
    fn process(&mut self, cursor: &mut dyn ResultCursor) -> Result<()> {
        let text_columns: Vec<bool> = cursor.columns().iter().map(is_text_column).collect();

        if self.options.include_headers {
            let names: Vec<String> = cursor
                .columns()
                .iter()
                .map(|c| self.field(c.name.clone(), false))
                .collect();
            self.writer.write_record(&names).map_err(write_error)?;
        }

        while let Some(row) = cursor.next_row()? {
            let record: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, v)| match self.options.value_text(v) {
                    Some(text) => self.field(text, text_columns.get(i).copied().unwrap_or(false)),
                    None => self.options.null_text.clone(),
                })
                .collect();
            self.writer.write_record(&record).map_err(write_error)?;
            self.rows_written += 1;
        }

        self.writer.flush().map_err(write_error)
    }
}

/// Writes every row as an `insert into` statement for another table.
pub struct InsertsOutput<W> {
    writer: W,
    table: String,
    column_separator: String,
    row_separator: String,
    null_text: String,
    rows_written: usize,
}

impl<W: Write + Send> InsertsOutput<W> {
    pub fn new(writer: W, table: impl Into<String>, options: &OutputOptions) -> Self {
        Self {
            writer,
            table: table.into(),
            column_separator: options.column_separator.clone(),
            row_separator: options.row_separator.clone(),
            null_text: options.null_text.clone(),
            rows_written: 0,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ResultProcessor for InsertsOutput<W> {
    fn process(&mut self, cursor: &mut dyn ResultCursor) -> Result<()> {
        let names: Vec<&str> = cursor.columns().iter().map(|c| c.name.as_str()).collect();
        let prefix = format!(
            "insert into {} ({}) values (",
            self.table,
            names.join(&self.column_separator)
        );

        while let Some(row) = cursor.next_row()? {
            let values: Vec<String> = row
                .iter()
                .map(|v| match v {
                    Value::Null => self.null_text.clone(),
                    other => literal(other).to_string(),
                })
                .collect();
            write!(
                self.writer,
                "{prefix}{});{}",
                values.join(&self.column_separator),
                self.row_separator
            )
            .map_err(write_error)?;
            self.rows_written += 1;
        }

        self.writer.flush().map_err(write_error)
    }
}

/// Echoes executed statements to a writer shared by all workers.
pub struct SqlEcho {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl SqlEcho {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(io::stderr()))
    }

    /// Echo into memory, returning the buffer it writes to.
    pub fn in_memory() -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (Self::new(Box::new(buffer.clone())), buffer)
    }

    pub fn echo(&self, sql: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writeln!(writer, "{sql}").map_err(write_error)?;
        writer.flush().map_err(write_error)
    }
}

/// Cloneable in-memory writer; all clones append to the same bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Everything written so far, decoded lossily.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
