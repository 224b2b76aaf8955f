//! Command-line argument parsing for sqlbatch.

use clap::Parser;
use sqlbatch::config::{ConnectionConfig, ExecutionConfig};
use sqlbatch::error::{Result, SqlBatchError};
use sqlbatch::import::ImportTarget;
use sqlbatch::lexer::LexerConfig;
use sqlbatch::output::{unescape_separator, OutputFormat, OutputOptions, QuoteMode};
use sqlbatch::pipeline::{ExecutionSettings, TransactionMode};
use std::path::PathBuf;

/// Run SQL scripts against a database, in batches and in parallel.
#[derive(Parser, Debug)]
#[command(name = "sqlbatch")]
#[command(version, about, long_about = None)]
pub struct Cli {
    // === Connection ===
    /// Database URL (e.g., postgres://host:5432/db or sqlite:///path/to.db?mode=rwc)
    #[arg(short = 'U', long, value_name = "URL")]
    pub url: Option<String>,

    /// Database user
    #[arg(short = 'u', long, value_name = "USER")]
    pub user: Option<String>,

    /// Database password
    #[arg(
        short = 'p',
        long,
        value_name = "PASSWORD",
        env = "SQLBATCH_PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,

    /// Use named connection from config
    #[arg(short = 'c', long, value_name = "NAME")]
    pub connection: Option<String>,

    /// Config file path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // === Input ===
    /// SQL text to execute (repeatable)
    #[arg(short = 's', long = "sql", value_name = "SQL")]
    pub sql: Vec<String>,

    /// File with SQL statements (repeatable, use "-" for stdin)
    #[arg(short = 'i', long = "input-file", value_name = "PATH")]
    pub input_files: Vec<String>,

    /// Select every row of this table when no SQL is given; also the target
    /// table of the inserts file format
    #[arg(long, value_name = "TABLE")]
    pub table_name: Option<String>,

    // === Lexing ===
    /// Statement separator
    #[arg(long, value_name = "SEPARATOR")]
    pub separator: Option<String>,

    /// Remove comments from statements before executing them
    #[arg(long, value_name = "BOOL")]
    pub strip_comments: Option<bool>,

    /// Split input into statements (false runs each input as one statement)
    #[arg(long, value_name = "BOOL")]
    pub split_statements: Option<bool>,

    // === Execution ===
    /// Statements (or imported rows) per batch
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Transaction mode: auto, rollback, or commit every N statements
    #[arg(long, value_name = "MODE")]
    pub transaction_mode: Option<String>,

    /// Number of parallel workers
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Rows fetched per round trip
    #[arg(long, value_name = "N")]
    pub fetch_size: Option<usize>,

    // === Output ===
    /// Write query results to file instead of stdout
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Output format: none, csv, msdoscsv or inserts
    #[arg(short = 'f', long, value_name = "FORMAT")]
    pub file_format: Option<String>,

    /// Text between output columns (\t, \n, \r, \b and \f are unescaped)
    #[arg(long, value_name = "TEXT")]
    pub column_separator: Option<String>,

    /// Text after every output row (\t, \n, \r, \b and \f are unescaped)
    #[arg(long, value_name = "TEXT")]
    pub row_separator: Option<String>,

    /// Text written for NULL values
    #[arg(long, value_name = "TEXT")]
    pub null_value: Option<String>,

    /// When to quote values: always, never, text or necessary
    #[arg(long, value_name = "MODE")]
    pub quote_mode: Option<String>,

    /// Text that encloses quoted values
    #[arg(long, value_name = "TEXT")]
    pub quote_value: Option<String>,

    /// Text written before quotes and separators inside values
    #[arg(long, value_name = "TEXT")]
    pub escape_character: Option<String>,

    /// Write a line of column names before each result
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub include_headers: Option<bool>,

    /// Text written for true booleans
    #[arg(long, value_name = "TEXT", default_value = "true")]
    pub boolean_true_value: String,

    /// Text written for false booleans
    #[arg(long, value_name = "TEXT", default_value = "false")]
    pub boolean_false_value: String,

    /// Echo every executed statement to stderr
    #[arg(long)]
    pub echo_sql: bool,

    // === Import ===
    /// Copy query results into this table instead of printing them
    #[arg(long, value_name = "TABLE")]
    pub import_table: Option<String>,

    /// Comma-separated target columns for the import
    #[arg(long, value_name = "COLUMNS")]
    pub import_columns: Option<String>,

    /// Import target database URL
    #[arg(long, value_name = "URL")]
    pub import_url: Option<String>,

    /// Import target database user
    #[arg(long, value_name = "USER")]
    pub import_user: Option<String>,

    /// Import target database password
    #[arg(
        long,
        value_name = "PASSWORD",
        env = "SQLBATCH_IMPORT_PASSWORD",
        hide_env_values = true
    )]
    pub import_password: Option<String>,

    /// Import into a named connection from config
    #[arg(long, value_name = "NAME")]
    pub import_connection: Option<String>,

    // === Other ===
    /// Use mock database (in-memory, for testing)
    #[arg(long)]
    pub mock_db: bool,

    /// Write logs to a file instead of stderr (default: platform state directory)
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    pub log_file: Option<Option<PathBuf>>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(sqlbatch::config::Config::default_path)
    }

    /// Returns the named connection to use, if specified.
    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    /// Checks that the arguments describe something to run.
    pub fn validate(&self) -> Result<()> {
        if self.sql.is_empty() && self.input_files.is_empty() && self.table_name.is_none() {
            return Err(SqlBatchError::config(
                "Nothing to run: use --sql, --input-file or --table-name",
            ));
        }
        if self.batch_size == Some(0) {
            return Err(SqlBatchError::config("--batch-size must be a positive number"));
        }
        if self.jobs == Some(0) {
            return Err(SqlBatchError::config("--jobs must be a positive number"));
        }
        if self.output_format()? == OutputFormat::Inserts && self.table_name.is_none() {
            return Err(SqlBatchError::config(
                "--file-format inserts requires --table-name",
            ));
        }
        if self.import_table.is_some()
            && self.import_url.is_none()
            && self.import_connection.is_none()
            && !self.mock_db
        {
            return Err(SqlBatchError::config(
                "--import-table requires --import-url or --import-connection",
            ));
        }
        Ok(())
    }

    /// SQL given inline, or the table select when nothing else is given.
    pub fn inline_sql(&self) -> Vec<String> {
        if !self.sql.is_empty() || !self.input_files.is_empty() {
            return self.sql.clone();
        }
        self.table_name
            .iter()
            .map(|table| format!("select * from {table}"))
            .collect()
    }

    /// Lexer configuration, with CLI values over config file values.
    pub fn lexer_config(&self, execution: &ExecutionConfig) -> LexerConfig {
        let defaults = LexerConfig::default();
        LexerConfig {
            strip_comments: self
                .strip_comments
                .or(execution.strip_comments)
                .unwrap_or(defaults.strip_comments),
            separator: self
                .separator
                .clone()
                .or_else(|| execution.separator.clone())
                .unwrap_or(defaults.separator),
            split_statements: self
                .split_statements
                .or(execution.split_statements)
                .unwrap_or(defaults.split_statements),
        }
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        self.file_format
            .as_deref()
            .map(str::parse)
            .transpose()
            .map(Option::unwrap_or_default)
    }

    /// Rendering options: the file format's defaults with any flags on top.
    pub fn output_options(&self) -> Result<OutputOptions> {
        let mut options = OutputOptions::for_format(self.output_format()?);

        if let Some(separator) = &self.column_separator {
            options.column_separator = unescape_separator(separator);
        }
        if let Some(separator) = &self.row_separator {
            options.row_separator = unescape_separator(separator);
        }
        if let Some(null_text) = &self.null_value {
            options.null_text = null_text.clone();
        }
        if let Some(mode) = &self.quote_mode {
            options.quote_mode = mode.parse::<QuoteMode>()?;
        }
        if let Some(quote) = &self.quote_value {
            options.quote = quote.clone();
        }
        if let Some(escape) = &self.escape_character {
            options.escape = escape.clone();
        }
        if let Some(include_headers) = self.include_headers {
            options.include_headers = include_headers;
        }
        options.true_text = self.boolean_true_value.clone();
        options.false_text = self.boolean_false_value.clone();
        options.table_name = self.table_name.clone();
        Ok(options)
    }

    /// Batch size and transaction mode exactly as requested.
    fn requested_batching(
        &self,
        execution: &ExecutionConfig,
    ) -> Result<(Option<usize>, Option<TransactionMode>)> {
        let mode = self
            .transaction_mode
            .as_deref()
            .or(execution.transaction_mode.as_deref())
            .map(str::parse::<TransactionMode>)
            .transpose()?;
        Ok((self.batch_size.or(execution.batch_size), mode))
    }

    fn with_fetch_size(
        &self,
        execution: &ExecutionConfig,
        settings: ExecutionSettings,
    ) -> ExecutionSettings {
        match self.fetch_size.or(execution.fetch_size) {
            Some(fetch_size) => settings.with_fetch_size(fetch_size),
            None => settings,
        }
    }

    /// Batch and transaction settings, with CLI values over config file values.
    pub fn execution_settings(&self, execution: &ExecutionConfig) -> Result<ExecutionSettings> {
        let (batch_size, mode) = self.requested_batching(execution)?;
        let settings = ExecutionSettings::derive(batch_size, mode)?;
        Ok(self.with_fetch_size(execution, settings))
    }

    /// Settings of an import run, where the batch size does not imply commits.
    pub fn import_settings(&self, execution: &ExecutionConfig) -> Result<ExecutionSettings> {
        let (batch_size, mode) = self.requested_batching(execution)?;
        let settings = ExecutionSettings::for_import(batch_size, mode)?;
        Ok(self.with_fetch_size(execution, settings))
    }

    /// Number of workers (default 1).
    pub fn jobs(&self, execution: &ExecutionConfig) -> Result<usize> {
        match self.jobs.or(execution.jobs) {
            Some(0) => Err(SqlBatchError::config("Number of jobs must be positive")),
            Some(jobs) => Ok(jobs),
            None => Ok(1),
        }
    }

    /// The import destination, if importing.
    pub fn import_target(&self) -> Option<ImportTarget> {
        let table = self.import_table.as_ref()?;
        let target = ImportTarget::new(table.clone());
        Some(match &self.import_columns {
            Some(list) => target.with_columns(ImportTarget::parse_columns(list)),
            None => target,
        })
    }

    /// Source connection settings given on the command line.
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }

    /// Import target connection settings given on the command line.
    pub fn to_import_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.import_url.clone(),
            user: self.import_user.clone(),
            password: self.import_password.clone(),
        }
    }
}
