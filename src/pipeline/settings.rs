//! Batch and transaction settings shared read-only by every worker of a run.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SqlBatchError};

/// Default number of statements per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// When a worker commits or rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// The connection commits every statement on its own.
    #[default]
    Auto,
    /// Every effect is rolled back.
    Rollback,
    /// Commit once every N statements, and once more at the end.
    Every(usize),
}

impl FromStr for TransactionMode {
    type Err = SqlBatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "rollback" => Ok(Self::Rollback),
            other => match other.parse::<usize>() {
                Ok(n) if n > 0 => Ok(Self::Every(n)),
                _ => Err(SqlBatchError::config(format!(
                    "Invalid transaction mode: {s}. Expected: auto, rollback, or a positive number"
                ))),
            },
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Rollback => write!(f, "rollback"),
            Self::Every(n) => write!(f, "{n}"),
        }
    }
}

/// Resolved batch/transaction configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    batch_size: usize,
    transaction_mode: TransactionMode,
    fetch_size: usize,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            transaction_mode: TransactionMode::Auto,
            fetch_size: 0,
        }
    }
}

impl ExecutionSettings {
    /// Derives the settings from the optional user-supplied values.
    ///
    /// A batch size given without a transaction mode commits once per batch.
    pub fn derive(batch_size: Option<usize>, transaction_mode: Option<TransactionMode>) -> Result<Self> {
        if batch_size == Some(0) {
            return Err(SqlBatchError::config("Batch size must be a positive number"));
        }
        if transaction_mode == Some(TransactionMode::Every(0)) {
            return Err(SqlBatchError::config(
                "Transaction size must be a positive number",
            ));
        }

        let transaction_mode = match (transaction_mode, batch_size) {
            (Some(mode), _) => mode,
            (None, Some(size)) => TransactionMode::Every(size),
            (None, None) => TransactionMode::Auto,
        };

        Ok(Self {
            batch_size: batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            transaction_mode,
            fetch_size: 0,
        })
    }

    /// Settings for the import side of a run.
    ///
    /// The batch size only groups inserted rows. The transaction mode is kept
    /// as given, so without one the target connections stay in autocommit.
    pub fn for_import(
        batch_size: Option<usize>,
        transaction_mode: Option<TransactionMode>,
    ) -> Result<Self> {
        Self::derive(batch_size, Some(transaction_mode.unwrap_or_default()))
    }

    /// Sets the fetch size hint passed to every connection (0 = driver default).
    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    /// The same settings with batching turned off, used by a query pipeline
    /// that feeds an import.
    pub fn unbatched(&self) -> Self {
        Self {
            batch_size: 1,
            ..self.clone()
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn transaction_mode(&self) -> TransactionMode {
        self.transaction_mode
    }

    /// Statements per transaction: N in `Every(N)` mode, the batch size otherwise.
    pub fn transaction_size(&self) -> usize {
        match self.transaction_mode {
            TransactionMode::Every(n) => n,
            _ => self.batch_size,
        }
    }

    pub fn is_batch_mode(&self) -> bool {
        self.batch_size > 1
    }

    pub fn fetch_size(&self) -> usize {
        self.fetch_size
    }

    /// Whether connections run with autocommit on.
    pub fn auto_commit(&self) -> bool {
        self.transaction_mode == TransactionMode::Auto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transaction_mode() {
        assert_eq!("auto".parse::<TransactionMode>().unwrap(), TransactionMode::Auto);
        assert_eq!(
            "ROLLBACK".parse::<TransactionMode>().unwrap(),
            TransactionMode::Rollback
        );
        assert_eq!(
            "25".parse::<TransactionMode>().unwrap(),
            TransactionMode::Every(25)
        );
        assert!("0".parse::<TransactionMode>().is_err());
        assert!("-3".parse::<TransactionMode>().is_err());
        assert!("sometimes".parse::<TransactionMode>().is_err());
    }

    #[test]
    fn test_transaction_mode_display() {
        assert_eq!(TransactionMode::Auto.to_string(), "auto");
        assert_eq!(TransactionMode::Rollback.to_string(), "rollback");
        assert_eq!(TransactionMode::Every(7).to_string(), "7");
    }

    #[test]
    fn test_defaults() {
        let settings = ExecutionSettings::derive(None, None).unwrap();
        assert_eq!(settings, ExecutionSettings::default());
        assert_eq!(settings.batch_size(), 1);
        assert_eq!(settings.transaction_mode(), TransactionMode::Auto);
        assert_eq!(settings.transaction_size(), 1);
        assert!(!settings.is_batch_mode());
        assert!(settings.auto_commit());
    }

    #[test]
    fn test_batch_without_mode_commits_per_batch() {
        let settings = ExecutionSettings::derive(Some(50), None).unwrap();
        assert_eq!(settings.transaction_mode(), TransactionMode::Every(50));
        assert_eq!(settings.transaction_size(), 50);
        assert!(settings.is_batch_mode());
        assert!(!settings.auto_commit());
    }

    #[test]
    fn test_explicit_mode_wins() {
        let settings =
            ExecutionSettings::derive(Some(10), Some(TransactionMode::Every(3))).unwrap();
        assert_eq!(settings.batch_size(), 10);
        assert_eq!(settings.transaction_size(), 3);

        let settings = ExecutionSettings::derive(Some(10), Some(TransactionMode::Auto)).unwrap();
        assert_eq!(settings.transaction_mode(), TransactionMode::Auto);
        assert_eq!(settings.transaction_size(), 10);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(ExecutionSettings::derive(Some(0), None).is_err());
        assert!(ExecutionSettings::derive(None, Some(TransactionMode::Every(0))).is_err());
    }

    #[test]
    fn test_import_batch_size_keeps_autocommit() {
        let settings = ExecutionSettings::for_import(Some(50), None).unwrap();
        assert_eq!(settings.batch_size(), 50);
        assert_eq!(settings.transaction_mode(), TransactionMode::Auto);
        assert!(settings.auto_commit());

        let settings =
            ExecutionSettings::for_import(Some(50), Some(TransactionMode::Every(200))).unwrap();
        assert_eq!(settings.transaction_size(), 200);
        assert!(!settings.auto_commit());

        assert!(ExecutionSettings::for_import(Some(0), None).is_err());
    }

    #[test]
    fn test_unbatched_keeps_transaction_mode() {
        let settings = ExecutionSettings::derive(Some(8), Some(TransactionMode::Rollback))
            .unwrap()
            .with_fetch_size(100);
        let source = settings.unbatched();
        assert_eq!(source.batch_size(), 1);
        assert!(!source.is_batch_mode());
        assert_eq!(source.transaction_mode(), TransactionMode::Rollback);
        assert_eq!(source.fetch_size(), 100);
    }
}
