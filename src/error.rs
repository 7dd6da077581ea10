use thiserror::Error;

/// Errors raised by the ingestion and analytics pipeline
///
/// Every failure is local to a single request: nothing is retried and
/// nothing is persisted, so callers either get a best-effort result or one
/// of these variants to show to the user.
#[derive(Debug, Error)]
pub enum EnergyError {
    /// The uploaded bytes could not be read as a table
    #[error("could not parse CSV: {0}")]
    Parse(String),

    /// One or more required meter columns were not present
    ///
    /// `found` carries the columns that were actually detected so the user
    /// can see what the file contains.
    #[error("missing required columns {missing:?}; detected columns: {found:?}")]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    /// The time window selected no rows
    #[error("no data found between {start} and {end}")]
    EmptyWindow { start: String, end: String },

    /// The dataset has no rows left after normalization
    #[error("dataset is empty after normalization")]
    EmptyDataset,

    /// A requested column is not part of the dataset
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// A caller-supplied parameter is out of range
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// Chart rendering or image encoding failed
    #[error("chart rendering failed: {0}")]
    Chart(String),

    /// The message-bus transport could not be set up
    #[error("mqtt error: {0}")]
    Mqtt(String),

    #[error("a live listener is already running")]
    ListenerAlreadyRunning,

    #[error("no live listener is running")]
    ListenerNotRunning,
}

impl EnergyError {
    /// Short machine-readable name used in JSON error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            EnergyError::Parse(_) => "parse",
            EnergyError::MissingColumns { .. } => "missing_columns",
            EnergyError::EmptyWindow { .. } => "empty_window",
            EnergyError::EmptyDataset => "empty_dataset",
            EnergyError::UnknownColumn(_) => "unknown_column",
            EnergyError::InvalidInput(_) => "invalid_input",
            EnergyError::Io(_) => "io",
            EnergyError::Csv(_) => "csv",
            EnergyError::Chart(_) => "chart",
            EnergyError::Mqtt(_) => "mqtt",
            EnergyError::ListenerAlreadyRunning => "listener_running",
            EnergyError::ListenerNotRunning => "listener_stopped",
        }
    }

    /// Whether the failure is a "nothing to show" warning rather than an error
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            EnergyError::EmptyWindow { .. } | EnergyError::EmptyDataset
        )
    }
}

pub type Result<T> = std::result::Result<T, EnergyError>;
