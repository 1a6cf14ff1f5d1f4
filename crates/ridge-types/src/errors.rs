use thiserror::Error;

use crate::records::SearcherId;

/// Main error type for the ridge search system
#[derive(Error, Debug)]
pub enum RidgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error("Objective error: {0}")]
    Objective(#[from] ObjectiveError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RidgeError {
    /// Stable taxonomy name recorded on a searcher's error field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigurationError",
            Self::Shape(_) => "ShapeError",
            Self::Objective(_) => "ObjectiveError",
            Self::Store(_) => "StoreError",
            Self::Io(_) => "IoError",
            Self::Serialization(_) => "SerializationError",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Render the error and its `source()` chain, one cause per line.
    ///
    /// The wrapped category error is already part of the top-level message,
    /// so the chain starts below it.
    pub fn render_trace(&self) -> String {
        let mut out = format!("{}: {}", self.kind(), self);
        let mut source = std::error::Error::source(self).and_then(|inner| inner.source());
        while let Some(cause) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

/// Problems found while validating live configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("config missing the following settings: {names:?}")]
    MissingSettings { names: Vec<String> },

    #[error("range for \"{name}\" must have 1 or 3 elements, got {arity}")]
    RangeArity { name: String, arity: usize },

    #[error("upper bound must exceed lower bound for \"{name}\" ({lower} >= {upper})")]
    RangeBounds { name: String, lower: f64, upper: f64 },

    #[error("scale must be positive and finite for \"{name}\", got {scale}")]
    RangeScale { name: String, scale: f64 },

    #[error("range values for \"{name}\" must be finite")]
    RangeNotFinite { name: String },

    #[error("parameter \"{name}\" declared more than once")]
    DuplicateParameter { name: String },

    #[error("ranges missing required parameters: {names:?}")]
    MissingParameters { names: Vec<String> },

    #[error("settings {names:?} must be non-negative finite numbers")]
    InvalidSettings { names: Vec<String> },

    #[error("probability {name} must lie in [0, 1], got {value}")]
    InvalidProbability { name: String, value: f64 },

    #[error("{group} blend weights sum to {actual}, declared sum is {declared}")]
    UnnormalizedWeights {
        group: String,
        actual: f64,
        declared: f64,
    },

    #[error("force \"{owner}\": preset \"{preset}\" not understood")]
    UnknownPreset { owner: String, preset: String },

    #[error("force \"{owner}\" missing keys: {missing:?}")]
    ForceMissingKeys { owner: String, missing: Vec<String> },

    #[error("force \"{owner}\" has keys not declared in ranges: {unknown:?}")]
    ForceUnknownKeys { owner: String, unknown: Vec<String> },

    #[error("config targets simulation \"{found}\" but searcher belongs to \"{expected}\"")]
    SimulationMismatch { expected: String, found: String },

    #[error("could not load configuration: {message}")]
    Unreadable { message: String },
}

/// Parameter vector and range disagreements
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    #[error("expected {expected} components, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("parameter \"{name}\" missing from parameter set")]
    MissingParameter { name: String },
}

/// Failures raised by the external objective
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObjectiveError {
    #[error("objective evaluation failed: {message}")]
    Failed { message: String },

    #[error("objective panicked: {message}")]
    Panicked { message: String },

    #[error("objective returned an invalid outcome: {message}")]
    InvalidOutcome { message: String },
}

/// Persistence and query failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("searcher not found: {searcher_id}")]
    SearcherNotFound { searcher_id: SearcherId },

    #[error("write failed: {message}")]
    WriteFailed { message: String },

    #[error("query failed: {message}")]
    QueryFailed { message: String },

    #[error("corrupt record at line {line}: {message}")]
    Corruption { line: usize, message: String },

    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ridge operations
pub type RidgeResult<T> = Result<T, RidgeError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::RidgeError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration load errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ConfigError::Unreadable { message: format!($($arg)*) }
    };
}
