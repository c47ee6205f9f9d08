use std::num::{ParseFloatError, ParseIntError};

use indicatif::style::TemplateError;
use thiserror::Error;

pub type PhysiGymResult<T> = Result<T, PhysiGymError>;

#[derive(Debug, Error)]
pub enum PhysiGymError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors raised while reading the settings document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse settings XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Missing settings field: {0}")]
    MissingField(String),

    #[error("Invalid value '{value}' for settings field '{field}'")]
    InvalidValue { field: String, value: String },

    #[error("Failed to parse integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("Failed to parse float: {0}")]
    ParseFloat(#[from] ParseFloatError),

    #[error("Failed to parse enum: {0}")]
    ParseEnum(#[from] strum::ParseError),
}

/// Errors related to time-series tables and their shapes.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Data frame error: {0}")]
    DataFrame(String),

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("No snapshots found in {0}")]
    NoSnapshots(String),

    #[error("Invalid artifact file name: '{0}'")]
    InvalidFileName(String),
}

/// Errors related to the environment lifecycle and its step loop.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Invalid environment state: {0}")]
    InvalidState(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Action label '{0}' is neither a user parameter nor custom cell data")]
    UnknownActionLabel(String),

    #[error("Unsupported value for action label '{label}': {msg}")]
    UnsupportedActionValue { label: String, msg: String },

    #[error("Observation does not conform to the observation space: {0}")]
    ObservationOutOfSpace(String),

    #[error("Invalid environment configuration: {0}")]
    InvalidConfig(String),

    #[error("Progress bar error")]
    ProgressBar(#[from] TemplateError),
}

/// Errors surfaced by a simulation behind the accessor traits.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Simulation was not started. Call `start()` first")]
    NotStarted,

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Unknown cell variable '{0}'")]
    UnknownVariable(String),

    #[error("Unknown cell vector '{0}'")]
    UnknownVector(String),

    #[error("Unknown substrate '{0}'")]
    UnknownSubstrate(String),

    #[error("Parameter '{name}' is not numeric: {value}")]
    NotNumeric { name: String, value: String },

    #[error("Non-finite value for '{name}': {value}")]
    NonFinite { name: String, value: f64 },

    #[error("Simulation backend failure: {0}")]
    Backend(String),
}

/// Errors raised when constructing or checking spaces.
#[derive(Debug, Error)]
pub enum SpaceError {
    #[error("Invalid bounds [{low}, {high}] for dtype {dtype}")]
    InvalidBounds {
        low: f64,
        high: f64,
        dtype: String,
    },

    #[error("Invalid space definition: {0}")]
    InvalidDefinition(String),
}

/// Errors related to file I/O.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Failed to write data: {0}")]
    WriteFailed(String),

    #[error("Failed to read data: {0}")]
    ReadFailed(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Drawing failed: {0}")]
    Draw(String),

    #[error("Invalid figure: {0}")]
    InvalidFigure(String),
}

/// Errors related to internal invariants and bugs.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}
