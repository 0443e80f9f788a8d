//! Error types for the activity engine.

use reqwest::StatusCode;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Job lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} already started")]
    AlreadyStarted { id: String },

    #[error("Job of type {job_type} has not been started")]
    NotStarted { job_type: String },

    #[error("Job {id} failed with response: {response}")]
    Failed {
        id: String,
        response: serde_json::Value,
    },
}

/// Raised when a raw action identifier names no known job type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("Unknown action identifier '{raw}'")]
    UnknownAction { raw: String },
}

/// Errors surfaced by the remote job service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Response carried no task id: {response}")]
    MissingJobId { response: serde_json::Value },

    #[error("Unknown remote status '{0}'")]
    UnknownStatus(String),

    #[error("No endpoint configured for {0}")]
    MissingEndpoint(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
