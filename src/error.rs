//! Error types for the shipping connector.

use std::path::PathBuf;

/// Top-level error type for the connector.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Claim error: {0}")]
    Claim(#[from] ClaimError),

    #[error("Carrier error: {0}")]
    Carrier(#[from] CarrierError),

    #[error("Print error: {0}")]
    Print(#[from] PrintError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors. Fatal at startup — the connector never
/// begins watching with an invalid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration file {path}: {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from parsing GARP XML export files.
///
/// All parse errors are terminal for the file — a request the carrier
/// would reject is routed to the error directory, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed XML: {reason}")]
    Malformed { reason: String },

    #[error("Missing required element <{element}>")]
    MissingElement { element: String },

    #[error("Invalid srvid '{srvid}': expected CARRIER:PRODUCT[:ADDON]")]
    InvalidSrvid { srvid: String },

    #[error("Unknown carrier '{carrier}' in srvid '{srvid}'. Known: DHL, PN")]
    UnknownCarrier { carrier: String, srvid: String },

    #[error("Invalid numeric value for {field}: '{value}'")]
    InvalidNumber { field: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from claiming a work item via atomic rename.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    /// Another worker moved the file first. Benign — skip and move on.
    #[error("File already claimed: {path}")]
    Conflict { path: PathBuf },

    #[error("Failed to claim {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from carrier API calls.
#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    /// Network-level or server-side failure. Retried with backoff.
    #[error("{carrier}: transient error: {reason}")]
    Transient { carrier: String, reason: String },

    /// Rejected credentials. Terminal.
    #[error("{carrier}: authentication failed: {reason}")]
    Auth { carrier: String, reason: String },

    /// The carrier rejected the request content. Terminal.
    #[error("{carrier}: request rejected: {message}")]
    Validation { carrier: String, message: String },

    /// The carrier answered with something we cannot interpret. Terminal.
    #[error("{carrier}: unexpected response: {reason}")]
    Protocol { carrier: String, reason: String },

    #[error("Carrier '{carrier}' is not supported. Supported: DHL")]
    Unsupported { carrier: String },
}

impl CarrierError {
    /// Whether the pipeline should retry this error with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors from spooling labels or documents to a printer.
#[derive(Debug, thiserror::Error)]
pub enum PrintError {
    #[error("Print command for '{printer}' exited with {status}: {stderr}")]
    CommandFailed {
        printer: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to run print command for '{printer}': {source}")]
    Spawn {
        printer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spool document: {0}")]
    Spool(#[from] std::io::Error),
}

/// Errors from sending notification email.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Invalid email address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP send failed: {0}")]
    Smtp(String),
}

/// Pipeline-internal errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Work queue closed")]
    QueueClosed,

    #[error("Failed to move {from} to {to}: {source}")]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the connector.
pub type Result<T> = std::result::Result<T, Error>;
