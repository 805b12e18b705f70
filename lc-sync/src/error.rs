use lc_common::sparql::SparqlError;
use thiserror::Error;

use crate::client::ClientError;

/// Enumeration of errors raised while assembling the sync configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid environment configuration: {0}")]
    EnvError(#[from] envconfig::Error),
    #[error("failed to read upload config {path}: {error}")]
    ReadError { path: String, error: std::io::Error },
    #[error("failed to parse upload config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("upload config sets neither query nor query_file")]
    MissingQuery,
    #[error("failed to load the configured query: {0}")]
    QueryFileError(SparqlError),
}

/// Enumeration of errors that abort a sync run. Errors confined to a single subject never end up
/// here; they are accumulated in the batch's failure log instead.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    ConfigError(#[from] ConfigError),
    #[error("perform_query is disabled, LibreClinica will not be updated")]
    Disabled,
    #[error("failed to retrieve data from the SPARQL endpoint: {0}")]
    QueryError(#[from] SparqlError),
    #[error("there is no patient data available at the SPARQL endpoint")]
    NoRecords,
    #[error("failed to set up the LibreClinica client: {0}")]
    ClientError(#[from] ClientError),
    #[error("no result or error found in the upload response for subject {label}: {body}")]
    ProtocolViolation { label: String, body: String },
}
