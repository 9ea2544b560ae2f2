use std::path::PathBuf;
use thiserror::Error;

use crate::transport::ProtocolError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job is already active")]
    AlreadyActive,
    #[error("Path must be set to an existing local file: {0}")]
    MissingFile(PathBuf),
    #[error("Unknown text encoding: {0}")]
    UnknownEncoding(String),
    #[error("Incompatible job: {0}")]
    IncompatibleJob(String),
    #[error("Transport lacks capability: {0}")]
    MissingCapability(&'static str),
    #[error("No tokio runtime available to run the status timer")]
    NoRuntime,
    #[error("Timer interval must be greater than zero")]
    ZeroInterval,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
