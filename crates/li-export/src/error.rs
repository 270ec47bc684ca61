//! Error types for the exporter pipeline.
//!
//! Most of these are reported, not bubbled as process-fatal — see the
//! error handling rules documented alongside each component. Only a
//! socket-level or job-encoding failure severs a single mediator
//! connection or drops a single job; nothing here should unwind the
//! exporter loop itself.

use thiserror::Error;

use crate::intercept::Liid;

#[derive(Debug, Error)]
pub enum ExportBufferError {
    #[error("failed to allocate buffer space for record ({requested} bytes)")]
    AllocFailed { requested: usize },
}

#[derive(Debug, Error)]
pub enum InterceptTableError {
    #[error("unknown LIID: {0}")]
    UnknownLiid(Liid),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoder returned failure for this job")]
    EncoderFailed,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{field} must be at most {max} bytes, got {actual}")]
    FieldTooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },
    #[error("at least one input source must be configured")]
    NoInputs,
}

#[derive(Debug, Error)]
pub enum ImapParseError {
    #[error("malformed IMAP auth token for session {session_key}")]
    MalformedAuthToken { session_key: String },
    #[error("saved IMAP command buffer is inconsistent for session {session_key}")]
    InconsistentCommandState { session_key: String },
}
