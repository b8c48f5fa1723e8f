use std::time::Duration;

use crate::protocol::DataFailure;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Duplicate or invalid variable declaration. Fatal at run start.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("variable `{variable}` is exhausted (consumer {consumer})")]
    Exhausted { variable: String, consumer: String },

    #[error("timed out after {after:?} waiting for {request}")]
    Timeout { request: String, after: Duration },

    #[error("peer `{peer}` disconnected")]
    PeerDisconnected { peer: String },

    #[error("data request for `{variable}` failed: {failure}")]
    DataFailure {
        variable: String,
        failure: DataFailure,
    },

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("unexpected response to {0}")]
    UnexpectedResponse(String),

    #[error("frame encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors that must abort the run no matter which failure policy a scenario has.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
