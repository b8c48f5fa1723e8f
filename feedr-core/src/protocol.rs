use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use feedr_keystore::{KeystoreOp, KeystoreResult};
use feedr_value::Value;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Pairs a request with its response. Unique per bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId {
    pub worker: Arc<str>,
    pub vu: u64,
}

impl ConsumerId {
    pub fn new(worker: impl Into<Arc<str>>, vu: u64) -> Self {
        Self {
            worker: worker.into(),
            vu,
        }
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/vu-{}", self.worker, self.vu)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub source: Arc<str>,
    pub consumer: ConsumerId,
    #[serde(default = "one")]
    pub count: u64,
}

fn one() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    /// In cursor order; shorter than the requested count only when `exhausted` is set.
    pub values: Vec<Value>,
    pub exhausted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<DataFailure>,
}

impl DataResponse {
    #[must_use]
    pub fn served(values: Vec<Value>) -> Self {
        Self {
            values,
            exhausted: false,
            failure: None,
        }
    }

    #[must_use]
    pub fn exhausted(values: Vec<Value>) -> Self {
        Self {
            values,
            exhausted: true,
            failure: None,
        }
    }

    #[must_use]
    pub fn failed(failure: DataFailure) -> Self {
        Self {
            values: Vec::new(),
            exhausted: matches!(failure, DataFailure::Exhausted),
            failure: Some(failure),
        }
    }
}

/// Why a data request was answered without values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
pub enum DataFailure {
    /// The source ran out and its policy is `error`.
    #[strum(to_string = "source exhausted")]
    Exhausted,

    #[strum(to_string = "unknown source")]
    UnknownSource,

    #[strum(to_string = "invalid count")]
    InvalidCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum Request {
    Data(DataRequest),
    Keystore(KeystoreOp),
}

impl Request {
    /// Short human description used in timeout errors and logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Data(req) => format!("data request for `{}` from {}", req.source, req.consumer),
            Self::Keystore(op) => format!("keystore operation on `{}`", op.key()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum Response {
    Data(DataResponse),
    Keystore(KeystoreResult),
    Failure {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "kebab-case")]
pub enum StopReason {
    Completed,
    Aborted(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("run completed"),
            Self::Aborted(msg) => write!(f, "run aborted: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "kebab-case")]
pub enum Frame {
    Request { id: CorrelationId, request: Request },
    Response { id: CorrelationId, response: Response },
    Stop { reason: StopReason },
}

/// Encodes a frame for transports that carry opaque byte messages.
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(frame)?))
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_request_wire_shape() {
        let frame = Frame::Request {
            id: CorrelationId::new(7),
            request: Request::Data(DataRequest {
                source: Arc::from("books"),
                consumer: ConsumerId::new("w1", 3),
                count: 1,
            }),
        };

        let bytes = match encode_frame(&frame) {
            Ok(b) => b,
            Err(err) => panic!("encode failed: {err}"),
        };
        let text = String::from_utf8_lossy(&bytes);
        assert_eq!(
            text,
            r#"{"frame":"request","id":7,"request":{"type":"data","body":{"source":"books","consumer":{"worker":"w1","vu":3},"count":1}}}"#
        );

        match decode_frame(&bytes) {
            Ok(decoded) => assert_eq!(decoded, frame),
            Err(err) => panic!("decode failed: {err}"),
        }
    }

    #[test]
    fn count_defaults_to_one() {
        let raw = r#"{"frame":"request","id":1,"request":{"type":"data","body":{"source":"n","consumer":{"worker":"w","vu":0}}}}"#;
        match decode_frame(raw.as_bytes()) {
            Ok(Frame::Request {
                request: Request::Data(req),
                ..
            }) => assert_eq!(req.count, 1),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn failed_response_flags_exhaustion() {
        let resp = DataResponse::failed(DataFailure::Exhausted);
        assert!(resp.exhausted);
        assert!(resp.values.is_empty());

        let resp = DataResponse::failed(DataFailure::UnknownSource);
        assert!(!resp.exhausted);
    }

    #[test]
    fn consumer_id_display() {
        assert_eq!(ConsumerId::new("worker-2", 11).to_string(), "worker-2/vu-11");
    }
}
