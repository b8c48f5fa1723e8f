use feedr_value::Value;
use serde::{Deserialize, Serialize};

/// Keystore control message sent by a worker to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum KeystoreOp {
    Get { key: String },
    Set { key: String, value: Value },
    Destroy { key: String },
    Incr { key: String, delta: i64 },
    Push { key: String, value: Value },
    Pop { key: String },
}

impl KeystoreOp {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Get { key }
            | Self::Set { key, .. }
            | Self::Destroy { key }
            | Self::Incr { key, .. }
            | Self::Push { key, .. }
            | Self::Pop { key } => key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeystoreResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub found: bool,
}

impl KeystoreResult {
    #[must_use]
    pub fn found(value: Option<Value>, version: u64) -> Self {
        Self {
            value,
            version: Some(version),
            found: true,
        }
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self {
            value: None,
            version: None,
            found: false,
        }
    }
}
