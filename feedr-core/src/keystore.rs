use std::time::Duration;

use feedr_keystore::{KeystoreOp, KeystoreResult};
use feedr_value::Value;

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::protocol::{Request, Response};

/// A keystore value as seen by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub version: u64,
}

/// Worker-side handle to the controller-hosted keystore.
///
/// Every call is one round trip; there is no local caching, so a `get` reflects the last write the
/// controller processed before it.
#[derive(Debug, Clone)]
pub struct KeystoreClient {
    bus: Bus,
    timeout: Duration,
}

impl KeystoreClient {
    pub fn new(bus: Bus, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let result = self.call(KeystoreOp::Get { key: key.to_string() }).await?;
        Ok(entry(result))
    }

    /// Returns the version assigned to the write.
    pub async fn set(&self, key: &str, value: Value) -> Result<u64> {
        let result = self
            .call(KeystoreOp::Set {
                key: key.to_string(),
                value,
            })
            .await?;
        version(key, &result)
    }

    pub async fn destroy(&self, key: &str) -> Result<bool> {
        let result = self
            .call(KeystoreOp::Destroy {
                key: key.to_string(),
            })
            .await?;
        Ok(result.found)
    }

    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let result = self
            .call(KeystoreOp::Incr {
                key: key.to_string(),
                delta,
            })
            .await?;
        integer(key, &result)
    }

    /// Appends to a list entry; returns the new length.
    pub async fn push(&self, key: &str, value: Value) -> Result<usize> {
        let result = self
            .call(KeystoreOp::Push {
                key: key.to_string(),
                value,
            })
            .await?;
        let len = integer(key, &result)?;
        Ok(usize::try_from(len).unwrap_or(0))
    }

    /// Removes the oldest element of a list entry.
    pub async fn pop(&self, key: &str) -> Result<Option<Value>> {
        let result = self.call(KeystoreOp::Pop { key: key.to_string() }).await?;
        Ok(entry(result).map(|e| e.value))
    }

    async fn call(&self, op: KeystoreOp) -> Result<KeystoreResult> {
        let key = op.key().to_string();
        match self.bus.call(Request::Keystore(op), self.timeout).await? {
            Response::Keystore(result) => Ok(result),
            Response::Failure { reason } => Err(Error::Keystore(reason)),
            Response::Data(_) => Err(Error::UnexpectedResponse(format!(
                "keystore operation on `{key}`"
            ))),
        }
    }
}

fn entry(result: KeystoreResult) -> Option<Entry> {
    match (result.found, result.value, result.version) {
        (true, Some(value), Some(version)) => Some(Entry { value, version }),
        _ => None,
    }
}

fn version(key: &str, result: &KeystoreResult) -> Result<u64> {
    result
        .version
        .ok_or_else(|| Error::UnexpectedResponse(format!("keystore write to `{key}`")))
}

fn integer(key: &str, result: &KeystoreResult) -> Result<i64> {
    result
        .value
        .as_ref()
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::UnexpectedResponse(format!("keystore update of `{key}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::link_pair;
    use crate::controller::Controller;
    use crate::producer::Producer;
    use feedr_keystore::Keystore;
    use std::sync::Arc;

    fn client() -> (Controller, KeystoreClient) {
        let controller = Controller::new(Arc::new(Producer::default()), Arc::new(Keystore::default()));
        let (worker_end, controller_end) = link_pair();
        controller.attach("w1", controller_end);
        let bus = Bus::spawn("controller", worker_end, None);
        (controller, KeystoreClient::new(bus, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn set_get_destroy() {
        let (_controller, ks) = client();

        assert_eq!(ks.get("token").await.ok(), Some(None));
        let v1 = match ks.set("token", Value::from("a")).await {
            Ok(v) => v,
            Err(err) => panic!("set: {err}"),
        };
        let v2 = match ks.set("token", Value::from("b")).await {
            Ok(v) => v,
            Err(err) => panic!("set: {err}"),
        };
        assert!(v2 > v1);

        match ks.get("token").await {
            Ok(Some(entry)) => {
                assert_eq!(entry.value, Value::from("b"));
                assert_eq!(entry.version, v2);
            }
            other => panic!("unexpected get result: {other:?}"),
        }

        assert_eq!(ks.destroy("token").await.ok(), Some(true));
        assert_eq!(ks.destroy("token").await.ok(), Some(false));
        assert_eq!(ks.get("token").await.ok(), Some(None));
    }

    #[tokio::test]
    async fn counters_and_lists() {
        let (_controller, ks) = client();

        assert_eq!(ks.incr("hits", 1).await.ok(), Some(1));
        assert_eq!(ks.incr("hits", 4).await.ok(), Some(5));

        assert_eq!(ks.push("queue", Value::from("x")).await.ok(), Some(1));
        assert_eq!(ks.push("queue", Value::from("y")).await.ok(), Some(2));
        assert_eq!(ks.pop("queue").await.ok(), Some(Some(Value::from("x"))));
        assert_eq!(ks.pop("queue").await.ok(), Some(Some(Value::from("y"))));
        assert_eq!(ks.pop("queue").await.ok(), Some(None));
    }

    #[tokio::test]
    async fn store_errors_surface_as_keystore_errors() {
        let (_controller, ks) = client();
        if let Err(err) = ks.set("scalar", Value::I64(1)).await {
            panic!("set: {err}");
        }
        assert!(matches!(
            ks.push("scalar", Value::I64(2)).await,
            Err(Error::Keystore(reason)) if reason.contains("not a list")
        ));
    }
}
