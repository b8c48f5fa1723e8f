use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use feedr_value::Value;

use crate::op::{KeystoreOp, KeystoreResult};

/// Controller-hosted key/value state shared by every worker in a run.
///
/// All writes go through one lock, so concurrent writers are serialized in arrival order
/// (last writer wins). Versions come from a single store-wide counter: every write gets a
/// strictly larger version than any write before it, including writes to keys that were
/// destroyed and re-created.
#[derive(Debug, Default)]
pub struct Keystore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    last_version: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Arc<Value>,
    version: u64,
}

/// A value together with the version of the write that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub value: Arc<Value>,
    pub version: u64,
}

impl Inner {
    fn write(&mut self, key: &str, value: Value) -> u64 {
        self.last_version = self.last_version.wrapping_add(1);
        let version = self.last_version;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Arc::new(value),
                version,
            },
        );
        version
    }
}

impl Keystore {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrites `key` unconditionally and returns the new version.
    pub fn set(&self, key: &str, value: Value) -> u64 {
        self.lock().write(key, value)
    }

    pub fn get(&self, key: &str) -> Option<Versioned> {
        let inner = self.lock();
        inner.entries.get(key).map(|e| Versioned {
            value: e.value.clone(),
            version: e.version,
        })
    }

    /// Removes `key`; returns whether it existed.
    pub fn destroy(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Adds `delta` to an integer entry. Missing and non-integer entries count as 0.
    pub fn incr(&self, key: &str, delta: i64) -> (i64, u64) {
        let mut inner = self.lock();
        let cur = inner
            .entries
            .get(key)
            .and_then(|e| e.value.as_i64())
            .unwrap_or(0);
        let next = cur.saturating_add(delta);
        let version = inner.write(key, Value::I64(next));
        (next, version)
    }

    /// Appends to a list entry, creating it when missing. Returns the new length and version.
    pub fn push(&self, key: &str, value: Value) -> Result<(usize, u64), KeystoreError> {
        let mut inner = self.lock();
        let mut items = match inner.entries.get(key).map(|e| &*e.value) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(KeystoreError::NotAList(key.to_string())),
        };
        items.push(value);
        let len = items.len();
        let version = inner.write(key, Value::Array(items));
        Ok((len, version))
    }

    /// Removes the oldest element of a list entry (FIFO).
    pub fn pop(&self, key: &str) -> Result<Option<Versioned>, KeystoreError> {
        let mut inner = self.lock();
        let mut items = match inner.entries.get(key).map(|e| &*e.value) {
            None => return Ok(None),
            Some(Value::Array(items)) if items.is_empty() => return Ok(None),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => return Err(KeystoreError::NotAList(key.to_string())),
        };
        let head = items.remove(0);
        let version = inner.write(key, Value::Array(items));
        Ok(Some(Versioned {
            value: Arc::new(head),
            version,
        }))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Executes one keystore control message.
    pub fn apply(&self, op: &KeystoreOp) -> Result<KeystoreResult, KeystoreError> {
        let result = match op {
            KeystoreOp::Get { key } => match self.get(key) {
                Some(v) => KeystoreResult::found(Some((*v.value).clone()), v.version),
                None => KeystoreResult::not_found(),
            },
            KeystoreOp::Set { key, value } => {
                let version = self.set(key, value.clone());
                KeystoreResult::found(None, version)
            }
            KeystoreOp::Destroy { key } => {
                if self.destroy(key) {
                    KeystoreResult {
                        found: true,
                        ..KeystoreResult::not_found()
                    }
                } else {
                    KeystoreResult::not_found()
                }
            }
            KeystoreOp::Incr { key, delta } => {
                let (value, version) = self.incr(key, *delta);
                KeystoreResult::found(Some(Value::I64(value)), version)
            }
            KeystoreOp::Push { key, value } => {
                let (len, version) = self.push(key, value.clone())?;
                let len = i64::try_from(len).unwrap_or(i64::MAX);
                KeystoreResult::found(Some(Value::I64(len)), version)
            }
            KeystoreOp::Pop { key } => match self.pop(key)? {
                Some(v) => KeystoreResult::found(Some((*v.value).clone()), v.version),
                None => KeystoreResult::not_found(),
            },
        };
        Ok(result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeystoreError {
    #[error("keystore entry `{0}` is not a list")]
    NotAList(String),
}
