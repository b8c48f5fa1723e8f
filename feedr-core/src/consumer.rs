use std::sync::Arc;

use ahash::AHashMap;
use feedr_value::Value;

use crate::bus::Bus;
use crate::config::{ConsumerSettings, Exclusivity, OnExhausted};
use crate::error::{Error, Result};
use crate::keystore::KeystoreClient;
use crate::producer::MAX_BATCH;
use crate::protocol::{ConsumerId, DataFailure, DataRequest, DataResponse, Request, Response};
use crate::registry::Registry;
use crate::source::{SourceExhausted, VariableSource};

/// Resolves variables for one virtual-user execution context.
///
/// Replicated variables are computed locally from private source instances. Exclusive ones are
/// requested from the producer over the bus. Either way a variable resolves at most once per
/// iteration; [`Consumer::begin_iteration`] clears that cache.
#[derive(Debug)]
pub struct Consumer {
    id: ConsumerId,
    registry: Arc<Registry>,
    bus: Bus,
    settings: ConsumerSettings,
    local: AHashMap<Arc<str>, VariableSource>,
    cache: AHashMap<Arc<str>, Value>,
    iteration: u64,
}

impl Consumer {
    pub fn new(id: ConsumerId, registry: Arc<Registry>, bus: Bus, settings: ConsumerSettings) -> Self {
        Self {
            id,
            registry,
            bus,
            settings,
            local: AHashMap::new(),
            cache: AHashMap::new(),
            iteration: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConsumerId {
        &self.id
    }

    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Forgets every value resolved during the previous iteration.
    pub fn begin_iteration(&mut self) {
        self.cache.clear();
        self.iteration += 1;
    }

    #[must_use]
    pub fn keystore(&self) -> KeystoreClient {
        KeystoreClient::new(self.bus.clone(), self.settings.request_timeout)
    }

    /// Whether the controller asked workers to stop.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.bus.stop_requested()
    }

    pub async fn resolve(&mut self, name: &str) -> Result<Value> {
        if let Some(value) = self.cache.get(name) {
            return Ok(value.clone());
        }

        let (key, exclusivity) = match self.registry.get(name) {
            Some(source) => (source.name().clone(), source.exclusivity()),
            None => return Err(Error::UnknownVariable(name.to_string())),
        };

        let value = match exclusivity {
            Exclusivity::Replicated => {
                let values = self.next_local(&key, 1)?;
                match values.into_iter().next() {
                    Some(v) => v,
                    None => self.exhausted(&key)?,
                }
            }
            Exclusivity::Exclusive => {
                let response = self.request(&key, 1).await?;
                match response.values.into_iter().next() {
                    Some(v) => v,
                    None => self.exhausted(&key)?,
                }
            }
        };

        self.cache.insert(key, value.clone());
        Ok(value)
    }

    /// Takes `count` values at once, bypassing the iteration cache.
    ///
    /// Returns fewer values when the source runs out part-way; an empty result on exhaustion is
    /// handled like [`Consumer::resolve`] handles it.
    pub async fn take(&mut self, name: &str, count: u64) -> Result<Vec<Value>> {
        let (key, exclusivity) = match self.registry.get(name) {
            Some(source) => (source.name().clone(), source.exclusivity()),
            None => return Err(Error::UnknownVariable(name.to_string())),
        };
        if count == 0 || count > MAX_BATCH {
            return Err(Error::DataFailure {
                variable: key.to_string(),
                failure: DataFailure::InvalidCount,
            });
        }

        let values = match exclusivity {
            Exclusivity::Replicated => self.next_local(&key, count)?,
            Exclusivity::Exclusive => self.request(&key, count).await?.values,
        };
        if values.is_empty() {
            self.exhausted(&key)?;
        }
        Ok(values)
    }

    fn next_local(&mut self, key: &Arc<str>, count: u64) -> Result<Vec<Value>> {
        if !self.local.contains_key(key) {
            let Some(source) = self.registry.instantiate(key) else {
                return Err(Error::UnknownVariable(key.to_string()));
            };
            self.local.insert(key.clone(), source);
        }
        let Some(source) = self.local.get_mut(key) else {
            return Err(Error::UnknownVariable(key.to_string()));
        };

        match source.next(count) {
            Ok(batch) => Ok(batch.values),
            Err(SourceExhausted) => Err(self.exhausted_error(key)),
        }
    }

    async fn request(&self, key: &Arc<str>, count: u64) -> Result<DataResponse> {
        let request = Request::Data(DataRequest {
            source: key.clone(),
            consumer: self.id.clone(),
            count,
        });

        let response = match self.bus.call(request, self.settings.request_timeout).await {
            Ok(r) => r,
            Err(err) => {
                if let Error::Timeout { after, .. } = &err {
                    tracing::warn!(
                        source = %key,
                        consumer = %self.id,
                        timeout = ?after,
                        "data request timed out"
                    );
                }
                return Err(err);
            }
        };

        let data = match response {
            Response::Data(data) => data,
            Response::Failure { reason } => {
                tracing::warn!(source = %key, consumer = %self.id, "data request rejected: {reason}");
                return Err(Error::UnexpectedResponse(format!(
                    "data request for `{key}`: {reason}"
                )));
            }
            Response::Keystore(_) => {
                return Err(Error::UnexpectedResponse(format!(
                    "data request for `{key}`"
                )));
            }
        };

        match data.failure {
            None => Ok(data),
            Some(DataFailure::Exhausted) => Err(self.exhausted_error(key)),
            Some(failure) => Err(Error::DataFailure {
                variable: key.to_string(),
                failure,
            }),
        }
    }

    /// Outcome of an empty answer, per the configured exhaustion behavior.
    fn exhausted(&self, key: &Arc<str>) -> Result<Value> {
        match self.settings.on_exhausted {
            OnExhausted::Fail => Err(self.exhausted_error(key)),
            OnExhausted::Null => {
                tracing::warn!(source = %key, consumer = %self.id, "source exhausted, resolving to null");
                Ok(Value::Null)
            }
        }
    }

    fn exhausted_error(&self, key: &Arc<str>) -> Error {
        tracing::warn!(source = %key, consumer = %self.id, "source exhausted");
        Error::Exhausted {
            variable: key.to_string(),
            consumer: self.id.to_string(),
        }
    }
}
