use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::config::VariableDecl;
use crate::error::Result;
use crate::protocol::{DataFailure, DataRequest, DataResponse};
use crate::registry::{Registry, RegistryOptions};
use crate::source::{SourceExhausted, SourceState, VariableSource};

/// Upper bound on `count` in a single data request.
pub const MAX_BATCH: u64 = 10_000;

/// Sole owner of every exclusive source during a run.
///
/// The table is fixed at configuration; each source sits behind its own lock, so requests for
/// one source are served strictly in the order they take the lock while different sources are
/// served in parallel.
#[derive(Debug, Default)]
pub struct Producer {
    sources: AHashMap<Arc<str>, Mutex<VariableSource>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub name: Arc<str>,
    pub served: u64,
    pub state: SourceState,
    pub len: Option<u64>,
}

impl Producer {
    /// Builds the exclusive sources from declarations in one step.
    pub fn configure(decls: &[VariableDecl], opts: &RegistryOptions) -> Result<Self> {
        let registry = Registry::from_decls(decls, opts)?;
        Ok(Self::from_registry(&registry))
    }

    #[must_use]
    pub fn from_registry(registry: &Registry) -> Self {
        let sources = registry
            .exclusive()
            .map(|s| (s.name().clone(), Mutex::new(s.fresh_copy())))
            .collect::<AHashMap<_, _>>();
        tracing::info!(sources = sources.len(), "producer configured");
        Self { sources }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Answers one data request. Never panics; malformed requests get a failure-flagged response.
    pub fn serve(&self, request: &DataRequest) -> DataResponse {
        let Some(source) = self.sources.get(&*request.source) else {
            tracing::warn!(
                source = %request.source,
                consumer = %request.consumer,
                "data request for unknown source"
            );
            return DataResponse::failed(DataFailure::UnknownSource);
        };

        if request.count == 0 || request.count > MAX_BATCH {
            tracing::warn!(
                source = %request.source,
                consumer = %request.consumer,
                count = request.count,
                "data request with invalid count"
            );
            return DataResponse::failed(DataFailure::InvalidCount);
        }

        let result = source.lock().next(request.count);
        match result {
            Ok(batch) if batch.exhausted => {
                tracing::warn!(
                    source = %request.source,
                    consumer = %request.consumer,
                    requested = request.count,
                    served = batch.values.len(),
                    "source exhausted"
                );
                DataResponse::exhausted(batch.values)
            }
            Ok(batch) => DataResponse::served(batch.values),
            Err(SourceExhausted) => {
                tracing::warn!(
                    source = %request.source,
                    consumer = %request.consumer,
                    "source exhausted, failing request"
                );
                DataResponse::failed(DataFailure::Exhausted)
            }
        }
    }

    /// Snapshot of every source, sorted by name.
    #[must_use]
    pub fn stats(&self) -> Vec<SourceStats> {
        let mut out: Vec<SourceStats> = self
            .sources
            .iter()
            .map(|(name, source)| {
                let source = source.lock();
                SourceStats {
                    name: name.clone(),
                    served: source.served(),
                    state: source.state(),
                    len: source.len(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Exclusivity, ExhaustionPolicy, ReaderConfig, SourceConfig};
    use crate::protocol::ConsumerId;
    use feedr_value::Value;

    fn producer(decls: Vec<VariableDecl>) -> Producer {
        match Producer::configure(&decls, &RegistryOptions::default()) {
            Ok(p) => p,
            Err(err) => panic!("configure: {err}"),
        }
    }

    fn request(source: &str, count: u64) -> DataRequest {
        DataRequest {
            source: Arc::from(source),
            consumer: ConsumerId::new("w", 1),
            count,
        }
    }

    #[test]
    fn only_exclusive_sources_are_owned() {
        let p = producer(vec![
            VariableDecl {
                name: "n".to_string(),
                exclusivity: None,
                exhaustion: ExhaustionPolicy::Stop,
                source: SourceConfig::Counter {
                    start: 1,
                    step: 1,
                    limit: None,
                },
            },
            VariableDecl {
                name: "r".to_string(),
                exclusivity: Some(Exclusivity::Replicated),
                exhaustion: ExhaustionPolicy::Stop,
                source: SourceConfig::Counter {
                    start: 1,
                    step: 1,
                    limit: None,
                },
            },
        ]);

        assert!(p.contains("n"));
        assert!(!p.contains("r"));
        assert_eq!(
            p.serve(&request("r", 1)).failure,
            Some(DataFailure::UnknownSource)
        );
    }

    #[test]
    fn invalid_counts_fail_without_advancing() {
        let p = producer(vec![VariableDecl {
            name: "n".to_string(),
            exclusivity: None,
            exhaustion: ExhaustionPolicy::Stop,
            source: SourceConfig::NumericRange {
                start: 1,
                end: 3,
                step: 1,
            },
        }]);

        assert_eq!(
            p.serve(&request("n", 0)).failure,
            Some(DataFailure::InvalidCount)
        );
        assert_eq!(
            p.serve(&request("n", MAX_BATCH + 1)).failure,
            Some(DataFailure::InvalidCount)
        );
        assert_eq!(p.serve(&request("n", 1)).values, vec![Value::I64(1)]);
    }

    #[test]
    fn error_policy_yields_failure_flag() {
        let p = producer(vec![VariableDecl {
            name: "one".to_string(),
            exclusivity: None,
            exhaustion: ExhaustionPolicy::Error,
            source: SourceConfig::SequentialReader(ReaderConfig {
                rows: vec![Value::from("only")],
                ..ReaderConfig::default()
            }),
        }]);

        assert_eq!(
            p.serve(&request("one", 1)),
            DataResponse::served(vec![Value::from("only")])
        );
        let failed = p.serve(&request("one", 1));
        assert_eq!(failed.failure, Some(DataFailure::Exhausted));
        assert!(failed.values.is_empty());

        let stats = p.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].state, SourceState::Exhausted);
        assert_eq!(stats[0].served, 1);
        assert_eq!(stats[0].len, Some(1));
    }
}
