#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use feedr_core::{
    Bus, ConsumerId, ConsumerSettings, Controller, Exclusivity, ExhaustionPolicy, Keystore,
    Producer, ReaderConfig, Registry, RegistryOptions, SourceConfig, Value, VariableDecl,
    link_pair,
};

/// An in-process controller with its registry.
pub struct Cluster {
    pub registry: Arc<Registry>,
    pub controller: Controller,
}

impl Cluster {
    pub fn new(decls: &[VariableDecl]) -> Self {
        let registry = match Registry::from_decls(decls, &RegistryOptions::default()) {
            Ok(r) => Arc::new(r),
            Err(err) => panic!("registry: {err}"),
        };
        let controller = Controller::new(
            Arc::new(Producer::from_registry(&registry)),
            Arc::new(Keystore::default()),
        );
        Self {
            registry,
            controller,
        }
    }

    /// Connects a new worker and returns its end of the bus.
    pub fn worker(&self, name: &str) -> Bus {
        let (worker_end, controller_end) = link_pair();
        self.controller.attach(name, controller_end);
        Bus::spawn("controller", worker_end, None)
    }

    pub fn consumer(&self, bus: &Bus, worker: &str, vu: u64) -> feedr_core::Consumer {
        feedr_core::Consumer::new(
            ConsumerId::new(worker, vu),
            self.registry.clone(),
            bus.clone(),
            ConsumerSettings {
                request_timeout: Duration::from_secs(2),
                ..ConsumerSettings::default()
            },
        )
    }
}

pub fn range(name: &str, start: i64, end: i64, policy: ExhaustionPolicy) -> VariableDecl {
    VariableDecl {
        name: name.to_string(),
        exclusivity: Some(Exclusivity::Exclusive),
        exhaustion: policy,
        source: SourceConfig::NumericRange {
            start,
            end,
            step: 1,
        },
    }
}

/// The three-row `books` record set.
pub fn books(policy: ExhaustionPolicy) -> VariableDecl {
    let rows = [("A", "100"), ("B", "200"), ("C", "300")]
        .into_iter()
        .map(|(book, pages)| Value::row([("book", book), ("pages", pages)]))
        .collect();
    VariableDecl {
        name: "books".to_string(),
        exclusivity: None,
        exhaustion: policy,
        source: SourceConfig::SequentialReader(ReaderConfig {
            rows,
            ..ReaderConfig::default()
        }),
    }
}

pub async fn within<F: std::future::Future>(what: &str, fut: F) -> F::Output {
    match tokio::time::timeout(Duration::from_secs(5), fut).await {
        Ok(out) => out,
        Err(_) => panic!("{what} did not finish in time"),
    }
}
