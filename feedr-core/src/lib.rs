mod consumer;
mod controller;
mod error;
mod failure;
mod keystore;
mod producer;
mod registry;
mod template;

pub mod bus;
pub mod config;
pub mod protocol;
pub mod source;

pub use bus::{Bus, Link, Pending, RequestHandler, link_pair};
pub use config::{
    ConsumerSettings, DEFAULT_REQUEST_TIMEOUT, Exclusivity, ExhaustionPolicy, OnExhausted,
    ReaderConfig, RecordFormat, SourceConfig, SourceKind, VariableDecl,
};
pub use consumer::Consumer;
pub use controller::Controller;
pub use error::{Error, Result};
pub use failure::FailurePolicy;
pub use keystore::{Entry as KeystoreEntry, KeystoreClient};
pub use producer::{MAX_BATCH, Producer, SourceStats};
pub use protocol::{
    ConsumerId, CorrelationId, DataFailure, DataRequest, DataResponse, Frame, Request, Response,
    StopReason, decode_frame, encode_frame,
};
pub use registry::{Registry, RegistryOptions};
pub use source::{FnGenerator, Generators, SourceState, ValueGenerator, VariableSource};
pub use template::{Template, VarRef};

pub use feedr_keystore::{Keystore, KeystoreError, KeystoreOp, KeystoreResult};
pub use feedr_value::{ObjectMap, Value};
