mod op;
pub mod store;

pub use op::{KeystoreOp, KeystoreResult};
pub use store::{Keystore, KeystoreError, Versioned};
