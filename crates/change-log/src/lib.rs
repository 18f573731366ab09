//! Durable server-side change-log store: per-file records keyed by
//! file-ID, a monotonic sequence counter, sharded blob storage, and the
//! small auxiliary tables (vault metadata, client sessions, tokens) that
//! ride along with them on the same connection.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
pub mod error;
pub mod store;

pub use blob::BlobDir;
pub use error::StoreError;
pub use store::{meta_key, Store};
