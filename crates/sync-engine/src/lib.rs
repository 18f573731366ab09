//! Client sync engine (C7): the state machine, manifest reconciliation,
//! bounded-concurrency upload/download pipelines, offline-edit queue, and
//! vault-key lifecycle that drive one device's side of the sync protocol.
//!
//! Raw vault-key bytes are persisted client-side (base64, via
//! [`engine::ClientState`]) so a reconnect can skip password re-entry.
//! This is a deliberate usability/security tradeoff carried over
//! unchanged from the source system, not a silent hardening or omission.

pub mod downloads;
pub mod engine;
pub mod error;
pub mod local;
pub mod queue;
pub mod reconcile;
pub mod state;

pub use downloads::{PendingDownload, PendingDownloads, PendingSlot};
pub use engine::{ClientState, Engine, EngineEvent, StoredCredentials};
pub use error::EngineError;
pub use local::{LocalEntry, LocalFile, VaultFs};
pub use queue::{OfflineQueue, PendingChange};
pub use reconcile::{reconcile_full, reconcile_incremental, Plan, PlannedDownload, Strategy};
pub use state::EngineState;
