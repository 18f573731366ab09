//! Vault change watcher (C8): unifies the editor's own event bus with a
//! polling adapter for paths that bus doesn't reliably cover, debounces
//! bursts into single changes, and applies exclusion rules and writeback
//! suppression before handing anything to the sync engine.

pub mod adapter_poll;
pub mod change;
pub mod debounce;
pub mod exclusion;
pub mod suppression;
pub mod watcher;

pub use adapter_poll::AdapterPoller;
pub use change::{ChangeKind, FileChange, RawEvent};
pub use debounce::Debouncer;
pub use exclusion::{ExclusionConfig, ExclusionRules};
pub use suppression::SuppressionSet;
pub use watcher::Watcher;
