//! Change event shapes shared by the editor's raw event feed, the adapter
//! poller, and the debounced stream they both feed into.

/// The kind of change a path underwent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A new path appeared.
    Create,
    /// An existing path's content changed.
    Modify,
    /// A path was removed.
    Delete,
    /// A path was renamed; `old_path` on [`FileChange`] carries the prior name.
    Rename,
}

/// A single raw, un-debounced event as reported by the editor's event bus
/// or synthesized by the adapter poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// Vault-relative path the event concerns.
    pub path: String,
    /// Previous path, present only for [`ChangeKind::Rename`].
    pub old_path: Option<String>,
}

/// A debounced change ready for the engine to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// What happened, after coalescing repeated events within the debounce window.
    pub kind: ChangeKind,
    /// Vault-relative path.
    pub path: String,
    /// Previous path, present only for [`ChangeKind::Rename`].
    pub old_path: Option<String>,
}
