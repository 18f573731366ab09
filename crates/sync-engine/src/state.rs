//! The engine's top-level connection/sync state machine (§4.7): only
//! `Idle` permits outgoing incremental traffic; every other state queues
//! local changes instead of acting on them immediately.

/// One state in the client sync engine's lifecycle. `Error` is reachable
/// from every other state; the reverse is not true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No transport connection and none in flight.
    Disconnected,
    /// A websocket connect attempt is in progress.
    Connecting,
    /// The socket is open; `AUTH` has been sent and a response is awaited.
    Authenticating,
    /// Authenticated; a manifest/reconciliation batch is in flight.
    Syncing,
    /// Authenticated, batch drained, ready for incremental traffic.
    Idle,
    /// A fatal condition until the next successful (re)connect.
    Error,
}

impl EngineState {
    /// Whether the engine may act on a local file-change event immediately
    /// rather than queueing it for the next flush.
    #[must_use]
    pub fn accepts_incremental_traffic(self) -> bool {
        matches!(self, Self::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_idle_accepts_incremental_traffic() {
        assert!(EngineState::Idle.accepts_incremental_traffic());
        for s in [
            EngineState::Disconnected,
            EngineState::Connecting,
            EngineState::Authenticating,
            EngineState::Syncing,
            EngineState::Error,
        ] {
            assert!(!s.accepts_incremental_traffic());
        }
    }
}
