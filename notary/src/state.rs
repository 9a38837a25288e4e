//! Notary state definitions.

/// Notary operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotaryState {
    /// Notary is starting up.
    Starting,
    /// Notary is running and accepting submissions.
    Running,
    /// Notary is shutting down, not accepting new submissions.
    ShuttingDown,
    /// Notary is stopped.
    Stopped,
}

impl NotaryState {
    /// Check if the notary is accepting new submissions.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, NotaryState::Running)
    }

    /// Check if the notary is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NotaryState::Stopped)
    }
}
