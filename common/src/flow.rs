//! Flow kinds and the session state machine shared by all orchestrators.

use crate::{SessionId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which orchestrator is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowKind {
    Create,
    Transfer,
    Settle,
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowKind::Create => "create",
            FlowKind::Transfer => "transfer",
            FlowKind::Settle => "settle",
        };
        write!(f, "{}", name)
    }
}

/// Flow status representing the lifecycle of one protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    /// Assembling the transition proposal.
    Building,
    /// Running the contract locally.
    Verifying,
    /// Fetching transaction history from a peer.
    AwaitingDependencyResolution,
    /// Waiting on a counterparty signature.
    AwaitingCounterSignature,
    /// Submitted to the finality service.
    Finalizing,
    /// Committed (initiator) or signed (acceptor).
    Done,
    /// Aborted; collected signatures are dropped.
    Failed,
}

impl FlowStatus {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, FlowStatus::Done | FlowStatus::Failed)
    }

    /// Check if the session is still running.
    pub fn is_in_progress(&self) -> bool {
        !self.is_final()
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[FlowStatus] {
        match self {
            FlowStatus::Building => &[
                FlowStatus::Verifying,
                FlowStatus::AwaitingDependencyResolution,
                FlowStatus::Failed,
            ],
            FlowStatus::Verifying => &[
                FlowStatus::AwaitingCounterSignature,
                FlowStatus::AwaitingDependencyResolution,
                FlowStatus::Finalizing,
                FlowStatus::Done,
                FlowStatus::Failed,
            ],
            FlowStatus::AwaitingDependencyResolution => {
                &[FlowStatus::Verifying, FlowStatus::Failed]
            }
            FlowStatus::AwaitingCounterSignature => &[
                FlowStatus::AwaitingCounterSignature,
                FlowStatus::Finalizing,
                FlowStatus::Failed,
            ],
            FlowStatus::Finalizing => &[FlowStatus::Done, FlowStatus::Failed],
            FlowStatus::Done => &[],
            FlowStatus::Failed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: FlowStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Progress record of one orchestrator or acceptor session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowProgress {
    /// Session this record belongs to.
    pub session_id: SessionId,
    /// Orchestrator kind.
    pub kind: FlowKind,
    /// Current status.
    pub status: FlowStatus,
    /// Transaction under construction, once it has an id.
    pub transaction_id: Option<TransactionId>,
    /// Timing metrics.
    pub timing: FlowTiming,
    /// Failure information (if failed).
    pub failure: Option<FlowFailure>,
}

impl FlowProgress {
    /// Start a new session in `Building`.
    pub fn new(session_id: SessionId, kind: FlowKind) -> Self {
        Self {
            session_id,
            kind,
            status: FlowStatus::Building,
            transaction_id: None,
            timing: FlowTiming::new(),
            failure: None,
        }
    }

    /// Transition to a new status.
    pub fn transition_to(&mut self, new_status: FlowStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(new_status) {
            return Err(InvalidTransition {
                from: self.status,
                to: new_status,
            });
        }

        self.status = new_status;

        let now = Utc::now();
        match new_status {
            FlowStatus::Verifying if self.timing.verified_at.is_none() => {
                self.timing.verified_at = Some(now)
            }
            FlowStatus::AwaitingCounterSignature if self.timing.signing_started_at.is_none() => {
                self.timing.signing_started_at = Some(now)
            }
            FlowStatus::Finalizing => self.timing.finalizing_at = Some(now),
            FlowStatus::Done => self.timing.done_at = Some(now),
            _ => {}
        }

        Ok(())
    }

    /// Mark the session as failed.
    pub fn fail(&mut self, failure: FlowFailure) -> Result<(), InvalidTransition> {
        if self.status.is_final() {
            return Err(InvalidTransition {
                from: self.status,
                to: FlowStatus::Failed,
            });
        }

        self.failure = Some(failure);
        self.status = FlowStatus::Failed;
        self.timing.failed_at = Some(Utc::now());
        Ok(())
    }
}

/// Timing metrics for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTiming {
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When local verification first began.
    pub verified_at: Option<DateTime<Utc>>,
    /// When the first counter-signature was requested.
    pub signing_started_at: Option<DateTime<Utc>>,
    /// When the transaction was submitted for finality.
    pub finalizing_at: Option<DateTime<Utc>>,
    /// When the session completed.
    pub done_at: Option<DateTime<Utc>>,
    /// When the session failed (if applicable).
    pub failed_at: Option<DateTime<Utc>>,
}

impl FlowTiming {
    /// Create new timing with current timestamp as start time.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            verified_at: None,
            signing_started_at: None,
            finalizing_at: None,
            done_at: None,
            failed_at: None,
        }
    }

    /// Get total duration in milliseconds (if completed).
    pub fn total_duration_ms(&self) -> Option<i64> {
        self.done_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }

    /// Time spent collecting signatures.
    pub fn signing_duration_ms(&self) -> Option<i64> {
        match (self.signing_started_at, self.finalizing_at) {
            (Some(started), Some(finalizing)) => Some((finalizing - started).num_milliseconds()),
            _ => None,
        }
    }

    /// Time spent waiting on finality.
    pub fn finality_duration_ms(&self) -> Option<i64> {
        match (self.finalizing_at, self.done_at) {
            (Some(finalizing), Some(done)) => Some((done - finalizing).num_milliseconds()),
            _ => None,
        }
    }
}

impl Default for FlowTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// Session failure information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowFailure {
    /// Error code, as reported by `IouError::error_code`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// When the failure occurred.
    pub failed_at: DateTime<Utc>,
}

impl FlowFailure {
    /// Build a failure record from an error.
    pub fn from_error(err: &crate::IouError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
            failed_at: Utc::now(),
        }
    }
}

/// Error when attempting invalid state transition.
#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub from: FlowStatus,
    pub to: FlowStatus,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid state transition from {:?} to {:?}",
            self.from, self.to
        )
    }
}

impl std::error::Error for InvalidTransition {}

impl From<InvalidTransition> for crate::IouError {
    fn from(err: InvalidTransition) -> Self {
        crate::IouError::InternalError(err.to_string())
    }
}
