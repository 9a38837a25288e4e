//! Flow session tracking.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use iou_common::{
    FlowFailure, FlowKind, FlowProgress, FlowStatus, IouError, Result, SessionId, TransactionId,
};

/// Progress of every session a node has run, initiated or accepted.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, FlowProgress>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one session.
    pub fn get(&self, session_id: &SessionId) -> Option<FlowProgress> {
        self.sessions.get(session_id).map(|p| p.clone())
    }

    /// Sessions that have not reached a final status.
    pub fn active(&self) -> Vec<FlowProgress> {
        self.sessions
            .iter()
            .filter(|p| p.status.is_in_progress())
            .map(|p| p.clone())
            .collect()
    }

    /// Number of sessions in `status`.
    pub fn count(&self, status: FlowStatus) -> usize {
        self.sessions.iter().filter(|p| p.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop finished sessions, returning how many were removed.
    pub fn prune_finished(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, p| !p.status.is_final());
        before - self.sessions.len()
    }

    fn store(&self, progress: &FlowProgress) {
        self.sessions.insert(progress.session_id, progress.clone());
    }
}

/// One running session, mirrored into its registry on every change.
pub struct FlowSession {
    registry: Arc<SessionRegistry>,
    progress: FlowProgress,
}

impl FlowSession {
    /// Start a session in `Building`.
    pub fn start(registry: Arc<SessionRegistry>, session_id: SessionId, kind: FlowKind) -> Self {
        let progress = FlowProgress::new(session_id, kind);
        registry.store(&progress);
        Self { registry, progress }
    }

    pub fn id(&self) -> SessionId {
        self.progress.session_id
    }

    pub fn kind(&self) -> FlowKind {
        self.progress.kind
    }

    pub fn status(&self) -> FlowStatus {
        self.progress.status
    }

    /// Move to `status`, rejecting illegal edges.
    pub fn advance(&mut self, status: FlowStatus) -> Result<()> {
        self.progress.transition_to(status)?;
        debug!(session = %self.progress.session_id, kind = %self.progress.kind, status = ?status, "Flow advanced");
        self.registry.store(&self.progress);
        Ok(())
    }

    /// Attach the id of the transaction being built.
    pub fn set_transaction(&mut self, id: TransactionId) {
        self.progress.transaction_id = Some(id);
        self.registry.store(&self.progress);
    }

    /// Record `err` as the session's failure.
    pub fn fail(&mut self, err: &IouError) {
        if self.progress.fail(FlowFailure::from_error(err)).is_ok() {
            warn!(
                session = %self.progress.session_id,
                kind = %self.progress.kind,
                code = err.error_code(),
                error = %err,
                "Flow failed"
            );
            self.registry.store(&self.progress);
        }
    }

    /// Close the session with the outcome of its body.
    pub fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                if self.progress.status != FlowStatus::Done {
                    self.advance(FlowStatus::Done)?;
                }
                Ok(value)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_mirrors_into_registry() {
        let registry = Arc::new(SessionRegistry::new());
        let mut session = FlowSession::start(registry.clone(), SessionId::new(), FlowKind::Create);
        let id = session.id();

        assert_eq!(registry.get(&id).unwrap().status, FlowStatus::Building);
        session.advance(FlowStatus::Verifying).unwrap();
        session.set_transaction(TransactionId::from_bytes([1; 32]));

        let progress = registry.get(&id).unwrap();
        assert_eq!(progress.status, FlowStatus::Verifying);
        assert!(progress.transaction_id.is_some());
        assert_eq!(registry.active().len(), 1);
    }

    #[test]
    fn test_illegal_edge_rejected() {
        let registry = Arc::new(SessionRegistry::new());
        let mut session = FlowSession::start(registry, SessionId::new(), FlowKind::Settle);
        assert!(matches!(
            session.advance(FlowStatus::Finalizing),
            Err(IouError::InternalError(_))
        ));
        assert_eq!(session.status(), FlowStatus::Building);
    }

    #[test]
    fn test_finish_records_failure() {
        let registry = Arc::new(SessionRegistry::new());
        let session = FlowSession::start(registry.clone(), SessionId::new(), FlowKind::Transfer);
        let id = session.id();

        let result: Result<()> = session.finish(Err(IouError::Timeout("BOB".into())));
        assert!(result.is_err());

        let progress = registry.get(&id).unwrap();
        assert_eq!(progress.status, FlowStatus::Failed);
        assert_eq!(progress.failure.unwrap().code, IouError::Timeout(String::new()).error_code());
        assert_eq!(registry.count(FlowStatus::Failed), 1);
        assert_eq!(registry.prune_finished(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_finish_success_completes() {
        let registry = Arc::new(SessionRegistry::new());
        let mut session = FlowSession::start(registry.clone(), SessionId::new(), FlowKind::Create);
        let id = session.id();
        session.advance(FlowStatus::Verifying).unwrap();

        assert_eq!(session.finish(Ok(7)).unwrap(), 7);
        assert_eq!(registry.get(&id).unwrap().status, FlowStatus::Done);
    }
}
