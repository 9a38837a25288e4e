//! Flows a node initiates, and the responder that answers its peers.
//!
//! Every flow runs as one [`FlowSession`] and suspends only while waiting on a
//! counterparty or the finality service.

pub mod create;
pub mod responder;
pub mod settle;
pub mod transfer;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use iou_common::{FlowStatus, IouError, PartyId, Result, TransactionId};
use iou_crypto::SigningKey;
use iou_ledger::{SignedTransaction, TransitionProposal};
use iou_protocol::{
    AssetSpendBuilder, DependencyResolver, FinalityService, IdentityService, StateLookup,
    TransactionStorage,
};

use crate::config::NodeConfig;
use crate::connection::PeerConnection;
use crate::session::{FlowSession, SessionRegistry};

pub use create::CreateRole;

/// Everything a flow needs from the node running it.
pub struct FlowContext {
    pub config: NodeConfig,
    pub signing_key: Arc<SigningKey>,
    pub states: Arc<dyn StateLookup>,
    pub storage: Arc<dyn TransactionStorage>,
    pub connection: PeerConnection,
    pub resolver: Arc<dyn DependencyResolver>,
    pub finality: Arc<dyn FinalityService>,
    pub identity: Arc<dyn IdentityService>,
    /// Required by the settle flow only.
    pub assets: Option<Arc<dyn AssetSpendBuilder>>,
    pub sessions: Arc<SessionRegistry>,
}

impl FlowContext {
    pub fn party(&self) -> &PartyId {
        &self.config.party
    }

    /// Check `proposal` against the contract and sign it.
    pub(crate) fn verify_and_sign(
        &self,
        session: &mut FlowSession,
        proposal: TransitionProposal,
    ) -> Result<SignedTransaction> {
        session.advance(FlowStatus::Verifying)?;
        iou_ledger::verify(&proposal)?;

        let transaction = SignedTransaction::new(proposal)?;
        session.set_transaction(transaction.id());
        debug!(session = %session.id(), tx = %transaction.id().short(), "Proposal verified");
        Ok(transaction.sign(self.party(), &self.signing_key))
    }

    /// Ask `peer` to countersign and attach its signature once it verifies.
    pub(crate) async fn collect_signature(
        &self,
        session: &mut FlowSession,
        peer: &PartyId,
        transaction: SignedTransaction,
    ) -> Result<SignedTransaction> {
        session.advance(FlowStatus::AwaitingCounterSignature)?;

        let signature = self
            .connection
            .request_signature(peer, session.id(), session.kind(), &transaction)
            .await?;

        let key = self.identity.verifying_key(peer).await?;
        key.verify(transaction.id().as_bytes(), &signature.signature)
            .map_err(|_| {
                IouError::InvalidSignature(format!(
                    "Signature from {} on {} does not verify",
                    peer,
                    transaction.id().short()
                ))
            })?;

        info!(session = %session.id(), peer = %peer, "Counter-signature collected");
        Ok(transaction.with_signature(signature))
    }

    /// Collect every signature still missing, in `order` first and then the rest.
    pub(crate) async fn collect_signatures(
        &self,
        session: &mut FlowSession,
        order: &[PartyId],
        mut transaction: SignedTransaction,
    ) -> Result<SignedTransaction> {
        let mut remaining: Vec<PartyId> = order
            .iter()
            .filter(|p| transaction.missing_signers().contains(*p))
            .cloned()
            .collect();
        remaining.extend(
            transaction
                .missing_signers()
                .into_iter()
                .filter(|p| !order.contains(p)),
        );

        for peer in remaining {
            if &peer == self.party() {
                continue;
            }
            transaction = self.collect_signature(session, &peer, transaction).await?;
        }
        Ok(transaction)
    }

    /// Submit a fully signed transaction and wait for the verdict.
    pub(crate) async fn finalize(
        &self,
        session: &mut FlowSession,
        transaction: SignedTransaction,
        participants: BTreeSet<PartyId>,
    ) -> Result<TransactionId> {
        session.advance(FlowStatus::Finalizing)?;

        let missing = transaction.missing_signers();
        if !missing.is_empty() {
            return Err(IouError::InvalidSignature(format!(
                "Cannot finalize {} without signatures from {:?}",
                transaction.id().short(),
                missing
            )));
        }

        let outcome = tokio::time::timeout(
            self.config.finality_timeout,
            self.finality.finalize(transaction, participants),
        )
        .await
        .map_err(|_| {
            IouError::Timeout(format!(
                "Finality did not answer within {}ms",
                self.config.finality_timeout.as_millis()
            ))
        })??;

        let id = outcome.into_result()?;
        session.advance(FlowStatus::Done)?;
        info!(session = %session.id(), kind = %session.kind(), tx = %id.short(), "Flow finalized");
        Ok(id)
    }
}
