//! Fetching and checking the history behind a proposal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use iou_common::{IouError, PartyId, Result, TransactionId};
use iou_ledger::SignedTransaction;
use iou_protocol::{
    verify_transaction_signatures, DependencyResolver, IdentityService, TransactionStorage,
};

use crate::connection::PeerConnection;

/// Resolves dependencies by asking the proposing peer for them.
///
/// History is walked level by level through obligation inputs only. Every fetched
/// transaction must be fully signed and pass the contract, and every input it claims
/// must equal the output it points at. Nothing is stored unless the whole chain
/// checks out.
pub struct PeerDependencyResolver {
    connection: PeerConnection,
    storage: Arc<dyn TransactionStorage>,
    identity: Arc<dyn IdentityService>,
    max_depth: usize,
}

impl PeerDependencyResolver {
    pub fn new(
        connection: PeerConnection,
        storage: Arc<dyn TransactionStorage>,
        identity: Arc<dyn IdentityService>,
        max_depth: usize,
    ) -> Self {
        Self {
            connection,
            storage,
            identity,
            max_depth,
        }
    }

    async fn fetch_level(
        &self,
        peer: &PartyId,
        wanted: &[TransactionId],
    ) -> Result<Vec<SignedTransaction>> {
        let fetched = match self.connection.fetch_transactions(peer, wanted.to_vec()).await {
            Ok(fetched) => fetched,
            Err(IouError::Timeout(reason)) => return Err(IouError::Timeout(reason)),
            Err(e) => {
                return Err(IouError::UnresolvableDependency(format!(
                    "{} could not supply history: {}",
                    peer, e
                )))
            }
        };

        let wanted_set: HashSet<TransactionId> = wanted.iter().copied().collect();
        let returned: HashSet<TransactionId> = fetched.iter().map(SignedTransaction::id).collect();
        if let Some(extra) = fetched.iter().find(|tx| !wanted_set.contains(&tx.id())) {
            return Err(IouError::UnresolvableDependency(format!(
                "{} sent unrequested transaction {}",
                peer,
                extra.id().short()
            )));
        }
        if let Some(missing) = wanted.iter().find(|id| !returned.contains(id)) {
            return Err(IouError::UnresolvableDependency(format!(
                "{} did not send transaction {}",
                peer,
                missing.short()
            )));
        }
        Ok(fetched)
    }

    async fn check(&self, tx: &SignedTransaction) -> Result<()> {
        verify_transaction_signatures(self.identity.as_ref(), tx, true)
            .await
            .and_then(|_| iou_ledger::verify(tx.proposal()).map_err(IouError::from))
            .map_err(|e| {
                IouError::UnresolvableDependency(format!(
                    "Transaction {} is invalid: {}",
                    tx.id().short(),
                    e
                ))
            })
    }

    async fn known(&self, id: &TransactionId) -> Option<SignedTransaction> {
        self.storage.transaction(id).await
    }
}

#[async_trait]
impl DependencyResolver for PeerDependencyResolver {
    #[instrument(skip(self, ids), fields(peer = %peer, count = ids.len()))]
    async fn resolve(&self, ids: &[TransactionId], peer: &PartyId) -> Result<()> {
        let mut seen: HashSet<TransactionId> = HashSet::new();
        let mut frontier = Vec::new();
        for id in ids {
            if seen.insert(*id) && self.known(id).await.is_none() {
                frontier.push(*id);
            }
        }

        let mut fetched: HashMap<TransactionId, SignedTransaction> = HashMap::new();
        let mut order: Vec<TransactionId> = Vec::new();
        let mut depth = 0;

        while !frontier.is_empty() {
            if depth >= self.max_depth {
                warn!(depth, "History deeper than allowed");
                return Err(IouError::UnresolvableDependency(format!(
                    "History from {} is deeper than {} levels",
                    peer, self.max_depth
                )));
            }
            depth += 1;

            let level = self.fetch_level(peer, &frontier).await?;
            let mut next = Vec::new();
            for tx in level {
                self.check(&tx).await?;
                for (state_ref, _) in tx.proposal().obligation_inputs() {
                    let parent = state_ref.txid;
                    if seen.insert(parent) && self.known(&parent).await.is_none() {
                        next.push(parent);
                    }
                }
                order.push(tx.id());
                fetched.insert(tx.id(), tx);
            }
            frontier = next;
        }

        for tx in fetched.values() {
            for (state_ref, claimed) in tx.proposal().obligation_inputs() {
                let source = match fetched.get(&state_ref.txid) {
                    Some(source) => Some(source.clone()),
                    None => self.known(&state_ref.txid).await,
                };
                let actual = source.and_then(|source| source.out_ref(state_ref.index));
                let matches = actual
                    .as_ref()
                    .and_then(|actual| actual.state.as_obligation())
                    .map(|actual| actual == claimed)
                    .unwrap_or(false);
                if !matches {
                    return Err(IouError::UnresolvableDependency(format!(
                        "Transaction {} claims input {} that its history does not contain",
                        tx.id().short(),
                        state_ref
                    )));
                }
            }
        }

        // parents before children
        for id in order.iter().rev() {
            if let Some(tx) = fetched.remove(id) {
                self.storage.record_dependency(tx).await?;
            }
        }

        if !order.is_empty() {
            info!(resolved = order.len(), depth, "Resolved dependencies");
        }
        Ok(())
    }
}
