//! Party to verifying key directory.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use iou_common::{IouError, PartyId, Result};
use iou_crypto::VerifyingKey;

use crate::services::IdentityService;

/// In-memory identity service shared by every node of a network.
#[derive(Debug, Default)]
pub struct KeyDirectory {
    keys: DashMap<PartyId, VerifyingKey>,
}

impl KeyDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the key of `party`.
    pub fn register(&self, party: PartyId, key: VerifyingKey) {
        info!(party = %party, key_id = %key.key_id(), "Registered party key");
        self.keys.insert(party, key);
    }

    /// Forget a party.
    pub fn remove(&self, party: &PartyId) -> Option<VerifyingKey> {
        self.keys.remove(party).map(|(_, key)| key)
    }

    /// Look up a key without going through the async interface.
    pub fn get(&self, party: &PartyId) -> Option<VerifyingKey> {
        self.keys.get(party).map(|entry| entry.value().clone())
    }

    /// All known parties, sorted.
    pub fn parties(&self) -> Vec<PartyId> {
        let mut parties: Vec<PartyId> = self.keys.iter().map(|e| e.key().clone()).collect();
        parties.sort();
        parties
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl IdentityService for KeyDirectory {
    async fn verifying_key(&self, party: &PartyId) -> Result<VerifyingKey> {
        self.get(party)
            .ok_or_else(|| IouError::UnknownParty(party.clone()))
    }
}
