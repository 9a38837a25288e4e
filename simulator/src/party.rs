//! Simulated parties and the shared services they join.

use std::sync::Arc;

use tracing::info;

use iou_common::{Amount, Currency, IouError, PartyId, Result};
use iou_ledger::StateAndRef;
use iou_notary::{Notary, NotaryConfig};
use iou_participant::{InMemoryVault, NodeConfig, ObligationNode};
use iou_protocol::KeyDirectory;

use crate::network::InMemoryNetwork;
use crate::wallet::CashWallet;

/// Services every simulated party shares.
pub struct Infrastructure {
    pub network: Arc<InMemoryNetwork>,
    pub notary: Arc<Notary>,
    pub directory: Arc<KeyDirectory>,
}

impl Infrastructure {
    /// Create the services and start the notary.
    pub fn start(notary_config: NotaryConfig) -> Result<Self> {
        let directory = Arc::new(KeyDirectory::new());
        let notary = Arc::new(Notary::new(notary_config, directory.clone()));
        notary.start()?;
        Ok(Self {
            network: Arc::new(InMemoryNetwork::new()),
            notary,
            directory,
        })
    }
}

/// A party with its node and cash wallet.
pub struct SimulatedParty {
    /// Party identifier.
    pub id: PartyId,
    /// Display name.
    pub name: String,
    pub node: ObligationNode,
    pub wallet: Arc<CashWallet>,
}

impl SimulatedParty {
    /// Build a node for `config.party` and register it with `infra`.
    pub fn join(name: impl Into<String>, config: NodeConfig, infra: &Infrastructure) -> Result<Self> {
        let id = config.party.clone();
        let vault = Arc::new(InMemoryVault::new(id.clone()));
        let wallet = Arc::new(CashWallet::new(vault.clone()));

        let node = ObligationNode::builder()
            .config(config)
            .vault(vault)
            .assets(wallet.clone())
            .exchange(infra.network.clone())
            .finality(infra.notary.clone())
            .identity(infra.directory.clone())
            .build()?;

        infra.directory.register(id.clone(), node.verifying_key());
        infra.network.register(id.clone(), node.handler());
        infra.notary.register_recorder(id.clone(), node.recorder());

        let name = name.into();
        info!(party = %id, name = %name, "Party joined");
        Ok(Self {
            id,
            name,
            node,
            wallet,
        })
    }

    /// Issue `units` whole units of `currency` to this party.
    pub fn fund(&self, units: i64, currency: Currency) -> Result<()> {
        self.wallet.issue(Amount::from_base_units(units, currency)).map(|_| ())
    }

    pub fn balance(&self, currency: &Currency) -> Amount {
        self.wallet.balance(currency)
    }

    /// Unconsumed obligations this party is part of.
    pub fn obligations(&self) -> Vec<StateAndRef> {
        self.node.vault().obligations()
    }

    /// Total still owed to this party.
    pub fn receivable(&self) -> i64 {
        self.obligations()
            .iter()
            .filter_map(|s| s.state.as_obligation())
            .filter(|iou| iou.recipient() == &self.id)
            .map(|iou| iou.outstanding())
            .sum()
    }

    /// Total this party still owes.
    pub fn payable(&self) -> i64 {
        self.obligations()
            .iter()
            .filter_map(|s| s.state.as_obligation())
            .filter(|iou| iou.sender() == &self.id)
            .map(|iou| iou.outstanding())
            .sum()
    }
}

/// Creates the standard cast of parties.
pub struct PartyFactory;

impl PartyFactory {
    /// Identifiers and display names for `count` parties.
    pub fn names(count: usize) -> Vec<(String, String)> {
        let names = [
            ("ALICE", "Alice Holdings"),
            ("BOB", "Bob Trading"),
            ("CHARLIE", "Charlie Logistics"),
            ("DAVE", "Dave Capital"),
            ("EVE", "Eve Supplies"),
            ("FRANK", "Frank Foods"),
            ("GRACE", "Grace Textiles"),
            ("HEIDI", "Heidi Energy"),
        ];

        (0..count)
            .map(|i| match names.get(i) {
                Some((id, name)) => (id.to_string(), name.to_string()),
                None => (format!("PARTY_{}", i + 1), format!("Party {}", i + 1)),
            })
            .collect()
    }

    /// Create `count` parties, each with `base` as its node configuration.
    pub fn create_parties(
        count: usize,
        base: &NodeConfig,
        infra: &Infrastructure,
    ) -> Result<Vec<SimulatedParty>> {
        if count < 2 {
            return Err(IouError::ConfigurationError(
                "A simulation needs at least two parties".to_string(),
            ));
        }

        Self::names(count)
            .into_iter()
            .map(|(id, name)| {
                let config = NodeConfig {
                    party: PartyId::new(id),
                    ..base.clone()
                };
                SimulatedParty::join(name, config, infra)
            })
            .collect()
    }
}
