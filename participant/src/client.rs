//! Node client exposing the obligation flows.

use std::sync::Arc;

use tracing::{info, instrument};

use iou_common::{IouError, ObligationId, PartyId, Result, StateRef, TransactionId};
use iou_crypto::{SigningKey, VerifyingKey};
use iou_protocol::{
    AssetSpendBuilder, DependencyResolver, FinalityService, IdentityService, MessageExchange,
    TransactionRecorder,
};

use crate::config::NodeConfig;
use crate::connection::PeerConnection;
use crate::flows::{self, CreateRole, FlowContext};
use crate::handler::{MessageHandler, NodeHandler};
use crate::resolver::PeerDependencyResolver;
use crate::session::SessionRegistry;
use crate::vault::InMemoryVault;

/// One party's node.
///
/// Each flow runs on its own task; the returned future completes with the
/// finalized transaction id or the error that ended the flow.
pub struct ObligationNode {
    ctx: Arc<FlowContext>,
    vault: Arc<InMemoryVault>,
    handler: Arc<NodeHandler>,
}

impl ObligationNode {
    pub fn builder() -> ObligationNodeBuilder {
        ObligationNodeBuilder::new()
    }

    /// Create an obligation in which this node owes `counterparty` `value`.
    #[instrument(skip(self), fields(party = %self.party()))]
    pub async fn create_obligation(&self, value: i64, counterparty: PartyId) -> Result<TransactionId> {
        let ctx = self.ctx.clone();
        self.spawn(async move { flows::create::run(&ctx, value, counterparty, CreateRole::Sender).await })
            .await
    }

    /// Create an obligation in which `debtor` owes this node `value`.
    #[instrument(skip(self), fields(party = %self.party()))]
    pub async fn request_obligation(&self, value: i64, debtor: PartyId) -> Result<TransactionId> {
        let ctx = self.ctx.clone();
        self.spawn(async move { flows::create::run(&ctx, value, debtor, CreateRole::Recipient).await })
            .await
    }

    /// Transfer the obligation at `state_ref` to `new_recipient`.
    #[instrument(skip(self), fields(party = %self.party()))]
    pub async fn transfer_obligation(
        &self,
        state_ref: StateRef,
        new_recipient: PartyId,
    ) -> Result<TransactionId> {
        let ctx = self.ctx.clone();
        self.spawn(async move { flows::transfer::run(&ctx, state_ref, new_recipient).await })
            .await
    }

    /// Pay `amount` towards obligation `id`.
    #[instrument(skip(self), fields(party = %self.party()))]
    pub async fn settle_obligation(&self, id: ObligationId, amount: i64) -> Result<TransactionId> {
        let ctx = self.ctx.clone();
        self.spawn(async move { flows::settle::run(&ctx, id, amount).await })
            .await
    }

    pub fn party(&self) -> &PartyId {
        self.ctx.party()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.ctx.config
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.ctx.signing_key.verifying_key()
    }

    pub fn vault(&self) -> Arc<InMemoryVault> {
        self.vault.clone()
    }

    /// Where the finality service should deliver this node's transactions.
    pub fn recorder(&self) -> Arc<dyn TransactionRecorder> {
        self.vault.clone()
    }

    /// Answers the messages peers send to this node.
    pub fn handler(&self) -> Arc<dyn MessageHandler> {
        self.handler.clone()
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.ctx.sessions.clone()
    }

    async fn spawn<F>(&self, flow: F) -> Result<TransactionId>
    where
        F: std::future::Future<Output = Result<TransactionId>> + Send + 'static,
    {
        tokio::spawn(flow)
            .await
            .map_err(|e| IouError::InternalError(format!("Flow task failed: {}", e)))?
    }
}

/// Builder for ObligationNode.
pub struct ObligationNodeBuilder {
    config: NodeConfig,
    signing_key: Option<SigningKey>,
    exchange: Option<Arc<dyn MessageExchange>>,
    finality: Option<Arc<dyn FinalityService>>,
    identity: Option<Arc<dyn IdentityService>>,
    resolver: Option<Arc<dyn DependencyResolver>>,
    assets: Option<Arc<dyn AssetSpendBuilder>>,
    vault: Option<Arc<InMemoryVault>>,
}

impl ObligationNodeBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            signing_key: None,
            exchange: None,
            finality: None,
            identity: None,
            resolver: None,
            assets: None,
            vault: None,
        }
    }

    /// Set the whole configuration.
    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the node's party.
    pub fn party(mut self, party: impl Into<PartyId>) -> Self {
        self.config.party = party.into();
        self
    }

    /// Set the signing key; a fresh one is generated otherwise.
    pub fn signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    pub fn exchange(mut self, exchange: Arc<dyn MessageExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn finality(mut self, finality: Arc<dyn FinalityService>) -> Self {
        self.finality = Some(finality);
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityService>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Replace the default peer resolver.
    pub fn resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the asset ledger used to pay settlements.
    pub fn assets(mut self, assets: Arc<dyn AssetSpendBuilder>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Use an existing vault instead of an empty one.
    pub fn vault(mut self, vault: Arc<InMemoryVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    /// Build the node.
    pub fn build(self) -> Result<ObligationNode> {
        self.config
            .validate()
            .map_err(IouError::ConfigurationError)?;

        let exchange = self.exchange.ok_or(IouError::ConfigurationError(
            "Message exchange is required".to_string(),
        ))?;
        let finality = self.finality.ok_or(IouError::ConfigurationError(
            "Finality service is required".to_string(),
        ))?;
        let identity = self.identity.ok_or(IouError::ConfigurationError(
            "Identity service is required".to_string(),
        ))?;
        let signing_key = match self.signing_key {
            Some(key) => key,
            None => SigningKey::generate().map_err(|e| IouError::CryptoError(e.to_string()))?,
        };

        let party = self.config.party.clone();
        let vault = match self.vault {
            Some(vault) if vault.party() == &party => vault,
            Some(vault) => {
                return Err(IouError::ConfigurationError(format!(
                    "Vault belongs to {}, not {}",
                    vault.party(),
                    party
                )))
            }
            None => Arc::new(InMemoryVault::new(party.clone())),
        };

        let connection = PeerConnection::new(exchange, party.clone(), self.config.exchange_timeout);
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(PeerDependencyResolver::new(
                connection.clone(),
                vault.clone(),
                identity.clone(),
                self.config.max_resolution_depth,
            )),
        };

        let ctx = Arc::new(FlowContext {
            config: self.config,
            signing_key: Arc::new(signing_key),
            states: vault.clone(),
            storage: vault.clone(),
            connection,
            resolver,
            finality,
            identity,
            assets: self.assets,
            sessions: Arc::new(SessionRegistry::new()),
        });

        info!(party = %party, key_id = %ctx.signing_key.key_id(), "Node built");

        Ok(ObligationNode {
            handler: Arc::new(NodeHandler::new(ctx.clone())),
            ctx,
            vault,
        })
    }
}

impl Default for ObligationNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iou_notary::{Notary, NotaryConfig};
    use iou_protocol::KeyDirectory;

    use crate::flows::testing::Router;

    struct Network {
        router: Arc<Router>,
        directory: Arc<KeyDirectory>,
        notary: Arc<Notary>,
    }

    fn network() -> Network {
        let directory = Arc::new(KeyDirectory::new());
        let notary = Arc::new(Notary::new(NotaryConfig::default(), directory.clone()));
        notary.start().unwrap();
        Network {
            router: Arc::new(Router::default()),
            directory,
            notary,
        }
    }

    fn join(network: &Network, name: &str) -> ObligationNode {
        let node = ObligationNode::builder()
            .party(name)
            .exchange(network.router.clone())
            .finality(network.notary.clone())
            .identity(network.directory.clone())
            .build()
            .unwrap();
        network.directory.register(node.party().clone(), node.verifying_key());
        network.router.handlers.write().insert(node.party().clone(), node.handler());
        network.notary.register_recorder(node.party().clone(), node.recorder());
        node
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = ObligationNode::builder().party("ALICE").build();
        assert!(matches!(result, Err(IouError::ConfigurationError(_))));
    }

    #[test]
    fn test_builder_rejects_foreign_vault() {
        let net = network();
        let result = ObligationNode::builder()
            .party("ALICE")
            .exchange(net.router.clone())
            .finality(net.notary.clone())
            .identity(net.directory.clone())
            .vault(Arc::new(InMemoryVault::new(PartyId::new("BOB"))))
            .build();
        assert!(matches!(result, Err(IouError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_create_and_transfer_through_nodes() {
        let net = network();
        let alice = join(&net, "ALICE");
        let bob = join(&net, "BOB");
        let charlie = join(&net, "CHARLIE");

        bob.request_obligation(40, alice.party().clone()).await.unwrap();
        let state = bob.vault().obligations()[0].clone();
        assert_eq!(state.obligation().unwrap().sender(), alice.party());

        bob.transfer_obligation(state.state_ref, charlie.party().clone())
            .await
            .unwrap();
        assert_eq!(charlie.vault().obligations().len(), 1);
        assert!(bob.vault().obligations().is_empty());
    }

    #[tokio::test]
    async fn test_settle_without_assets_is_a_configuration_error() {
        let net = network();
        let alice = join(&net, "ALICE");
        let bob = join(&net, "BOB");

        alice.create_obligation(10, bob.party().clone()).await.unwrap();
        let id = alice.vault().obligations()[0].obligation().unwrap().id();

        let result = alice.settle_obligation(id, 5).await;
        assert!(matches!(result, Err(IouError::ConfigurationError(_))));
    }
}
