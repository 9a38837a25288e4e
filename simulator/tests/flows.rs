//! End-to-end flows between parties sharing one notary and network.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use iou_common::{Amount, Currency, FlowStatus, IouError, ObligationId, PartyId, StateRef};
use iou_notary::NotaryConfig;
use iou_participant::{MessageHandler, NodeConfig};
use iou_protocol::FlowMessage;
use iou_simulator::{
    Fault, Infrastructure, PartyFactory, Scenario, SimulatedParty, SimulationConfig,
    SimulationController,
};

fn node_config() -> NodeConfig {
    NodeConfig {
        exchange_timeout: Duration::from_millis(200),
        finality_timeout: Duration::from_secs(2),
        ..NodeConfig::default()
    }
}

/// Infrastructure plus ALICE, BOB, CHARLIE and DAVE, with ALICE holding 100 USD.
fn network() -> (Infrastructure, Vec<SimulatedParty>) {
    let infra = Infrastructure::start(NotaryConfig::default()).unwrap();
    let parties = PartyFactory::create_parties(4, &node_config(), &infra).unwrap();
    parties[0].fund(100, Currency::usd()).unwrap();
    (infra, parties)
}

/// The single obligation in `party`'s vault.
fn only_obligation(party: &SimulatedParty) -> (ObligationId, StateRef) {
    let held = party.obligations();
    assert_eq!(held.len(), 1, "{} should hold one obligation", party.id);
    (held[0].obligation().unwrap().id(), held[0].state_ref)
}

// =========================================================================
// Full lifecycle
// =========================================================================

#[tokio::test]
async fn test_create_transfer_settle() {
    let (infra, parties) = network();
    let (alice, bob, charlie) = (&parties[0], &parties[1], &parties[2]);

    alice.node.create_obligation(40, bob.id.clone()).await.unwrap();
    let (id, state_ref) = only_obligation(alice);
    assert_eq!(only_obligation(bob), (id, state_ref));
    assert_eq!(alice.payable(), 40);
    assert_eq!(bob.receivable(), 40);

    bob.node
        .transfer_obligation(state_ref, charlie.id.clone())
        .await
        .unwrap();
    assert!(bob.obligations().is_empty());
    assert_eq!(charlie.receivable(), 40);
    assert_eq!(
        alice.node.vault().obligation(id).unwrap().recipient(),
        &charlie.id
    );

    alice.node.settle_obligation(id, 15).await.unwrap();
    let remaining = charlie.node.vault().obligation(id).unwrap();
    assert_eq!(remaining.paid(), 15);
    assert_eq!(remaining.outstanding(), 25);
    assert_eq!(charlie.balance(&Currency::usd()), Amount::dollars(15));

    alice.node.settle_obligation(id, 25).await.unwrap();
    for party in [alice, bob, charlie] {
        assert!(party.obligations().is_empty(), "{} still holds the IOU", party.id);
    }
    assert_eq!(alice.balance(&Currency::usd()), Amount::dollars(60));
    assert_eq!(charlie.balance(&Currency::usd()), Amount::dollars(40));
    assert_eq!(infra.notary.committed_count(), 4);
}

#[tokio::test]
async fn test_requested_obligation_is_owed_by_debtor() {
    let (_infra, parties) = network();
    let (alice, bob) = (&parties[0], &parties[1]);

    bob.node.request_obligation(12, alice.id.clone()).await.unwrap();

    let (id, _) = only_obligation(bob);
    let iou = alice.node.vault().obligation(id).unwrap();
    assert_eq!(iou.sender(), &alice.id);
    assert_eq!(iou.recipient(), &bob.id);
    assert_eq!(iou.value(), 12);
}

// =========================================================================
// Double spends
// =========================================================================

#[tokio::test]
async fn test_concurrent_transfers_commit_once() {
    let (infra, parties) = network();
    let (alice, bob, charlie, dave) = (&parties[0], &parties[1], &parties[2], &parties[3]);

    alice.node.create_obligation(10, bob.id.clone()).await.unwrap();
    let (id, state_ref) = only_obligation(bob);

    let (to_charlie, to_dave) = tokio::join!(
        bob.node.transfer_obligation(state_ref, charlie.id.clone()),
        bob.node.transfer_obligation(state_ref, dave.id.clone()),
    );

    let failure = match (to_charlie, to_dave) {
        (Ok(_), Err(e)) | (Err(e), Ok(_)) => e,
        other => panic!("expected exactly one transfer to commit, got {:?}", other),
    };
    assert!(failure.requires_fresh_lookup(), "unexpected failure {}", failure);

    let holders = [charlie, dave]
        .iter()
        .filter(|p| p.node.vault().obligation(id).is_some())
        .count();
    assert_eq!(holders, 1);
    assert!(infra.notary.consumed_by(&state_ref).is_some());
}

#[tokio::test]
async fn test_settled_obligation_is_never_reused() {
    let (infra, parties) = network();
    let (alice, bob, charlie) = (&parties[0], &parties[1], &parties[2]);

    alice.node.create_obligation(20, bob.id.clone()).await.unwrap();
    let (id, state_ref) = only_obligation(bob);
    alice.node.settle_obligation(id, 20).await.unwrap();

    let settle_again = alice.node.settle_obligation(id, 1).await;
    assert!(matches!(settle_again, Err(IouError::NotFound(_))));

    let transfer_spent = bob.node.transfer_obligation(state_ref, charlie.id.clone()).await;
    assert!(matches!(transfer_spent, Err(IouError::NotFound(_))));

    assert!(infra.notary.consumed_by(&state_ref).is_some());
    assert_eq!(alice.balance(&Currency::usd()), Amount::dollars(80));
}

// =========================================================================
// Refusals and faults
// =========================================================================

/// Turns down every proposal.
struct Refuser(PartyId);

#[async_trait]
impl MessageHandler for Refuser {
    async fn handle(&self, message: FlowMessage) -> Option<FlowMessage> {
        let err = IouError::PermissionDenied("Not doing business today".to_string());
        Some(FlowMessage::refuse(message.session_id, self.0.clone(), &err))
    }
}

#[tokio::test]
async fn test_counterparty_refusal_aborts_flow() {
    let (infra, parties) = network();
    let (alice, bob) = (&parties[0], &parties[1]);
    infra
        .network
        .register(bob.id.clone(), Arc::new(Refuser(bob.id.clone())));

    let result = alice.node.create_obligation(5, bob.id.clone()).await;
    let err = result.unwrap_err();
    assert_eq!(err.error_code(), "REFUSED");
    assert!(err.is_retryable());

    assert!(alice.obligations().is_empty());
    assert_eq!(infra.notary.committed_count(), 0);
    let sessions = alice.node.sessions();
    assert_eq!(sessions.count(FlowStatus::Failed), 1);
}

#[tokio::test]
async fn test_offline_counterparty_times_out() {
    let (infra, parties) = network();
    let (alice, bob) = (&parties[0], &parties[1]);

    infra.network.inject_fault(bob.id.clone(), Fault::Offline);
    let result = alice.node.create_obligation(5, bob.id.clone()).await;
    assert!(matches!(result, Err(IouError::Timeout(_))));
    assert!(alice.obligations().is_empty());

    // A retry is a new flow from scratch.
    infra.network.clear_fault(&bob.id);
    alice.node.create_obligation(5, bob.id.clone()).await.unwrap();
    assert_eq!(bob.receivable(), 5);
}

#[tokio::test]
async fn test_unknown_counterparty() {
    let (_infra, parties) = network();
    let result = parties[0]
        .node
        .create_obligation(5, PartyId::new("MALLORY"))
        .await;
    assert!(matches!(result, Err(IouError::UnknownParty(_))));
}

#[tokio::test]
async fn test_settle_without_cash() {
    let (_infra, parties) = network();
    let (bob, charlie) = (&parties[1], &parties[2]);

    bob.node.create_obligation(5, charlie.id.clone()).await.unwrap();
    let (id, _) = only_obligation(bob);

    let result = bob.node.settle_obligation(id, 5).await;
    assert!(matches!(result, Err(IouError::InsufficientFunds { .. })));
    assert_eq!(charlie.node.vault().obligation(id).unwrap().outstanding(), 5);
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn test_builtin_scenarios_pass() {
    for name in Scenario::NAMES {
        let scenario = Scenario::load(name).unwrap();
        let mut controller = SimulationController::new(SimulationConfig {
            parties: scenario.parties,
            seed: Some(1),
            node: node_config(),
            ..SimulationConfig::default()
        });
        controller.initialize().await.unwrap();

        controller
            .run_scenario(&scenario)
            .await
            .unwrap_or_else(|e| panic!("scenario {} failed: {:#}", name, e));
    }
}
