//! Simulation controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use iou_common::{Amount, Currency, FlowKind, ObligationId, PartyId, StateRef, TransactionId};
use iou_notary::NotaryConfig;
use iou_participant::NodeConfig;

use crate::metrics::SimulationMetrics;
use crate::network::Fault;
use crate::party::{Infrastructure, PartyFactory, SimulatedParty};
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};

/// Simulation settings.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of parties.
    pub parties: usize,
    /// Simulation speed multiplier.
    pub speed: f64,
    /// Random seed for reproducible runs.
    pub seed: Option<u64>,
    /// Cash each party starts with in random mode, in whole units.
    pub starting_cash: i64,
    /// Template for every party's node.
    pub node: NodeConfig,
    pub notary: NotaryConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            parties: 3,
            speed: 1.0,
            seed: None,
            starting_cash: 10_000,
            node: NodeConfig {
                exchange_timeout: Duration::from_secs(2),
                finality_timeout: Duration::from_secs(5),
                ..NodeConfig::default()
            },
            notary: NotaryConfig::default(),
        }
    }
}

/// Outcome of the most recent flow step.
#[derive(Debug, Clone)]
enum Outcome {
    Succeeded(TransactionId),
    Failed {
        code: &'static str,
        message: String,
        retry_after: Option<Duration>,
    },
}

impl Outcome {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Outcome::Failed { retry_after, .. } => *retry_after,
            Outcome::Succeeded(_) => None,
        }
    }
}

/// Controls the simulation.
pub struct SimulationController {
    config: SimulationConfig,
    rng: Mutex<StdRng>,
    infra: Option<Infrastructure>,
    parties: Vec<SimulatedParty>,
    metrics: RwLock<SimulationMetrics>,
    running: AtomicBool,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            rng: Mutex::new(rng),
            infra: None,
            parties: Vec::new(),
            metrics: RwLock::new(SimulationMetrics::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Start the notary and join the parties.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!(parties = self.config.parties, "Initializing simulation");

        let infra = Infrastructure::start(self.config.notary.clone())
            .context("Failed to start notary")?;
        let parties = PartyFactory::create_parties(self.config.parties, &self.config.node, &infra)
            .context("Failed to create parties")?;

        self.infra = Some(infra);
        self.parties = parties;
        Ok(())
    }

    pub fn parties(&self) -> &[SimulatedParty] {
        &self.parties
    }

    pub fn party(&self, id: &str) -> anyhow::Result<&SimulatedParty> {
        self.parties
            .iter()
            .find(|p| p.id.as_str() == id)
            .ok_or_else(|| anyhow!("Unknown party {} in scenario", id))
    }

    pub fn infrastructure(&self) -> anyhow::Result<&Infrastructure> {
        self.infra
            .as_ref()
            .ok_or_else(|| anyhow!("Simulation is not initialized"))
    }

    /// Run a scenario to the end, failing on the first broken assertion.
    pub async fn run_scenario(&self, scenario: &Scenario) -> anyhow::Result<()> {
        info!(
            scenario = %scenario.name,
            description = %scenario.description,
            steps = scenario.steps.len(),
            "Running scenario"
        );
        if self.parties.len() < scenario.parties {
            bail!(
                "Scenario {} needs {} parties, simulation has {}",
                scenario.name,
                scenario.parties,
                self.parties.len()
            );
        }

        self.running.store(true, Ordering::SeqCst);
        let mut run = ScenarioRun::default();

        for (index, step) in scenario.steps.iter().enumerate() {
            if !self.running.load(Ordering::SeqCst) {
                warn!(scenario = %scenario.name, step = index, "Scenario stopped early");
                break;
            }

            self.execute_step(step, &mut run)
                .await
                .with_context(|| format!("Step {} of {} failed", index + 1, scenario.name))?;
        }

        self.running.store(false, Ordering::SeqCst);
        info!(scenario = %scenario.name, "Scenario complete");
        Ok(())
    }

    /// Generate random flows until `duration` passes or Ctrl+C is pressed.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");

        for party in &self.parties {
            party.fund(self.config.starting_cash, self.currency())?;
        }

        self.running.store(true, Ordering::SeqCst);
        let generator = async {
            while self.running.load(Ordering::SeqCst) {
                let outcome = self.random_flow().await;
                tokio::time::sleep(self.pause_after(outcome.as_ref())).await;
            }
        };

        // In-flight flows finish before the run returns.
        let stop = async {
            let stopped = match duration {
                Some(d) => {
                    tokio::time::sleep(d).await;
                    Ok(())
                }
                None => tokio::signal::ctrl_c().await,
            };
            self.running.store(false, Ordering::SeqCst);
            stopped
        };

        let ((), stopped) = tokio::join!(generator, stop);
        stopped?;
        Ok(())
    }

    /// Get simulation metrics.
    pub fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().clone()
    }

    /// Stop the simulation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    // --- Private methods ---

    /// Time between generated flows, stretched to the failure's retry hint.
    fn pause_after(&self, outcome: Option<&Outcome>) -> Duration {
        let speed = self.config.speed.max(0.001);
        let delay = Duration::from_millis((1000.0 / speed) as u64);
        let backoff = outcome
            .and_then(Outcome::retry_after)
            .map(|hint| hint.div_f64(speed))
            .unwrap_or_default();
        delay.max(backoff)
    }

    fn currency(&self) -> Currency {
        self.config.node.settlement_currency.clone()
    }

    async fn execute_step(&self, step: &ScenarioStep, run: &mut ScenarioRun) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { millis } => {
                let adjusted = (*millis as f64 / self.config.speed.max(0.001)) as u64;
                info!(millis, adjusted, "Waiting");
                tokio::time::sleep(Duration::from_millis(adjusted)).await;
            }
            ScenarioStep::IssueCash {
                party,
                units,
                currency,
            } => {
                self.party(party)?.fund(*units, Currency::new(currency.as_str()))?;
            }
            ScenarioStep::Create {
                label,
                sender,
                recipient,
                value,
            } => {
                let node = &self.party(sender)?.node;
                let result = self
                    .timed(FlowKind::Create, node.create_obligation(*value, PartyId::new(recipient.as_str())))
                    .await;
                run.record_created(label, self.created_obligation(&result));
                run.last = Some(result);
            }
            ScenarioStep::Request {
                label,
                sender,
                recipient,
                value,
            } => {
                let node = &self.party(recipient)?.node;
                let result = self
                    .timed(FlowKind::Create, node.request_obligation(*value, PartyId::new(sender.as_str())))
                    .await;
                run.record_created(label, self.created_obligation(&result));
                run.last = Some(result);
            }
            ScenarioStep::Transfer { label, to } => {
                let id = run.obligation(label)?;
                let (holder, state_ref) = self
                    .holder_of(id)
                    .ok_or_else(|| anyhow!("Obligation {} has no current holder", label))?;
                let node = &self.party(holder.as_str())?.node;
                let result = self
                    .timed(FlowKind::Transfer, node.transfer_obligation(state_ref, PartyId::new(to.as_str())))
                    .await;
                run.last = Some(result);
            }
            ScenarioStep::Settle { label, amount } => {
                let id = run.obligation(label)?;
                let result = match self.sender_of(id) {
                    Some(sender) => {
                        let node = &self.party(sender.as_str())?.node;
                        self.timed(FlowKind::Settle, node.settle_obligation(id, *amount)).await
                    }
                    // Already settled; the flow itself reports it as missing.
                    None => {
                        let node = &self.parties[0].node;
                        self.timed(FlowKind::Settle, node.settle_obligation(id, *amount)).await
                    }
                };
                run.last = Some(result);
            }
            ScenarioStep::InjectFault { fault_type, target } => {
                let fault = match fault_type {
                    FaultType::PartyOffline => Fault::Offline,
                    FaultType::NetworkLatency { delay_ms } => {
                        Fault::Latency(Duration::from_millis(*delay_ms))
                    }
                };
                let party = self.party(target)?;
                self.infrastructure()?.network.inject_fault(party.id.clone(), fault);
            }
            ScenarioStep::ClearFault { target } => {
                let party = self.party(target)?;
                self.infrastructure()?.network.clear_fault(&party.id);
            }
            ScenarioStep::Assert { condition } => {
                self.check(condition, run)?;
                info!(condition = ?condition, "Assertion held");
            }
        }

        Ok(())
    }

    fn check(&self, condition: &AssertCondition, run: &ScenarioRun) -> anyhow::Result<()> {
        match condition {
            AssertCondition::LastSucceeded => match &run.last {
                Some(Outcome::Succeeded(_)) => Ok(()),
                Some(Outcome::Failed { code, message, .. }) => {
                    bail!("Expected success, last flow failed with {}: {}", code, message)
                }
                None => bail!("No flow has run yet"),
            },
            AssertCondition::LastFailed { code } => match &run.last {
                Some(Outcome::Failed { code: actual, .. }) if actual == code => Ok(()),
                Some(Outcome::Failed { code: actual, message, .. }) => {
                    bail!("Expected {}, last flow failed with {}: {}", code, actual, message)
                }
                Some(Outcome::Succeeded(txid)) => {
                    bail!("Expected {}, last flow committed {}", code, txid)
                }
                None => bail!("No flow has run yet"),
            },
            AssertCondition::Outstanding { label, outstanding } => {
                let id = run.obligation(label)?;
                let actual = self
                    .find_obligation(id)
                    .map(|iou| iou.outstanding())
                    .ok_or_else(|| anyhow!("Obligation {} is not in any vault", label))?;
                if actual != *outstanding {
                    bail!("Obligation {} has {} outstanding, expected {}", label, actual, outstanding);
                }
                Ok(())
            }
            AssertCondition::HeldBy { label, party } => {
                let id = run.obligation(label)?;
                match self.holder_of(id) {
                    Some((holder, _)) if holder.as_str() == party => Ok(()),
                    Some((holder, _)) => bail!("Obligation {} is held by {}, expected {}", label, holder, party),
                    None => bail!("Obligation {} is not held by anyone", label),
                }
            }
            AssertCondition::Settled { label } => {
                let id = run.obligation(label)?;
                if self.find_obligation(id).is_some() {
                    bail!("Obligation {} is still outstanding", label);
                }
                Ok(())
            }
            AssertCondition::Balance {
                party,
                units,
                currency,
            } => {
                let currency = Currency::new(currency.as_str());
                let expected = Amount::from_base_units(*units, currency.clone());
                let actual = self.party(party)?.balance(&currency);
                if actual != expected {
                    bail!("{} holds {}, expected {}", party, actual, expected);
                }
                Ok(())
            }
        }
    }

    /// Run one flow, record it, and turn the result into an outcome.
    async fn timed<F>(&self, kind: FlowKind, flow: F) -> Outcome
    where
        F: std::future::Future<Output = iou_common::Result<TransactionId>>,
    {
        let started = Instant::now();
        match flow.await {
            Ok(txid) => {
                let latency = started.elapsed().as_millis() as u64;
                self.metrics.write().record_success(kind, latency);
                info!(kind = %kind, txid = %txid, latency_ms = latency, "Flow committed");
                Outcome::Succeeded(txid)
            }
            Err(e) => {
                self.metrics.write().record_failure(e.error_code());
                let retry_after_ms = e.retry_after_ms();
                warn!(kind = %kind, code = e.error_code(), retry_after_ms, error = %e, "Flow failed");
                Outcome::Failed {
                    code: e.error_code(),
                    message: e.to_string(),
                    retry_after: retry_after_ms.map(Duration::from_millis),
                }
            }
        }
    }

    /// Obligation created by a successful create flow.
    fn created_obligation(&self, outcome: &Outcome) -> Option<ObligationId> {
        let Outcome::Succeeded(txid) = outcome else {
            return None;
        };
        let tx = self.infra.as_ref()?.notary.committed_transaction(txid)?;
        let id = tx.proposal().obligation_outputs().next().map(|iou| iou.id());
        id
    }

    fn find_obligation(&self, id: ObligationId) -> Option<iou_ledger::ObligationState> {
        self.parties.iter().find_map(|p| p.node.vault().obligation(id))
    }

    fn sender_of(&self, id: ObligationId) -> Option<PartyId> {
        self.find_obligation(id).map(|iou| iou.sender().clone())
    }

    /// The current recipient and the reference of the state they hold.
    fn holder_of(&self, id: ObligationId) -> Option<(PartyId, StateRef)> {
        self.parties.iter().find_map(|party| {
            party.obligations().into_iter().find_map(|held| {
                let iou = held.state.as_obligation()?;
                (iou.id() == id && iou.recipient() == &party.id)
                    .then(|| (party.id.clone(), held.state_ref))
            })
        })
    }

    /// Pick and run one random flow.
    async fn random_flow(&self) -> Option<Outcome> {
        if self.parties.len() < 2 {
            return None;
        }

        let (action, from, to, value) = {
            let mut rng = self.rng.lock();
            let from = rng.gen_range(0..self.parties.len());
            let mut to = rng.gen_range(0..self.parties.len());
            while to == from {
                to = rng.gen_range(0..self.parties.len());
            }
            (rng.gen_range(0..3u8), from, to, rng.gen_range(1..=100i64))
        };
        let from = &self.parties[from];
        let to = &self.parties[to];

        match action {
            0 => Some(
                self.timed(FlowKind::Create, from.node.create_obligation(value, to.id.clone()))
                    .await,
            ),
            1 => {
                let held: Vec<_> = from
                    .obligations()
                    .into_iter()
                    .filter(|s| {
                        s.state
                            .as_obligation()
                            .map(|iou| iou.recipient() == &from.id && iou.sender() != &to.id)
                            .unwrap_or(false)
                    })
                    .collect();
                let choice = held.choose(&mut *self.rng.lock()).map(|s| s.state_ref);
                let state_ref = choice?;
                Some(
                    self.timed(FlowKind::Transfer, from.node.transfer_obligation(state_ref, to.id.clone()))
                        .await,
                )
            }
            _ => {
                let owed: Vec<_> = from
                    .obligations()
                    .into_iter()
                    .filter_map(|s| s.state.as_obligation().cloned())
                    .filter(|iou| iou.sender() == &from.id)
                    .collect();
                let choice = {
                    let mut rng = self.rng.lock();
                    owed.choose(&mut *rng)
                        .map(|iou| (iou.id(), rng.gen_range(1..=iou.outstanding())))
                };
                let (id, amount) = choice?;
                Some(
                    self.timed(FlowKind::Settle, from.node.settle_obligation(id, amount))
                        .await,
                )
            }
        }
    }
}

/// Labels and outcomes seen while running one scenario.
#[derive(Default)]
struct ScenarioRun {
    labels: HashMap<String, ObligationId>,
    last: Option<Outcome>,
}

impl ScenarioRun {
    fn record_created(&mut self, label: &str, id: Option<ObligationId>) {
        if let Some(id) = id {
            self.labels.insert(label.to_string(), id);
        }
    }

    fn obligation(&self, label: &str) -> anyhow::Result<ObligationId> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| anyhow!("No obligation labelled {}", label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn controller(parties: usize) -> SimulationController {
        let mut controller = SimulationController::new(SimulationConfig {
            parties,
            seed: Some(7),
            speed: 50.0,
            ..SimulationConfig::default()
        });
        controller.initialize().await.unwrap();
        controller
    }

    #[tokio::test]
    async fn test_simple_scenario() {
        let controller = controller(2).await;
        controller
            .run_scenario(&Scenario::load("simple-iou").unwrap())
            .await
            .unwrap();

        let metrics = controller.metrics();
        assert_eq!(metrics.successful_flows, 3);
        assert_eq!(metrics.failed_flows, 0);
    }

    #[tokio::test]
    async fn test_broken_assertion_fails_run() {
        let controller = controller(2).await;
        let scenario = Scenario {
            name: "wrong".to_string(),
            description: "asserts the wrong balance".to_string(),
            parties: 2,
            steps: vec![
                ScenarioStep::IssueCash {
                    party: "ALICE".to_string(),
                    units: 5,
                    currency: "USD".to_string(),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::Balance {
                        party: "ALICE".to_string(),
                        units: 6,
                        currency: "USD".to_string(),
                    },
                },
            ],
        };
        assert!(controller.run_scenario(&scenario).await.is_err());
    }

    #[tokio::test]
    async fn test_scenario_needs_enough_parties() {
        let controller = controller(2).await;
        let result = controller
            .run_scenario(&Scenario::load("transfer-chain").unwrap())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_failed_flow_pauses_for_retry_hint() {
        let controller = SimulationController::new(SimulationConfig {
            speed: 2.0,
            ..SimulationConfig::default()
        });
        let refused = Outcome::Failed {
            code: "REFUSED",
            message: "busy".to_string(),
            retry_after: Some(Duration::from_millis(5000)),
        };
        let rejected = Outcome::Failed {
            code: "CONTRACT_VIOLATION",
            message: "bad".to_string(),
            retry_after: None,
        };
        let committed = Outcome::Succeeded(TransactionId::from_bytes([1; 32]));

        assert_eq!(controller.pause_after(None), Duration::from_millis(500));
        assert_eq!(controller.pause_after(Some(&committed)), Duration::from_millis(500));
        assert_eq!(controller.pause_after(Some(&rejected)), Duration::from_millis(500));
        assert_eq!(controller.pause_after(Some(&refused)), Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_random_run_keeps_books_consistent() {
        let controller = controller(3).await;
        controller
            .run(Some(Duration::from_millis(300)))
            .await
            .unwrap();

        // Every unit of cash is accounted for.
        let total: i64 = controller
            .parties()
            .iter()
            .map(|p| p.balance(&Currency::usd()).quantity)
            .sum();
        assert_eq!(total, Amount::from_base_units(30_000, Currency::usd()).quantity);

        // Both ends of every obligation agree on it.
        for party in controller.parties() {
            for held in party.obligations() {
                let iou = held.state.as_obligation().unwrap();
                let other = if iou.sender() == &party.id { iou.recipient() } else { iou.sender() };
                let other = controller.party(other.as_str()).unwrap();
                assert_eq!(other.node.vault().obligation(iou.id()).as_ref(), Some(iou));
            }
        }
    }
}
