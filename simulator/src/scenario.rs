//! Simulation scenarios.
//!
//! Obligations are referred to by a label chosen when they are created, so later
//! steps can transfer or settle them without knowing their ids.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Number of parties the scenario needs.
    pub parties: usize,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Issue cash to a party.
    IssueCash {
        party: String,
        units: i64,
        currency: String,
    },
    /// `sender` creates an obligation to `recipient`.
    Create {
        label: String,
        sender: String,
        recipient: String,
        value: i64,
    },
    /// `recipient` asks `sender` to accept an obligation.
    Request {
        label: String,
        sender: String,
        recipient: String,
        value: i64,
    },
    /// The current recipient hands the obligation to `to`.
    Transfer { label: String, to: String },
    /// The sender pays `amount` towards the obligation.
    Settle { label: String, amount: i64 },
    /// Inject a fault.
    InjectFault { fault_type: FaultType, target: String },
    /// Clear a fault.
    ClearFault { target: String },
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// Party stops answering.
    PartyOffline,
    /// Messages to the party are delayed.
    NetworkLatency { delay_ms: u64 },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertCondition {
    /// The previous flow step succeeded.
    LastSucceeded,
    /// The previous flow step failed with this error code.
    LastFailed { code: String },
    /// The obligation still has `outstanding` left to pay.
    Outstanding { label: String, outstanding: i64 },
    /// The obligation is owed to `party`.
    HeldBy { label: String, party: String },
    /// The obligation has been paid off and is gone from every vault.
    Settled { label: String },
    /// A party holds exactly `units` whole units of `currency`.
    Balance {
        party: String,
        units: i64,
        currency: String,
    },
}

impl Scenario {
    /// Names accepted by [`Scenario::load`].
    pub const NAMES: [&'static str; 4] = [
        "simple-iou",
        "transfer-chain",
        "double-settle",
        "failure-recovery",
    ];

    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "simple-iou" => Ok(Self::simple_iou()),
            "transfer-chain" => Ok(Self::transfer_chain()),
            "double-settle" => Ok(Self::double_settle()),
            "failure-recovery" => Ok(Self::failure_recovery()),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (known: {})",
                name,
                Self::NAMES.join(", ")
            )),
        }
    }

    /// Load a scenario from its JSON description.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Create, pay half, pay the rest.
    fn simple_iou() -> Self {
        Self {
            name: "simple-iou".to_string(),
            description: "Two parties create an IOU and settle it in two payments".to_string(),
            parties: 2,
            steps: vec![
                issue("ALICE", 100),
                create("lunch", "ALICE", "BOB", 10),
                ScenarioStep::Assert {
                    condition: AssertCondition::Outstanding {
                        label: "lunch".to_string(),
                        outstanding: 10,
                    },
                },
                settle("lunch", 5),
                ScenarioStep::Assert {
                    condition: AssertCondition::Outstanding {
                        label: "lunch".to_string(),
                        outstanding: 5,
                    },
                },
                settle("lunch", 5),
                ScenarioStep::Assert {
                    condition: AssertCondition::Settled {
                        label: "lunch".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::Balance {
                        party: "BOB".to_string(),
                        units: 10,
                        currency: "USD".to_string(),
                    },
                },
            ],
        }
    }

    /// Pass an IOU along and settle it with the last holder.
    fn transfer_chain() -> Self {
        Self {
            name: "transfer-chain".to_string(),
            description: "An IOU changes hands twice before it is settled".to_string(),
            parties: 4,
            steps: vec![
                issue("ALICE", 50),
                ScenarioStep::Request {
                    label: "invoice".to_string(),
                    sender: "ALICE".to_string(),
                    recipient: "BOB".to_string(),
                    value: 30,
                },
                ScenarioStep::Transfer {
                    label: "invoice".to_string(),
                    to: "CHARLIE".to_string(),
                },
                ScenarioStep::Transfer {
                    label: "invoice".to_string(),
                    to: "DAVE".to_string(),
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::HeldBy {
                        label: "invoice".to_string(),
                        party: "DAVE".to_string(),
                    },
                },
                settle("invoice", 30),
                ScenarioStep::Assert {
                    condition: AssertCondition::Settled {
                        label: "invoice".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::Balance {
                        party: "DAVE".to_string(),
                        units: 30,
                        currency: "USD".to_string(),
                    },
                },
            ],
        }
    }

    /// Paying more than is owed, and paying twice, both fail.
    fn double_settle() -> Self {
        Self {
            name: "double-settle".to_string(),
            description: "Overpayment and settling a paid-off IOU are refused".to_string(),
            parties: 2,
            steps: vec![
                issue("ALICE", 100),
                create("rent", "ALICE", "BOB", 20),
                settle("rent", 21),
                ScenarioStep::Assert {
                    condition: AssertCondition::LastFailed {
                        code: "INVALID_AMOUNT".to_string(),
                    },
                },
                settle("rent", 20),
                settle("rent", 1),
                ScenarioStep::Assert {
                    condition: AssertCondition::LastFailed {
                        code: "NOT_FOUND".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::Balance {
                        party: "ALICE".to_string(),
                        units: 80,
                        currency: "USD".to_string(),
                    },
                },
            ],
        }
    }

    /// A counterparty drops off and comes back.
    fn failure_recovery() -> Self {
        Self {
            name: "failure-recovery".to_string(),
            description: "Flows fail while a counterparty is offline and succeed once it returns"
                .to_string(),
            parties: 2,
            steps: vec![
                issue("ALICE", 100),
                ScenarioStep::InjectFault {
                    fault_type: FaultType::PartyOffline,
                    target: "BOB".to_string(),
                },
                create("loan", "ALICE", "BOB", 40),
                ScenarioStep::Assert {
                    condition: AssertCondition::LastFailed {
                        code: "TIMEOUT".to_string(),
                    },
                },
                ScenarioStep::ClearFault {
                    target: "BOB".to_string(),
                },
                ScenarioStep::InjectFault {
                    fault_type: FaultType::NetworkLatency { delay_ms: 20 },
                    target: "BOB".to_string(),
                },
                create("loan", "ALICE", "BOB", 40),
                ScenarioStep::Assert {
                    condition: AssertCondition::LastSucceeded,
                },
                ScenarioStep::ClearFault {
                    target: "BOB".to_string(),
                },
                settle("loan", 40),
                ScenarioStep::Assert {
                    condition: AssertCondition::Settled {
                        label: "loan".to_string(),
                    },
                },
            ],
        }
    }
}

fn issue(party: &str, units: i64) -> ScenarioStep {
    ScenarioStep::IssueCash {
        party: party.to_string(),
        units,
        currency: "USD".to_string(),
    }
}

fn create(label: &str, sender: &str, recipient: &str, value: i64) -> ScenarioStep {
    ScenarioStep::Create {
        label: label.to_string(),
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        value,
    }
}

fn settle(label: &str, amount: i64) -> ScenarioStep {
    ScenarioStep::Settle {
        label: label.to_string(),
        amount,
    }
}
