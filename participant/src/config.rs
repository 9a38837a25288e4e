//! Node configuration.

use std::time::Duration;

use iou_common::{Currency, PartyId};
use iou_protocol::PROTOCOL_VERSION;

/// Configuration for one party's node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Legal identity of the node.
    pub party: PartyId,
    /// Protocol version to use.
    pub protocol_version: String,
    /// Time to wait for a counterparty's reply.
    pub exchange_timeout: Duration,
    /// Time to wait for the finality service.
    pub finality_timeout: Duration,
    /// Maximum number of history levels fetched when resolving dependencies.
    pub max_resolution_depth: usize,
    /// Currency obligations are settled in.
    pub settlement_currency: Currency,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            party: PartyId::new("NODE"),
            protocol_version: PROTOCOL_VERSION.to_string(),
            exchange_timeout: Duration::from_secs(10),
            finality_timeout: Duration::from_secs(30),
            max_resolution_depth: 64,
            settlement_currency: Currency::usd(),
        }
    }
}

impl NodeConfig {
    /// Default configuration for `party`.
    pub fn for_party(party: impl Into<PartyId>) -> Self {
        Self {
            party: party.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(party) = std::env::var("IOU_PARTY") {
            config.party = PartyId::new(party);
        }

        if let Ok(ms) = std::env::var("IOU_EXCHANGE_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.exchange_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(ms) = std::env::var("IOU_FINALITY_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.finality_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(depth) = std::env::var("IOU_MAX_RESOLUTION_DEPTH") {
            if let Ok(depth) = depth.parse() {
                config.max_resolution_depth = depth;
            }
        }

        if let Ok(currency) = std::env::var("IOU_SETTLEMENT_CURRENCY") {
            config.settlement_currency = Currency::new(currency);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.party.is_valid() {
            return Err(format!("Invalid party name: {:?}", self.party.as_str()));
        }

        if self.protocol_version != PROTOCOL_VERSION {
            return Err(format!(
                "Unsupported protocol version {}, expected {}",
                self.protocol_version, PROTOCOL_VERSION
            ));
        }

        if self.exchange_timeout.is_zero() {
            return Err("Exchange timeout cannot be zero".to_string());
        }

        if self.finality_timeout.is_zero() {
            return Err("Finality timeout cannot be zero".to_string());
        }

        if self.max_resolution_depth == 0 {
            return Err("Max resolution depth must be at least 1".to_string());
        }

        if self.settlement_currency.code().len() != 3 {
            return Err("Settlement currency must be an ISO 4217 code".to_string());
        }

        Ok(())
    }
}
