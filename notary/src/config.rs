//! Notary configuration.

use std::time::Duration;

/// Main notary configuration.
#[derive(Debug, Clone)]
pub struct NotaryConfig {
    /// Name the notary logs under.
    pub name: String,
    /// Re-run the obligation contract before committing.
    pub validate_transactions: bool,
    /// Upper bound on inputs per transaction.
    pub max_inputs_per_transaction: usize,
    /// Time allowed for one participant to record a committed transaction.
    pub distribution_timeout: Duration,
}

impl Default for NotaryConfig {
    fn default() -> Self {
        Self {
            name: "NOTARY".to_string(),
            validate_transactions: true,
            max_inputs_per_transaction: 256,
            distribution_timeout: Duration::from_secs(5),
        }
    }
}

impl NotaryConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("IOU_NOTARY_NAME") {
            config.name = name;
        }

        if let Ok(validating) = std::env::var("IOU_NOTARY_VALIDATING") {
            if let Ok(validating) = validating.parse() {
                config.validate_transactions = validating;
            }
        }

        if let Ok(max_inputs) = std::env::var("IOU_NOTARY_MAX_INPUTS") {
            if let Ok(max_inputs) = max_inputs.parse() {
                config.max_inputs_per_transaction = max_inputs;
            }
        }

        if let Ok(ms) = std::env::var("IOU_NOTARY_DISTRIBUTION_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.distribution_timeout = Duration::from_millis(ms);
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Notary name cannot be empty".to_string());
        }

        if self.max_inputs_per_transaction == 0 {
            return Err("Max inputs per transaction must be at least 1".to_string());
        }

        if self.distribution_timeout.is_zero() {
            return Err("Distribution timeout cannot be zero".to_string());
        }

        Ok(())
    }
}
