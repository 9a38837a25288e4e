//! Cash held by one simulated party.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use iou_common::{Amount, Currency, IouError, PartyId, Result, StateRef, TransactionId};
use iou_crypto::sha256_parts;
use iou_ledger::{CashState, LedgerState, SpendFragment, StateAndRef};
use iou_participant::InMemoryVault;
use iou_protocol::AssetSpendBuilder;

/// Self-issued cash on top of a party's vault.
///
/// Spends take coins in reference order and return change to the owner.
pub struct CashWallet {
    owner: PartyId,
    vault: Arc<InMemoryVault>,
    issued: AtomicU64,
    /// Serializes coin selection.
    select_lock: Mutex<()>,
}

impl CashWallet {
    pub fn new(vault: Arc<InMemoryVault>) -> Self {
        Self {
            owner: vault.party().clone(),
            vault,
            issued: AtomicU64::new(0),
            select_lock: Mutex::new(()),
        }
    }

    /// Issue `amount` of new cash to the owner.
    pub fn issue(&self, amount: Amount) -> Result<StateRef> {
        if !amount.is_positive() {
            return Err(IouError::InvalidAmount(format!(
                "Cannot issue {}",
                amount
            )));
        }

        let serial = self.issued.fetch_add(1, Ordering::SeqCst);
        let serial = serial.to_be_bytes();
        let txid = TransactionId::from_bytes(sha256_parts(&[
            b"cash-issuance".as_slice(),
            self.owner.as_str().as_bytes(),
            serial.as_slice(),
        ]));
        let state_ref = StateRef::new(txid, 0);

        info!(owner = %self.owner, amount = %amount, state_ref = %state_ref, "Issued cash");
        self.vault.record_issued(StateAndRef::new(
            CashState::new(amount, self.owner.clone(), self.owner.clone()),
            state_ref,
        ));
        Ok(state_ref)
    }

    /// Total unspent cash in `currency`.
    pub fn balance(&self, currency: &Currency) -> Amount {
        let quantity = self
            .coins(currency)
            .iter()
            .filter_map(|coin| coin.state.as_cash())
            .map(|cash| cash.amount.quantity)
            .fold(0i64, i64::saturating_add);
        Amount::new(quantity, currency.clone())
    }

    pub fn owner(&self) -> &PartyId {
        &self.owner
    }

    fn coins(&self, currency: &Currency) -> Vec<StateAndRef> {
        self.vault
            .cash()
            .into_iter()
            .filter(|coin| {
                coin.state
                    .as_cash()
                    .map(|cash| &cash.amount.currency == currency)
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[async_trait]
impl AssetSpendBuilder for CashWallet {
    async fn build_spend(&self, amount: Amount, pay_to: &PartyId) -> Result<SpendFragment> {
        let _guard = self.select_lock.lock();

        let mut selected = Vec::new();
        let mut gathered = 0i64;
        for coin in self.coins(&amount.currency) {
            if gathered >= amount.quantity {
                break;
            }
            if let Some(cash) = coin.state.as_cash() {
                gathered = gathered.saturating_add(cash.amount.quantity);
                selected.push(coin);
            }
        }

        if gathered < amount.quantity {
            return Err(IouError::InsufficientFunds {
                required: amount.to_string(),
                available: self.balance(&amount.currency).to_string(),
            });
        }

        let mut outputs: Vec<LedgerState> = vec![CashState::new(amount.clone(), pay_to.clone(), self.owner.clone()).into()];
        let change = gathered - amount.quantity;
        if change > 0 {
            outputs.push(
                CashState::new(
                    Amount::new(change, amount.currency.clone()),
                    self.owner.clone(),
                    self.owner.clone(),
                )
                .into(),
            );
        }

        debug!(
            owner = %self.owner,
            pay_to = %pay_to,
            amount = %amount,
            coins = selected.len(),
            change,
            "Built cash spend"
        );

        Ok(SpendFragment {
            inputs: selected,
            outputs,
            signers: [self.owner.clone()].into_iter().collect(),
        })
    }
}
