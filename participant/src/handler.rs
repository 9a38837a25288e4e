//! Handling of messages peers send to this node.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use iou_common::{IouError, Result};
use iou_ledger::SignedTransaction;
use iou_protocol::{FlowMessage, Payload};

use crate::flows::{responder, FlowContext};

/// Trait for answering incoming protocol messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message, returning the reply if the message expects one.
    async fn handle(&self, message: FlowMessage) -> Option<FlowMessage>;
}

/// Handler answering proposals and history requests for one node.
pub struct NodeHandler {
    ctx: Arc<FlowContext>,
}

impl NodeHandler {
    pub fn new(ctx: Arc<FlowContext>) -> Self {
        Self { ctx }
    }

    async fn history(&self, ids: &[iou_common::TransactionId]) -> Result<Vec<SignedTransaction>> {
        let mut transactions = Vec::with_capacity(ids.len());
        for id in ids {
            let tx = self
                .ctx
                .storage
                .transaction(id)
                .await
                .ok_or_else(|| IouError::NotFound(format!("Transaction {}", id.short())))?;
            transactions.push(tx);
        }
        Ok(transactions)
    }
}

#[async_trait]
impl MessageHandler for NodeHandler {
    async fn handle(&self, message: FlowMessage) -> Option<FlowMessage> {
        let me = self.ctx.party().clone();
        let session_id = message.session_id;

        if let Err(e) = message.validate() {
            warn!(from = %message.sender, error = %e, "Rejected malformed message");
            return Some(FlowMessage::refuse(session_id, me, &e));
        }

        let sender = message.sender;
        match message.payload {
            Payload::ProposeTransaction { flow, transaction } => {
                let reply = responder::respond(&self.ctx, session_id, &sender, flow, transaction).await;
                Some(match reply {
                    Ok(signature) => FlowMessage::signature(session_id, me, signature),
                    Err(e) => FlowMessage::refuse(session_id, me, &e),
                })
            }
            Payload::FetchTransactions { ids } => {
                debug!(from = %sender, count = ids.len(), "History requested");
                Some(match self.history(&ids).await {
                    Ok(transactions) => FlowMessage::transactions(session_id, me, transactions),
                    Err(e) => {
                        warn!(from = %sender, error = %e, "Cannot serve history request");
                        FlowMessage::refuse(session_id, me, &e)
                    }
                })
            }
            other => {
                warn!(
                    from = %sender,
                    message_type = ?other.message_type(),
                    "Ignoring unsolicited reply"
                );
                None
            }
        }
    }
}
