//! Request/response exchange with one counterparty at a time.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use iou_common::{FlowKind, IouError, PartyId, Result, SessionId, TransactionId};
use iou_ledger::{PartySignature, SignedTransaction};
use iou_protocol::{FlowMessage, MessageExchange};

/// Timed request/response over a [`MessageExchange`].
#[derive(Clone)]
pub struct PeerConnection {
    /// Underlying transport.
    exchange: Arc<dyn MessageExchange>,
    /// Party sending the requests.
    me: PartyId,
    /// How long to wait for each reply.
    timeout: Duration,
}

impl PeerConnection {
    /// Create a new connection.
    pub fn new(exchange: Arc<dyn MessageExchange>, me: PartyId, timeout: Duration) -> Self {
        Self {
            exchange,
            me,
            timeout,
        }
    }

    pub fn party(&self) -> &PartyId {
        &self.me
    }

    /// Send `message` to `peer` and wait for the reply of the same session.
    pub async fn request(&self, peer: &PartyId, message: FlowMessage) -> Result<FlowMessage> {
        let session_id = message.session_id;
        debug!(
            to = %peer,
            session = %session_id,
            message_type = ?message.message_type,
            "Sending request"
        );

        let reply = match tokio::time::timeout(
            self.timeout,
            self.exchange.send_and_receive(peer, message),
        )
        .await
        {
            Ok(reply) => reply?,
            Err(_) => {
                warn!(to = %peer, session = %session_id, "Peer did not answer in time");
                return Err(IouError::Timeout(format!(
                    "No reply from {} within {}ms",
                    peer,
                    self.timeout.as_millis()
                )));
            }
        };

        if reply.session_id != session_id {
            return Err(IouError::NetworkError(format!(
                "Reply from {} belongs to session {}, expected {}",
                reply.sender, reply.session_id, session_id
            )));
        }
        if &reply.sender != peer {
            return Err(IouError::NetworkError(format!(
                "Reply for {} came from {}",
                peer, reply.sender
            )));
        }
        Ok(reply)
    }

    /// Propose `transaction` to `peer` and return its signature.
    pub async fn request_signature(
        &self,
        peer: &PartyId,
        session_id: SessionId,
        flow: FlowKind,
        transaction: &SignedTransaction,
    ) -> Result<PartySignature> {
        let message = FlowMessage::propose(session_id, self.me.clone(), flow, transaction.clone());
        let signature = self.request(peer, message).await?.into_signature()?;

        if &signature.party != peer {
            return Err(IouError::InvalidSignature(format!(
                "{} returned a signature for {}",
                peer, signature.party
            )));
        }
        Ok(signature)
    }

    /// Ask `peer` for the transactions in `ids`.
    pub async fn fetch_transactions(
        &self,
        peer: &PartyId,
        ids: Vec<TransactionId>,
    ) -> Result<Vec<SignedTransaction>> {
        let message = FlowMessage::fetch(SessionId::new(), self.me.clone(), ids);
        self.request(peer, message).await?.into_transactions()
    }
}
