//! In-process message network with fault injection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use iou_common::{IouError, PartyId, Result};
use iou_participant::MessageHandler;
use iou_protocol::{FlowMessage, MessageExchange};

/// Fault applied to every message addressed to a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Messages are swallowed and never answered.
    Offline,
    /// Messages are delivered after a delay.
    Latency(Duration),
}

/// Delivers messages between parties of one process.
///
/// Every message is encoded to JSON and decoded again on the way, and each
/// delivery runs on its own task.
#[derive(Default)]
pub struct InMemoryNetwork {
    handlers: DashMap<PartyId, Arc<dyn MessageHandler>>,
    faults: DashMap<PartyId, Fault>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route messages for `party` to `handler`.
    pub fn register(&self, party: PartyId, handler: Arc<dyn MessageHandler>) {
        debug!(party = %party, "Registered on network");
        self.handlers.insert(party, handler);
    }

    pub fn inject_fault(&self, party: PartyId, fault: Fault) {
        info!(party = %party, fault = ?fault, "Fault injected");
        self.faults.insert(party, fault);
    }

    pub fn clear_fault(&self, party: &PartyId) {
        if self.faults.remove(party).is_some() {
            info!(party = %party, "Fault cleared");
        }
    }

    pub fn fault(&self, party: &PartyId) -> Option<Fault> {
        self.faults.get(party).map(|f| *f)
    }

    /// Messages handed to a handler so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Messages swallowed by an offline party.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn handler(&self, peer: &PartyId) -> Result<Arc<dyn MessageHandler>> {
        self.handlers
            .get(peer)
            .map(|h| h.value().clone())
            .ok_or_else(|| IouError::UnknownParty(peer.clone()))
    }

    async fn deliver(&self, peer: &PartyId, message: FlowMessage) -> Result<Option<FlowMessage>> {
        let handler = self.handler(peer)?;

        match self.fault(peer) {
            Some(Fault::Offline) => {
                warn!(to = %peer, session = %message.session_id, "Dropped message for offline party");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                futures::future::pending::<()>().await;
            }
            Some(Fault::Latency(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        let wire = serde_json::to_vec(&message)
            .map_err(|e| IouError::NetworkError(format!("Failed to encode message: {}", e)))?;
        let message: FlowMessage = serde_json::from_slice(&wire)
            .map_err(|e| IouError::NetworkError(format!("Failed to decode message: {}", e)))?;

        self.delivered.fetch_add(1, Ordering::Relaxed);
        let reply = tokio::spawn(async move { handler.handle(message).await })
            .await
            .map_err(|e| IouError::NetworkError(format!("Delivery task failed: {}", e)))?;
        Ok(reply)
    }
}

#[async_trait]
impl MessageExchange for InMemoryNetwork {
    async fn send_and_receive(&self, peer: &PartyId, message: FlowMessage) -> Result<FlowMessage> {
        let session_id = message.session_id;
        self.deliver(peer, message).await?.ok_or_else(|| {
            IouError::NetworkError(format!("{} sent no reply in session {}", peer, session_id))
        })
    }

    async fn send(&self, peer: &PartyId, message: FlowMessage) -> Result<()> {
        self.deliver(peer, message).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iou_common::SessionId;
    use iou_protocol::Payload;

    /// Answers every fetch with an empty history.
    struct EmptyHistory(PartyId);

    #[async_trait]
    impl MessageHandler for EmptyHistory {
        async fn handle(&self, message: FlowMessage) -> Option<FlowMessage> {
            match message.payload {
                Payload::FetchTransactions { .. } => Some(FlowMessage::transactions(
                    message.session_id,
                    self.0.clone(),
                    vec![],
                )),
                _ => None,
            }
        }
    }

    fn network() -> InMemoryNetwork {
        let network = InMemoryNetwork::new();
        network.register(PartyId::new("BOB"), Arc::new(EmptyHistory(PartyId::new("BOB"))));
        network
    }

    fn fetch() -> FlowMessage {
        FlowMessage::fetch(SessionId::new(), PartyId::new("ALICE"), vec![])
    }

    #[tokio::test]
    async fn test_round_trip() {
        let network = network();
        let reply = network.send_and_receive(&PartyId::new("BOB"), fetch()).await.unwrap();
        assert_eq!(reply.sender, PartyId::new("BOB"));
        assert_eq!(network.delivered(), 1);
    }

    #[tokio::test]
    async fn test_unknown_party() {
        let network = network();
        let result = network.send_and_receive(&PartyId::new("ZED"), fetch()).await;
        assert!(matches!(result, Err(IouError::UnknownParty(_))));
    }

    #[tokio::test]
    async fn test_offline_party_never_answers() {
        let network = network();
        network.inject_fault(PartyId::new("BOB"), Fault::Offline);

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            network.send_and_receive(&PartyId::new("BOB"), fetch()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(network.dropped(), 1);

        network.clear_fault(&PartyId::new("BOB"));
        assert!(network.send_and_receive(&PartyId::new("BOB"), fetch()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_reply_is_an_error() {
        let network = network();
        let unsolicited = FlowMessage::transactions(SessionId::new(), PartyId::new("ALICE"), vec![]);
        let result = network.send_and_receive(&PartyId::new("BOB"), unsolicited).await;
        assert!(matches!(result, Err(IouError::NetworkError(_))));
    }
}
