//! # Companion Controller Module
//!
//! Handheld-side control of the wearable: find reachable watches that
//! advertise the recording capability, then broadcast start/stop to them.
//!
//! Discovery returns a snapshot that must be refreshed explicitly. Failures
//! never reach the caller as typed errors; they replace the status text the
//! way the handheld UI shows them.

use crate::error::TransportError;
use crate::transport::{
    MessageClient, MessageId, Peer, PeerDirectory, MESSAGE_PATH_RECORDING_STARTED,
    MESSAGE_PATH_RECORDING_STOPPED,
};
use std::sync::Arc;

const CONNECTION_HINT: &str = "Make sure the watch is connected to the phone.";

/// Result of sending one control message to one peer
#[derive(Debug)]
pub struct SendOutcome {
    pub peer: Peer,
    pub result: Result<MessageId, TransportError>,
}

pub struct CompanionController {
    directory: Arc<dyn PeerDirectory>,
    messages: Arc<dyn MessageClient>,
    capability: String,
    local_peer: Option<Peer>,
    peers: Vec<Peer>,
    status: String,
    recording: bool,
}

impl CompanionController {
    pub fn new(
        directory: Arc<dyn PeerDirectory>,
        messages: Arc<dyn MessageClient>,
        capability: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            messages,
            capability: capability.into(),
            local_peer: None,
            peers: Vec::new(),
            status: String::new(),
            recording: false,
        }
    }

    /// Refresh the snapshot of reachable wearables.
    ///
    /// A failed query leaves an empty snapshot; only the status text tells
    /// it apart from "no peers".
    pub async fn discover_peers(&mut self) -> &[Peer] {
        match self.query_peers().await {
            Ok(peers) => {
                log::info!("Found {} device(s).", peers.len());
                self.status = if peers.is_empty() {
                    format!("Cannot find connected device. {}", CONNECTION_HINT)
                } else {
                    let list = peers
                        .iter()
                        .map(|peer| peer.to_string())
                        .collect::<Vec<_>>()
                        .join("\n");
                    format!("Watch connected:\n{}", list)
                };
                self.peers = peers;
            }
            Err(e) => {
                log::error!("Device discovery failed: {}", e);
                self.peers.clear();
                self.status = "Error happened in device searching process.".to_string();
            }
        }
        &self.peers
    }

    async fn query_peers(&mut self) -> Result<Vec<Peer>, TransportError> {
        let local = self.directory.local_peer().await?;
        log::debug!("Local node: {}", local);
        self.local_peer = Some(local);

        log::info!("Looking for nodes...");
        self.directory.reachable_peers(&self.capability).await
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn local_peer(&self) -> Option<&Peer> {
        self.local_peer.as_ref()
    }

    /// Whether the start action should be offered
    pub fn can_start(&self) -> bool {
        !self.peers.is_empty()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub async fn send_start(&mut self) -> Vec<SendOutcome> {
        if self.peers.is_empty() {
            log::info!("No connected devices, start not sent");
            return Vec::new();
        }

        let outcomes = self.broadcast(MESSAGE_PATH_RECORDING_STARTED).await;
        self.recording = true;
        self.status = Self::with_failures("Recording in process...", &outcomes);
        outcomes
    }

    pub async fn send_stop(&mut self) -> Vec<SendOutcome> {
        if self.peers.is_empty() {
            log::info!("No connected devices, stop not sent");
            return Vec::new();
        }

        let outcomes = self.broadcast(MESSAGE_PATH_RECORDING_STOPPED).await;
        self.recording = false;
        self.status = Self::with_failures(
            "Recording stopped. File will be saved in Downloads folder.",
            &outcomes,
        );
        outcomes
    }

    /// Send `path` to every peer of the snapshot, one independent task per peer
    async fn broadcast(&self, path: &str) -> Vec<SendOutcome> {
        let tasks: Vec<_> = self
            .peers
            .iter()
            .map(|peer| {
                let messages = self.messages.clone();
                let peer = peer.clone();
                let path = path.to_string();
                let peer_id = peer.id.clone();
                let handle = tokio::spawn(async move {
                    log::info!("Sending message: {} to {}", path, peer_id);
                    messages.send_message(&peer_id, &path, &[]).await
                });
                (peer, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (peer, handle) in tasks {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(TransportError::Aborted(e.to_string())),
            };
            match &result {
                Ok(message_id) => log::info!("messageResult {} for {}", message_id, peer.id),
                Err(e) => log::error!("Could not send to {}: {}", peer, e),
            }
            outcomes.push(SendOutcome { peer, result });
        }
        outcomes
    }

    fn with_failures(base: &str, outcomes: &[SendOutcome]) -> String {
        let mut status = base.to_string();
        for outcome in outcomes {
            if let Err(e) = &outcome.result {
                status.push_str(&format!("\n{}: {}. {}", outcome.peer, e, CONNECTION_HINT));
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_link::LinkHub;
    use crate::transport::{Inbound, Inbox};

    const CAPABILITY: &str = "sensor_recording";

    fn companion(hub: &LinkHub) -> CompanionController {
        let (phone, _inbox) = hub.join("phone", "Phone", &[]);
        let phone = Arc::new(phone);
        CompanionController::new(phone.clone(), phone, CAPABILITY)
    }

    fn next_path(inbox: &mut Inbox) -> Option<String> {
        match inbox.try_recv() {
            Ok(Inbound::Message(message)) => Some(message.path),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_discovery_lists_watches() {
        let hub = LinkHub::new();
        let (_watch, _inbox) = hub.join("w1", "Galaxy Watch", &[CAPABILITY]);
        let mut companion = companion(&hub);

        let peers = companion.discover_peers().await.to_vec();
        assert_eq!(peers, vec![Peer::new("w1", "Galaxy Watch")]);
        assert!(companion.can_start());
        assert_eq!(companion.status(), "Watch connected:\nGalaxy Watch (w1)");
        assert_eq!(companion.local_peer().map(|p| p.id.as_str()), Some("phone"));
    }

    #[tokio::test]
    async fn test_zero_peers_disables_start_and_sends_nothing() {
        let hub = LinkHub::new();
        let mut companion = companion(&hub);

        assert!(companion.discover_peers().await.is_empty());
        assert!(!companion.can_start());
        assert!(companion.status().starts_with("Cannot find connected device"));

        let outcomes = companion.send_start().await;
        assert!(outcomes.is_empty());
        assert!(!companion.is_recording());
    }

    #[tokio::test]
    async fn test_failed_discovery_is_reported_in_status() {
        let hub = LinkHub::new();
        let (_watch, _inbox) = hub.join("w1", "Watch", &[CAPABILITY]);
        let mut companion = companion(&hub);
        companion.discover_peers().await;
        assert!(companion.can_start());

        hub.set_directory_down(true);
        assert!(companion.discover_peers().await.is_empty());
        assert!(!companion.can_start());
        assert_eq!(companion.status(), "Error happened in device searching process.");
    }

    #[tokio::test]
    async fn test_one_failing_peer_does_not_block_others() {
        let hub = LinkHub::new();
        let (_w1, mut w1_inbox) = hub.join("w1", "Watch One", &[CAPABILITY]);
        let (_w2, mut w2_inbox) = hub.join("w2", "Watch Two", &[CAPABILITY]);
        let mut companion = companion(&hub);
        companion.discover_peers().await;

        hub.set_reachable("w1", false);
        let outcomes = companion.send_start().await;

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0].result, Err(TransportError::Unreachable(_))));
        assert!(outcomes[1].result.is_ok());
        assert_eq!(next_path(&mut w2_inbox).as_deref(), Some(MESSAGE_PATH_RECORDING_STARTED));
        assert!(next_path(&mut w1_inbox).is_none());

        assert!(companion.is_recording());
        assert!(companion.status().starts_with("Recording in process..."));
        assert!(companion.status().contains("Watch One (w1)"));
    }

    #[tokio::test]
    async fn test_stop_broadcasts_to_snapshot() {
        let hub = LinkHub::new();
        let (_w1, mut inbox) = hub.join("w1", "Watch", &[CAPABILITY]);
        let mut companion = companion(&hub);
        companion.discover_peers().await;

        companion.send_start().await;
        let outcomes = companion.send_stop().await;

        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(!companion.is_recording());
        assert_eq!(next_path(&mut inbox).as_deref(), Some(MESSAGE_PATH_RECORDING_STARTED));
        assert_eq!(next_path(&mut inbox).as_deref(), Some(MESSAGE_PATH_RECORDING_STOPPED));
    }
}
