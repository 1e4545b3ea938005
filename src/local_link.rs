//! # In-Process Link Module
//!
//! A loopback implementation of the transport traits. Nodes join a shared
//! `LinkHub`, advertise capabilities, and exchange control messages and
//! byte channels through tokio primitives. Used by the binary to run both
//! sides in one process, and by tests to inject unreachable peers and
//! failing discovery.

use crate::error::TransportError;
use crate::transport::{
    ChannelClient, ControlMessage, Inbound, InboundChannel, Inbox, MessageClient, MessageId,
    OutboundChannel, Peer, PeerDirectory,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Buffer size of the in-memory pipe behind each channel
const CHANNEL_BUFFER_BYTES: usize = 64 * 1024;

struct NodeEntry {
    peer: Peer,
    capabilities: HashSet<String>,
    reachable: bool,
    inbox: mpsc::UnboundedSender<Inbound>,
}

#[derive(Default)]
struct HubState {
    nodes: Mutex<HashMap<String, NodeEntry>>,
    next_message_id: AtomicU64,
    directory_down: AtomicBool,
}

/// Shared registry of the nodes that can reach each other.
#[derive(Clone, Default)]
pub struct LinkHub {
    state: Arc<HubState>,
}

impl LinkHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn nodes(&self) -> MutexGuard<'_, HashMap<String, NodeEntry>> {
        self.state.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a node and return its client handle together with its inbox.
    ///
    /// Joining again with the same id replaces the previous node.
    pub fn join(&self, id: &str, display_name: &str, capabilities: &[&str]) -> (LinkNode, Inbox) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let entry = NodeEntry {
            peer: Peer::new(id, display_name),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            reachable: true,
            inbox: inbox_tx,
        };
        self.nodes().insert(id.to_string(), entry);
        log::debug!("Node joined link: {} ({})", display_name, id);

        let node = LinkNode {
            id: id.to_string(),
            hub: self.clone(),
        };
        (node, inbox_rx)
    }

    /// Remove a node; its inbox closes once in-flight events are drained
    pub fn leave(&self, id: &str) {
        if self.nodes().remove(id).is_some() {
            log::debug!("Node left link: {}", id);
        }
    }

    /// Mark a node as (un)reachable; unreachable nodes are hidden from
    /// discovery and refuse messages and channels.
    pub fn set_reachable(&self, id: &str, reachable: bool) {
        if let Some(entry) = self.nodes().get_mut(id) {
            entry.reachable = reachable;
        }
    }

    /// Make every capability query fail until switched back
    pub fn set_directory_down(&self, down: bool) {
        self.state.directory_down.store(down, Ordering::Relaxed);
    }

    fn deliver(&self, target: &str, event: Inbound) -> Result<(), TransportError> {
        let nodes = self.nodes();
        let entry = nodes
            .get(target)
            .ok_or_else(|| TransportError::UnknownPeer(target.to_string()))?;
        if !entry.reachable {
            return Err(TransportError::Unreachable(target.to_string()));
        }
        entry
            .inbox
            .send(event)
            .map_err(|_| TransportError::Closed(target.to_string()))
    }
}

/// A node's handle onto the hub.
#[derive(Clone)]
pub struct LinkNode {
    id: String,
    hub: LinkHub,
}

impl LinkNode {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl PeerDirectory for LinkNode {
    async fn local_peer(&self) -> Result<Peer, TransportError> {
        self.hub
            .nodes()
            .get(&self.id)
            .map(|entry| entry.peer.clone())
            .ok_or_else(|| TransportError::UnknownPeer(self.id.clone()))
    }

    async fn reachable_peers(&self, capability: &str) -> Result<Vec<Peer>, TransportError> {
        if self.hub.state.directory_down.load(Ordering::Relaxed) {
            return Err(TransportError::QueryFailed(
                "capability service unavailable".to_string(),
            ));
        }

        let mut peers: Vec<Peer> = self
            .hub
            .nodes()
            .values()
            .filter(|entry| {
                entry.peer.id != self.id && entry.reachable && entry.capabilities.contains(capability)
            })
            .map(|entry| entry.peer.clone())
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(peers)
    }
}

#[async_trait]
impl MessageClient for LinkNode {
    async fn send_message(
        &self,
        peer_id: &str,
        path: &str,
        payload: &[u8],
    ) -> Result<MessageId, TransportError> {
        let message = ControlMessage {
            path: path.to_string(),
            source_peer: Some(self.id.clone()),
            payload: payload.to_vec(),
        };
        self.hub.deliver(peer_id, Inbound::Message(message))?;
        Ok(self.hub.state.next_message_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl ChannelClient for LinkNode {
    async fn open_channel(&self, peer_id: &str, path: &str) -> Result<OutboundChannel, TransportError> {
        let (writer, reader) = tokio::io::duplex(CHANNEL_BUFFER_BYTES);
        let inbound = InboundChannel {
            path: path.to_string(),
            source_peer: self.id.clone(),
            reader: Box::pin(reader),
        };
        self.hub.deliver(peer_id, Inbound::ChannelOpened(inbound))?;

        Ok(OutboundChannel {
            path: path.to_string(),
            peer_id: peer_id.to_string(),
            writer: Box::pin(writer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MESSAGE_PATH_RECORDING_STARTED;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_discovery_filters_capability_and_reachability() {
        let hub = LinkHub::new();
        let (phone, _phone_inbox) = hub.join("phone", "Phone", &[]);
        let (_watch, _watch_inbox) = hub.join("watch-a", "Watch A", &["sensor_recording"]);
        let (_other, _other_inbox) = hub.join("watch-b", "Watch B", &["sensor_recording"]);
        let (_tv, _tv_inbox) = hub.join("tv", "TV", &["media"]);

        hub.set_reachable("watch-b", false);

        let peers = phone.reachable_peers("sensor_recording").await.unwrap();
        assert_eq!(peers, vec![Peer::new("watch-a", "Watch A")]);
        assert_eq!(phone.local_peer().await.unwrap().id, "phone");
    }

    #[tokio::test]
    async fn test_directory_down_fails_query() {
        let hub = LinkHub::new();
        let (phone, _inbox) = hub.join("phone", "Phone", &[]);
        hub.set_directory_down(true);

        assert!(matches!(
            phone.reachable_peers("sensor_recording").await,
            Err(TransportError::QueryFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_message_carries_source_peer() {
        let hub = LinkHub::new();
        let (phone, _phone_inbox) = hub.join("phone", "Phone", &[]);
        let (_watch, mut watch_inbox) = hub.join("watch", "Watch", &[]);

        phone
            .send_message("watch", MESSAGE_PATH_RECORDING_STARTED, &[])
            .await
            .unwrap();

        match watch_inbox.recv().await {
            Some(Inbound::Message(message)) => {
                assert_eq!(message.path, MESSAGE_PATH_RECORDING_STARTED);
                assert_eq!(message.source_peer.as_deref(), Some("phone"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_or_unreachable_peer_fails() {
        let hub = LinkHub::new();
        let (phone, _phone_inbox) = hub.join("phone", "Phone", &[]);
        let (_watch, _watch_inbox) = hub.join("watch", "Watch", &[]);
        hub.set_reachable("watch", false);

        assert!(matches!(
            phone.send_message("nobody", "/x", &[]).await,
            Err(TransportError::UnknownPeer(_))
        ));
        assert!(matches!(
            phone.send_message("watch", "/x", &[]).await,
            Err(TransportError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_leave_closes_inbox() {
        let hub = LinkHub::new();
        let (_watch, mut inbox) = hub.join("watch", "Watch", &[]);

        hub.leave("watch");
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_streams_bytes() {
        let hub = LinkHub::new();
        let (watch, _watch_inbox) = hub.join("watch", "Watch", &[]);
        let (_phone, mut phone_inbox) = hub.join("phone", "Phone", &[]);

        let mut outbound = watch.open_channel("phone", "/sensor-reading").await.unwrap();
        outbound.writer.write_all(b"timestamp,accuracy\n").await.unwrap();
        outbound.writer.shutdown().await.unwrap();
        drop(outbound);

        let Some(Inbound::ChannelOpened(mut inbound)) = phone_inbox.recv().await else {
            panic!("expected a channel");
        };
        assert_eq!(inbound.source_peer, "watch");

        let mut received = String::new();
        inbound.reader.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "timestamp,accuracy\n");
    }
}
