//! # Device-to-Device Transport Module
//!
//! The platform capabilities both sides talk through, expressed as async traits:
//! - `PeerDirectory`: who am I, and which reachable peers advertise a capability
//! - `MessageClient`: short `(path, payload)` control messages to one peer
//! - `ChannelClient`: a byte stream to one peer, used for the CSV artifact
//!
//! Whatever arrives at a node is surfaced as an `Inbound` event on its inbox.

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Control message path: the handheld asks the wearable to start recording
pub const MESSAGE_PATH_RECORDING_STARTED: &str = "/recording-started";
/// Control message path: the handheld asks the wearable to stop recording
pub const MESSAGE_PATH_RECORDING_STOPPED: &str = "/recording-stopped";
/// Channel path the finished CSV is streamed on
pub const CHANNEL_PATH_SENSOR_READING: &str = "/sensor-reading";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub id: String,
    pub display_name: String,
}

impl Peer {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// Identifier the transport assigns to a sent message
pub type MessageId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub path: String,
    /// Sending node; `None` when the transport could not attribute it
    pub source_peer: Option<String>,
    pub payload: Vec<u8>,
}

impl ControlMessage {
    pub fn new(path: impl Into<String>, source_peer: Option<String>) -> Self {
        Self {
            path: path.into(),
            source_peer,
            payload: Vec::new(),
        }
    }
}

pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;
pub type ByteWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Sending end of an opened channel
pub struct OutboundChannel {
    pub path: String,
    pub peer_id: String,
    pub writer: ByteWriter,
}

/// Receiving end of a channel another node opened to us
pub struct InboundChannel {
    pub path: String,
    pub source_peer: String,
    pub reader: ByteReader,
}

impl fmt::Debug for InboundChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundChannel")
            .field("path", &self.path)
            .field("source_peer", &self.source_peer)
            .finish_non_exhaustive()
    }
}

/// Events delivered to a node
#[derive(Debug)]
pub enum Inbound {
    Message(ControlMessage),
    ChannelOpened(InboundChannel),
}

/// Receiving side of a node's event stream; closes when the node leaves the link
pub type Inbox = mpsc::UnboundedReceiver<Inbound>;

#[async_trait]
pub trait PeerDirectory: Send + Sync {
    /// The node this client runs on
    async fn local_peer(&self) -> Result<Peer, TransportError>;

    /// Snapshot of currently reachable peers advertising `capability`
    async fn reachable_peers(&self, capability: &str) -> Result<Vec<Peer>, TransportError>;
}

#[async_trait]
pub trait MessageClient: Send + Sync {
    async fn send_message(
        &self,
        peer_id: &str,
        path: &str,
        payload: &[u8],
    ) -> Result<MessageId, TransportError>;
}

#[async_trait]
pub trait ChannelClient: Send + Sync {
    async fn open_channel(&self, peer_id: &str, path: &str) -> Result<OutboundChannel, TransportError>;
}
