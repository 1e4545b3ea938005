//! # Recording Session Module
//!
//! Wearable-side controller that turns inbound control messages into
//! recording sessions.
//!
//! ## States
//! - `Idle`: no session, sensors unsubscribed
//! - `Recording`: one session owned together with the id of the peer that asked for it
//!
//! A stop (or teardown) moves back to `Idle` immediately and hands the
//! finished session to a background task that exports the CSV and streams it
//! to the stored peer. The task's `TransferHandle` is returned so callers can
//! inspect the outcome without waiting on it.

use crate::error::{SessionError, TransferError};
use crate::recorder::{Recording, SensorRecorder};
use crate::transport::{
    ChannelClient, ControlMessage, Inbound, Inbox, CHANNEL_PATH_SENSOR_READING,
    MESSAGE_PATH_RECORDING_STARTED, MESSAGE_PATH_RECORDING_STOPPED,
};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

/// Outcome of a delivered artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub peer_id: String,
    pub rows: usize,
    pub bytes: u64,
}

pub type TransferHandle = JoinHandle<Result<TransferReport, TransferError>>;

enum SessionState {
    Idle,
    Recording { peer_id: String, recording: Recording },
}

pub struct SessionController {
    recorder: SensorRecorder,
    channels: Arc<dyn ChannelClient>,
    state: SessionState,
}

impl SessionController {
    pub fn new(recorder: SensorRecorder, channels: Arc<dyn ChannelClient>) -> Self {
        Self {
            recorder,
            channels,
            state: SessionState::Idle,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, SessionState::Recording { .. })
    }

    /// Peer the current session will be delivered to
    pub fn peer_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Recording { peer_id, .. } => Some(peer_id),
            SessionState::Idle => None,
        }
    }

    /// Apply one control message.
    ///
    /// Returns the transfer started by a stop, if any. A start without a
    /// source peer is fatal for the hosting service.
    pub fn handle(&mut self, message: &ControlMessage) -> Result<Option<TransferHandle>, SessionError> {
        log::info!(
            "Message received: {} from {}",
            message.path,
            message.source_peer.as_deref().unwrap_or("<unknown>")
        );

        match message.path.as_str() {
            MESSAGE_PATH_RECORDING_STARTED => {
                let peer_id = message.source_peer.clone().ok_or(SessionError::MissingPeer)?;
                self.begin(peer_id);
                Ok(None)
            }
            MESSAGE_PATH_RECORDING_STOPPED => Ok(self.finish()),
            other => {
                log::warn!("Unrecognized message path: {}", other);
                Ok(None)
            }
        }
    }

    fn begin(&mut self, peer_id: String) {
        if let SessionState::Recording { peer_id: current, .. } = &self.state {
            log::warn!(
                "Start from {} ignored, already recording for {}",
                peer_id,
                current
            );
            return;
        }

        match self.recorder.start() {
            Ok(recording) => {
                log::info!("Recording started for {}", peer_id);
                self.state = SessionState::Recording { peer_id, recording };
            }
            Err(e) => log::error!("Could not start recording: {}", e),
        }
    }

    /// End the current session, if any, and push its artifact to the peer.
    ///
    /// In `Idle` this does nothing and starts no transfer.
    pub fn finish(&mut self) -> Option<TransferHandle> {
        let SessionState::Recording { peer_id, mut recording } =
            std::mem::replace(&mut self.state, SessionState::Idle)
        else {
            log::debug!("Stop received while idle, nothing to send");
            return None;
        };

        log::info!("Stopping recording for {}", peer_id);
        // Unsubscribe now so a following start owns the sensors alone
        recording.stop();

        let channels = self.channels.clone();
        Some(tokio::spawn(async move {
            let result = Self::push_artifact(channels, peer_id.clone(), recording).await;
            match &result {
                Ok(report) => log::info!(
                    "Successfully sent recorded data: {} rows, {} bytes to {}",
                    report.rows,
                    report.bytes,
                    report.peer_id
                ),
                Err(e) => log::error!("Failed to send recorded data to {}: {}", peer_id, e),
            }
            result
        }))
    }

    /// Process teardown: a running session is finished as if stopped
    pub fn shutdown(mut self) -> Option<TransferHandle> {
        self.finish()
    }

    async fn push_artifact(
        channels: Arc<dyn ChannelClient>,
        peer_id: String,
        recording: Recording,
    ) -> Result<TransferReport, TransferError> {
        let artifact = tokio::task::spawn_blocking(move || recording.serialize())
            .await
            .map_err(|e| TransferError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        log::info!("Opening channel to {}.", peer_id);
        let mut channel = channels
            .open_channel(&peer_id, CHANNEL_PATH_SENSOR_READING)
            .await?;

        let mut file = tokio::fs::File::open(artifact.path()).await?;
        let bytes = tokio::io::copy(&mut file, &mut channel.writer).await?;
        channel.writer.shutdown().await?;

        Ok(TransferReport {
            peer_id,
            rows: artifact.rows,
            bytes,
        })
    }
}

/// Why the wearable service loop ended
#[derive(Debug)]
pub enum ServiceExit {
    /// A fatal session error stopped the service; a running session was
    /// finished on the way out
    Terminated {
        error: SessionError,
        pending_transfer: Option<TransferHandle>,
    },
    /// The inbox closed; a running session was finished on the way out
    InboxClosed { pending_transfer: Option<TransferHandle> },
}

/// Wearable listener: feeds inbound events to the session controller.
pub struct WearableService {
    controller: SessionController,
}

impl WearableService {
    pub fn new(controller: SessionController) -> Self {
        Self { controller }
    }

    pub async fn run(mut self, mut inbox: Inbox) -> ServiceExit {
        log::info!("Starting wearable message listener...");

        while let Some(event) = inbox.recv().await {
            match event {
                Inbound::Message(message) => match self.controller.handle(&message) {
                    Ok(_transfer) => {}
                    Err(error) => {
                        log::error!("{}! Stopping...", error);
                        return ServiceExit::Terminated {
                            error,
                            pending_transfer: self.controller.shutdown(),
                        };
                    }
                },
                Inbound::ChannelOpened(channel) => {
                    log::warn!(
                        "Ignoring channel {} opened by {}",
                        channel.path,
                        channel.source_peer
                    );
                }
            }
        }

        log::info!("Wearable listener: inbox closed, shutting down");
        ServiceExit::InboxClosed {
            pending_transfer: self.controller.shutdown(),
        }
    }
}
