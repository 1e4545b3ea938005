//! # File Receiver Module
//!
//! Handheld side of the artifact transfer. When a wearable opens the
//! sensor-reading channel, the bytes are streamed into
//! `<downloads>/sensor_data_<yyyy.MM.dd_HH.mm>.csv`.
//!
//! Names only have minute resolution, so a second artifact in the same
//! minute gets a numeric suffix (`sensor_data_..._1.csv`) instead of
//! overwriting the first one.

use crate::error::TransferError;
use crate::transport::{Inbound, InboundChannel, Inbox, CHANNEL_PATH_SENSOR_READING};
use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Gives up looking for a free file name after this many suffixes
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedArtifact {
    pub path: PathBuf,
    pub source_peer: String,
    pub bytes: u64,
}

/// Base file name for an artifact received at `now`
pub fn artifact_file_name(now: DateTime<Local>) -> String {
    format!("sensor_data_{}.csv", now.format("%Y.%m.%d_%H.%M"))
}

#[derive(Debug, Clone)]
pub struct FileReceiver {
    downloads_dir: PathBuf,
}

impl FileReceiver {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
        }
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Stream one inbound channel into a fresh file in the downloads directory
    pub async fn receive(&self, mut channel: InboundChannel) -> Result<ReceivedArtifact, TransferError> {
        log::info!("Channel opened: {}", channel.path);
        log::info!("Receiving data from {}...", channel.source_peer);

        fs::create_dir_all(&self.downloads_dir).await?;
        let (path, mut file) = self.create_unique(Local::now()).await?;

        let copied = async {
            let bytes = tokio::io::copy(&mut channel.reader, &mut file).await?;
            file.flush().await?;
            Ok::<_, io::Error>(bytes)
        }
        .await;

        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(file);
                // A truncated recording must not be left behind in Downloads
                if let Err(remove_err) = fs::remove_file(&path).await {
                    log::warn!("Could not remove partial file {}: {}", path.display(), remove_err);
                }
                return Err(e.into());
            }
        };

        log::info!("Saved {} bytes to {}", bytes, path.display());
        Ok(ReceivedArtifact {
            path,
            source_peer: channel.source_peer,
            bytes,
        })
    }

    async fn create_unique(&self, now: DateTime<Local>) -> io::Result<(PathBuf, File)> {
        let base = artifact_file_name(now);
        let stem = base.trim_end_matches(".csv");

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{}_{}.csv", stem, attempt)
            };
            let path = self.downloads_dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name for {} in {}", base, self.downloads_dir.display()),
        ))
    }
}

/// Handheld listener: turns channel-open notifications into saved files.
pub struct HandheldService {
    receiver: FileReceiver,
    received_tx: mpsc::UnboundedSender<ReceivedArtifact>,
}

impl HandheldService {
    /// Creates the service.
    ///
    /// Returns the service and a receiver that reports every saved artifact.
    pub fn new(receiver: FileReceiver) -> (Self, mpsc::UnboundedReceiver<ReceivedArtifact>) {
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        (Self { receiver, received_tx }, received_rx)
    }

    /// Runs until the inbox closes. Each channel is received on its own task.
    pub async fn run(self, mut inbox: Inbox) {
        while let Some(event) = inbox.recv().await {
            match event {
                Inbound::ChannelOpened(channel) if channel.path == CHANNEL_PATH_SENSOR_READING => {
                    let receiver = self.receiver.clone();
                    let received_tx = self.received_tx.clone();
                    tokio::spawn(async move {
                        match receiver.receive(channel).await {
                            Ok(artifact) => {
                                let _ = received_tx.send(artifact);
                            }
                            Err(e) => log::error!("Failed to receive recording: {}", e),
                        }
                    });
                }
                Inbound::ChannelOpened(channel) => {
                    log::warn!("Ignoring channel on unknown path: {}", channel.path);
                }
                Inbound::Message(message) => {
                    log::debug!("Handheld ignores control message {}", message.path);
                }
            }
        }

        log::info!("Handheld listener: inbox closed, shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::tempdir;
    use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

    /// Reader whose link drops on the first read
    struct DroppedLink;

    impl AsyncRead for DroppedLink {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "link dropped")))
        }
    }

    fn channel_with(body: &'static [u8]) -> InboundChannel {
        InboundChannel {
            path: CHANNEL_PATH_SENSOR_READING.to_string(),
            source_peer: "watch".to_string(),
            reader: Box::pin(body),
        }
    }

    #[test]
    fn test_artifact_file_name_format() {
        let when = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 42).unwrap();
        assert_eq!(artifact_file_name(when), "sensor_data_2024.03.07_09.05.csv");
    }

    #[tokio::test]
    async fn test_receive_writes_into_downloads() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(dir.path().join("Downloads"));

        let artifact = receiver
            .receive(channel_with(b"timestamp,accel,accuracy\n1,0.500000,3\n"))
            .await
            .unwrap();

        assert_eq!(artifact.source_peer, "watch");
        assert_eq!(artifact.bytes, 38);
        assert!(artifact.path.starts_with(receiver.downloads_dir()));
        let contents = std::fs::read_to_string(&artifact.path).unwrap();
        assert_eq!(contents, "timestamp,accel,accuracy\n1,0.500000,3\n");
    }

    #[tokio::test]
    async fn test_interrupted_transfer_leaves_no_file() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(dir.path());
        let channel = InboundChannel {
            path: CHANNEL_PATH_SENSOR_READING.to_string(),
            source_peer: "watch".to_string(),
            reader: Box::pin((&b"timestamp,accel,accuracy\n1,0.5"[..]).chain(DroppedLink)),
        };

        let result = receiver.receive(channel).await;
        assert!(matches!(result, Err(TransferError::Io(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_same_minute_does_not_overwrite() {
        let dir = tempdir().unwrap();
        let receiver = FileReceiver::new(dir.path());
        let when = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap();

        let (first, _) = receiver.create_unique(when).await.unwrap();
        let (second, _) = receiver.create_unique(when).await.unwrap();

        assert_eq!(first.file_name().unwrap(), "sensor_data_2024.03.07_09.05.csv");
        assert_eq!(second.file_name().unwrap(), "sensor_data_2024.03.07_09.05_1.csv");
    }

    #[tokio::test]
    async fn test_service_reports_received_files() {
        let dir = tempdir().unwrap();
        let (service, mut received) = HandheldService::new(FileReceiver::new(dir.path()));
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(Inbound::ChannelOpened(channel_with(b"timestamp,accuracy\n"))).unwrap();
        drop(tx);
        service.run(rx).await;

        let artifact = received.recv().await.expect("artifact should be reported");
        assert_eq!(artifact.bytes, 19);
    }
}
