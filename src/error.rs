//! # Error Types Module
//!
//! Centralized error handling for sensor-link.
//! Provides custom error types for each module with proper context and error chaining.
//!
//! ## Error Types
//! - `ConfigError`: Configuration file I/O and parsing errors
//! - `SensorError`: Sensor registration failures on the wearable
//! - `RecorderError`: Spooling and CSV export failures
//! - `TransportError`: Peer discovery, message and channel failures
//! - `TransferError`: Artifact push or receive failures
//! - `SessionError`: Fatal conditions of the recording session controller
//!
//! None of these reach the user as typed values. Controllers turn them into
//! log lines or status strings at the call site.

use std::fmt;

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

/// Errors reported by a sensor subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// The sensor type is not present on this device
    Unavailable(String),
    /// The subsystem refused the listener
    RegistrationFailed { sensor: String, reason: String },
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Unavailable(sensor) => {
                write!(f, "Sensor not available on this device: {}", sensor)
            }
            SensorError::RegistrationFailed { sensor, reason } => {
                write!(f, "Failed to register listener for {}: {}", sensor, reason)
            }
        }
    }
}

impl std::error::Error for SensorError {}

/// Errors that can occur while buffering or exporting a recording
#[derive(Debug)]
pub enum RecorderError {
    /// Failed to create or append to the spool file
    Spool(std::io::Error),
    /// Failed to write the CSV artifact
    Artifact(std::io::Error),
    /// Failed to spawn the writer thread
    Thread(std::io::Error),
    /// The writer thread is gone before the session was exported
    WriterStopped,
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::Spool(e) => write!(f, "Failed to spool sensor readings: {}", e),
            RecorderError::Artifact(e) => write!(f, "Failed to write CSV artifact: {}", e),
            RecorderError::Thread(e) => write!(f, "Failed to start recorder writer thread: {}", e),
            RecorderError::WriterStopped => write!(f, "Recorder writer thread stopped unexpectedly"),
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecorderError::Spool(e) | RecorderError::Artifact(e) | RecorderError::Thread(e) => Some(e),
            RecorderError::WriterStopped => None,
        }
    }
}

/// Errors from the device-to-device transport
#[derive(Debug)]
pub enum TransportError {
    /// No node with this id is known to the transport
    UnknownPeer(String),
    /// The node exists but cannot be reached right now
    Unreachable(String),
    /// Capability query failed
    QueryFailed(String),
    /// The peer's inbox is closed
    Closed(String),
    /// The send task ended before reporting a result
    Aborted(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::UnknownPeer(id) => write!(f, "Unknown peer: {}", id),
            TransportError::Unreachable(id) => write!(f, "Peer is not reachable: {}", id),
            TransportError::QueryFailed(msg) => write!(f, "Capability query failed: {}", msg),
            TransportError::Closed(id) => write!(f, "Peer {} is no longer listening", id),
            TransportError::Aborted(msg) => write!(f, "Send aborted: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors while moving an artifact between the two sides
#[derive(Debug)]
pub enum TransferError {
    /// The wearable could not produce the artifact
    Recorder(RecorderError),
    /// Opening the channel to the handheld failed
    Channel(TransportError),
    /// Streaming bytes over an open channel failed
    Io(std::io::Error),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Recorder(e) => write!(f, "Could not export recording: {}", e),
            TransferError::Channel(e) => write!(f, "Could not open transfer channel: {}", e),
            TransferError::Io(e) => write!(f, "Transfer interrupted: {}", e),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Recorder(e) => Some(e),
            TransferError::Channel(e) => Some(e),
            TransferError::Io(e) => Some(e),
        }
    }
}

impl From<RecorderError> for TransferError {
    fn from(e: RecorderError) -> Self {
        TransferError::Recorder(e)
    }
}

impl From<TransportError> for TransferError {
    fn from(e: TransportError) -> Self {
        TransferError::Channel(e)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Io(e)
    }
}

/// Fatal conditions for the wearable session controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A start message arrived without the id of the sending peer
    MissingPeer,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::MissingPeer => {
                write!(f, "Recording was started without a peer id")
            }
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Unreachable("watch-1".to_string());
        assert!(err.to_string().contains("watch-1"));
    }

    #[test]
    fn test_config_error_chain() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::ReadFailed(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_transfer_error_wraps_transport() {
        use std::error::Error;
        let err: TransferError = TransportError::UnknownPeer("phone".to_string()).into();
        assert!(err.source().is_some());
        assert!(err.to_string().contains("phone"));
    }
}
