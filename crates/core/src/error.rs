//! Error types for peer calling

/// Result type alias using the peercall Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or running a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter or form input
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Listing cameras/microphones failed
    #[error("Device enumeration failed: {0}")]
    DeviceEnumeration(String),

    /// Acquiring the local media stream failed (device busy, permission denied)
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Signaling connection error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Operation needs something that has not arrived yet (e.g. the relay id)
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Operation is not valid in the current call state
    #[error("Invalid call state: {0}")]
    InvalidState(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The controller task or a transport channel has gone away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_)
                | Error::WebSocketError(_)
                | Error::OperationTimeout(_)
                | Error::MediaAcquisition(_)
                | Error::NotReady(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_) | Error::SdpError(_) | Error::WebRtcError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
