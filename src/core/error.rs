//! Error types for the protocol core.

use thiserror::Error;

/// Errors from the authenticated envelope.
#[derive(Debug, Error)]
pub enum CryptError {
    /// The plaintext to encrypt was empty.
    #[error("plaintext must be at least one byte")]
    EmptyPlaintext,

    /// Encrypting this plaintext would exceed the radio MTU.
    #[error("frame too large: {wire} bytes exceeds the {max} byte radio limit")]
    FrameTooLarge {
        /// The wire frame size that would have been produced.
        wire: usize,
        /// The radio MTU.
        max: usize,
    },

    /// The envelope header is truncated or its length field is invalid.
    #[error("malformed envelope")]
    MalformedEnvelope,

    /// GCM tag verification failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The tag verified but the leading secret bytes did not match.
    #[error("secret mismatch")]
    SecretMismatch,
}

/// Errors from the wire codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame is too short for its message id.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// The dispatch id is not one of the known message ids.
    #[error("unknown message id: 0x{0:02x}")]
    UnknownId(u8),

    /// An empty frame was handed to the decoder.
    #[error("empty frame")]
    Empty,
}

/// Errors reported by the radio driver or the shim above it.
#[derive(Debug, Error)]
pub enum RadioError {
    /// The driver rejected the send submission.
    #[error("send submit failed: {0}")]
    SubmitFailed(String),

    /// The requested channel is not permitted in this region.
    #[error("channel {0} not permitted")]
    ChannelNotPermitted(u8),

    /// Adding a peer failed (for example a full peer table).
    #[error("peer add failed: {0}")]
    PeerAddFailed(String),

    /// Removing a peer failed.
    #[error("peer remove failed: {0}")]
    PeerRemoveFailed(String),

    /// Driver initialisation failed.
    #[error("radio init failed: {0}")]
    InitFailed(String),
}

/// Errors from the preference store.
#[derive(Debug, Error)]
pub enum PrefsError {
    /// The requested key does not exist.
    #[error("key not found: {0}")]
    NotFound(&'static str),

    /// A stored value has the wrong size or shape.
    #[error("invalid value for key {0}")]
    InvalidValue(&'static str),

    /// Backing store IO failure.
    #[error("preference store IO: {0}")]
    Io(String),
}

/// Errors surfaced by the node state machine.
#[derive(Debug, Error)]
pub enum NodeError {
    /// `setup()` has not completed successfully.
    #[error("node is not set up")]
    NotSetUp,

    /// No host answered any discovery request.
    #[error("host discovery failed")]
    DiscoveryFailed,

    /// The persisted host never answered a challenge request; it has been
    /// forgotten and a fresh `setup()` is required.
    #[error("invalid host")]
    InvalidHost,

    /// The application message was never acknowledged by the radio.
    #[error("delivery failed after {attempts} attempts")]
    DeliveryFailed {
        /// Number of transmissions attempted.
        attempts: u16,
    },

    /// Envelope failure.
    #[error(transparent)]
    Crypt(#[from] CryptError),

    /// Radio failure.
    #[error(transparent)]
    Radio(#[from] RadioError),

    /// Preference store failure.
    #[error(transparent)]
    Prefs(#[from] PrefsError),
}

/// Errors surfaced by the host dispatcher.
#[derive(Debug, Error)]
pub enum HostError {
    /// Envelope failure.
    #[error(transparent)]
    Crypt(#[from] CryptError),

    /// Wire codec failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Radio failure.
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Errors from the OTA pipeline.
#[derive(Debug, Error)]
pub enum OtaError {
    /// WiFi association/DHCP did not complete within the allotted time.
    #[error("wifi connect failed")]
    WifiConnectFailed,

    /// No OTA partition is available.
    #[error("no update partition")]
    NoPartition,

    /// The provided MD5 string is not 32 hex chars.
    #[error("md5 must be {expected} hex chars, got {actual}")]
    InvalidMd5Length {
        /// Expected number of hex chars.
        expected: usize,
        /// Provided number of chars.
        actual: usize,
    },

    /// The HTTP request failed at the transport level.
    #[error("http transport: {0}")]
    Http(String),

    /// The server answered with a non-200 status.
    #[error("unexpected http status {0}")]
    HttpStatus(u16),

    /// The body length is unknown, zero, or exceeds the partition.
    #[error("bad content length {length:?} for partition of {partition} bytes")]
    BadContentLength {
        /// Content length reported by the server, if any.
        length: Option<u64>,
        /// Size of the target partition.
        partition: u64,
    },

    /// The stream ended before the announced content length was read.
    #[error("short read: body ended early")]
    ShortRead,

    /// The image does not start with the firmware magic byte.
    #[error("image magic mismatch: got 0x{0:02x}")]
    MagicMismatch(u8),

    /// The streamed image digest disagrees with the announced MD5.
    #[error("md5 verification failed")]
    Md5Mismatch,

    /// Flash partition IO failure.
    #[error("partition IO: {0}")]
    Partition(String),

    /// The freshly committed head failed the read-back bootability check.
    #[error("partition not bootable after commit")]
    NotBootable,
}
