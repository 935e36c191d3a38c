//! # EspNowNetwork
//!
//! A bidirectional, connectionless link layer on top of a short-range
//! datagram radio (ESP-NOW style: 250-byte frames to MAC-addressed peers).
//! Two roles share this implementation:
//!
//! - **Node**: a battery-oriented endpoint that periodically wakes,
//!   discovers a host, exchanges authenticated application datagrams and
//!   accepts remote firmware-update directives.
//! - **Host**: an always-on receiver that answers discovery, issues
//!   anti-replay challenges, consults a firmware oracle and forwards
//!   decrypted application payloads to upper layers.
//!
//! Every frame travels inside an AES-128-GCM envelope with a constant secret
//! prefix; application frames are additionally protected against replay by
//! one-shot challenges issued per node. The radio, the key/value store, the
//! WiFi/HTTP stack and the flash partition API are platform seams, consumed
//! through the traits in [`radio`], [`prefs`] and [`ota`].
//!
//! ## Example
//!
//! ```ignore
//! use espnow_network::prelude::*;
//!
//! let crypt = EspNowCrypt::new(b"0123456789ABCDEF", b"01234567");
//! let mut node = EspNowNode::new(driver, crypt, store, updater, FIRMWARE_VERSION)
//!     .on_status(|status| println!("status: {status:?}"));
//!
//! node.setup().await?;
//! node.send_message(&sensor_reading, MESSAGE_RETRIES).await?;
//! node.teardown();
//! // ... deep sleep ...
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod crypt;
pub mod host;
pub mod node;
pub mod ota;
pub mod prefs;
pub mod radio;
pub mod wire;

/// Commonly used types, re-exported for convenience.
pub mod prelude {
    pub use crate::core::{
        CryptError, HostError, MacAddress, NodeError, OtaError, PrefsError, RadioError, WireError,
        MESSAGE_RETRIES,
    };
    pub use crate::crypt::EspNowCrypt;
    pub use crate::host::{
        ApplicationMessage, ChallengeCache, EspNowHost, FirmwareOracle, FirmwareUpdate,
        MessageMetadata,
    };
    pub use crate::node::{EspNowNode, FirmwareUpdater, NodeStatus};
    pub use crate::ota::{
        HttpClient, HttpResponse, OtaPartition, OtaUpdater, SystemReset, WifiStation,
    };
    pub use crate::prefs::{MemoryStore, NodePreferences, PreferenceStore};
    pub use crate::radio::{Datagram, Delivery, RadioDriver, RadioEvents, RadioShim};
}
