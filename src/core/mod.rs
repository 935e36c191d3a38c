//! Core types shared by every layer: protocol constants, error taxonomy and
//! the MAC address representation.

pub mod constants;
pub mod error;
pub mod mac;

pub use self::constants::*;
pub use self::error::{CryptError, HostError, NodeError, OtaError, PrefsError, RadioError, WireError};
pub use self::mac::MacAddress;
