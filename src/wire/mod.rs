//! Frame encoding and decoding for the seven wire message variants.
//!
//! Every inner frame starts with a one-byte dispatch id; all integer fields
//! are little-endian and the layout is packed (no alignment padding). Strings
//! in the firmware response are fixed-width, NUL-padded fields; readers treat
//! the last possible byte as an implicit terminator.

use crate::core::{
    FIRMWARE_MD5_LEN, FIRMWARE_URL_LEN, MESSAGE_ID_CHALLENGE_FIRMWARE_RESPONSE,
    MESSAGE_ID_CHALLENGE_REQUEST, MESSAGE_ID_CHALLENGE_RESPONSE, MESSAGE_ID_DISCOVERY_REQUEST,
    MESSAGE_ID_DISCOVERY_RESPONSE, MESSAGE_ID_HEADER, WIFI_PASSWORD_LEN, WIFI_SSID_LEN, WireError,
};

/// Application message header; the opaque application payload follows it.
///
/// Wire format (7 bytes):
/// ```text
/// +--------+------------------+--------------------+
/// | 0x03   | Retries          | Header challenge   |
/// | 1 byte | 2 bytes (LE16)   | 4 bytes (LE32)     |
/// +--------+------------------+--------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationHeader {
    /// How many delivery retries preceded the transmission that got through.
    pub retries: u16,
    /// The anti-replay challenge previously issued by the host.
    pub header_challenge: u32,
}

impl ApplicationHeader {
    /// Encoded size.
    pub const SIZE: usize = 7;

    /// Serialize the header.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = MESSAGE_ID_HEADER;
        buf[1..3].copy_from_slice(&self.retries.to_le_bytes());
        buf[3..7].copy_from_slice(&self.header_challenge.to_le_bytes());
        buf
    }

    /// Parse a header from the front of a decrypted frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            retries: u16::from_le_bytes([bytes[1], bytes[2]]),
            header_challenge: u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
        })
    }
}

/// Broadcast discovery request (5 bytes): id + `discovery_challenge` (LE32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryRequest {
    /// Challenge echoed back by the host so the node can match the reply.
    pub discovery_challenge: u32,
}

impl DiscoveryRequest {
    /// Encoded size.
    pub const SIZE: usize = 5;

    /// Serialize the request.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = MESSAGE_ID_DISCOVERY_REQUEST;
        buf[1..5].copy_from_slice(&self.discovery_challenge.to_le_bytes());
        buf
    }

    /// Parse a request.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            discovery_challenge: read_u32(bytes, 1),
        })
    }
}

/// Discovery response (6 bytes): id + echoed challenge (LE32) + WiFi channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryResponse {
    /// Echo of the request's `discovery_challenge`.
    pub discovery_challenge: u32,
    /// The WiFi channel the host operates on.
    pub channel: u8,
}

impl DiscoveryResponse {
    /// Encoded size.
    pub const SIZE: usize = 6;

    /// Serialize the response.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = MESSAGE_ID_DISCOVERY_RESPONSE;
        buf[1..5].copy_from_slice(&self.discovery_challenge.to_le_bytes());
        buf[5] = self.channel;
        buf
    }

    /// Parse a response.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            discovery_challenge: read_u32(bytes, 1),
            channel: bytes[5],
        })
    }
}

/// Challenge request (9 bytes): id + firmware version (LE32) + challenge (LE32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeRequest {
    /// The firmware version the node is currently running.
    pub firmware_version: u32,
    /// Challenge echoed back by the host so the node can match the reply.
    pub challenge_challenge: u32,
}

impl ChallengeRequest {
    /// Encoded size.
    pub const SIZE: usize = 9;

    /// Serialize the request.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = MESSAGE_ID_CHALLENGE_REQUEST;
        buf[1..5].copy_from_slice(&self.firmware_version.to_le_bytes());
        buf[5..9].copy_from_slice(&self.challenge_challenge.to_le_bytes());
        buf
    }

    /// Parse a request.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            firmware_version: read_u32(bytes, 1),
            challenge_challenge: read_u32(bytes, 5),
        })
    }
}

/// Challenge response (9 bytes): id + echoed challenge + header challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeResponse {
    /// Echo of the request's `challenge_challenge`.
    pub challenge_challenge: u32,
    /// The one-shot challenge to place in the next [`ApplicationHeader`].
    pub header_challenge: u32,
}

impl ChallengeResponse {
    /// Encoded size.
    pub const SIZE: usize = 9;

    /// Serialize the response.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = MESSAGE_ID_CHALLENGE_RESPONSE;
        buf[1..5].copy_from_slice(&self.challenge_challenge.to_le_bytes());
        buf[5..9].copy_from_slice(&self.header_challenge.to_le_bytes());
        buf
    }

    /// Parse a response.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, Self::SIZE)?;
        Ok(Self {
            challenge_challenge: read_u32(bytes, 1),
            header_challenge: read_u32(bytes, 5),
        })
    }
}

/// Challenge response that instead directs the node to update its firmware.
///
/// Wire format (197 bytes): id + echoed challenge (LE32) + four fixed-width
/// NUL-padded strings: SSID (32), WiFi password (32), firmware URL (96) and
/// the hex MD5 of the image (32, empty for "no digest check").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeFirmwareResponse {
    /// Echo of the request's `challenge_challenge`.
    pub challenge_challenge: u32,
    /// WiFi SSID the node should connect to for the download.
    pub wifi_ssid: String,
    /// WiFi password for that SSID.
    pub wifi_password: String,
    /// URL of the firmware binary.
    pub url: String,
    /// Hex MD5 of the firmware binary; empty to skip verification.
    pub md5: String,
}

impl ChallengeFirmwareResponse {
    /// Encoded size.
    pub const SIZE: usize =
        1 + 4 + WIFI_SSID_LEN + WIFI_PASSWORD_LEN + FIRMWARE_URL_LEN + FIRMWARE_MD5_LEN;

    /// Serialize the response. Over-long strings are truncated to their
    /// field width.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = MESSAGE_ID_CHALLENGE_FIRMWARE_RESPONSE;
        buf[1..5].copy_from_slice(&self.challenge_challenge.to_le_bytes());

        let mut at = 5;
        for (value, width) in [
            (&self.wifi_ssid, WIFI_SSID_LEN),
            (&self.wifi_password, WIFI_PASSWORD_LEN),
            (&self.url, FIRMWARE_URL_LEN),
            (&self.md5, FIRMWARE_MD5_LEN),
        ] {
            write_fixed_str(&mut buf[at..at + width], value);
            at += width;
        }
        buf
    }

    /// Parse a response.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        check_len(bytes, Self::SIZE)?;
        let mut at = 5;
        let mut field = |width: usize| {
            let value = read_fixed_str(&bytes[at..at + width]);
            at += width;
            value
        };
        Ok(Self {
            challenge_challenge: read_u32(bytes, 1),
            wifi_ssid: field(WIFI_SSID_LEN),
            wifi_password: field(WIFI_PASSWORD_LEN),
            url: field(FIRMWARE_URL_LEN),
            md5: field(FIRMWARE_MD5_LEN),
        })
    }
}

/// A decoded inner frame, dispatched on its id byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Application header plus the opaque payload that followed it.
    Application {
        /// The parsed header.
        header: ApplicationHeader,
        /// Everything after the header, including any envelope padding.
        payload: Vec<u8>,
    },
    /// Broadcast discovery request.
    DiscoveryRequest(DiscoveryRequest),
    /// Discovery response.
    DiscoveryResponse(DiscoveryResponse),
    /// Challenge request.
    ChallengeRequest(ChallengeRequest),
    /// Challenge response.
    ChallengeResponse(ChallengeResponse),
    /// Firmware-update challenge response.
    ChallengeFirmwareResponse(ChallengeFirmwareResponse),
}

impl Frame {
    /// Decode a decrypted inner frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let id = *bytes.first().ok_or(WireError::Empty)?;
        match id {
            MESSAGE_ID_HEADER => {
                let header = ApplicationHeader::from_bytes(bytes)?;
                Ok(Self::Application {
                    header,
                    payload: bytes[ApplicationHeader::SIZE..].to_vec(),
                })
            }
            MESSAGE_ID_DISCOVERY_REQUEST => {
                DiscoveryRequest::from_bytes(bytes).map(Self::DiscoveryRequest)
            }
            MESSAGE_ID_DISCOVERY_RESPONSE => {
                DiscoveryResponse::from_bytes(bytes).map(Self::DiscoveryResponse)
            }
            MESSAGE_ID_CHALLENGE_REQUEST => {
                ChallengeRequest::from_bytes(bytes).map(Self::ChallengeRequest)
            }
            MESSAGE_ID_CHALLENGE_RESPONSE => {
                ChallengeResponse::from_bytes(bytes).map(Self::ChallengeResponse)
            }
            MESSAGE_ID_CHALLENGE_FIRMWARE_RESPONSE => {
                ChallengeFirmwareResponse::from_bytes(bytes).map(Self::ChallengeFirmwareResponse)
            }
            other => Err(WireError::UnknownId(other)),
        }
    }
}

fn check_len(bytes: &[u8], expected: usize) -> Result<(), WireError> {
    if bytes.len() < expected {
        return Err(WireError::TooShort {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn write_fixed_str(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

fn read_fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
