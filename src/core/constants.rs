//! Protocol constants.
//!
//! These values are fixed by the wire protocol and the radio's datagram
//! contract and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// AES-128 key size.
pub const KEY_SIZE: usize = 16;

/// Size of the constant plaintext tag prepended to every payload before
/// encryption. A mismatch after decrypt invalidates the frame.
pub const SECRET_SIZE: usize = 8;

/// Per-frame random IV size.
pub const IV_SIZE: usize = 8;

/// GCM authentication tag size as carried on the wire (truncated).
pub const TAG_SIZE: usize = 8;

/// Envelope header size: IV + tag + one length byte.
pub const ENVELOPE_HEADER_SIZE: usize = IV_SIZE + TAG_SIZE + 1;

/// Minimum ciphertext length. Shorter plaintexts are zero-padded up to this.
pub const MIN_CIPHERTEXT_SIZE: usize = 16;

// =============================================================================
// RADIO LIMITS
// =============================================================================

/// Maximum datagram the radio accepts (ESP-NOW MTU). The encoder refuses to
/// produce anything larger.
pub const MAX_WIRE_FRAME: usize = 250;

/// Largest inner frame that still fits the MTU once the envelope header and
/// the secret prefix are accounted for.
pub const MAX_INNER_FRAME: usize = MAX_WIRE_FRAME - ENVELOPE_HEADER_SIZE - SECRET_SIZE;

/// Receive queue depth on a node.
pub const NODE_RECEIVE_QUEUE_DEPTH: usize = 5;

/// Receive queue depth on a host.
pub const HOST_RECEIVE_QUEUE_DEPTH: usize = 10;

// =============================================================================
// MESSAGE IDS
// =============================================================================

/// Application header, followed by the opaque application payload.
pub const MESSAGE_ID_HEADER: u8 = 0x03;

/// Broadcast discovery request (node -> any host).
pub const MESSAGE_ID_DISCOVERY_REQUEST: u8 = 0xD0;

/// Discovery response (host -> node).
pub const MESSAGE_ID_DISCOVERY_RESPONSE: u8 = 0xD1;

/// Challenge request (node -> host).
pub const MESSAGE_ID_CHALLENGE_REQUEST: u8 = 0xDA;

/// Challenge response (host -> node).
pub const MESSAGE_ID_CHALLENGE_RESPONSE: u8 = 0xDB;

/// Challenge response carrying firmware update directives (host -> node).
pub const MESSAGE_ID_CHALLENGE_FIRMWARE_RESPONSE: u8 = 0xDC;

// =============================================================================
// TIMING AND RETRIES
// =============================================================================

/// How long to wait for a decrypted reply after sending a request.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(100);

/// How long to wait for the radio's delivery report after a send.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_millis(100);

/// Discovery attempts before `setup()` gives up.
pub const DISCOVERY_ATTEMPTS: u32 = 50;

/// Challenge request attempts before the host is declared invalid.
pub const CHALLENGE_ATTEMPTS: u32 = 50;

/// Default number of delivery retries for an application message.
pub const MESSAGE_RETRIES: i16 = 50;

/// Backoff step between delivery retries; attempt `n` waits `n * this`.
pub const RETRY_BACKOFF_STEP: Duration = Duration::from_millis(5);

// =============================================================================
// WIFI CHANNELS (2.4 GHz)
// =============================================================================

/// Lowest usable WiFi channel.
pub const WIFI_CHANNEL_LOWEST: u8 = 1;

/// Highest usable WiFi channel. 14 is technically possible but rarely
/// permitted; the scan still covers it.
pub const WIFI_CHANNEL_HIGHEST: u8 = 14;

/// Whether a channel byte denotes a usable 2.4 GHz channel.
pub fn is_valid_wifi_channel(channel: u8) -> bool {
    (WIFI_CHANNEL_LOWEST..=WIFI_CHANNEL_HIGHEST).contains(&channel)
}

// =============================================================================
// OTA
// =============================================================================

/// WiFi connect timeout during a firmware update.
pub const OTA_WIFI_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// WiFi connect retries during a firmware update.
pub const OTA_WIFI_CONNECT_RETRIES: u16 = 2;

/// HTTP transport timeout for the firmware download.
pub const OTA_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Delay before the post-update (or post-failure) reboot.
pub const OTA_REBOOT_DELAY: Duration = Duration::from_secs(1);

/// Flash sector size; also the streaming block size.
pub const FLASH_SECTOR_SIZE: usize = 4096;

/// Sectors per large erase block.
pub const FLASH_SECTORS_PER_BLOCK: usize = 16;

/// Large erase block size.
pub const FLASH_BLOCK_SIZE: usize = FLASH_SECTOR_SIZE * FLASH_SECTORS_PER_BLOCK;

/// Size of the deferred head write; a partial image misses these bytes and is
/// therefore never bootable.
pub const ENCRYPTED_BLOCK_SIZE: usize = 16;

/// First byte of every bootable firmware image.
pub const FIRMWARE_IMAGE_MAGIC: u8 = 0xE9;

/// Expected length of a hex-encoded MD5 digest.
pub const MD5_HEX_LEN: usize = 32;

// =============================================================================
// FIRMWARE RESPONSE FIELD WIDTHS
// =============================================================================

/// Fixed width of the SSID field.
pub const WIFI_SSID_LEN: usize = 32;

/// Fixed width of the WiFi password field.
pub const WIFI_PASSWORD_LEN: usize = 32;

/// Fixed width of the firmware URL field.
pub const FIRMWARE_URL_LEN: usize = 96;

/// Fixed width of the firmware MD5 field (hex chars, no trailing NUL).
pub const FIRMWARE_MD5_LEN: usize = 32;
