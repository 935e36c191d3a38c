//! The host: an always-on receiver that answers discovery, issues anti-replay
//! challenges, consults the firmware oracle and forwards decrypted application
//! payloads.
//!
//! The host performs no periodic work; everything is a reaction to a received
//! frame. Replies to unregistered senders go through a temporary peer table
//! entry (add, send, delete) so the radio's hard cap on peer slots is never
//! consumed by one-shot exchanges.

mod challenge;

pub use self::challenge::ChallengeCache;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::core::{HostError, MacAddress, HOST_RECEIVE_QUEUE_DEPTH};
use crate::crypt::EspNowCrypt;
use crate::radio::{Datagram, RadioDriver, RadioShim};
use crate::wire::{
    ApplicationHeader, ChallengeFirmwareResponse, ChallengeRequest, ChallengeResponse,
    DiscoveryRequest, DiscoveryResponse, Frame,
};

/// Capacity of the application message channel handed to the embedder.
const MESSAGE_CHANNEL_DEPTH: usize = 32;

/// Metadata accompanying a forwarded application payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMetadata {
    /// How many delivery retries the sender needed; useful for spotting nodes
    /// with a poor link.
    pub retries: u16,
    /// MAC address of the sender.
    pub mac: MacAddress,
}

/// A verified, decrypted application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationMessage {
    /// Message metadata.
    pub metadata: MessageMetadata,
    /// The opaque application payload (tail bytes may be envelope padding).
    pub payload: Vec<u8>,
}

/// Firmware update directives for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareUpdate {
    /// WiFi SSID the node should connect to.
    pub wifi_ssid: String,
    /// WiFi password for that SSID.
    pub wifi_password: String,
    /// URL of the firmware binary.
    pub url: String,
    /// Hex MD5 of the binary; empty to skip verification.
    pub md5: String,
}

/// Decides whether a node should upgrade.
///
/// Invoked on every challenge request, so implementations must return fast,
/// typically a lookup into a table kept fresh by an external poller.
pub trait FirmwareOracle {
    /// Update directives for `(mac, firmware_version)`, or `None` to proceed
    /// with the normal challenge exchange.
    fn lookup(&mut self, mac: MacAddress, firmware_version: u32) -> Option<FirmwareUpdate>;
}

impl<F> FirmwareOracle for F
where
    F: FnMut(MacAddress, u32) -> Option<FirmwareUpdate>,
{
    fn lookup(&mut self, mac: MacAddress, firmware_version: u32) -> Option<FirmwareUpdate> {
        self(mac, firmware_version)
    }
}

/// The host engine.
pub struct EspNowHost<D: RadioDriver, O: FirmwareOracle> {
    shim: RadioShim<D>,
    crypt: EspNowCrypt,
    oracle: O,
    challenges: ChallengeCache,
    messages: mpsc::Sender<ApplicationMessage>,
    frames_seen: u64,
}

impl<D: RadioDriver, O: FirmwareOracle> EspNowHost<D, O> {
    /// Build a host around a radio driver, the shared crypt and a firmware
    /// oracle. Returns the host and the receiver on which verified
    /// application messages arrive.
    pub fn new(
        driver: D,
        crypt: EspNowCrypt,
        oracle: O,
    ) -> (Self, mpsc::Receiver<ApplicationMessage>) {
        let (messages, receiver) = mpsc::channel(MESSAGE_CHANNEL_DEPTH);
        let host = Self {
            shim: RadioShim::new(driver, HOST_RECEIVE_QUEUE_DEPTH),
            crypt,
            oracle,
            challenges: ChallengeCache::new(),
            messages,
            frames_seen: 0,
        };
        (host, receiver)
    }

    /// Process received frames until every radio callback handle is dropped.
    pub async fn run(mut self) {
        while let Some(datagram) = self.shim.recv_next().await {
            self.handle_datagram(datagram);
        }
    }

    /// Process a single received datagram.
    fn handle_datagram(&mut self, datagram: Datagram) {
        self.frames_seen += 1;
        if let Some(outcome) = self.shim.take_delivery() {
            debug!("[#{}] previous reply: {outcome:?}", self.frames_seen);
        }

        let mac = datagram.mac;
        let plaintext = match self.crypt.decrypt_frame(datagram.data()) {
            Ok(plaintext) => plaintext,
            Err(error) => {
                warn!(
                    "[#{}] failed to decrypt message from {mac}: {error}",
                    self.frames_seen
                );
                return;
            }
        };

        match Frame::decode(&plaintext) {
            Ok(Frame::Application { header, payload }) => {
                self.handle_application(mac, header, payload)
            }
            Ok(Frame::DiscoveryRequest(request)) => self.handle_discovery_request(mac, request),
            Ok(Frame::ChallengeRequest(request)) => self.handle_challenge_request(mac, request),
            Ok(other) => {
                warn!(
                    "[#{}] unexpected host-bound frame from {mac}: {other:?}",
                    self.frames_seen
                );
            }
            Err(error) => {
                warn!("[#{}] undecodable frame from {mac}: {error}", self.frames_seen);
            }
        }
    }

    fn handle_application(&mut self, mac: MacAddress, header: ApplicationHeader, payload: Vec<u8>) {
        info!(
            "[#{}] application message from {mac} with challenge {}",
            self.frames_seen, header.header_challenge
        );

        match self.challenges.pending(mac) {
            None => {
                warn!(
                    "[#{}] no challenge registered for {mac} (received: {})",
                    self.frames_seen, header.header_challenge
                );
            }
            Some(expected) if expected == header.header_challenge => {
                self.challenges.consume(mac, expected);
                let message = ApplicationMessage {
                    metadata: MessageMetadata {
                        retries: header.retries,
                        mac,
                    },
                    payload,
                };
                if self.messages.try_send(message).is_err() {
                    warn!(
                        "[#{}] application sink full or gone, dropping message from {mac}",
                        self.frames_seen
                    );
                }
            }
            Some(expected) => {
                warn!(
                    "[#{}] challenge mismatch for {mac} (expected: {expected}, got: {})",
                    self.frames_seen, header.header_challenge
                );
                // One strike: a wrong guess drains the entry so the value
                // cannot be brute-forced incrementally.
                self.challenges.invalidate(mac);
            }
        }
    }

    fn handle_discovery_request(&mut self, mac: MacAddress, request: DiscoveryRequest) {
        info!(
            "[#{}] discovery request from {mac}, sending reply",
            self.frames_seen
        );
        let response = DiscoveryResponse {
            discovery_challenge: request.discovery_challenge,
            channel: self.shim.channel(),
        };
        self.send_to_temporary_peer(mac, &response.to_bytes());
    }

    fn handle_challenge_request(&mut self, mac: MacAddress, request: ChallengeRequest) {
        info!(
            "[#{}] challenge request from {mac}, firmware version {}",
            self.frames_seen, request.firmware_version
        );

        if let Some(update) = self.oracle.lookup(mac, request.firmware_version) {
            info!("[#{}] sending firmware update response to {mac}", self.frames_seen);
            let response = ChallengeFirmwareResponse {
                challenge_challenge: request.challenge_challenge,
                wifi_ssid: update.wifi_ssid,
                wifi_password: update.wifi_password,
                url: update.url,
                md5: update.md5,
            };
            self.send_to_temporary_peer(mac, &response.to_bytes());
            return;
        }

        // Reuse any unconsumed challenge so a node that missed the previous
        // reply and asks again stays in sync with us.
        let header_challenge = self.challenges.get_or_issue(mac);
        info!(
            "[#{}] sending challenge response to {mac} with challenge {header_challenge}",
            self.frames_seen
        );
        let response = ChallengeResponse {
            challenge_challenge: request.challenge_challenge,
            header_challenge,
        };
        self.send_to_temporary_peer(mac, &response.to_bytes());
    }

    /// Encrypt and send one reply through a transient peer table entry.
    fn send_to_temporary_peer(&mut self, mac: MacAddress, frame: &[u8]) {
        if let Err(error) = self.try_send_to_temporary_peer(mac, frame) {
            warn!("[#{}] reply to {mac} failed: {error}", self.frames_seen);
        }
    }

    fn try_send_to_temporary_peer(&mut self, mac: MacAddress, frame: &[u8]) -> Result<(), HostError> {
        let wire = self.crypt.encrypt_frame(frame)?;
        self.shim.add_peer(mac)?;
        let sent = self.shim.send(mac, &wire);
        // The slot is released no matter how the send went; leaking it would
        // eventually exhaust the radio's peer table.
        let removed = self.shim.remove_peer(mac);
        sent?;
        removed?;
        debug!("[#{}] reply sent (not yet delivered)", self.frames_seen);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MESSAGE_ID_CHALLENGE_FIRMWARE_RESPONSE, MESSAGE_ID_CHALLENGE_RESPONSE};
    use std::sync::{Arc, Mutex};

    fn node() -> MacAddress {
        MacAddress::from_bytes([0x54, 0x32, 0x04, 0x01, 0x76, 0x48])
    }

    #[derive(Clone, Default)]
    struct RecordingDriver {
        sent: Arc<Mutex<Vec<(MacAddress, Vec<u8>)>>>,
        peers: Arc<Mutex<Vec<MacAddress>>>,
        peer_ops: Arc<Mutex<Vec<String>>>,
    }

    impl RadioDriver for RecordingDriver {
        fn register(&mut self, _events: crate::radio::RadioEvents) {}
        fn send(&mut self, dest: MacAddress, frame: &[u8]) -> Result<(), crate::core::RadioError> {
            self.sent.lock().unwrap().push((dest, frame.to_vec()));
            Ok(())
        }
        fn set_channel(&mut self, _channel: u8) -> Result<(), crate::core::RadioError> {
            Ok(())
        }
        fn channel(&self) -> u8 {
            6
        }
        fn add_peer(&mut self, peer: MacAddress) -> Result<(), crate::core::RadioError> {
            self.peers.lock().unwrap().push(peer);
            self.peer_ops.lock().unwrap().push(format!("add {peer}"));
            Ok(())
        }
        fn remove_peer(&mut self, peer: MacAddress) -> Result<(), crate::core::RadioError> {
            self.peers.lock().unwrap().retain(|p| *p != peer);
            self.peer_ops.lock().unwrap().push(format!("del {peer}"));
            Ok(())
        }
    }

    fn crypt() -> EspNowCrypt {
        EspNowCrypt::new(b"0123456789ABCDEF", b"01234567")
    }

    type TestHost = EspNowHost<RecordingDriver, fn(MacAddress, u32) -> Option<FirmwareUpdate>>;

    fn host_without_updates() -> (
        TestHost,
        mpsc::Receiver<ApplicationMessage>,
        RecordingDriver,
    ) {
        let driver = RecordingDriver::default();
        let oracle: fn(MacAddress, u32) -> Option<FirmwareUpdate> = |_, _| None;
        let (host, messages) = EspNowHost::new(driver.clone(), crypt(), oracle);
        (host, messages, driver)
    }

    fn deliver<O: FirmwareOracle>(
        host: &mut EspNowHost<RecordingDriver, O>,
        mac: MacAddress,
        inner: &[u8],
    ) {
        let wire = crypt().encrypt_frame(inner).unwrap();
        host.handle_datagram(Datagram::new(mac, &wire));
    }

    fn last_reply(driver: &RecordingDriver) -> Vec<u8> {
        let sent = driver.sent.lock().unwrap();
        let (_, wire) = sent.last().expect("no reply sent");
        crypt().decrypt_frame(wire).unwrap()
    }

    fn request_challenge(host: &mut TestHost, driver: &RecordingDriver, cc: u32) -> u32 {
        deliver(
            host,
            node(),
            &ChallengeRequest {
                firmware_version: 7,
                challenge_challenge: cc,
            }
            .to_bytes(),
        );
        let reply = last_reply(driver);
        assert_eq!(reply[0], MESSAGE_ID_CHALLENGE_RESPONSE);
        let response = ChallengeResponse::from_bytes(&reply).unwrap();
        assert_eq!(response.challenge_challenge, cc);
        response.header_challenge
    }

    fn application_frame(retries: u16, header_challenge: u32, payload: &[u8]) -> Vec<u8> {
        let mut frame = ApplicationHeader {
            retries,
            header_challenge,
        }
        .to_bytes()
        .to_vec();
        frame.extend_from_slice(payload);
        frame
    }

    #[tokio::test]
    async fn test_discovery_reply_echoes_challenge_and_channel() {
        let (mut host, _messages, driver) = host_without_updates();
        deliver(
            &mut host,
            node(),
            &DiscoveryRequest {
                discovery_challenge: 0xAABBCCDD,
            }
            .to_bytes(),
        );

        let reply = DiscoveryResponse::from_bytes(&last_reply(&driver)).unwrap();
        assert_eq!(reply.discovery_challenge, 0xAABBCCDD);
        assert_eq!(reply.channel, 6);

        // Temporary peer: added, then removed right after the send.
        let ops = driver.peer_ops.lock().unwrap();
        assert_eq!(
            *ops,
            vec![format!("add {}", node()), format!("del {}", node())]
        );
        assert!(driver.peers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_challenge_lifecycle_one_shot() {
        let (mut host, mut messages, driver) = host_without_updates();

        // Two consecutive requests without a consume reissue the same value.
        let first = request_challenge(&mut host, &driver, 0x10203040);
        let second = request_challenge(&mut host, &driver, 0x50607080);
        assert_eq!(first, second);

        deliver(&mut host, node(), &application_frame(0, first, &[1, 2, 3, 4, 5]));
        let message = messages.try_recv().unwrap();
        assert_eq!(message.metadata.mac, node());
        assert_eq!(message.metadata.retries, 0);
        assert_eq!(&message.payload[..5], &[1, 2, 3, 4, 5]);

        // Immediate replay of the exact same frame: no entry left, dropped.
        deliver(&mut host, node(), &application_frame(0, first, &[1, 2, 3, 4, 5]));
        assert!(messages.try_recv().is_err());

        // The next exchange issues a fresh nonce.
        let third = request_challenge(&mut host, &driver, 0x11111111);
        assert_ne!(third, first);
    }

    #[tokio::test]
    async fn test_challenge_mismatch_drains_entry() {
        let (mut host, mut messages, driver) = host_without_updates();
        let challenge = request_challenge(&mut host, &driver, 0x10203040);

        deliver(&mut host, node(), &application_frame(0, challenge ^ 1, b"x"));
        assert!(messages.try_recv().is_err());

        // One wrong guess deleted the entry; a fresh nonce is issued next.
        let fresh = request_challenge(&mut host, &driver, 0x10203041);
        assert_ne!(fresh, challenge);

        // And the old value is dead even if replayed now.
        deliver(&mut host, node(), &application_frame(0, challenge, b"x"));
        assert!(messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_application_without_challenge_dropped() {
        let (mut host, mut messages, _driver) = host_without_updates();
        deliver(&mut host, node(), &application_frame(0, 0xDEAD, b"payload"));
        assert!(messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_firmware_update_branch_skips_cache() {
        let driver = RecordingDriver::default();
        let oracle = |_mac: MacAddress, version: u32| {
            assert_eq!(version, 7);
            Some(FirmwareUpdate {
                wifi_ssid: "w".into(),
                wifi_password: "p".into(),
                url: "http://s/fw.bin".into(),
                md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
            })
        };
        let (mut host, _messages) = EspNowHost::new(driver.clone(), crypt(), oracle);

        deliver(
            &mut host,
            node(),
            &ChallengeRequest {
                firmware_version: 7,
                challenge_challenge: 0x10203040,
            }
            .to_bytes(),
        );

        let reply = last_reply(&driver);
        assert_eq!(reply[0], MESSAGE_ID_CHALLENGE_FIRMWARE_RESPONSE);
        let response = ChallengeFirmwareResponse::from_bytes(&reply).unwrap();
        assert_eq!(response.challenge_challenge, 0x10203040);
        assert_eq!(response.url, "http://s/fw.bin");

        // The cache was not touched by the firmware branch.
        assert!(host.challenges.is_empty());
    }

    #[tokio::test]
    async fn test_undecryptable_and_unknown_frames_dropped() {
        let (mut host, mut messages, driver) = host_without_updates();

        // Garbage that fails decryption.
        host.handle_datagram(Datagram::new(node(), &[0u8; 40]));
        // Valid envelope around an unknown id.
        deliver(&mut host, node(), &[0x99, 1, 2, 3]);

        assert!(messages.try_recv().is_err());
        assert!(driver.sent.lock().unwrap().is_empty());
    }
}
