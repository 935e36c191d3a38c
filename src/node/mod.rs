//! The node: a battery-oriented endpoint that discovers a host, exchanges
//! authenticated application messages and accepts firmware-update directives.
//!
//! A node lives through `setup()` (load persisted host or run the discovery
//! scan), any number of `send_message()` calls (challenge handshake, then the
//! application frame with delivery retries) and `teardown()` before sleep.
//! When a challenge exchange returns firmware directives instead, the pending
//! application payload is still sent first, then the node hands itself over to
//! the OTA pipeline and reboots.

use std::time::Duration;

use log::{debug, error, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::time::sleep;

use crate::core::{
    is_valid_wifi_channel, MacAddress, NodeError, OtaError, PrefsError, CHALLENGE_ATTEMPTS,
    DELIVERY_TIMEOUT, DISCOVERY_ATTEMPTS, NODE_RECEIVE_QUEUE_DEPTH, OTA_REBOOT_DELAY,
    OTA_WIFI_CONNECT_RETRIES, OTA_WIFI_CONNECT_TIMEOUT, REPLY_TIMEOUT, RETRY_BACKOFF_STEP,
    WIFI_CHANNEL_HIGHEST, WIFI_CHANNEL_LOWEST,
};
use crate::crypt::EspNowCrypt;
use crate::prefs::{NodePreferences, PreferenceStore};
use crate::radio::{Delivery, RadioDriver, RadioShim};
use crate::wire::{
    ApplicationHeader, ChallengeFirmwareResponse, ChallengeRequest, DiscoveryRequest, Frame,
};

/// Status transitions reported through the node's status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// No valid persisted host MAC/channel; the discovery scan is starting.
    HostDiscoveryStarted,
    /// A host answered; its MAC and channel are now persisted.
    HostDiscoverySuccessful,
    /// No host answered any discovery attempt. The host is most probably
    /// offline; the caller may retry or go back to sleep.
    HostDiscoveryFailed,
    /// The persisted host never answered a challenge request. It has been
    /// forgotten and a fresh `setup()` is required.
    InvalidHost,
    /// The host directed a firmware update; the OTA pipeline is starting.
    FirmwareUpdateStarted,
    /// Firmware update succeeded; the device reboots into the new image.
    FirmwareUpdateSuccessful,
    /// Firmware update failed; the device reboots into the old image.
    FirmwareUpdateFailed,
    /// WiFi could not be brought up for the update; the device reboots.
    FirmwareUpdateWifiSetupFailed,
}

/// The node's view of the OTA subsystem.
///
/// [`crate::ota::OtaUpdater`] is the provided implementation; tests substitute
/// a recorder. `restart` does not return on real hardware.
pub trait FirmwareUpdater {
    /// Bring up WiFi and connect to the given access point.
    fn connect_wifi(
        &mut self,
        ssid: &str,
        password: &str,
        timeout: Duration,
        retries: u16,
    ) -> impl std::future::Future<Output = Result<(), OtaError>> + Send;

    /// Stream the image at `url` onto the next OTA partition, verifying the
    /// optional hex MD5.
    fn update_from(
        &mut self,
        url: &str,
        md5: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), OtaError>> + Send;

    /// Reboot the device.
    fn restart(&mut self);
}

type StatusCallback = Box<dyn Fn(NodeStatus) + Send + Sync>;

/// The node engine.
pub struct EspNowNode<D: RadioDriver, P: PreferenceStore, U: FirmwareUpdater> {
    shim: RadioShim<D>,
    crypt: EspNowCrypt,
    prefs: NodePreferences<P>,
    updater: U,
    firmware_version: u32,
    on_status: Option<StatusCallback>,
    host: MacAddress,
    setup_successful: bool,
}

impl<D: RadioDriver, P: PreferenceStore, U: FirmwareUpdater> EspNowNode<D, P, U> {
    /// Build a node around a radio driver, the shared crypt, the preference
    /// store and the OTA subsystem. `firmware_version` is the incremental
    /// version this node currently runs, reported in every challenge request.
    pub fn new(
        driver: D,
        crypt: EspNowCrypt,
        store: P,
        updater: U,
        firmware_version: u32,
    ) -> Self {
        Self {
            shim: RadioShim::new(driver, NODE_RECEIVE_QUEUE_DEPTH),
            crypt,
            prefs: NodePreferences::new(store),
            updater,
            firmware_version,
            on_status: None,
            host: MacAddress::BROADCAST,
            setup_successful: false,
        }
    }

    /// Install a status callback. Called at the transition points documented
    /// on [`NodeStatus`].
    pub fn on_status(mut self, callback: impl Fn(NodeStatus) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Box::new(callback));
        self
    }

    /// Prepare the node for sending.
    ///
    /// With a valid persisted `{host MAC, channel}` pair this just tunes the
    /// radio and registers the host peer. Otherwise it runs the discovery
    /// scan and persists what it learns. Must complete before the first
    /// [`EspNowNode::send_message`].
    pub async fn setup(&mut self) -> Result<(), NodeError> {
        if self.setup_successful {
            warn!("already have successful setup");
            return Ok(());
        }

        let mut valid_configuration = false;
        if let (Some(mac), Some(channel)) = (self.prefs.host_mac(), self.prefs.channel()) {
            info!("presumably valid host {mac} and wifi channel {channel} loaded");
            match self.shim.set_channel(channel) {
                Ok(()) => {
                    self.host = mac;
                    valid_configuration = true;
                }
                Err(error) => {
                    // Possible when the persisted channel is not allowed in
                    // this region; fall through to discovery.
                    warn!("failed to set wifi channel {channel}: {error}");
                }
            }
        }

        if !valid_configuration {
            info!("no valid host MAC and/or wifi channel, going into discovery mode");
            self.host = MacAddress::BROADCAST;
        }

        // Delete any stale registration first; failure here is expected.
        let _ = self.shim.remove_peer(self.host);
        if let Err(error) = self.shim.add_peer(self.host) {
            error!("peer adding failure: {error}");
            self.teardown();
            return Err(error.into());
        }

        if valid_configuration {
            self.setup_successful = true;
            return Ok(());
        }

        match self.discover().await {
            Ok(()) => {
                self.setup_successful = true;
                Ok(())
            }
            Err(error) => {
                // Teardown so the caller can try again from scratch.
                self.teardown();
                Err(error)
            }
        }
    }

    /// Broadcast discovery requests across the channel range until a host
    /// answers, then persist and adopt what it taught us.
    async fn discover(&mut self) -> Result<(), NodeError> {
        self.emit(NodeStatus::HostDiscoveryStarted);

        let mut next_channel = WIFI_CHANNEL_LOWEST;
        for attempt in 0..DISCOVERY_ATTEMPTS {
            let channel = next_channel;
            next_channel = if channel >= WIFI_CHANNEL_HIGHEST {
                WIFI_CHANNEL_LOWEST
            } else {
                channel + 1
            };

            if let Err(error) = self.shim.set_channel(channel) {
                // Not allowed in this region; skip it.
                warn!("failed to set wifi channel {channel} in discovery mode, skipping: {error}");
                continue;
            }

            let request = DiscoveryRequest {
                discovery_challenge: OsRng.next_u32(),
            };
            info!("sending broadcast discovery request on channel {channel} ({attempt})");
            let Some((mac, reply)) = self.send_and_wait(&request.to_bytes()).await else {
                continue;
            };

            match Frame::decode(&reply) {
                Ok(Frame::DiscoveryResponse(response))
                    if response.discovery_challenge == request.discovery_challenge
                        && is_valid_wifi_channel(response.channel) =>
                {
                    info!("got valid discovery response from {mac} on channel {}", response.channel);
                    self.prefs.set_host_mac(mac)?;
                    self.prefs.set_channel(response.channel)?;
                    self.prefs.commit()?;
                    self.emit(NodeStatus::HostDiscoverySuccessful);

                    if let Err(error) = self.shim.set_channel(response.channel) {
                        // The host's channel is not usable here. Unrecoverable.
                        error!("failed to set wifi channel {} received from host: {error}", response.channel);
                        break;
                    }
                    let _ = self.shim.remove_peer(self.host);
                    self.host = mac;
                    if let Err(error) = self.shim.add_peer(mac) {
                        error!("failed to add host peer: {error}");
                        break;
                    }
                    return Ok(());
                }
                _ => warn!("got invalid discovery response, retrying"),
            }
        }

        self.emit(NodeStatus::HostDiscoveryFailed);
        error!("failed to discover host, setup failed");
        Err(NodeError::DiscoveryFailed)
    }

    /// Send an application message to the host.
    ///
    /// Runs the challenge handshake first, then transmits the application
    /// frame, retrying on delivery failure up to `retries` times with a
    /// linear backoff. A negative `retries` sends once without waiting for
    /// the delivery report. [`crate::core::MESSAGE_RETRIES`] is the
    /// conventional default.
    pub async fn send_message(&mut self, payload: &[u8], retries: i16) -> Result<(), NodeError> {
        if !self.setup_successful {
            return Err(NodeError::NotSetUp);
        }

        let (header_challenge, firmware_update) = match self.request_challenge().await {
            Some(outcome) => outcome,
            None => {
                error!(
                    "failed to receive challenge response; assuming invalid host, clearing \
                     stored MAC and wifi channel, setup() needed to re-discover"
                );
                self.forget_host()?;
                self.emit(NodeStatus::InvalidHost);
                self.teardown();
                return Err(NodeError::InvalidHost);
            }
        };

        let mut header = ApplicationHeader {
            retries: 0,
            header_challenge,
        };

        info!("sending application message (0)");
        if let Err(error) = self.send_application(&header, payload) {
            warn!("application send submit failed: {error}");
        }

        // Fire-and-forget skips the delivery wait entirely.
        let mut success = retries < 0;
        let mut attempt: u16 = 0;
        while i32::from(attempt) < i32::from(retries) {
            attempt += 1;
            match self.shim.wait_delivery(DELIVERY_TIMEOUT).await {
                Some(Delivery::Delivered) => {
                    debug!("message successfully delivered to host");
                    success = true;
                    break;
                }
                _ => {
                    // Failed report, or no report at all within the window.
                    error!("message failed to be delivered to host, will retry");
                    sleep(RETRY_BACKOFF_STEP * u32::from(attempt)).await;
                    header.retries = attempt;
                    info!("sending application message ({attempt})");
                    if let Err(error) = self.send_application(&header, payload) {
                        warn!("application send submit failed: {error}");
                    }
                }
            }
        }

        // Regardless of the send outcome, honor a pending update directive
        // now that the application payload had its chance.
        if let Some(update) = firmware_update {
            self.run_firmware_update(update).await;
        }

        if success {
            Ok(())
        } else {
            error!("failed to send message after retries");
            Err(NodeError::DeliveryFailed { attempts: attempt })
        }
    }

    /// Run the challenge request loop. Returns the header challenge to use
    /// and any stashed firmware directives, or `None` after exhausting the
    /// attempts.
    async fn request_challenge(&mut self) -> Option<(u32, Option<ChallengeFirmwareResponse>)> {
        for attempt in 0..CHALLENGE_ATTEMPTS {
            let request = ChallengeRequest {
                firmware_version: self.firmware_version,
                challenge_challenge: OsRng.next_u32(),
            };
            info!("sending challenge request ({attempt})");
            let Some((_, reply)) = self.send_and_wait(&request.to_bytes()).await else {
                continue;
            };

            match Frame::decode(&reply) {
                Ok(Frame::ChallengeResponse(response)) => {
                    if response.challenge_challenge == request.challenge_challenge {
                        info!("got challenge response");
                        return Some((response.header_challenge, None));
                    }
                    warn!(
                        "challenge mismatch for challenge request/response (expected: {}, got: {})",
                        request.challenge_challenge, response.challenge_challenge
                    );
                }
                Ok(Frame::ChallengeFirmwareResponse(response)) => {
                    if response.challenge_challenge == request.challenge_challenge {
                        // The host wants new firmware on this node. The wire
                        // variant carries no header challenge; the message is
                        // still sent first, then the update runs.
                        info!("got challenge firmware response");
                        return Some((0, Some(response)));
                    }
                    warn!(
                        "challenge mismatch for challenge request/firmware response \
                         (expected: {}, got: {})",
                        request.challenge_challenge, response.challenge_challenge
                    );
                }
                _ => {}
            }
        }
        None
    }

    /// Encrypt and submit a request, then wait for one decrypted reply.
    async fn send_and_wait(&mut self, frame: &[u8]) -> Option<(MacAddress, Vec<u8>)> {
        self.shim.drain();
        if let Err(error) = self.send_encrypted(frame) {
            warn!("send submit failed: {error}");
        }

        let datagram = self.shim.recv(REPLY_TIMEOUT).await?;
        match self.crypt.decrypt_frame(datagram.data()) {
            Ok(plaintext) => Some((datagram.mac, plaintext)),
            Err(_) => None,
        }
    }

    /// Rebuild, re-encrypt and submit the application frame. Each retry runs
    /// through here again so the header's retry count is authenticated too.
    fn send_application(
        &mut self,
        header: &ApplicationHeader,
        payload: &[u8],
    ) -> Result<(), NodeError> {
        let mut frame = Vec::with_capacity(ApplicationHeader::SIZE + payload.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(payload);
        self.send_encrypted(&frame)
    }

    fn send_encrypted(&mut self, frame: &[u8]) -> Result<(), NodeError> {
        let wire = self.crypt.encrypt_frame(frame)?;
        self.shim.send(self.host, &wire)?;
        debug!("message sent OK (not yet delivered)");
        Ok(())
    }

    /// Tear down ESP-NOW, bring up WiFi and flash the announced image. Ends
    /// in a reboot on hardware, on both the success and the failure path.
    async fn run_firmware_update(&mut self, update: ChallengeFirmwareResponse) {
        self.emit(NodeStatus::FirmwareUpdateStarted);
        info!("starting firmware update from {}", update.url);

        // The OTA pipeline owns the airwaves from here on.
        self.teardown();

        let connected = self
            .updater
            .connect_wifi(
                &update.wifi_ssid,
                &update.wifi_password,
                OTA_WIFI_CONNECT_TIMEOUT,
                OTA_WIFI_CONNECT_RETRIES,
            )
            .await;
        if let Err(error) = connected {
            error!("connection to wifi failed ({error}), restarting");
            self.emit(NodeStatus::FirmwareUpdateWifiSetupFailed);
            sleep(OTA_REBOOT_DELAY).await;
            self.updater.restart();
            return;
        }

        let md5 = Some(update.md5.as_str()).filter(|m| !m.is_empty());
        match self.updater.update_from(&update.url, md5).await {
            Ok(()) => {
                info!("firmware update successful, rebooting");
                self.emit(NodeStatus::FirmwareUpdateSuccessful);
            }
            Err(error) => {
                error!("firmware update failed ({error}), rebooting");
                self.emit(NodeStatus::FirmwareUpdateFailed);
            }
        }
        sleep(OTA_REBOOT_DELAY).await;
        self.updater.restart();
    }

    /// Erase the persisted host so the next `setup()` rediscovers. Also
    /// disables `send_message()` until then.
    pub fn forget_host(&mut self) -> Result<(), PrefsError> {
        self.prefs.erase_all()?;
        self.prefs.commit()?;
        self.host = MacAddress::BROADCAST;
        Ok(())
    }

    /// Invalidate the setup and release radio resources. Useful before any
    /// kind of sleep; a new `setup()` call is needed afterwards.
    pub fn teardown(&mut self) {
        self.setup_successful = false;
        let _ = self.shim.remove_peer(self.host);
        self.host = MacAddress::BROADCAST;
        self.shim.shutdown();
    }

    fn emit(&self, status: NodeStatus) {
        if let Some(callback) = &self.on_status {
            callback(status);
        }
    }
}
