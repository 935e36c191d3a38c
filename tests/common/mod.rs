//! In-memory radio pair wiring one node and one host together, plus the
//! recording doubles the scenarios need.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use espnow_network::prelude::*;

pub const KEY: &[u8; 16] = b"0123456789ABCDEF";
pub const SECRET: &[u8; 8] = b"01234567";

pub fn crypt() -> EspNowCrypt {
    EspNowCrypt::new(KEY, SECRET)
}

pub fn node_mac() -> MacAddress {
    MacAddress::from_bytes([0xA0, 0xB1, 0xC2, 0xD3, 0xE4, 0xF5])
}

pub fn host_mac() -> MacAddress {
    MacAddress::from_bytes([0x54, 0x32, 0x04, 0x01, 0x76, 0x48])
}

#[derive(Default)]
struct LinkState {
    node_events: Option<RadioEvents>,
    host_events: Option<RadioEvents>,
    node_channel: u8,
    host_channel: u8,
    blocked_channels: Vec<u8>,
    node_sends: u64,
    exempt_sends: u32,
    injected_failures: u32,
    host_down: bool,
}

/// The shared airwaves. Frames cross only when both radios are on the same
/// channel; delivery reports are generated synchronously.
#[derive(Clone)]
pub struct Link(Arc<Mutex<LinkState>>);

impl Link {
    pub fn new(host_channel: u8) -> Self {
        Link(Arc::new(Mutex::new(LinkState {
            host_channel,
            node_channel: 1,
            ..LinkState::default()
        })))
    }

    pub fn node_driver(&self) -> NodeDriver {
        NodeDriver { link: self.clone() }
    }

    pub fn host_driver(&self) -> HostDriver {
        HostDriver { link: self.clone() }
    }

    /// Make `set_channel(channel)` fail on the node, as a region restriction
    /// would.
    pub fn block_channel(&self, channel: u8) {
        self.0.lock().unwrap().blocked_channels.push(channel);
    }

    /// After the next `skip` node sends, report the following `fail` sends as
    /// not delivered (and drop them).
    pub fn arm_delivery_failures(&self, skip: u32, fail: u32) {
        let mut state = self.0.lock().unwrap();
        state.exempt_sends = skip;
        state.injected_failures = fail;
    }

    /// Stop forwarding node frames to the host.
    pub fn set_host_down(&self, down: bool) {
        self.0.lock().unwrap().host_down = down;
    }

    pub fn node_send_count(&self) -> u64 {
        self.0.lock().unwrap().node_sends
    }
}

pub struct NodeDriver {
    link: Link,
}

impl RadioDriver for NodeDriver {
    fn register(&mut self, events: RadioEvents) {
        self.link.0.lock().unwrap().node_events = Some(events);
    }

    fn send(&mut self, dest: MacAddress, frame: &[u8]) -> Result<(), RadioError> {
        let mut state = self.link.0.lock().unwrap();
        state.node_sends += 1;

        let inject_failure = if state.exempt_sends > 0 {
            state.exempt_sends -= 1;
            false
        } else if state.injected_failures > 0 {
            state.injected_failures -= 1;
            true
        } else {
            false
        };

        let delivered =
            !inject_failure && !state.host_down && state.node_channel == state.host_channel;
        if delivered {
            if let Some(events) = &state.host_events {
                events.on_receive(node_mac(), frame);
            }
        }
        if let Some(events) = &state.node_events {
            events.on_delivery(dest, delivered);
        }
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        let mut state = self.link.0.lock().unwrap();
        if state.blocked_channels.contains(&channel) {
            return Err(RadioError::ChannelNotPermitted(channel));
        }
        state.node_channel = channel;
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.link.0.lock().unwrap().node_channel
    }

    fn add_peer(&mut self, _peer: MacAddress) -> Result<(), RadioError> {
        Ok(())
    }

    fn remove_peer(&mut self, _peer: MacAddress) -> Result<(), RadioError> {
        Ok(())
    }
}

pub struct HostDriver {
    link: Link,
}

impl RadioDriver for HostDriver {
    fn register(&mut self, events: RadioEvents) {
        self.link.0.lock().unwrap().host_events = Some(events);
    }

    fn send(&mut self, dest: MacAddress, frame: &[u8]) -> Result<(), RadioError> {
        let state = self.link.0.lock().unwrap();
        let delivered = state.node_channel == state.host_channel;
        if delivered {
            if let Some(events) = &state.node_events {
                events.on_receive(host_mac(), frame);
            }
        }
        if let Some(events) = &state.host_events {
            events.on_delivery(dest, delivered);
        }
        Ok(())
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        self.link.0.lock().unwrap().host_channel = channel;
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.link.0.lock().unwrap().host_channel
    }

    fn add_peer(&mut self, _peer: MacAddress) -> Result<(), RadioError> {
        Ok(())
    }

    fn remove_peer(&mut self, _peer: MacAddress) -> Result<(), RadioError> {
        Ok(())
    }
}

/// A [`PreferenceStore`] the test can keep a handle on after the node takes
/// ownership of its clone.
#[derive(Clone, Default)]
pub struct SharedStore(Arc<Mutex<MemoryStore>>);

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for SharedStore {
    fn set_blob(&mut self, key: &'static str, value: &[u8]) -> Result<(), PrefsError> {
        self.0.lock().unwrap().set_blob(key, value)
    }
    fn get_blob(&self, key: &'static str, out: &mut [u8]) -> Result<usize, PrefsError> {
        self.0.lock().unwrap().get_blob(key, out)
    }
    fn set_u8(&mut self, key: &'static str, value: u8) -> Result<(), PrefsError> {
        self.0.lock().unwrap().set_u8(key, value)
    }
    fn get_u8(&self, key: &'static str) -> Result<u8, PrefsError> {
        self.0.lock().unwrap().get_u8(key)
    }
    fn erase_all(&mut self) -> Result<(), PrefsError> {
        self.0.lock().unwrap().erase_all()
    }
    fn commit(&mut self) -> Result<(), PrefsError> {
        self.0.lock().unwrap().commit()
    }
}

/// [`FirmwareUpdater`] double that records its calls instead of flashing.
#[derive(Clone, Default)]
pub struct RecordingUpdater {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_wifi: bool,
    pub fail_update: bool,
}

impl FirmwareUpdater for RecordingUpdater {
    async fn connect_wifi(
        &mut self,
        ssid: &str,
        password: &str,
        _timeout: Duration,
        _retries: u16,
    ) -> Result<(), OtaError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("wifi {ssid}/{password}"));
        if self.fail_wifi {
            Err(OtaError::WifiConnectFailed)
        } else {
            Ok(())
        }
    }

    async fn update_from(&mut self, url: &str, md5: Option<&str>) -> Result<(), OtaError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("update {url} md5={}", md5.unwrap_or("-")));
        if self.fail_update {
            Err(OtaError::MagicMismatch(0x00))
        } else {
            Ok(())
        }
    }

    fn restart(&mut self) {
        self.calls.lock().unwrap().push("restart".into());
    }
}

/// Collects node status callbacks.
#[derive(Clone, Default)]
pub struct StatusLog(Arc<Mutex<Vec<NodeStatus>>>);

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> impl Fn(NodeStatus) + Send + Sync + 'static {
        let log = self.0.clone();
        move |status| log.lock().unwrap().push(status)
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.0.lock().unwrap().clone()
    }
}
