//! Thin adapter over the datagram radio.
//!
//! The driver below this shim is platform code (ESP-NOW, a test harness, ...)
//! and is consumed through [`RadioDriver`]. The shim owns the two primitives
//! the protocol needs on top of raw datagrams:
//!
//! - a bounded FIFO of received datagrams, copied out of callback context;
//! - a coalescing delivery flag, cleared by the sender before each transmit so
//!   only the report for the frame in flight is ever observed.
//!
//! Driver callbacks go through [`RadioEvents`], which never blocks and never
//! calls back into user code; it is safe to invoke from an ISR-adjacent
//! context (a dedicated callback task or thread).

use std::time::Duration;

use log::trace;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::core::{MacAddress, RadioError, MAX_WIRE_FRAME};

/// Outcome of a transmission, as reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The peer acknowledged the frame at the MAC layer.
    Delivered,
    /// The radio gave up on the frame.
    Failed,
}

/// One received datagram, copied out of the driver callback.
#[derive(Debug, Clone, Copy)]
pub struct Datagram {
    /// MAC address of the sender.
    pub mac: MacAddress,
    len: usize,
    data: [u8; MAX_WIRE_FRAME],
}

impl Datagram {
    /// Copy a received frame into a queue element. Oversized input is
    /// truncated at the radio MTU.
    pub fn new(mac: MacAddress, bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_WIRE_FRAME);
        let mut data = [0u8; MAX_WIRE_FRAME];
        data[..len].copy_from_slice(&bytes[..len]);
        Self { mac, len, data }
    }

    /// The received bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Callback handle given to the driver at registration.
///
/// Both methods are non-blocking and allocation-free; a full receive queue
/// drops the datagram.
#[derive(Clone)]
pub struct RadioEvents {
    receive: mpsc::Sender<Datagram>,
    delivery: watch::Sender<Option<Delivery>>,
}

impl RadioEvents {
    /// Report a received datagram.
    pub fn on_receive(&self, mac: MacAddress, bytes: &[u8]) {
        if self.receive.try_send(Datagram::new(mac, bytes)).is_err() {
            trace!("receive queue full, dropping datagram from {mac}");
        }
    }

    /// Report the delivery outcome of the last transmission to `mac`.
    pub fn on_delivery(&self, mac: MacAddress, delivered: bool) {
        trace!(
            "delivery report for {mac}: {}",
            if delivered { "delivered" } else { "failed" }
        );
        self.delivery.send_replace(Some(if delivered {
            Delivery::Delivered
        } else {
            Delivery::Failed
        }));
    }
}

/// Contract the platform radio driver implements.
///
/// `send` submits without blocking; the outcome arrives later through
/// [`RadioEvents::on_delivery`]. `set_channel` must report
/// [`RadioError::ChannelNotPermitted`] for channels disallowed in the current
/// region so the discovery scan can skip them.
pub trait RadioDriver {
    /// Install the callback handle. Called once when the shim is built.
    fn register(&mut self, events: RadioEvents);

    /// Submit one datagram to `dest`.
    fn send(&mut self, dest: MacAddress, frame: &[u8]) -> Result<(), RadioError>;

    /// Tune to a WiFi channel.
    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError>;

    /// The channel the radio is currently on.
    fn channel(&self) -> u8;

    /// Register a peer in the radio's peer table.
    fn add_peer(&mut self, peer: MacAddress) -> Result<(), RadioError>;

    /// Remove a peer from the radio's peer table.
    fn remove_peer(&mut self, peer: MacAddress) -> Result<(), RadioError>;

    /// Tear the radio down. Default is a no-op.
    fn shutdown(&mut self) {}
}

/// The shim: a driver plus the receive queue and delivery flag.
pub struct RadioShim<D: RadioDriver> {
    driver: D,
    receive: mpsc::Receiver<Datagram>,
    delivery: watch::Receiver<Option<Delivery>>,
    delivery_tx: watch::Sender<Option<Delivery>>,
}

impl<D: RadioDriver> RadioShim<D> {
    /// Build the shim around a driver and register the callback handle.
    pub fn new(mut driver: D, queue_depth: usize) -> Self {
        let (receive_tx, receive) = mpsc::channel(queue_depth);
        let (delivery_tx, delivery) = watch::channel(None);
        driver.register(RadioEvents {
            receive: receive_tx,
            delivery: delivery_tx.clone(),
        });
        Self {
            driver,
            receive,
            delivery,
            delivery_tx,
        }
    }

    /// Submit a frame. Clears the delivery flag first so a later
    /// [`RadioShim::wait_delivery`] only sees this frame's outcome.
    pub fn send(&mut self, dest: MacAddress, frame: &[u8]) -> Result<(), RadioError> {
        self.delivery_tx.send_replace(None);
        self.driver.send(dest, frame)
    }

    /// Wait up to `wait` for the delivery report of the frame in flight.
    pub async fn wait_delivery(&mut self, wait: Duration) -> Option<Delivery> {
        let outcome = {
            let changed = self.delivery.wait_for(|d| d.is_some());
            match timeout(wait, changed).await {
                Ok(Ok(value)) => *value,
                _ => None,
            }
        };
        if outcome.is_some() {
            self.delivery_tx.send_replace(None);
        }
        outcome
    }

    /// Non-blocking read of the delivery flag, consuming it if set.
    pub fn take_delivery(&mut self) -> Option<Delivery> {
        let outcome = *self.delivery.borrow();
        if outcome.is_some() {
            self.delivery_tx.send_replace(None);
        }
        outcome
    }

    /// Wait up to `wait` for the next received datagram.
    pub async fn recv(&mut self, wait: Duration) -> Option<Datagram> {
        timeout(wait, self.receive.recv()).await.ok().flatten()
    }

    /// Wait indefinitely for the next received datagram. Returns `None` once
    /// every [`RadioEvents`] clone is gone.
    pub async fn recv_next(&mut self) -> Option<Datagram> {
        self.receive.recv().await
    }

    /// Discard everything currently queued.
    pub fn drain(&mut self) {
        while self.receive.try_recv().is_ok() {}
    }

    /// Tune the driver to a channel.
    pub fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        self.driver.set_channel(channel)
    }

    /// The channel the radio is currently on.
    pub fn channel(&self) -> u8 {
        self.driver.channel()
    }

    /// Register a peer.
    pub fn add_peer(&mut self, peer: MacAddress) -> Result<(), RadioError> {
        self.driver.add_peer(peer)
    }

    /// Remove a peer.
    pub fn remove_peer(&mut self, peer: MacAddress) -> Result<(), RadioError> {
        self.driver.remove_peer(peer)
    }

    /// Tear the driver down.
    pub fn shutdown(&mut self) {
        self.driver.shutdown();
    }
}
