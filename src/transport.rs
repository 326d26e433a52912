//! Realtime transport contract.
//!
//! The firmware owns exactly one transport. Events are only ever delivered
//! from inside [`Transport::drive`], on the loop's own thread, so handlers may
//! mutate loop state directly.

use std::fmt;

use log::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// The remote end or the network dropped the connection.
    Disconnected,
    Text(String),
    /// Binary frame of the given length.
    Binary(usize),
    Error(String),
    /// A frame that arrived in several pieces.
    Fragment,
}

impl fmt::Display for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Connected => write!(f, "connected"),
            TransportEvent::Disconnected => write!(f, "disconnected"),
            TransportEvent::Text(t) => write!(f, "text ({} bytes)", t.len()),
            TransportEvent::Binary(n) => write!(f, "binary ({} bytes)", n),
            TransportEvent::Error(e) => write!(f, "error: {}", e),
            TransportEvent::Fragment => write!(f, "fragment"),
        }
    }
}

pub trait Transport {
    /// Start connecting to `url`. Must not block until the handshake is done;
    /// completion is reported through [`TransportEvent::Connected`].
    fn connect(&mut self, url: &str) -> anyhow::Result<()>;

    /// Tear the connection down. Does not produce a `Disconnected` event.
    fn disconnect(&mut self);

    /// True between `Connected` and the next drop or `disconnect`.
    fn is_connected(&self) -> bool;

    /// Deliver everything that arrived since the last call.
    fn drive(&mut self, on_event: &mut dyn FnMut(TransportEvent));
}

/// Handshake bookkeeping shared by transport implementations.
///
/// Clients that reconnect on their own report a drop after every failed
/// attempt, even when no connection was ever established. Only drops of a
/// completed connection reach the dispatcher; the rest are logged as connect
/// failures and left to the state machine's timeout.
#[derive(Debug, Default)]
pub struct LinkState {
    connected: bool,
    failed_connects: u32,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn failed_connects(&self) -> u32 {
        self.failed_connects
    }

    /// Forget the current connection without reporting anything.
    pub fn reset(&mut self) {
        self.connected = false;
    }

    /// Update the link state and return the event to dispatch, if any.
    pub fn filter(&mut self, event: TransportEvent) -> Option<TransportEvent> {
        match event {
            TransportEvent::Connected => {
                self.connected = true;
                self.failed_connects = 0;
                Some(event)
            }
            TransportEvent::Disconnected if !self.connected => {
                self.failed_connects += 1;
                if self.failed_connects == 1 || self.failed_connects % 10 == 0 {
                    warn!("transport: connect failed ({}x)", self.failed_connects);
                } else {
                    info!("transport: connect failed ({}x)", self.failed_connects);
                }
                None
            }
            TransportEvent::Disconnected => {
                self.connected = false;
                Some(event)
            }
            other => Some(other),
        }
    }
}
