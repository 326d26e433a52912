//! EventSub websocket over `EspWebSocketClient`.
//!
//! The client runs its own task and calls back from there. Callbacks only
//! forward events into a channel; [`Transport::drive`] drains it on the loop
//! thread, so dispatch stays single-threaded.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use esp_idf_svc::io::EspIOError;
use esp_idf_svc::ws::client::{
    EspWebSocketClient, EspWebSocketClientConfig, WebSocketEvent, WebSocketEventType,
};
use log::{info, warn};

use crate::debug_flags;
use crate::transport::{LinkState, Transport, TransportEvent};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const BUFFER_SIZE: usize = 4096;

pub struct WsTransport {
    client: Option<EspWebSocketClient<'static>>,
    /// Bumped on every connect and disconnect; events from older clients are
    /// dropped.
    generation: u32,
    tx: Sender<(u32, TransportEvent)>,
    rx: Receiver<(u32, TransportEvent)>,
    reconnect_interval: Duration,
    link: LinkState,
}

impl WsTransport {
    pub fn new(reconnect_interval_ms: u32) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            client: None,
            generation: 0,
            tx,
            rx,
            reconnect_interval: Duration::from_millis(reconnect_interval_ms as u64),
            link: LinkState::default(),
        }
    }
}

fn translate(event: &Result<WebSocketEvent, EspIOError>) -> Option<TransportEvent> {
    match event {
        Ok(ev) => match &ev.event_type {
            WebSocketEventType::Connected => Some(TransportEvent::Connected),
            WebSocketEventType::Disconnected | WebSocketEventType::Closed => Some(TransportEvent::Disconnected),
            WebSocketEventType::Text(text) => Some(TransportEvent::Text(text.to_string())),
            WebSocketEventType::Binary(data) => Some(TransportEvent::Binary(data.len())),
            WebSocketEventType::BeforeConnect
            | WebSocketEventType::Close(_)
            | WebSocketEventType::Ping
            | WebSocketEventType::Pong => None,
        },
        Err(e) => Some(TransportEvent::Error(e.to_string())),
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, url: &str) -> anyhow::Result<()> {
        self.disconnect();

        let config = EspWebSocketClientConfig {
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            reconnect_timeout_ms: self.reconnect_interval,
            buffer_size: BUFFER_SIZE,
            ..Default::default()
        };

        let generation = self.generation;
        let tx = self.tx.clone();
        let client = EspWebSocketClient::new(url, &config, SEND_TIMEOUT, move |event| {
            if let Some(ev) = translate(event) {
                // Fails only once the transport itself is gone.
                let _ = tx.send((generation, ev));
            }
        })?;

        info!("ws: connecting to {}", url);
        self.client = Some(client);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.link.reset();
        if self.client.take().is_some() {
            info!("ws: closed by us");
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn drive(&mut self, on_event: &mut dyn FnMut(TransportEvent)) {
        while let Ok((generation, event)) = self.rx.try_recv() {
            if generation != self.generation {
                continue;
            }
            if let TransportEvent::Error(ref e) = event {
                warn!("ws: {}", e);
            }
            if debug_flags::is_on(&debug_flags::DEBUG_EVENTSUB) {
                info!("ws: {}", event);
            }
            if let Some(event) = self.link.filter(event) {
                on_event(event);
            }
        }
    }
}
