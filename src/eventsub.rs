//! EventSub websocket messages: decoding and routing to the state machine
//! and the channel registry.

use log::{info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::channels::ChannelRegistry;
use crate::debug_flags;
use crate::helix::EventKind;
use crate::session::ConnectionMachine;
use crate::transport::TransportEvent;
use crate::views::Renderer;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message is missing `{0}`")]
    MissingField(&'static str),
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    metadata: Option<Metadata>,
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    message_type: Option<String>,
    subscription_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    session: Option<SessionPayload>,
    subscription: Option<SubscriptionPayload>,
    event: Option<EventPayload>,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    id: Option<String>,
    reconnect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPayload {
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    broadcaster_user_id: Option<String>,
    broadcaster_user_name: Option<String>,
    title: Option<String>,
    category_name: Option<String>,
}

// ── Decoded messages ────────────────────────────────────────────────

#[derive(Debug)]
pub enum Message {
    Welcome { session_id: String },
    Keepalive,
    /// The envelope was fine; the event inside may still be malformed.
    Notification(Result<Notification, DecodeError>),
    Reconnect { reconnect_url: Option<String> },
    Revocation { subscription_type: Option<String>, status: Option<String> },
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StreamOnline { broadcaster_id: String, name: String },
    StreamOffline { broadcaster_id: String, name: String },
    ChannelUpdate { broadcaster_id: String, title: String, category: String },
    /// A subscription type this firmware never registers.
    Other(String),
}

pub fn decode(text: &str) -> Result<Message, DecodeError> {
    let env: Envelope = serde_json::from_str(text)?;
    let metadata = env.metadata.ok_or(DecodeError::MissingField("metadata"))?;
    let message_type = metadata
        .message_type
        .ok_or(DecodeError::MissingField("metadata.message_type"))?;
    let payload = env.payload;

    let msg = match message_type.as_str() {
        "session_welcome" => {
            let session_id = payload
                .and_then(|p| p.session)
                .and_then(|s| s.id)
                .ok_or(DecodeError::MissingField("payload.session.id"))?;
            Message::Welcome { session_id }
        }
        "session_keepalive" => Message::Keepalive,
        "notification" => Message::Notification(decode_notification(metadata.subscription_type, payload)),
        "session_reconnect" => Message::Reconnect {
            reconnect_url: payload.and_then(|p| p.session).and_then(|s| s.reconnect_url),
        },
        "revocation" => {
            let sub = payload.and_then(|p| p.subscription);
            Message::Revocation {
                subscription_type: metadata
                    .subscription_type
                    .or_else(|| sub.as_ref().and_then(|s| s.kind.clone())),
                status: sub.and_then(|s| s.status),
            }
        }
        other => Message::Unknown(other.to_string()),
    };
    Ok(msg)
}

fn decode_notification(subscription_type: Option<String>, payload: Option<Payload>) -> Result<Notification, DecodeError> {
    let subscription_type = subscription_type.ok_or(DecodeError::MissingField("metadata.subscription_type"))?;
    let Some(kind) = EventKind::from_type(&subscription_type) else {
        return Ok(Notification::Other(subscription_type));
    };

    let event = payload
        .and_then(|p| p.event)
        .ok_or(DecodeError::MissingField("payload.event"))?;
    let broadcaster_id = event
        .broadcaster_user_id
        .ok_or(DecodeError::MissingField("payload.event.broadcaster_user_id"))?;
    let name = event.broadcaster_user_name.unwrap_or_default();

    Ok(match kind {
        EventKind::StreamOnline => Notification::StreamOnline { broadcaster_id, name },
        EventKind::StreamOffline => Notification::StreamOffline { broadcaster_id, name },
        EventKind::ChannelUpdate => Notification::ChannelUpdate {
            broadcaster_id,
            title: event.title.unwrap_or_default(),
            category: event.category_name.unwrap_or_default(),
        },
    })
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Handle one transport event. Called from inside the transport's drive
/// step, on the loop thread.
pub fn dispatch(
    event: TransportEvent,
    now: u32,
    machine: &mut ConnectionMachine,
    registry: &mut ChannelRegistry,
    renderer: &mut dyn Renderer,
) {
    match event {
        TransportEvent::Connected => info!("eventsub: transport connected"),
        TransportEvent::Disconnected => machine.on_disconnected(now),
        TransportEvent::Text(text) => {
            if debug_flags::is_on(&debug_flags::DEBUG_EVENTSUB) {
                info!("eventsub: << {}", text);
            }
            match decode(&text) {
                Ok(msg) => handle_message(msg, now, machine, registry, renderer),
                Err(e) => warn!("eventsub: dropping frame: {}", e),
            }
        }
        other => warn!("eventsub: unsupported {}", other),
    }
}

fn handle_message(
    msg: Message,
    now: u32,
    machine: &mut ConnectionMachine,
    registry: &mut ChannelRegistry,
    renderer: &mut dyn Renderer,
) {
    match msg {
        Message::Welcome { session_id } => machine.on_session_welcome(now, &session_id),
        Message::Keepalive => {
            machine.record_keepalive(now);
            if debug_flags::is_on(&debug_flags::DEBUG_EVENTSUB) {
                info!("eventsub: keepalive");
            }
        }
        Message::Notification(notification) => {
            machine.record_keepalive(now);
            match notification {
                Ok(n) => apply_notification(n, registry, renderer),
                Err(e) => warn!("eventsub: dropping notification: {}", e),
            }
        }
        Message::Reconnect { reconnect_url } => {
            warn!("eventsub: session_reconnect unsupported (url {:?})", reconnect_url);
        }
        Message::Revocation { subscription_type, status } => {
            warn!("eventsub: revocation unsupported ({:?}, status {:?})", subscription_type, status);
        }
        Message::Unknown(kind) => warn!("eventsub: unknown message type {}", kind),
    }
}

fn apply_notification(n: Notification, registry: &mut ChannelRegistry, renderer: &mut dyn Renderer) {
    match n {
        Notification::StreamOnline { broadcaster_id, name } => {
            info!("eventsub: {} went live", name);
            registry.set_live_status(&broadcaster_id, true, renderer);
        }
        Notification::StreamOffline { broadcaster_id, name } => {
            info!("eventsub: {} went offline", name);
            registry.set_live_status(&broadcaster_id, false, renderer);
        }
        Notification::ChannelUpdate { broadcaster_id, title, category } => {
            registry.update_metadata(&broadcaster_id, &title, &category);
        }
        Notification::Other(kind) => info!("eventsub: ignoring {} notification", kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::session::{ConnectionState, Timing};
    use crate::views::testing::RecordingRenderer;

    const CFG: [ChannelConfig; 2] = [
        ChannelConfig { id: "111", name: "a", picture: &[] },
        ChannelConfig { id: "222", name: "b", picture: &[] },
    ];

    fn notification(kind: &str, event: &str) -> String {
        format!(
            r#"{{"metadata":{{"message_id":"m","message_type":"notification","subscription_type":"{}","subscription_version":"1"}},"payload":{{"subscription":{{"type":"{}"}},"event":{}}}}}"#,
            kind, kind, event
        )
    }

    struct Rig {
        machine: ConnectionMachine,
        registry: ChannelRegistry,
        renderer: RecordingRenderer,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                machine: ConnectionMachine::new(Timing::default()),
                registry: ChannelRegistry::new(&CFG, 4),
                renderer: RecordingRenderer::default(),
            }
        }

        fn feed(&mut self, now: u32, event: TransportEvent) {
            dispatch(event, now, &mut self.machine, &mut self.registry, &mut self.renderer);
        }

        fn text(&mut self, now: u32, text: &str) {
            self.feed(now, TransportEvent::Text(text.to_string()));
        }
    }

    #[test]
    fn decodes_welcome() {
        let msg = decode(r#"{"metadata":{"message_type":"session_welcome"},"payload":{"session":{"id":"abc123","status":"connected","keepalive_timeout_seconds":30}}}"#).unwrap();
        assert!(matches!(msg, Message::Welcome { ref session_id } if session_id == "abc123"));
    }

    #[test]
    fn welcome_without_id_is_rejected() {
        let err = decode(r#"{"metadata":{"message_type":"session_welcome"},"payload":{"session":{}}}"#).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("payload.session.id")));
    }

    #[test]
    fn missing_message_type_is_rejected() {
        assert!(matches!(decode(r#"{"metadata":{}}"#), Err(DecodeError::MissingField(_))));
        assert!(matches!(decode("not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn decodes_channel_update() {
        let text = notification(
            "channel.update",
            r#"{"broadcaster_user_id":"111","broadcaster_user_name":"a","title":"new","category_name":"Chess"}"#,
        );
        let Message::Notification(Ok(n)) = decode(&text).unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(
            n,
            Notification::ChannelUpdate {
                broadcaster_id: "111".into(),
                title: "new".into(),
                category: "Chess".into()
            }
        );
    }

    #[test]
    fn welcome_moves_to_subscription_init() {
        let mut rig = Rig::new();
        rig.text(500, r#"{"metadata":{"message_type":"session_welcome"},"payload":{"session":{"id":"abc123"}}}"#);
        assert_eq!(rig.machine.state(), ConnectionState::SubscriptionInit);
        assert_eq!(rig.machine.session().id(), Some("abc123"));
        assert_eq!(rig.machine.attempts(), 0);
        assert_eq!(rig.machine.last_keepalive(), 500);
    }

    #[test]
    fn keepalive_and_notifications_refresh_keepalive() {
        let mut rig = Rig::new();
        rig.text(100, r#"{"metadata":{"message_type":"session_keepalive"},"payload":{}}"#);
        assert_eq!(rig.machine.last_keepalive(), 100);

        rig.text(200, &notification("stream.online", r#"{"broadcaster_user_id":"222","broadcaster_user_name":"b"}"#));
        assert_eq!(rig.machine.last_keepalive(), 200);
        assert!(rig.registry.get("222").unwrap().is_live());

        // A notification with a broken event still counts as a sign of life.
        rig.text(300, &notification("stream.offline", "{}"));
        assert_eq!(rig.machine.last_keepalive(), 300);
        assert!(rig.registry.get("222").unwrap().is_live());
    }

    #[test]
    fn online_offline_and_update_reach_registry() {
        let mut rig = Rig::new();
        rig.text(1, &notification("stream.online", r#"{"broadcaster_user_id":"111"}"#));
        rig.text(2, &notification(
            "channel.update",
            r#"{"broadcaster_user_id":"111","title":"speedrun","category_name":"Celeste"}"#,
        ));
        assert_eq!(rig.registry.pending_title().unwrap().title(), "speedrun");

        rig.text(3, &notification("stream.offline", r#"{"broadcaster_user_id":"111"}"#));
        assert!(!rig.registry.get("111").unwrap().is_live());
        assert_eq!(rig.registry.live_count(), 0);
    }

    #[test]
    fn disconnect_resets_session() {
        let mut rig = Rig::new();
        rig.text(1, r#"{"metadata":{"message_type":"session_welcome"},"payload":{"session":{"id":"s"}}}"#);
        rig.feed(2, TransportEvent::Disconnected);
        assert_eq!(rig.machine.state(), ConnectionState::WaitForReconnect);
        assert_eq!(rig.machine.session().id(), None);
    }

    #[test]
    fn unsupported_frames_change_nothing() {
        let mut rig = Rig::new();
        rig.feed(1, TransportEvent::Binary(12));
        rig.feed(2, TransportEvent::Fragment);
        rig.feed(3, TransportEvent::Error("tls".into()));
        rig.feed(4, TransportEvent::Connected);
        rig.text(5, r#"{"metadata":{"message_type":"session_reconnect"},"payload":{"session":{"id":"s","reconnect_url":"wss://x"}}}"#);
        rig.text(6, r#"{"metadata":{"message_type":"revocation","subscription_type":"stream.online"},"payload":{"subscription":{"status":"authorization_revoked"}}}"#);
        rig.text(7, r#"{"metadata":{"message_type":"something_new"}}"#);
        assert_eq!(rig.machine.state(), ConnectionState::Start);
        assert_eq!(rig.machine.session().id(), None);
        assert_eq!(rig.machine.last_keepalive(), 0);
        assert!(rig.renderer.redraws.is_empty());
    }

    #[test]
    fn decodes_reconnect_and_revocation_details() {
        let msg = decode(r#"{"metadata":{"message_type":"session_reconnect"},"payload":{"session":{"reconnect_url":"wss://x"}}}"#).unwrap();
        assert!(matches!(msg, Message::Reconnect { reconnect_url: Some(ref u) } if u == "wss://x"));

        let msg = decode(r#"{"metadata":{"message_type":"revocation"},"payload":{"subscription":{"type":"stream.offline","status":"user_removed"}}}"#).unwrap();
        assert!(matches!(
            msg,
            Message::Revocation { subscription_type: Some(ref t), status: Some(ref s) } if t == "stream.offline" && s == "user_removed"
        ));
    }

    #[test]
    fn unregistered_notification_type_is_ignored() {
        let text = notification("channel.follow", r#"{"broadcaster_user_id":"111"}"#);
        let Message::Notification(Ok(n)) = decode(&text).unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(n, Notification::Other("channel.follow".into()));
    }
}
