//! Twitch Helix API: the live-stream snapshot and EventSub subscription
//! registration, over any [`HttpClient`].

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Credentials, HELIX_STREAMS_URL, HELIX_SUBSCRIPTIONS_URL};
use crate::debug_flags;

// ── HTTP seam ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

pub trait HttpClient {
    fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> anyhow::Result<HttpResponse>;
    fn post(&mut self, url: &str, headers: &[(&str, &str)], body: &str) -> anyhow::Result<HttpResponse>;
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http transport: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("malformed json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
}

// ── Event kinds ─────────────────────────────────────────────────────

/// EventSub subscription types registered for every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    ChannelUpdate,
    StreamOnline,
    StreamOffline,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::ChannelUpdate,
        EventKind::StreamOnline,
        EventKind::StreamOffline,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ChannelUpdate => "channel.update",
            EventKind::StreamOnline => "stream.online",
            EventKind::StreamOffline => "stream.offline",
        }
    }

    pub fn version(self) -> &'static str {
        match self {
            EventKind::ChannelUpdate => "2",
            EventKind::StreamOnline | EventKind::StreamOffline => "1",
        }
    }

    pub fn from_type(s: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

// ── Wire types ──────────────────────────────────────────────────────

/// One entry of the `data` array of `GET /helix/streams`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamRecord {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_name: String,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    data: Option<Vec<StreamRecord>>,
}

#[derive(Serialize)]
struct SubscriptionRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    version: &'a str,
    condition: Condition<'a>,
    transport: SubscriptionTransport<'a>,
}

#[derive(Serialize)]
struct Condition<'a> {
    broadcaster_user_id: &'a str,
}

#[derive(Serialize)]
struct SubscriptionTransport<'a> {
    method: &'a str,
    session_id: &'a str,
}

/// Status Helix answers a successful subscription with.
pub const SUBSCRIPTION_ACCEPTED: u16 = 202;

// ── Client ──────────────────────────────────────────────────────────

pub struct Helix<C> {
    http: C,
    credentials: Credentials,
}

impl<C: HttpClient> Helix<C> {
    pub fn new(http: C, credentials: Credentials) -> Self {
        if !credentials.is_complete() {
            warn!("helix: credentials incomplete, requests will be rejected");
        }
        Self { http, credentials }
    }

    pub fn http_mut(&mut self) -> &mut C {
        &mut self.http
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.credentials.token)
    }

    /// Snapshot of which of `ids` are live right now, in server order.
    pub fn get_streams<'a, I>(&mut self, ids: I) -> Result<Vec<StreamRecord>, ApiError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let url = streams_url(ids);
        let auth = self.auth_header();
        let headers = [
            ("Authorization", auth.as_str()),
            ("Client-Id", self.credentials.client_id.as_str()),
        ];
        let resp = self.http.get(&url, &headers).map_err(ApiError::Transport)?;
        if debug_flags::is_on(&debug_flags::DEBUG_HELIX) {
            info!("helix: GET streams -> {} ({} bytes)", resp.status, resp.body.len());
        }
        if resp.status != 200 {
            return Err(ApiError::Status(resp.status));
        }
        parse_streams(&resp.body)
    }

    /// Register one EventSub subscription for `channel_id` bound to the
    /// websocket session `session_id`.
    pub fn subscribe(&mut self, kind: EventKind, channel_id: &str, session_id: &str) -> Result<(), ApiError> {
        let body = subscription_body(kind, channel_id, session_id)?;
        let auth = self.auth_header();
        let headers = [
            ("Authorization", auth.as_str()),
            ("Client-Id", self.credentials.client_id.as_str()),
            ("Content-Type", "application/json"),
        ];
        let resp = self
            .http
            .post(HELIX_SUBSCRIPTIONS_URL, &headers, &body)
            .map_err(ApiError::Transport)?;
        if debug_flags::is_on(&debug_flags::DEBUG_HELIX) {
            info!("helix: POST {} for {} -> {} {}", kind.as_str(), channel_id, resp.status, resp.body);
        }
        if resp.status != SUBSCRIPTION_ACCEPTED {
            return Err(ApiError::Status(resp.status));
        }
        Ok(())
    }
}

pub fn streams_url<'a, I>(ids: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let query: Vec<String> = ids.into_iter().map(|id| format!("user_id={}", id)).collect();
    format!("{}?{}", HELIX_STREAMS_URL, query.join("&"))
}

pub fn parse_streams(body: &str) -> Result<Vec<StreamRecord>, ApiError> {
    let resp: StreamsResponse = serde_json::from_str(body)?;
    resp.data.ok_or(ApiError::MissingField("data"))
}

pub fn subscription_body(kind: EventKind, channel_id: &str, session_id: &str) -> Result<String, ApiError> {
    let req = SubscriptionRequest {
        kind: kind.as_str(),
        version: kind.version(),
        condition: Condition {
            broadcaster_user_id: channel_id,
        },
        transport: SubscriptionTransport {
            method: "websocket",
            session_id,
        },
    };
    Ok(serde_json::to_string(&req)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[derive(Default)]
    struct Canned {
        status: u16,
        body: String,
        fail: bool,
        seen: Vec<(String, Vec<(String, String)>, Option<String>)>,
    }

    impl Canned {
        fn record(&mut self, url: &str, headers: &[(&str, &str)], body: Option<&str>) -> anyhow::Result<HttpResponse> {
            self.seen.push((
                url.to_string(),
                headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                body.map(str::to_string),
            ));
            if self.fail {
                bail!("connection refused");
            }
            Ok(HttpResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    impl HttpClient for Canned {
        fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> anyhow::Result<HttpResponse> {
            self.record(url, headers, None)
        }

        fn post(&mut self, url: &str, headers: &[(&str, &str)], body: &str) -> anyhow::Result<HttpResponse> {
            self.record(url, headers, Some(body))
        }
    }

    fn creds() -> Credentials {
        Credentials {
            token: "tok".into(),
            client_id: "cid".into(),
        }
    }

    #[test]
    fn streams_url_lists_every_id() {
        assert_eq!(
            streams_url(["1", "22"]),
            "https://api.twitch.tv/helix/streams?user_id=1&user_id=22"
        );
    }

    #[test]
    fn get_streams_sends_auth_headers() {
        let http = Canned {
            status: 200,
            body: r#"{"data":[{"user_id":"5","user_name":"Five","title":"t","game_name":"g","viewer_count":3}],"pagination":{}}"#.into(),
            ..Default::default()
        };
        let mut helix = Helix::new(http, creds());
        let records = helix.get_streams(["5", "6"]).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, "5");
        assert_eq!(records[0].game_name, "g");
        let (_, headers, _) = &helix.http_mut().seen[0];
        assert!(headers.contains(&("Authorization".into(), "Bearer tok".into())));
        assert!(headers.contains(&("Client-Id".into(), "cid".into())));
    }

    #[test]
    fn missing_data_is_an_error() {
        let err = parse_streams(r#"{"error":"Unauthorized"}"#).unwrap_err();
        assert!(matches!(err, ApiError::MissingField("data")));
    }

    #[test]
    fn empty_data_is_an_empty_snapshot() {
        assert!(parse_streams(r#"{"data":[]}"#).unwrap().is_empty());
    }

    #[test]
    fn garbage_body_is_decode_error() {
        assert!(matches!(parse_streams("<html>"), Err(ApiError::Decode(_))));
    }

    #[test]
    fn non_200_snapshot_is_status_error() {
        let http = Canned { status: 401, body: "{}".into(), ..Default::default() };
        let mut helix = Helix::new(http, creds());
        assert!(matches!(helix.get_streams(["1"]), Err(ApiError::Status(401))));
    }

    #[test]
    fn transport_failure_is_reported() {
        let http = Canned { fail: true, ..Default::default() };
        let mut helix = Helix::new(http, creds());
        assert!(matches!(helix.get_streams(["1"]), Err(ApiError::Transport(_))));
    }

    #[test]
    fn subscription_body_names_kind_version_condition_and_session() {
        let body = subscription_body(EventKind::ChannelUpdate, "42", "sess").unwrap();
        let v: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(v["type"], "channel.update");
        assert_eq!(v["version"], "2");
        assert_eq!(v["condition"]["broadcaster_user_id"], "42");
        assert_eq!(v["transport"]["method"], "websocket");
        assert_eq!(v["transport"]["session_id"], "sess");
    }

    #[test]
    fn subscribe_requires_accepted_status() {
        let http = Canned { status: 202, ..Default::default() };
        let mut helix = Helix::new(http, creds());
        helix.subscribe(EventKind::StreamOnline, "42", "s").unwrap();
        let (url, headers, body) = &helix.http_mut().seen[0];
        assert_eq!(url, HELIX_SUBSCRIPTIONS_URL);
        assert!(headers.contains(&("Content-Type".into(), "application/json".into())));
        assert!(body.as_deref().unwrap().contains("stream.online"));

        let http = Canned { status: 409, ..Default::default() };
        let mut helix = Helix::new(http, creds());
        assert!(matches!(
            helix.subscribe(EventKind::StreamOnline, "42", "s"),
            Err(ApiError::Status(409))
        ));
    }

    #[test]
    fn event_kind_round_trips_type_string() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_type(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_type("channel.follow"), None);
    }
}
