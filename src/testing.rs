//! Host fakes for the transport and HTTP seams, shared by unit and
//! integration tests.

use std::collections::VecDeque;

use anyhow::bail;

use crate::helix::{HttpClient, HttpResponse};
use crate::transport::{LinkState, Transport, TransportEvent};

/// Transport that only delivers what a test queued, filtered the same way
/// as the websocket client's events.
#[derive(Debug, Default)]
pub struct FakeTransport {
    pub connects: Vec<String>,
    pub disconnects: usize,
    pub refuse_connect: bool,
    link: LinkState,
    inbox: VecDeque<TransportEvent>,
}

impl FakeTransport {
    pub fn push(&mut self, event: TransportEvent) {
        self.inbox.push_back(event);
    }

    pub fn push_text(&mut self, text: &str) {
        self.push(TransportEvent::Text(text.to_string()));
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self, url: &str) -> anyhow::Result<()> {
        self.connects.push(url.to_string());
        if self.refuse_connect {
            bail!("connect refused");
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.link.reset();
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn drive(&mut self, on_event: &mut dyn FnMut(TransportEvent)) {
        while let Some(event) = self.inbox.pop_front() {
            if let Some(event) = self.link.filter(event) {
                on_event(event);
            }
        }
    }
}

/// HTTP client answering GETs with a canned streams response and POSTs with
/// scripted statuses.
#[derive(Debug)]
pub struct FakeHttp {
    pub streams_status: u16,
    pub streams_body: String,
    /// Statuses for successive POSTs; `post_default` once exhausted.
    pub post_statuses: VecDeque<u16>,
    pub post_default: u16,
    pub offline: bool,
    pub gets: Vec<String>,
    pub posts: Vec<String>,
}

impl Default for FakeHttp {
    fn default() -> Self {
        Self {
            streams_status: 200,
            streams_body: r#"{"data":[]}"#.to_string(),
            post_statuses: VecDeque::new(),
            post_default: 202,
            offline: false,
            gets: Vec::new(),
            posts: Vec::new(),
        }
    }
}

impl FakeHttp {
    pub fn with_streams(body: &str) -> Self {
        Self {
            streams_body: body.to_string(),
            ..Self::default()
        }
    }

    pub fn with_streams_status(status: u16, body: &str) -> Self {
        Self {
            streams_status: status,
            streams_body: body.to_string(),
            ..Self::default()
        }
    }
}

impl HttpClient for FakeHttp {
    fn get(&mut self, url: &str, _headers: &[(&str, &str)]) -> anyhow::Result<HttpResponse> {
        self.gets.push(url.to_string());
        if self.offline {
            bail!("network down");
        }
        Ok(HttpResponse {
            status: self.streams_status,
            body: self.streams_body.clone(),
        })
    }

    fn post(&mut self, _url: &str, _headers: &[(&str, &str)], body: &str) -> anyhow::Result<HttpResponse> {
        self.posts.push(body.to_string());
        if self.offline {
            bail!("network down");
        }
        let status = self.post_statuses.pop_front().unwrap_or(self.post_default);
        Ok(HttpResponse {
            status,
            body: String::new(),
        })
    }
}
