//! EventSub session bookkeeping and the connection state machine.
//!
//! Nothing here blocks: every wait is an elapsed-time check against a
//! timestamp recorded when the wait began. Timestamps are `u32` milliseconds
//! and compared with `wrapping_sub`, so a counter wrap is harmless.

use std::collections::BTreeSet;
use std::fmt;

use log::{error, info, warn};

use crate::channels::ChannelRegistry;
use crate::config::{EVENTSUB_URL, KEEPALIVE_SECS};
use crate::helix::{EventKind, Helix, HttpClient};
use crate::refresher;
use crate::transport::Transport;
use crate::views::Renderer;

// ── Session ─────────────────────────────────────────────────────────

/// Server-assigned session id and the subscriptions registered for it.
///
/// Subscription flags only exist while an id is held: clearing the id clears
/// them, and marking a flag without an id is refused.
#[derive(Debug, Default)]
pub struct Session {
    id: Option<String>,
    subscribed: BTreeSet<(String, EventKind)>,
}

impl Session {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Store a new session id. A different id invalidates every subscription.
    pub fn set_id(&mut self, id: &str) {
        if self.id.as_deref() != Some(id) {
            self.subscribed.clear();
        }
        self.id = Some(id.to_string());
    }

    pub fn clear(&mut self) {
        self.id = None;
        self.subscribed.clear();
    }

    pub fn mark_subscribed(&mut self, channel_id: &str, kind: EventKind) -> bool {
        if self.id.is_none() {
            return false;
        }
        self.subscribed.insert((channel_id.to_string(), kind));
        true
    }

    pub fn is_subscribed(&self, channel_id: &str, kind: EventKind) -> bool {
        self.id.is_some() && self.subscribed.contains(&(channel_id.to_string(), kind))
    }

    pub fn subscribed_count(&self) -> usize {
        if self.id.is_some() {
            self.subscribed.len()
        } else {
            0
        }
    }
}

// ── Timing ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Time allowed for a connect attempt to produce a session welcome.
    pub transport_init_timeout_ms: u32,
    /// Grace period for the transport's own reconnect after a drop.
    pub reconnect_grace_ms: u32,
    /// Pause between subscription rounds.
    pub subscription_retry_ms: u32,
    pub refresh_interval_ms: u32,
    /// Delay before retrying after a failed refresh.
    pub refresh_retry_ms: u32,
    pub keepalive_ms: u32,
    pub keepalive_slack_ms: u32,
    /// Shared by connecting and subscribing; reset on every successful phase.
    pub max_attempts: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            transport_init_timeout_ms: 5_000,
            reconnect_grace_ms: 1_000,
            subscription_retry_ms: 1_000,
            refresh_interval_ms: 600_000,
            refresh_retry_ms: 30_000,
            keepalive_ms: KEEPALIVE_SECS * 1000,
            keepalive_slack_ms: 5_000,
            max_attempts: 10,
        }
    }
}

// ── State machine ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Start,
    TransportInit,
    WaitForReconnect,
    SubscriptionInit,
    Idle,
    Fault,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Start => "Start",
            ConnectionState::TransportInit => "TransportInit",
            ConnectionState::WaitForReconnect => "WaitForReconnect",
            ConnectionState::SubscriptionInit => "SubscriptionInit",
            ConnectionState::Idle => "Idle",
            ConnectionState::Fault => "Fault",
        };
        f.write_str(s)
    }
}

/// `true` when `timeout` ms have passed since `since`. `None` counts as
/// already expired.
fn expired(since: Option<u32>, now: u32, timeout: u32) -> bool {
    since.map_or(true, |t| now.wrapping_sub(t) >= timeout)
}

pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    /// When the current wait began.
    since: Option<u32>,
    session: Session,
    last_keepalive: u32,
    last_refresh: Option<u32>,
    refresh_delay: u32,
    refresh_requested: bool,
    refresh_failures: u32,
    timing: Timing,
    url: String,
}

impl ConnectionMachine {
    pub fn new(timing: Timing) -> Self {
        Self::with_url(timing, EVENTSUB_URL)
    }

    pub fn with_url(timing: Timing, url: &str) -> Self {
        Self {
            state: ConnectionState::Start,
            attempts: 0,
            since: None,
            session: Session::default(),
            last_keepalive: 0,
            last_refresh: None,
            refresh_delay: timing.refresh_interval_ms,
            refresh_requested: false,
            refresh_failures: 0,
            timing,
            url: url.to_string(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn last_keepalive(&self) -> u32 {
        self.last_keepalive
    }

    /// Ask for a refresh on the next `Idle` tick.
    pub fn request_refresh(&mut self) {
        self.refresh_requested = true;
    }

    fn enter(&mut self, next: ConnectionState, since: Option<u32>) {
        if self.state != next {
            info!("state: {} -> {}", self.state, next);
        }
        self.state = next;
        self.since = since;
    }

    // ── Dispatcher hooks ────────────────────────────────────────────

    /// The transport reported a drop: forget the session and give the
    /// transport's own reconnect a grace period.
    pub fn on_disconnected(&mut self, now: u32) {
        if self.state == ConnectionState::Fault {
            return;
        }
        warn!("session: disconnected, dropping session and {} subscriptions", self.session.subscribed_count());
        self.session.clear();
        self.attempts = 0;
        self.enter(ConnectionState::WaitForReconnect, Some(now));
    }

    pub fn on_session_welcome(&mut self, now: u32, session_id: &str) {
        if self.state == ConnectionState::Fault {
            return;
        }
        self.last_keepalive = now;
        self.session.set_id(session_id);
        info!("session: welcome, id {}", session_id);
        self.attempts = 0;
        self.enter(ConnectionState::SubscriptionInit, None);
    }

    pub fn record_keepalive(&mut self, now: u32) {
        self.last_keepalive = now;
    }

    // ── Tick ────────────────────────────────────────────────────────

    /// Advance the machine by one tick.
    pub fn step<T, C>(
        &mut self,
        now: u32,
        transport: &mut T,
        helix: &mut Helix<C>,
        registry: &mut ChannelRegistry,
        renderer: &mut dyn Renderer,
    ) where
        T: Transport + ?Sized,
        C: HttpClient,
    {
        match self.state {
            ConnectionState::Start => {
                info!("state: Start, connecting to {}", self.url);
                if let Err(e) = transport.connect(&self.url) {
                    warn!("transport: connect failed: {:#}", e);
                }
                self.attempts += 1;
                self.enter(ConnectionState::TransportInit, Some(now));
            }
            ConnectionState::TransportInit => {
                if !expired(self.since, now, self.timing.transport_init_timeout_ms) {
                    return;
                }
                let stalled_at = if transport.is_connected() { "welcome" } else { "handshake" };
                if self.attempts >= self.timing.max_attempts {
                    error!("state: no session after {} connect attempts (stuck at {})", self.attempts, stalled_at);
                    self.enter(ConnectionState::Fault, Some(now));
                    return;
                }
                warn!("state: TransportInit timed out at {}, reconnecting (try {})", stalled_at, self.attempts);
                transport.disconnect();
                if let Err(e) = transport.connect(&self.url) {
                    warn!("transport: connect failed: {:#}", e);
                }
                self.since = Some(now);
                self.attempts += 1;
            }
            ConnectionState::WaitForReconnect => {
                if !expired(self.since, now, self.timing.reconnect_grace_ms) {
                    return;
                }
                warn!("state: automatic reconnect did not produce a session");
                self.attempts = 0;
                self.enter(ConnectionState::TransportInit, Some(now));
            }
            ConnectionState::SubscriptionInit => {
                if !expired(self.since, now, self.timing.subscription_retry_ms) {
                    return;
                }
                if self.attempts >= self.timing.max_attempts {
                    error!("state: subscriptions incomplete after {} rounds", self.attempts);
                    self.enter(ConnectionState::Fault, Some(now));
                    return;
                }
                self.attempts += 1;
                if self.subscribe_pending(helix, registry) {
                    info!("state: all {} subscriptions registered", self.session.subscribed_count());
                    self.attempts = 0;
                    self.refresh_requested = true;
                    self.enter(ConnectionState::Idle, Some(now));
                } else {
                    self.since = Some(now);
                }
            }
            ConnectionState::Idle => {
                if self.refresh_due(now) {
                    self.run_refresh(now, helix, registry, renderer);
                }
                let limit = self.timing.keepalive_ms + self.timing.keepalive_slack_ms;
                if now.wrapping_sub(self.last_keepalive) >= limit {
                    warn!("session: no keepalive for {} ms, reconnecting", now.wrapping_sub(self.last_keepalive));
                    self.session.clear();
                    self.attempts = 0;
                    self.enter(ConnectionState::TransportInit, None);
                }
            }
            ConnectionState::Fault => {}
        }
    }

    /// One subscription round over every (channel, kind) pair not yet
    /// registered. Returns true when nothing is left pending.
    fn subscribe_pending<C: HttpClient>(&mut self, helix: &mut Helix<C>, registry: &ChannelRegistry) -> bool {
        let Some(session_id) = self.session.id().map(str::to_string) else {
            warn!("session: subscription round without a session id");
            return false;
        };

        let mut pending = 0;
        for channel in registry.channels() {
            for kind in EventKind::ALL {
                if self.session.is_subscribed(channel.id(), kind) {
                    continue;
                }
                match helix.subscribe(kind, channel.id(), &session_id) {
                    Ok(()) => {
                        info!("subscribed {} for {}", kind.as_str(), channel.name());
                        self.session.mark_subscribed(channel.id(), kind);
                    }
                    Err(e) => {
                        warn!("subscribe {} for {} failed: {}", kind.as_str(), channel.name(), e);
                        pending += 1;
                    }
                }
            }
        }
        pending == 0
    }

    fn refresh_due(&self, now: u32) -> bool {
        self.refresh_requested || expired(self.last_refresh, now, self.refresh_delay)
    }

    fn run_refresh<C: HttpClient>(
        &mut self,
        now: u32,
        helix: &mut Helix<C>,
        registry: &mut ChannelRegistry,
        renderer: &mut dyn Renderer,
    ) {
        self.refresh_requested = false;
        self.last_refresh = Some(now);
        match refresher::refresh(helix, registry, renderer) {
            Ok(_) => {
                if self.refresh_failures > 0 {
                    info!("refresh: recovered after {} failures", self.refresh_failures);
                }
                self.refresh_failures = 0;
                self.refresh_delay = self.timing.refresh_interval_ms;
            }
            Err(e) => {
                self.refresh_failures += 1;
                if self.refresh_failures == 1 || self.refresh_failures % 10 == 0 {
                    warn!("refresh failed ({}x): {}", self.refresh_failures, e);
                } else {
                    info!("refresh failed ({}x): {}", self.refresh_failures, e);
                }
                self.refresh_delay = self.timing.refresh_retry_ms;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, Credentials};
    use crate::testing::{FakeHttp, FakeTransport};
    use crate::views::testing::RecordingRenderer;

    const CFG: [ChannelConfig; 2] = [
        ChannelConfig { id: "1", name: "one", picture: &[] },
        ChannelConfig { id: "2", name: "two", picture: &[] },
    ];

    struct Rig {
        machine: ConnectionMachine,
        transport: FakeTransport,
        helix: Helix<FakeHttp>,
        registry: ChannelRegistry,
        renderer: RecordingRenderer,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                machine: ConnectionMachine::new(Timing::default()),
                transport: FakeTransport::default(),
                helix: Helix::new(FakeHttp::default(), Credentials { token: "t".into(), client_id: "c".into() }),
                registry: ChannelRegistry::new(&CFG, 4),
                renderer: RecordingRenderer::default(),
            }
        }

        fn step(&mut self, now: u32) {
            self.machine.step(now, &mut self.transport, &mut self.helix, &mut self.registry, &mut self.renderer);
        }
    }

    #[test]
    fn session_flags_need_an_id() {
        let mut s = Session::default();
        assert!(!s.mark_subscribed("1", EventKind::StreamOnline));
        s.set_id("a");
        assert!(s.mark_subscribed("1", EventKind::StreamOnline));
        assert!(s.is_subscribed("1", EventKind::StreamOnline));
        s.set_id("a");
        assert_eq!(s.subscribed_count(), 1);
        s.set_id("b");
        assert_eq!(s.subscribed_count(), 0);
        s.mark_subscribed("1", EventKind::StreamOnline);
        s.clear();
        assert!(!s.is_subscribed("1", EventKind::StreamOnline));
        assert_eq!(s.id(), None);
    }

    #[test]
    fn start_connects_once_and_waits() {
        let mut rig = Rig::new();
        rig.step(100);
        assert_eq!(rig.machine.state(), ConnectionState::TransportInit);
        assert_eq!(rig.machine.attempts(), 1);
        assert_eq!(rig.transport.connects, vec![EVENTSUB_URL.to_string()]);

        rig.step(100 + 4_999);
        assert_eq!(rig.transport.connects.len(), 1);
        assert_eq!(rig.transport.disconnects, 0);
    }

    #[test]
    fn transport_init_timeout_reconnects() {
        let mut rig = Rig::new();
        rig.step(0);
        rig.step(5_000);
        assert_eq!(rig.machine.state(), ConnectionState::TransportInit);
        assert_eq!(rig.machine.attempts(), 2);
        assert_eq!(rig.transport.disconnects, 1);
        assert_eq!(rig.transport.connects.len(), 2);
    }

    #[test]
    fn fault_exactly_at_retry_ceiling() {
        let mut rig = Rig::new();
        rig.step(0);
        let mut now = 0;
        for expected in 2..=10 {
            now += 5_000;
            rig.step(now);
            assert_eq!(rig.machine.state(), ConnectionState::TransportInit);
            assert_eq!(rig.machine.attempts(), expected);
        }
        now += 5_000;
        rig.step(now);
        assert_eq!(rig.machine.state(), ConnectionState::Fault);

        // Terminal: further ticks and events change nothing.
        rig.machine.on_disconnected(now);
        rig.step(now + 60_000);
        assert_eq!(rig.machine.state(), ConnectionState::Fault);
    }

    #[test]
    fn welcome_then_subscriptions_then_idle_with_refresh() {
        let mut rig = Rig::new();
        rig.step(0);
        rig.machine.on_session_welcome(200, "abc123");
        assert_eq!(rig.machine.state(), ConnectionState::SubscriptionInit);
        assert_eq!(rig.machine.attempts(), 0);

        rig.step(210);
        assert_eq!(rig.helix.http_mut().posts.len(), 6);
        assert_eq!(rig.machine.state(), ConnectionState::Idle);
        assert_eq!(rig.machine.attempts(), 0);
        assert_eq!(rig.machine.session().subscribed_count(), 6);

        rig.step(220);
        assert_eq!(rig.helix.http_mut().gets.len(), 1);
    }

    #[test]
    fn failed_subscriptions_are_retried_without_repeating_successes() {
        let mut rig = Rig::new();
        rig.helix.http_mut().post_statuses = [202, 500, 202, 202, 403, 202].into_iter().collect();
        rig.step(0);
        rig.machine.on_session_welcome(10, "s");

        rig.step(20);
        assert_eq!(rig.machine.state(), ConnectionState::SubscriptionInit);
        assert_eq!(rig.machine.session().subscribed_count(), 4);

        // Next round only after the retry pause.
        rig.step(20 + 999);
        assert_eq!(rig.helix.http_mut().posts.len(), 6);
        rig.step(20 + 1_000);
        assert_eq!(rig.helix.http_mut().posts.len(), 8);
        assert_eq!(rig.machine.state(), ConnectionState::Idle);
    }

    #[test]
    fn subscription_rounds_fault_at_ceiling() {
        let mut rig = Rig::new();
        rig.helix.http_mut().post_default = 500;
        rig.step(0);
        rig.machine.on_session_welcome(0, "s");
        let mut now = 0;
        for _ in 0..10 {
            rig.step(now);
            assert_eq!(rig.machine.state(), ConnectionState::SubscriptionInit);
            now += 1_000;
        }
        assert_eq!(rig.machine.attempts(), 10);
        rig.step(now);
        assert_eq!(rig.machine.state(), ConnectionState::Fault);
    }

    #[test]
    fn disconnect_clears_session_and_waits_for_reconnect() {
        let mut rig = Rig::new();
        rig.step(0);
        rig.machine.on_session_welcome(10, "abc");
        rig.helix.http_mut().post_statuses = [202, 202, 202, 500, 500, 500].into_iter().collect();
        rig.step(20);
        assert_eq!(rig.machine.session().subscribed_count(), 3);

        rig.machine.on_disconnected(30);
        assert_eq!(rig.machine.state(), ConnectionState::WaitForReconnect);
        assert_eq!(rig.machine.session().id(), None);
        assert_eq!(rig.machine.session().subscribed_count(), 0);
        assert_eq!(rig.machine.attempts(), 0);

        rig.step(30 + 999);
        assert_eq!(rig.machine.state(), ConnectionState::WaitForReconnect);
        rig.step(30 + 1_000);
        assert_eq!(rig.machine.state(), ConnectionState::TransportInit);
        assert_eq!(rig.machine.attempts(), 0);
    }

    #[test]
    fn keepalive_timeout_forces_transport_init() {
        let mut rig = Rig::new();
        rig.step(0);
        rig.machine.on_session_welcome(1_000, "s");
        rig.step(1_000);
        assert_eq!(rig.machine.state(), ConnectionState::Idle);

        rig.machine.record_keepalive(10_000);
        rig.step(10_000 + 34_999);
        assert_eq!(rig.machine.state(), ConnectionState::Idle);
        rig.step(10_000 + 35_000);
        assert_eq!(rig.machine.state(), ConnectionState::TransportInit);
        assert_eq!(rig.machine.session().id(), None);
        assert_eq!(rig.machine.attempts(), 0);

        // The wait is already over: the next tick reconnects.
        let connects = rig.transport.connects.len();
        rig.step(10_000 + 35_001);
        assert_eq!(rig.transport.connects.len(), connects + 1);
        assert_eq!(rig.machine.attempts(), 1);
    }

    #[test]
    fn refresh_runs_on_interval_and_retries_sooner_after_failure() {
        let mut rig = Rig::new();
        rig.step(0);
        rig.machine.on_session_welcome(0, "s");
        rig.step(0);
        rig.step(0);
        assert_eq!(rig.helix.http_mut().gets.len(), 1);

        rig.helix.http_mut().offline = true;
        let mut now = 0;
        // Keep the session alive while time passes.
        let mut advance = |rig: &mut Rig, to: u32| {
            while now < to {
                now = (now + 20_000).min(to);
                rig.machine.record_keepalive(now);
                rig.step(now);
            }
        };
        advance(&mut rig, 599_999);
        assert_eq!(rig.helix.http_mut().gets.len(), 1);
        advance(&mut rig, 600_000);
        assert_eq!(rig.helix.http_mut().gets.len(), 2);

        rig.helix.http_mut().offline = false;
        advance(&mut rig, 629_999);
        assert_eq!(rig.helix.http_mut().gets.len(), 2);
        advance(&mut rig, 630_000);
        assert_eq!(rig.helix.http_mut().gets.len(), 3);
        assert_eq!(rig.machine.state(), ConnectionState::Idle);
    }

    #[test]
    fn requested_refresh_runs_on_next_idle_tick() {
        let mut rig = Rig::new();
        rig.step(0);
        rig.machine.on_session_welcome(0, "s");
        rig.step(0);
        rig.step(1);
        rig.machine.request_refresh();
        rig.step(2);
        assert_eq!(rig.helix.http_mut().gets.len(), 2);
    }

    #[test]
    fn timestamps_survive_counter_wrap() {
        assert!(!expired(Some(u32::MAX - 10), 5, 100));
        assert!(expired(Some(u32::MAX - 10), 90, 100));
        assert!(expired(None, 0, 1_000));
    }
}
