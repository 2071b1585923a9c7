//! OAuth popup coordinator.
//!
//! Idle → AwaitingAuthUrl → AwaitingCallback → Idle.
//!
//! One handshake at a time. The message listener is registered before the
//! popup opens and dropped as soon as the handshake ends, whichever way it
//! ends: a valid callback, the popup closing, or the hard timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::api::BotBackend;
use super::errors::DashboardError;
use super::identity::Session;
use super::messages::{CallbackPayload, HandshakeOutcome, WindowMessage};
use super::popup::{MessageBus, PopupGeometry, PopupHost, Viewport, POPUP_NAME};
use super::types::IdentityTag;

// ─────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Give up on a handshake that never calls back.
    pub handshake_timeout: Duration,
    /// How often to check whether the popup was closed.
    pub popup_poll: Duration,
    /// The only origin whose window messages are trusted.
    pub expected_origin: String,
    /// Used to center the popup.
    pub viewport: Viewport,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(300),
            popup_poll: Duration::from_millis(500),
            expected_origin: "http://127.0.0.1:3000".to_string(),
            viewport: Viewport::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("BOTDECK_HANDSHAKE_TIMEOUT_SECS") { if let Ok(f) = v.parse() { c.handshake_timeout = Duration::from_secs(f); } }
        if let Ok(v) = std::env::var("BOTDECK_POPUP_POLL_MS")          { if let Ok(f) = v.parse() { c.popup_poll = Duration::from_millis(f); } }
        if let Ok(v) = std::env::var("BOTDECK_VIEWPORT")               { if let Ok(f) = v.parse() { c.viewport = f; } }
        if let Ok(v) = std::env::var("BOTDECK_APP_ORIGIN") {
            let v = v.trim().trim_end_matches('/');
            if !v.is_empty() { c.expected_origin = v.to_string(); }
        }
        // A zero period would make tokio's interval panic.
        if c.popup_poll.is_zero() { c.popup_poll = Duration::from_millis(500); }
        c
    }
}

// ─────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingAuthUrl,
    AwaitingCallback,
}

/// Puts the state machine back to Idle however the handshake exits,
/// including early `?` returns and a dropped future.
struct IdleOnDrop<'a>(&'a watch::Sender<HandshakeState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(HandshakeState::Idle);
    }
}

// ─────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────

pub struct OAuthCoordinator {
    cfg: CoordinatorConfig,
    backend: Arc<dyn BotBackend>,
    popups: Arc<dyn PopupHost>,
    bus: MessageBus,
    session: Arc<Session>,
    state: watch::Sender<HandshakeState>,
}

impl OAuthCoordinator {
    pub fn new(
        cfg: CoordinatorConfig,
        backend: Arc<dyn BotBackend>,
        popups: Arc<dyn PopupHost>,
        bus: MessageBus,
        session: Arc<Session>,
    ) -> Self {
        let (state, _) = watch::channel(HandshakeState::Idle);
        Self {
            cfg,
            backend,
            popups,
            bus,
            session,
            state,
        }
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HandshakeState> {
        self.state.subscribe()
    }

    /// Run one popup handshake to a terminal outcome.
    ///
    /// Fails with `HandshakeInProgress` when another handshake is active,
    /// and with `StaleIdentity` when the wallet identity changed between the
    /// authorization request and the exchange.
    pub async fn connect(&self) -> Result<HandshakeOutcome, DashboardError> {
        let claimed = self.state.send_if_modified(|s| {
            if *s != HandshakeState::Idle {
                return false;
            }
            *s = HandshakeState::AwaitingAuthUrl;
            true
        });
        if !claimed {
            warn!("🐦 Twitter handshake already in progress — ignoring trigger");
            return Err(DashboardError::HandshakeInProgress);
        }
        let _idle = IdleOnDrop(&self.state);

        let handshake_id = Uuid::new_v4();
        let auth = self.backend.twitter_auth_url().await?;
        let started = auth.tag.clone();
        info!(%handshake_id, identity = %started.identity.short(), "🐦 Authorization URL received");

        // Register before opening so an instant callback is not missed.
        let mut listener = self.bus.listen();
        let geometry = PopupGeometry::centered(self.cfg.viewport);
        let mut popup = self.popups.open(&auth.value, POPUP_NAME, geometry).await?;
        self.state.send_replace(HandshakeState::AwaitingCallback);

        let deadline = tokio::time::sleep(self.cfg.handshake_timeout);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(self.cfg.popup_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        poll.tick().await;

        let payload = loop {
            tokio::select! {
                biased;

                msg = listener.recv() => {
                    let Some(msg) = msg else {
                        warn!(%handshake_id, "🐦 Message bus closed — abandoning handshake");
                        popup.close().await;
                        return Ok(HandshakeOutcome::Abandoned);
                    };
                    if let Some(payload) = self.accept(&msg) {
                        break payload;
                    }
                }

                _ = &mut deadline => {
                    warn!(%handshake_id, "⏰ No Twitter callback after {:?} — giving up", self.cfg.handshake_timeout);
                    popup.close().await;
                    return Ok(HandshakeOutcome::TimedOut);
                }

                _ = poll.tick() => {
                    if popup.is_closed().await {
                        info!(%handshake_id, "🐦 Popup closed without a callback");
                        return Ok(HandshakeOutcome::Abandoned);
                    }
                }
            }
        };

        drop(listener);
        popup.close().await;

        // The pair was issued for `started`; never exchange it under another wallet.
        if !self.session.is_current(&started) {
            warn!(%handshake_id, "🐦 Wallet changed during handshake — not exchanging callback");
            return Err(DashboardError::StaleIdentity);
        }
        let linked = self.backend.twitter_callback(&payload).await?;
        if !self.still_current(&started, &linked.tag) {
            warn!(%handshake_id, "🐦 Wallet changed during handshake — discarding link result");
            return Err(DashboardError::StaleIdentity);
        }
        info!(%handshake_id, username = %linked.value.username, "✅ Twitter account linked");
        Ok(HandshakeOutcome::Linked(linked.value))
    }

    /// Null out the linked credentials. No popup involved.
    pub async fn disconnect(&self) -> Result<(), DashboardError> {
        let resp = self.backend.unlink_twitter().await?;
        if !self.session.is_current(&resp.tag) {
            return Err(DashboardError::StaleIdentity);
        }
        info!("🐦 Twitter account unlinked");
        Ok(())
    }

    /// Filter one window message. Untrusted origins and non-callback
    /// messages are dropped; malformed callbacks are dropped silently.
    fn accept(&self, msg: &WindowMessage) -> Option<CallbackPayload> {
        if msg.origin != self.cfg.expected_origin {
            warn!(origin = %msg.origin, "🐦 Dropping window message from untrusted origin");
            return None;
        }
        match CallbackPayload::from_message(&msg.data) {
            Ok(Some(payload)) => Some(payload),
            Ok(None) => {
                debug!("ignoring non-callback window message");
                None
            }
            Err(e) => {
                debug!("ignoring window message: {}", e);
                None
            }
        }
    }

    fn still_current(&self, started: &IdentityTag, finished: &IdentityTag) -> bool {
        started == finished && self.session.is_current(finished)
    }
}
