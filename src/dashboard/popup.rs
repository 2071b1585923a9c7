//! Popup window primitives for the OAuth handshake.
//!
//! - [`PopupGeometry`]: the fixed 600×600 window centered in the viewport.
//! - [`PopupHost`] / [`PopupHandle`]: open, poll and close a popup.
//! - [`MessageBus`]: the opener's cross-window message channel. A
//!   [`MessageListener`] is registered per handshake and deregisters on drop.
//! - [`handle_callback`]: what the callback page does once the third party
//!   redirects the popup back to us.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::errors::DashboardError;
use super::messages::{CallbackPayload, WindowMessage};

pub const POPUP_NAME: &str = "twitter-auth";
pub const POPUP_WIDTH: u32 = 600;
pub const POPUP_HEIGHT: u32 = 600;

// ─────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

impl FromStr for Viewport {
    type Err = DashboardError;

    /// `1280x800`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || DashboardError::invalid(format!("bad viewport '{s}', expected WxH"));
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(bad)?;
        Ok(Self {
            width: w.trim().parse().map_err(|_| bad())?,
            height: h.trim().parse().map_err(|_| bad())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupGeometry {
    pub width: u32,
    pub height: u32,
    pub left: u32,
    pub top: u32,
}

impl PopupGeometry {
    /// Fixed-size window centered in `viewport`, pinned to the top-left corner
    /// when the viewport is smaller than the popup.
    pub fn centered(viewport: Viewport) -> Self {
        Self {
            width: POPUP_WIDTH,
            height: POPUP_HEIGHT,
            left: viewport.width.saturating_sub(POPUP_WIDTH) / 2,
            top: viewport.height.saturating_sub(POPUP_HEIGHT) / 2,
        }
    }

    /// `window.open` feature string.
    pub fn features(&self) -> String {
        format!(
            "width={},height={},left={},top={}",
            self.width, self.height, self.left, self.top
        )
    }
}

// ─────────────────────────────────────────────────────────
// Popup host
// ─────────────────────────────────────────────────────────

#[async_trait]
pub trait PopupHost: Send + Sync {
    async fn open(
        &self,
        url: &str,
        name: &str,
        geometry: PopupGeometry,
    ) -> Result<Box<dyn PopupHandle>, DashboardError>;
}

#[async_trait]
pub trait PopupHandle: Send {
    async fn close(&mut self);
    /// True once the user (or we) closed the window.
    async fn is_closed(&mut self) -> bool;
}

/// Opens the authorization URL with an external launcher (`xdg-open`, `open`,
/// a browser binary). The geometry is passed through the `BOTDECK_POPUP_*`
/// environment of the launched process for launchers that honor it.
#[derive(Debug, Clone)]
pub struct CommandPopupHost {
    program: String,
    args: Vec<String>,
}

pub const DEFAULT_BROWSER: &str = "xdg-open";

impl CommandPopupHost {
    /// `BOTDECK_BROWSER` is split on whitespace: program then leading args.
    pub fn from_env() -> Self {
        let raw = std::env::var("BOTDECK_BROWSER").unwrap_or_else(|_| DEFAULT_BROWSER.into());
        Self::from_command_line(&raw)
    }

    pub fn from_command_line(raw: &str) -> Self {
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| DEFAULT_BROWSER.to_string());
        Self {
            program,
            args: parts.collect(),
        }
    }
}

#[async_trait]
impl PopupHost for CommandPopupHost {
    async fn open(
        &self,
        url: &str,
        name: &str,
        geometry: PopupGeometry,
    ) -> Result<Box<dyn PopupHandle>, DashboardError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .env("BOTDECK_POPUP_NAME", name)
            .env("BOTDECK_POPUP_FEATURES", geometry.features())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| DashboardError::PopupBlocked {
                reason: format!("{}: {e}", self.program),
            })?;
        info!("🪟 Popup '{}' opened via {} ({})", name, self.program, geometry.features());
        Ok(Box::new(LaunchedPopup {
            child,
            closed: false,
        }))
    }
}

/// A popup started by a launcher process.
///
/// Launchers like `xdg-open` hand the URL to a browser and exit successfully,
/// after which the window's lifetime is invisible to us; only a failed launch
/// counts as closed. The handshake timeout covers the rest.
struct LaunchedPopup {
    child: Child,
    closed: bool,
}

#[async_trait]
impl PopupHandle for LaunchedPopup {
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill().await {
                debug!("popup launcher already gone: {}", e);
            }
        }
    }

    async fn is_closed(&mut self) -> bool {
        if self.closed {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                warn!("🪟 Popup launcher exited with {}", status);
                self.closed = true;
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("🪟 Popup launcher status unavailable: {}", e);
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Cross-window message bus
// ─────────────────────────────────────────────────────────

/// The opener's `message` event target.
#[derive(Debug, Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<WindowMessage>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(16)
    }
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver to every registered listener. Returns how many received it.
    pub fn post(&self, message: WindowMessage) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    pub fn listen(&self) -> MessageListener {
        MessageListener {
            rx: self.tx.subscribe(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One registered listener. Dropping it deregisters.
pub struct MessageListener {
    rx: broadcast::Receiver<WindowMessage>,
}

impl MessageListener {
    /// Next message, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<WindowMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("🪟 Message listener lagged, {} messages dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Callback page (popup side)
// ─────────────────────────────────────────────────────────

/// Query string of the callback redirect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    pub oauth_token: Option<String>,
    pub oauth_verifier: Option<String>,
}

/// The window that opened the popup, as seen from the callback page.
#[derive(Debug, Clone)]
pub struct Opener {
    pub bus: MessageBus,
    /// Our own origin, stamped on every posted message.
    pub origin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Message posted to the opener; the page closes itself.
    PostedToOpener,
    /// No opener to notify; send the window back to the dashboard.
    ReturnToDashboard,
    /// Parameters incomplete; keep showing the spinner.
    Waiting,
}

/// Callback page logic: with both parameters present, post a
/// `TWITTER_CALLBACK` message to the opener, or go home when there is none.
pub fn handle_callback(query: &CallbackQuery, opener: Option<&Opener>) -> CallbackAction {
    let present = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
    let (Some(token), Some(verifier)) = (present(&query.oauth_token), present(&query.oauth_verifier))
    else {
        return CallbackAction::Waiting;
    };

    match opener {
        Some(opener) => {
            let delivered = opener.bus.post(WindowMessage {
                origin: opener.origin.clone(),
                data: CallbackPayload::new(token, verifier).to_value(),
            });
            debug!(delivered, "callback posted to opener");
            CallbackAction::PostedToOpener
        }
        None => CallbackAction::ReturnToDashboard,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::messages::TWITTER_CALLBACK;

    fn query(token: Option<&str>, verifier: Option<&str>) -> CallbackQuery {
        CallbackQuery {
            oauth_token: token.map(str::to_string),
            oauth_verifier: verifier.map(str::to_string),
        }
    }

    // ── Geometry ──

    #[test]
    fn test_popup_centered() {
        let g = PopupGeometry::centered(Viewport::default());
        assert_eq!(g.features(), "width=600,height=600,left=340,top=100");
    }

    #[test]
    fn test_small_viewport_pins_to_corner() {
        let g = PopupGeometry::centered(Viewport { width: 400, height: 300 });
        assert_eq!((g.left, g.top), (0, 0));
    }

    #[test]
    fn test_viewport_parse() {
        assert_eq!(
            "1920x1080".parse::<Viewport>().unwrap(),
            Viewport { width: 1920, height: 1080 }
        );
        assert!("wide".parse::<Viewport>().is_err());
    }

    #[test]
    fn test_browser_command_line_split() {
        let host = CommandPopupHost::from_command_line("firefox --new-window");
        assert_eq!(host.program, "firefox");
        assert_eq!(host.args, vec!["--new-window".to_string()]);
    }

    // ── Message bus ──

    #[tokio::test]
    async fn test_listener_deregisters_on_drop() {
        let bus = MessageBus::default();
        let listener = bus.listen();
        assert_eq!(bus.listener_count(), 1);
        drop(listener);
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(
            bus.post(WindowMessage { origin: "x".into(), data: serde_json::Value::Null }),
            0
        );
    }

    // ── Callback page ──

    #[tokio::test]
    async fn test_callback_posts_to_opener() {
        let bus = MessageBus::default();
        let mut listener = bus.listen();
        let opener = Opener {
            bus: bus.clone(),
            origin: "http://127.0.0.1:3000".into(),
        };

        let action = handle_callback(&query(Some("tok"), Some("ver")), Some(&opener));
        assert_eq!(action, CallbackAction::PostedToOpener);

        let msg = listener.recv().await.unwrap();
        assert_eq!(msg.origin, "http://127.0.0.1:3000");
        assert_eq!(msg.data["type"], TWITTER_CALLBACK);
        assert_eq!(msg.data["oauth_token"], "tok");
        assert_eq!(msg.data["oauth_verifier"], "ver");
    }

    #[test]
    fn test_callback_without_opener_returns_home() {
        assert_eq!(
            handle_callback(&query(Some("tok"), Some("ver")), None),
            CallbackAction::ReturnToDashboard
        );
    }

    #[test]
    fn test_incomplete_callback_waits() {
        let bus = MessageBus::default();
        let opener = Opener { bus, origin: "o".into() };
        assert_eq!(
            handle_callback(&query(Some("tok"), None), Some(&opener)),
            CallbackAction::Waiting
        );
        assert_eq!(
            handle_callback(&query(Some(""), Some("ver")), None),
            CallbackAction::Waiting
        );
    }
}
