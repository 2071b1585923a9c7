//! Channel message types flowing between the wallet, the popup callback page
//! and the opener.
//!
//! Wallet ──WalletEvent──→ Session
//! Callback page ──WindowMessage──→ MessageBus ──→ OAuthCoordinator

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::DashboardError;
use super::types::LinkedAccount;

// ─────────────────────────────────────────────────────────
// Wallet Events (WalletProvider → Session)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// Authorized accounts changed. Empty means the wallet locked or revoked us.
    AccountsChanged(Vec<String>),
    /// Provider lost its connection.
    Disconnect,
}

// ─────────────────────────────────────────────────────────
// Cross-window Messages (callback page → opener)
// ─────────────────────────────────────────────────────────

/// Type tag of the message the callback page posts to its opener.
pub const TWITTER_CALLBACK: &str = "TWITTER_CALLBACK";

/// A posted message as the opener sees it: sender origin plus an untrusted
/// JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMessage {
    pub origin: String,
    pub data: Value,
}

/// `{type: "TWITTER_CALLBACK", oauth_token, oauth_verifier}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub oauth_token: String,
    pub oauth_verifier: String,
}

impl CallbackPayload {
    pub fn new(oauth_token: impl Into<String>, oauth_verifier: impl Into<String>) -> Self {
        Self {
            kind: TWITTER_CALLBACK.to_string(),
            oauth_token: oauth_token.into(),
            oauth_verifier: oauth_verifier.into(),
        }
    }

    /// Interpret an untrusted window message.
    ///
    /// `Ok(None)` for anything not typed as a Twitter callback. A callback-typed
    /// message without both non-empty fields is `MalformedCallback`.
    pub fn from_message(data: &Value) -> Result<Option<Self>, DashboardError> {
        if data.get("type").and_then(Value::as_str) != Some(TWITTER_CALLBACK) {
            return Ok(None);
        }
        let field = |name: &str| {
            data.get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| DashboardError::MalformedCallback {
                    reason: format!("missing {name}"),
                })
        };
        Ok(Some(Self::new(field("oauth_token")?, field("oauth_verifier")?)))
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.kind,
            "oauth_token": self.oauth_token,
            "oauth_verifier": self.oauth_verifier,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Handshake Result (OAuthCoordinator → controller)
// ─────────────────────────────────────────────────────────

/// Terminal result of one popup lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Callback exchanged; the backend linked this account.
    Linked(LinkedAccount),
    /// The popup closed without ever posting a callback.
    Abandoned,
    /// No callback arrived before the handshake timeout.
    TimedOut,
}
