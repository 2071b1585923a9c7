use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────

/// Lowercase wallet address. Tags every backend request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Normalize a raw wallet address. Blank input yields `None`.
    pub fn from_address(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x1234...abcd`, the form shown next to the wallet button.
    pub fn short(&self) -> String {
        let s = self.0.as_str();
        if s.len() <= 10 || !s.is_ascii() {
            return s.to_string();
        }
        format!("{}...{}", &s[..6], &s[s.len() - 4..])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identity a request was issued under, plus the session generation at
/// issue time. A response is applied only while its tag is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTag {
    pub identity: Identity,
    pub generation: u64,
}

/// A backend response together with the tag of the request that produced it.
#[derive(Debug, Clone)]
pub struct Tagged<T> {
    pub tag: IdentityTag,
    pub value: T,
}

impl<T> Tagged<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tagged<U> {
        Tagged {
            tag: self.tag,
            value: f(self.value),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Bot configuration
// ─────────────────────────────────────────────────────────

pub const DEFAULT_BOT_NAME: &str = "My Bot";
pub const DEFAULT_POST_INTERVAL_MIN: u32 = 60;

/// User-editable part of the bot configuration, sent on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotDraft {
    pub name: String,
    pub system_prompt: String,
    /// Minutes between posts. Must be at least 1.
    pub post_interval: u32,
}

impl Default for BotDraft {
    fn default() -> Self {
        Self {
            name: DEFAULT_BOT_NAME.to_string(),
            system_prompt: String::new(),
            post_interval: DEFAULT_POST_INTERVAL_MIN,
        }
    }
}

/// Bot as stored by the backend (`GET /bots/my`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotRecord {
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    pub post_interval: u32,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub twitter_account_id: Option<String>,
}

/// `GET /twitter/auth` response.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUrlResponse {
    pub auth_url: String,
}

/// `GET /twitter/callback` confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkedAccount {
    pub username: String,
}

/// Where the user is in the create → link → activate progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    /// No bot saved yet.
    ConfigureBot,
    /// Bot exists but no Twitter account is linked.
    ConnectTwitter,
    /// Bot can be toggled on and off.
    Ready,
}

/// Locally cached copy of the backend's bot state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BotState {
    pub draft: BotDraft,
    pub is_active: bool,
    pub linked_account: Option<String>,
    pub bot_created: bool,
}

impl BotState {
    pub fn from_record(record: BotRecord) -> Self {
        Self {
            draft: BotDraft {
                name: record.name,
                system_prompt: record.system_prompt,
                post_interval: record.post_interval,
            },
            is_active: record.is_active,
            linked_account: record.twitter_account_id.filter(|id| !id.is_empty()),
            bot_created: true,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked_account.is_some()
    }

    pub fn setup_step(&self) -> SetupStep {
        if !self.bot_created {
            SetupStep::ConfigureBot
        } else if !self.is_linked() {
            SetupStep::ConnectTwitter
        } else {
            SetupStep::Ready
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_lowercased_and_trimmed() {
        let id = Identity::from_address("  0xAbCdEF0123456789abcdef0123456789ABCDEF01 ").unwrap();
        assert_eq!(id.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(id.short(), "0xabcd...ef01");
    }

    #[test]
    fn test_blank_identity_rejected() {
        assert!(Identity::from_address("   ").is_none());
    }

    #[test]
    fn test_setup_progression() {
        let mut state = BotState::default();
        assert_eq!(state.setup_step(), SetupStep::ConfigureBot);
        state.bot_created = true;
        assert_eq!(state.setup_step(), SetupStep::ConnectTwitter);
        state.linked_account = Some("meme_lord".into());
        assert_eq!(state.setup_step(), SetupStep::Ready);
    }

    #[test]
    fn test_record_with_empty_account_is_unlinked() {
        let state = BotState::from_record(BotRecord {
            name: "x".into(),
            system_prompt: String::new(),
            post_interval: 15,
            is_active: true,
            twitter_account_id: Some(String::new()),
        });
        assert!(state.bot_created);
        assert!(!state.is_linked());
        assert_eq!(state.draft.post_interval, 15);
    }
}
