//! Dashboard controller: the opener side of the app.
//!
//! Owns the cached [`BotState`], the single dismissible banner and one
//! loading flag per action. Every backend response is applied only while the
//! identity tag it was issued under is still current.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::api::BotBackend;
use super::coordinator::OAuthCoordinator;
use super::errors::DashboardError;
use super::identity::Session;
use super::messages::HandshakeOutcome;
use super::payment::{CreationFee, PaymentReceipt};
use super::types::{BotState, Identity, IdentityTag, SetupStep};

pub const LINK_REQUIRED_MESSAGE: &str = "Connect your Twitter account to activate your bot";

// ─────────────────────────────────────────────────────────
// Loading flags
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Load,
    Save,
    Toggle,
    Twitter,
}

#[derive(Debug, Default)]
struct LoadingFlags {
    load: Arc<AtomicBool>,
    save: Arc<AtomicBool>,
    toggle: Arc<AtomicBool>,
    twitter: Arc<AtomicBool>,
}

impl LoadingFlags {
    fn flag(&self, action: Action) -> &Arc<AtomicBool> {
        match action {
            Action::Load => &self.load,
            Action::Save => &self.save,
            Action::Toggle => &self.toggle,
            Action::Twitter => &self.twitter,
        }
    }

    fn start(&self, action: Action) -> LoadingGuard {
        let flag = Arc::clone(self.flag(action));
        flag.store(true, Ordering::SeqCst);
        LoadingGuard(flag)
    }
}

/// Clears its loading flag when the action finishes, on every path.
struct LoadingGuard(Arc<AtomicBool>);

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No wallet was connected; it is now. The user saves again to create.
    WalletConnected(Identity),
    Created(PaymentReceipt),
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwitterOutcome {
    Handshake(HandshakeOutcome),
    Unlinked,
}

// ─────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────

pub struct DashboardController {
    session: Arc<Session>,
    backend: Arc<dyn BotBackend>,
    coordinator: Arc<OAuthCoordinator>,
    fee: CreationFee,
    bot: BotState,
    /// Identity the cached bot belongs to. `None` until loaded or created.
    cached_for: Option<IdentityTag>,
    banner: Option<String>,
    loading: LoadingFlags,
}

impl DashboardController {
    pub fn new(
        session: Arc<Session>,
        backend: Arc<dyn BotBackend>,
        coordinator: Arc<OAuthCoordinator>,
        fee: CreationFee,
    ) -> Self {
        Self {
            session,
            backend,
            coordinator,
            fee,
            bot: BotState::default(),
            cached_for: None,
            banner: None,
            loading: LoadingFlags::default(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn bot(&self) -> &BotState {
        &self.bot
    }

    pub fn setup_step(&self) -> SetupStep {
        self.bot.setup_step()
    }

    pub fn fee(&self) -> &CreationFee {
        &self.fee
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn dismiss_banner(&mut self) {
        self.banner = None;
    }

    pub fn is_loading(&self, action: Action) -> bool {
        self.loading.flag(action).load(Ordering::SeqCst)
    }

    // ── Draft edits (local until saved) ──

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.bot.draft.name = name.into();
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.bot.draft.system_prompt = prompt.into();
    }

    pub fn set_post_interval(&mut self, minutes: u32) {
        self.bot.draft.post_interval = minutes;
    }

    // ── Wallet ──

    pub async fn connect_wallet(&mut self) -> Result<Identity, DashboardError> {
        let result = self.session.connect().await;
        result.map_err(|e| self.report(e))
    }

    pub fn disconnect_wallet(&mut self) -> Result<(), DashboardError> {
        let result = self.session.disconnect();
        result.map_err(|e| self.report(e))
    }

    // ── Bot ──

    /// Fetch the bot. "No bot yet" keeps the default draft.
    pub async fn load(&mut self) -> Result<(), DashboardError> {
        let _loading = self.loading.start(Action::Load);
        self.sync_identity();
        let result = self.backend.my_bot().await;
        let resp = result.map_err(|e| self.report(e))?;
        self.ensure_current(&resp.tag)?;

        match resp.value {
            Some(record) => {
                self.bot = BotState::from_record(record);
                info!("🤖 Loaded bot '{}' ({:?})", self.bot.draft.name, self.bot.setup_step());
            }
            None => {
                debug!("no bot for this identity yet");
                self.bot = BotState::default();
            }
        }
        self.cached_for = Some(resp.tag);
        Ok(())
    }

    /// Create the bot (charging the fee) on first save, update it afterwards.
    /// Without a wallet this connects one and stops.
    pub async fn save(&mut self) -> Result<SaveOutcome, DashboardError> {
        self.sync_identity();
        if self.bot.draft.post_interval < 1 {
            return Err(self.report(DashboardError::invalid(
                "Post interval must be at least 1 minute",
            )));
        }
        let _loading = self.loading.start(Action::Save);

        if self.bot.bot_created {
            let result = self.backend.update_bot(&self.bot.draft).await;
            let resp = result.map_err(|e| self.report(e))?;
            self.ensure_current(&resp.tag)?;
            info!("🤖 Bot '{}' updated", self.bot.draft.name);
            return Ok(SaveOutcome::Updated);
        }

        if self.session.current().is_none() {
            let identity = self.connect_wallet().await?;
            return Ok(SaveOutcome::WalletConnected(identity));
        }

        let result = self.fee.collect(&self.session).await;
        let receipt = result.map_err(|e| self.report(e))?;

        let result = self.backend.create_bot(&self.bot.draft).await;
        let resp = result.map_err(|e| self.report(e))?;
        self.ensure_current(&resp.tag)?;
        self.bot.bot_created = true;
        self.cached_for = Some(resp.tag);
        info!("🤖 Bot '{}' created", self.bot.draft.name);
        Ok(SaveOutcome::Created(receipt))
    }

    /// Flip the active flag. Local state changes only after the backend
    /// confirmed under the current identity.
    pub async fn toggle_active(&mut self) -> Result<bool, DashboardError> {
        self.sync_identity();
        if !self.bot.is_linked() {
            return Err(self.report(DashboardError::invalid(LINK_REQUIRED_MESSAGE)));
        }
        let _loading = self.loading.start(Action::Toggle);

        let target = !self.bot.is_active;
        let result = self.backend.set_active(target).await;
        let resp = result.map_err(|e| self.report(e))?;
        self.ensure_current(&resp.tag)?;
        self.bot.is_active = target;
        info!("🤖 Bot {}", if target { "activated" } else { "deactivated" });
        Ok(target)
    }

    // ── Twitter ──

    /// Run the popup handshake. Abandoned or timed-out handshakes leave
    /// state untouched and raise no banner.
    pub async fn link_twitter(&mut self) -> Result<HandshakeOutcome, DashboardError> {
        let _loading = self.loading.start(Action::Twitter);
        self.sync_identity();
        let result = self.coordinator.connect().await;
        let outcome = result.map_err(|e| self.report(e))?;
        if let HandshakeOutcome::Linked(account) = &outcome {
            self.bot.linked_account = Some(account.username.clone());
        }
        Ok(outcome)
    }

    pub async fn unlink_twitter(&mut self) -> Result<(), DashboardError> {
        let _loading = self.loading.start(Action::Twitter);
        self.sync_identity();
        let result = self.coordinator.disconnect().await;
        result.map_err(|e| self.report(e))?;
        self.bot.linked_account = None;
        Ok(())
    }

    /// The Twitter card's single button: unlink when linked, link otherwise.
    pub async fn twitter_action(&mut self) -> Result<TwitterOutcome, DashboardError> {
        self.sync_identity();
        if self.bot.is_linked() {
            self.unlink_twitter().await?;
            Ok(TwitterOutcome::Unlinked)
        } else {
            Ok(TwitterOutcome::Handshake(self.link_twitter().await?))
        }
    }

    // ── Helpers ──

    /// Drop the cached bot once the wallet it was loaded under is gone.
    fn sync_identity(&mut self) {
        let Some(tag) = &self.cached_for else {
            return;
        };
        if self.session.is_current(tag) {
            return;
        }
        info!("🤖 Wallet changed since {} was loaded — clearing cached bot", tag.identity.short());
        self.bot = BotState::default();
        self.cached_for = None;
    }

    fn ensure_current(&self, tag: &IdentityTag) -> Result<(), DashboardError> {
        if self.session.is_current(tag) {
            return Ok(());
        }
        debug!(identity = %tag.identity.short(), "discarding response for superseded identity");
        Err(DashboardError::StaleIdentity)
    }

    /// Route an error to the banner unless it is one we drop silently.
    fn report(&mut self, err: DashboardError) -> DashboardError {
        if err.is_silent() {
            debug!("suppressed: {}", err);
        } else {
            warn!("⚠️ {}", err);
            self.banner = Some(err.user_message());
        }
        err
    }
}
