//! Session / identity resolver.
//!
//! Holds the one current identity (lowercase wallet address) and hands out
//! [`IdentityTag`]s. Every identity change bumps a generation counter, so a
//! response tagged under an earlier generation is recognizably stale even if
//! the address later comes back (A → B → A).
//!
//! Wallet events reach the session through [`Session::listen`], a scoped
//! subscription torn down when the returned guard drops.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::errors::DashboardError;
use super::messages::WalletEvent;
use super::storage::{FlagStore, DISCONNECT_FLAG};
use super::types::{Identity, IdentityTag};
use super::wallet::WalletProvider;

/// Snapshot published to subscribers on every identity change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub generation: u64,
}

pub struct Session {
    wallet: Option<Arc<dyn WalletProvider>>,
    flags: Arc<dyn FlagStore>,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(wallet: Option<Arc<dyn WalletProvider>>, flags: Arc<dyn FlagStore>) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            wallet,
            flags,
            state,
        }
    }

    // ─────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────

    /// Current identity with its generation, or `IdentityUnavailable`.
    /// Callers must resolve before building any request.
    pub fn resolve_identity(&self) -> Result<IdentityTag, DashboardError> {
        let state = self.state.borrow();
        match &state.identity {
            Some(identity) => Ok(IdentityTag {
                identity: identity.clone(),
                generation: state.generation,
            }),
            None => Err(DashboardError::IdentityUnavailable),
        }
    }

    pub fn current(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    /// Whether a response issued under `tag` may still touch local state.
    pub fn is_current(&self, tag: &IdentityTag) -> bool {
        let state = self.state.borrow();
        state.generation == tag.generation && state.identity.as_ref() == Some(&tag.identity)
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn wallet(&self) -> Result<&Arc<dyn WalletProvider>, DashboardError> {
        self.wallet.as_ref().ok_or(DashboardError::WalletUnavailable)
    }

    // ─────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────

    /// Startup: honor a persisted disconnect, otherwise silently adopt an
    /// already-authorized account.
    pub async fn initialize(&self) -> Result<Option<Identity>, DashboardError> {
        if self.flags.is_set(DISCONNECT_FLAG)? {
            info!("👛 User disconnected previously — not querying wallet");
            return Ok(None);
        }
        let Some(wallet) = self.wallet.as_ref() else {
            debug!("no wallet provider configured");
            return Ok(None);
        };
        let accounts = wallet.accounts().await?;
        Ok(accounts
            .first()
            .and_then(|raw| Identity::from_address(raw))
            .map(|identity| {
                self.adopt(Some(identity.clone()));
                identity
            }))
    }

    /// Explicit connect. Prompts the wallet; a refusal propagates untouched.
    pub async fn connect(&self) -> Result<Identity, DashboardError> {
        let wallet = self.wallet()?;
        let accounts = wallet.request_accounts().await?;
        let identity = accounts
            .first()
            .and_then(|raw| Identity::from_address(raw))
            .ok_or_else(|| DashboardError::WalletRejected {
                reason: "wallet returned no accounts".to_string(),
            })?;
        self.adopt(Some(identity.clone()));
        self.flags.clear(DISCONNECT_FLAG)?;
        info!("👛 Wallet connected: {}", identity.short());
        Ok(identity)
    }

    /// Explicit disconnect. Persists the intent so the next start stays
    /// disconnected.
    pub fn disconnect(&self) -> Result<(), DashboardError> {
        self.adopt(None);
        self.flags.set(DISCONNECT_FLAG)?;
        info!("👛 Wallet disconnected");
        Ok(())
    }

    /// `accountsChanged`: empty disconnects, otherwise the first address wins.
    pub fn on_accounts_changed(&self, accounts: &[String]) -> Result<(), DashboardError> {
        match accounts.first().and_then(|raw| Identity::from_address(raw)) {
            Some(identity) => {
                if self.adopt(Some(identity.clone())) {
                    info!("👛 Account switched: {}", identity.short());
                }
                self.flags.clear(DISCONNECT_FLAG)
            }
            None => self.disconnect(),
        }
    }

    pub fn on_wallet_event(&self, event: &WalletEvent) -> Result<(), DashboardError> {
        match event {
            WalletEvent::AccountsChanged(accounts) => self.on_accounts_changed(accounts),
            WalletEvent::Disconnect => self.disconnect(),
        }
    }

    /// Replace the identity. Returns true when it actually changed.
    fn adopt(&self, identity: Option<Identity>) -> bool {
        self.state.send_if_modified(|state| {
            if state.identity == identity {
                return false;
            }
            state.identity = identity;
            state.generation += 1;
            true
        })
    }

    // ─────────────────────────────────────────────────
    // Event subscription
    // ─────────────────────────────────────────────────

    /// Route wallet events into this session until the guard drops.
    /// `None` when there is no wallet to listen to.
    pub fn listen(self: &Arc<Self>) -> Option<WalletSubscription> {
        let mut rx = self.wallet.as_ref()?.subscribe();
        let session = Arc::clone(self);
        let join = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = session.on_wallet_event(&event) {
                            warn!("👛 Failed to apply wallet event {:?}: {}", event, e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("👛 Wallet event stream lagged, {} events dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("wallet event listener finished");
        });
        Some(WalletSubscription { join })
    }
}

/// Live wallet-event subscription. Dropping it deregisters the listener.
pub struct WalletSubscription {
    join: JoinHandle<()>,
}

impl WalletSubscription {
    pub fn is_active(&self) -> bool {
        !self.join.is_finished()
    }
}

impl Drop for WalletSubscription {
    fn drop(&mut self) {
        self.join.abort();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dashboard::storage::MemoryFlagStore;
    use alloy_primitives::{Address, B256, U256};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    pub const ALICE: &str = "0xAAAA00000000000000000000000000000000aaaa";
    pub const BOB: &str = "0xBBBB00000000000000000000000000000000bbbb";

    /// Scriptable wallet shared by the dashboard tests.
    pub struct FakeWallet {
        pub authorized: Mutex<Vec<String>>,
        pub reject_prompt: Mutex<bool>,
        pub balance: Mutex<U256>,
        pub sent: Mutex<Vec<(Address, U256)>>,
        pub events: broadcast::Sender<WalletEvent>,
    }

    impl FakeWallet {
        pub fn new(authorized: &[&str]) -> Self {
            let (events, _) = broadcast::channel(16);
            Self {
                authorized: Mutex::new(authorized.iter().map(|s| s.to_string()).collect()),
                reject_prompt: Mutex::new(false),
                balance: Mutex::new(U256::ZERO),
                sent: Mutex::new(Vec::new()),
                events,
            }
        }
    }

    #[async_trait]
    impl WalletProvider for FakeWallet {
        async fn accounts(&self) -> Result<Vec<String>, DashboardError> {
            Ok(self.authorized.lock().unwrap().clone())
        }

        async fn request_accounts(&self) -> Result<Vec<String>, DashboardError> {
            if *self.reject_prompt.lock().unwrap() {
                return Err(DashboardError::WalletRejected {
                    reason: "User rejected the request.".into(),
                });
            }
            Ok(self.authorized.lock().unwrap().clone())
        }

        async fn balance(&self, _account: &Identity) -> Result<U256, DashboardError> {
            Ok(*self.balance.lock().unwrap())
        }

        async fn send_transaction(&self, to: Address, value: U256) -> Result<B256, DashboardError> {
            self.sent.lock().unwrap().push((to, value));
            Ok(B256::repeat_byte(0x11))
        }

        fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
            self.events.subscribe()
        }
    }

    pub fn session_with(wallet: Arc<FakeWallet>, flags: Arc<MemoryFlagStore>) -> Arc<Session> {
        Arc::new(Session::new(Some(wallet), flags))
    }

    fn accounts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // ── Resolution ──

    #[test]
    fn test_resolve_without_wallet_fails() {
        let session = Session::new(None, Arc::new(MemoryFlagStore::default()));
        assert_eq!(
            session.resolve_identity(),
            Err(DashboardError::IdentityUnavailable)
        );
    }

    #[test]
    fn test_identity_tracks_latest_non_empty_event() {
        let session = session_with(
            Arc::new(FakeWallet::new(&[])),
            Arc::new(MemoryFlagStore::default()),
        );
        let script: Vec<Vec<String>> = vec![
            accounts(&[ALICE, BOB]),
            accounts(&[BOB]),
            accounts(&[]),
            accounts(&[ALICE]),
            accounts(&[]),
            accounts(&[BOB, ALICE]),
        ];
        for event in &script {
            session.on_accounts_changed(event).unwrap();
            let expected = event.first().map(|a| a.to_ascii_lowercase());
            assert_eq!(
                session.current().map(|id| id.as_str().to_string()),
                expected
            );
        }
    }

    #[test]
    fn test_switch_back_still_invalidates_old_tags() {
        let session = session_with(
            Arc::new(FakeWallet::new(&[])),
            Arc::new(MemoryFlagStore::default()),
        );
        session.on_accounts_changed(&accounts(&[ALICE])).unwrap();
        let first = session.resolve_identity().unwrap();
        assert!(session.is_current(&first));

        session.on_accounts_changed(&accounts(&[BOB])).unwrap();
        assert!(!session.is_current(&first));
        session.on_accounts_changed(&accounts(&[ALICE])).unwrap();
        assert!(!session.is_current(&first));
        assert!(session.is_current(&session.resolve_identity().unwrap()));
    }

    #[test]
    fn test_repeated_same_account_keeps_tag() {
        let session = session_with(
            Arc::new(FakeWallet::new(&[])),
            Arc::new(MemoryFlagStore::default()),
        );
        session.on_accounts_changed(&accounts(&[ALICE])).unwrap();
        let tag = session.resolve_identity().unwrap();
        session.on_accounts_changed(&accounts(&[ALICE, BOB])).unwrap();
        assert!(session.is_current(&tag));
    }

    // ── Persisted disconnect intent ──

    #[tokio::test]
    async fn test_empty_event_persists_disconnect() {
        let flags = Arc::new(MemoryFlagStore::default());
        let wallet = Arc::new(FakeWallet::new(&[ALICE]));
        let session = session_with(wallet.clone(), flags.clone());
        session.on_accounts_changed(&accounts(&[ALICE])).unwrap();
        session.on_accounts_changed(&[]).unwrap();
        assert!(flags.is_set(DISCONNECT_FLAG).unwrap());

        // A fresh start honors the intent even though the wallet is authorized.
        let restarted = session_with(wallet, flags.clone());
        assert_eq!(restarted.initialize().await.unwrap(), None);
        assert!(restarted.current().is_none());
    }

    #[tokio::test]
    async fn test_initialize_adopts_first_authorized_account() {
        let session = session_with(
            Arc::new(FakeWallet::new(&[BOB, ALICE])),
            Arc::new(MemoryFlagStore::default()),
        );
        let id = session.initialize().await.unwrap().unwrap();
        assert_eq!(id.as_str(), BOB.to_ascii_lowercase());
    }

    #[tokio::test]
    async fn test_connect_clears_disconnect_intent() {
        let flags = Arc::new(MemoryFlagStore::default());
        flags.set(DISCONNECT_FLAG).unwrap();
        let session = session_with(Arc::new(FakeWallet::new(&[ALICE])), flags.clone());

        session.connect().await.unwrap();
        assert!(!flags.is_set(DISCONNECT_FLAG).unwrap());
        assert!(session.current().is_some());
    }

    #[tokio::test]
    async fn test_rejected_connect_propagates() {
        let flags = Arc::new(MemoryFlagStore::default());
        flags.set(DISCONNECT_FLAG).unwrap();
        let wallet = Arc::new(FakeWallet::new(&[ALICE]));
        *wallet.reject_prompt.lock().unwrap() = true;
        let session = session_with(wallet, flags.clone());

        assert!(matches!(
            session.connect().await,
            Err(DashboardError::WalletRejected { .. })
        ));
        assert!(session.current().is_none());
        assert!(flags.is_set(DISCONNECT_FLAG).unwrap());
    }

    // ── Event subscription ──

    #[tokio::test]
    async fn test_disconnect_event_clears_identity_and_persists_intent() {
        let flags = Arc::new(MemoryFlagStore::default());
        let wallet = Arc::new(FakeWallet::new(&[ALICE]));
        let session = session_with(wallet.clone(), flags.clone());
        session.on_accounts_changed(&accounts(&[ALICE])).unwrap();
        let mut state_rx = session.subscribe();
        let _sub = session.listen().unwrap();

        wallet.events.send(WalletEvent::Disconnect).unwrap();
        state_rx.changed().await.unwrap();

        assert!(session.current().is_none());
        assert!(flags.is_set(DISCONNECT_FLAG).unwrap());
        assert_eq!(
            session.resolve_identity(),
            Err(DashboardError::IdentityUnavailable)
        );
    }

    #[tokio::test]
    async fn test_listener_applies_events_until_dropped() {
        let wallet = Arc::new(FakeWallet::new(&[]));
        let session = session_with(wallet.clone(), Arc::new(MemoryFlagStore::default()));
        let mut state_rx = session.subscribe();

        let sub = session.listen().unwrap();
        assert!(sub.is_active());
        wallet
            .events
            .send(WalletEvent::AccountsChanged(accounts(&[ALICE])))
            .unwrap();
        state_rx.changed().await.unwrap();
        assert!(session.current().is_some());

        drop(sub);
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Listener gone: further events have no receiver and change nothing.
        assert!(wallet.events.send(WalletEvent::Disconnect).is_err());
        assert!(session.current().is_some());
    }
}
