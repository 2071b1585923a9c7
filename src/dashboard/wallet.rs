//! Wallet provider boundary.
//!
//! The dashboard only needs five things from a wallet: the already-authorized
//! accounts (silent), an authorization prompt, a balance, a confirmed
//! transfer, and a stream of account-change events. [`WalletProvider`] is
//! that seam; [`LocalKeyWallet`] backs it with an alloy signer and JSON-RPC.

use std::str::FromStr;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::{Address, B256, U256};
use anyhow::Context;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use tracing::info;
use url::Url;

use super::errors::DashboardError;
use super::messages::WalletEvent;
use super::types::Identity;

// ─────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────

pub const DEFAULT_RPC_URL: &str = "https://eth.llamarpc.com";

#[derive(Debug)]
pub struct WalletConfig {
    pub rpc_url: Url,
    /// Hex private key. Without one there is no wallet to connect.
    pub private_key: Option<SecretString>,
}

impl WalletConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let rpc_url = std::env::var("BOTDECK_RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.into());
        let rpc_url = Url::parse(rpc_url.trim()).context("BOTDECK_RPC_URL is not a URL")?;
        let private_key = std::env::var("BOTDECK_PRIVATE_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(SecretString::from);
        Ok(Self {
            rpc_url,
            private_key,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Provider seam
// ─────────────────────────────────────────────────────────

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Accounts already authorized for this app. Never prompts.
    async fn accounts(&self) -> Result<Vec<String>, DashboardError>;

    /// Ask the user to authorize. A refusal is `WalletRejected`.
    async fn request_accounts(&self) -> Result<Vec<String>, DashboardError>;

    async fn balance(&self, account: &Identity) -> Result<U256, DashboardError>;

    /// Submit a plain value transfer and wait until it is mined.
    async fn send_transaction(&self, to: Address, value: U256) -> Result<B256, DashboardError>;

    /// `accountsChanged` / `disconnect` notifications.
    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

// ─────────────────────────────────────────────────────────
// Local key wallet (alloy)
// ─────────────────────────────────────────────────────────

/// A wallet holding one local private key. Configuring the key is the
/// authorization, so the silent and prompting account queries agree.
pub struct LocalKeyWallet {
    signer: PrivateKeySigner,
    rpc_url: Url,
    events: broadcast::Sender<WalletEvent>,
}

impl LocalKeyWallet {
    pub fn from_config(cfg: &WalletConfig) -> Result<Option<Self>, DashboardError> {
        let Some(key) = cfg.private_key.as_ref() else {
            return Ok(None);
        };
        let signer = PrivateKeySigner::from_str(key.expose_secret()).map_err(|e| {
            DashboardError::WalletRejected {
                reason: format!("invalid private key: {e}"),
            }
        })?;
        let (events, _) = broadcast::channel(16);
        info!(
            "👛 Local wallet loaded: {}",
            Identity::from_address(&signer.address().to_string())
                .map(|id| id.short())
                .unwrap_or_default()
        );
        Ok(Some(Self {
            signer,
            rpc_url: cfg.rpc_url.clone(),
            events,
        }))
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Broadcast an `accountsChanged([])`, as a wallet does when it locks.
    #[cfg(test)]
    pub(crate) fn lock(&self) {
        let _ = self.events.send(WalletEvent::AccountsChanged(Vec::new()));
    }
}

#[async_trait]
impl WalletProvider for LocalKeyWallet {
    async fn accounts(&self) -> Result<Vec<String>, DashboardError> {
        Ok(vec![self.address().to_string()])
    }

    async fn request_accounts(&self) -> Result<Vec<String>, DashboardError> {
        Ok(vec![self.address().to_string()])
    }

    async fn balance(&self, account: &Identity) -> Result<U256, DashboardError> {
        let address = Address::from_str(account.as_str()).map_err(|e| DashboardError::Invalid {
            message: format!("not an address: {e}"),
        })?;
        let provider = ProviderBuilder::new().connect_http(self.rpc_url.clone());
        provider
            .get_balance(address)
            .await
            .map_err(DashboardError::transport)
    }

    async fn send_transaction(&self, to: Address, value: U256) -> Result<B256, DashboardError> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone());
        let tx = TransactionRequest::default().with_to(to).with_value(value);

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| DashboardError::WalletRejected {
                reason: e.to_string(),
            })?;
        info!("💸 Payment submitted: {}", pending.tx_hash());

        pending.watch().await.map_err(|e| DashboardError::Payment {
            message: e.to_string(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known anvil dev key #0.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn cfg(key: Option<&str>) -> WalletConfig {
        WalletConfig {
            rpc_url: Url::parse("http://127.0.0.1:8545").unwrap(),
            private_key: key.map(|k| SecretString::from(k.to_string())),
        }
    }

    #[test]
    fn test_no_key_means_no_wallet() {
        assert!(LocalKeyWallet::from_config(&cfg(None)).unwrap().is_none());
    }

    #[test]
    fn test_bad_key_rejected() {
        assert!(matches!(
            LocalKeyWallet::from_config(&cfg(Some("nope"))),
            Err(DashboardError::WalletRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_silent_and_prompted_accounts_agree() {
        let wallet = LocalKeyWallet::from_config(&cfg(Some(DEV_KEY))).unwrap().unwrap();
        let silent = wallet.accounts().await.unwrap();
        let prompted = wallet.request_accounts().await.unwrap();
        assert_eq!(silent, prompted);
        assert_eq!(
            Identity::from_address(&silent[0]).unwrap().as_str(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[tokio::test]
    async fn test_lock_emits_empty_accounts() {
        let wallet = LocalKeyWallet::from_config(&cfg(Some(DEV_KEY))).unwrap().unwrap();
        let mut rx = wallet.subscribe();
        wallet.lock();
        assert_eq!(rx.recv().await.unwrap(), WalletEvent::AccountsChanged(vec![]));
    }
}
