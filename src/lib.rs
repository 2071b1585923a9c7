pub mod dashboard;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

use dashboard::api::BackendConfig;
use dashboard::coordinator::CoordinatorConfig;
use dashboard::payment::PaymentConfig;
use dashboard::wallet::WalletConfig;

// --- Configuration Structs ---

pub const DEFAULT_STATE_DIR: &str = ".botdeck";
pub const DEFAULT_CALLBACK_ADDR: &str = "127.0.0.1:3000";

/// Everything the dashboard binary needs, assembled from the environment.
///
/// Each actor owns its own config section with a `Default` and a lenient
/// `from_env()`; this struct only stitches them together.
#[derive(Debug)]
pub struct DashboardConfig {
    pub backend: BackendConfig,
    pub coordinator: CoordinatorConfig,
    pub payment: PaymentConfig,
    pub wallet: WalletConfig,
    /// Directory holding the persisted disconnect-intent flag.
    pub state_dir: PathBuf,
    /// Loopback address serving the OAuth callback page.
    pub callback_addr: SocketAddr,
    /// Optional directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl DashboardConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let callback_addr: SocketAddr = std::env::var("BOTDECK_CALLBACK_ADDR")
            .unwrap_or_else(|_| DEFAULT_CALLBACK_ADDR.to_string())
            .parse()
            .context("BOTDECK_CALLBACK_ADDR is not a socket address")?;

        let mut coordinator = CoordinatorConfig::from_env();
        if std::env::var("BOTDECK_APP_ORIGIN").is_err() {
            // Without an explicit origin, trust only our own callback page.
            coordinator.expected_origin = format!("http://{}", callback_addr);
        }

        let state_dir = std::env::var("BOTDECK_STATE_DIR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

        let log_dir = std::env::var("BOTDECK_LOG_DIR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            backend: BackendConfig::from_env(),
            coordinator,
            payment: PaymentConfig::from_env().context("invalid payment configuration")?,
            wallet: WalletConfig::from_env().context("invalid wallet configuration")?,
            state_dir,
            callback_addr,
            log_dir,
        })
    }
}
