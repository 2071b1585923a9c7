//! One-time bot creation fee.
//!
//! Balance check, transfer to the payment address, wait for the receipt.
//! Testing mode waives the fee entirely.

use std::str::FromStr;

use alloy_primitives::{address, Address, B256, U256};
use anyhow::Context;
use tracing::{info, warn};

use super::errors::{trim_ether, DashboardError};
use super::identity::Session;

// ─────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────

pub const DEFAULT_PAYMENT_ADDRESS: Address = address!("8f643aCb27486C51012aF4ffE39F87ACbaCc27BE");

/// 0.01 ether.
pub const DEFAULT_CREATION_FEE_WEI: u64 = 10_000_000_000_000_000;

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub payment_address: Address,
    pub creation_fee: U256,
    /// No fee is charged while set.
    pub testing_mode: bool,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            payment_address: DEFAULT_PAYMENT_ADDRESS,
            creation_fee: U256::from(DEFAULT_CREATION_FEE_WEI),
            testing_mode: true,
        }
    }
}

impl PaymentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("BOTDECK_PAYMENT_ADDRESS") {
            c.payment_address = Address::from_str(v.trim())
                .with_context(|| format!("BOTDECK_PAYMENT_ADDRESS '{v}' is not an address"))?;
        }
        if let Ok(v) = std::env::var("BOTDECK_CREATION_FEE_WEI") { if let Ok(f) = U256::from_str(v.trim()) { c.creation_fee = f; } }
        if let Ok(v) = std::env::var("BOTDECK_TESTING_MODE") { c.testing_mode = v != "0" && v.to_lowercase() != "false"; }
        Ok(c)
    }
}

// ─────────────────────────────────────────────────────────
// Fee collection
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentReceipt {
    Waived,
    Paid { tx_hash: B256 },
}

pub struct CreationFee {
    cfg: PaymentConfig,
}

impl CreationFee {
    pub fn new(cfg: PaymentConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &PaymentConfig {
        &self.cfg
    }

    /// Charge the creation fee to the session's wallet.
    ///
    /// `InsufficientFunds` is checked before anything is submitted. Other
    /// wallet failures collapse into `Payment`.
    pub async fn collect(&self, session: &Session) -> Result<PaymentReceipt, DashboardError> {
        if self.cfg.testing_mode {
            info!("🔧 Testing mode — creation fee waived");
            return Ok(PaymentReceipt::Waived);
        }

        let tag = session.resolve_identity()?;
        let wallet = session.wallet()?;
        let required = self.cfg.creation_fee;

        let balance = wallet.balance(&tag.identity).await.map_err(payment_failure)?;
        if balance < required {
            warn!(
                identity = %tag.identity.short(),
                "💸 Balance {} ETH below creation fee {} ETH",
                trim_ether(balance),
                trim_ether(required)
            );
            return Err(DashboardError::InsufficientFunds { balance, required });
        }

        let tx_hash = wallet
            .send_transaction(self.cfg.payment_address, required)
            .await
            .map_err(payment_failure)?;
        info!("💸 Creation fee confirmed: {}", tx_hash);
        Ok(PaymentReceipt::Paid { tx_hash })
    }
}

fn payment_failure(err: DashboardError) -> DashboardError {
    match err {
        DashboardError::InsufficientFunds { .. }
        | DashboardError::IdentityUnavailable
        | DashboardError::WalletUnavailable
        | DashboardError::Payment { .. } => err,
        other => DashboardError::Payment {
            message: other.to_string(),
        },
    }
}
