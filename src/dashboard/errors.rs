use alloy_primitives::utils::format_ether;
use alloy_primitives::U256;
use thiserror::Error;

/// Every failure the dashboard can surface. All of them end up as the single
/// dismissible banner via [`DashboardError::user_message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashboardError {
    /// No wallet connected. Raised before any request leaves the process.
    #[error("Wallet not connected. Please connect your wallet first.")]
    IdentityUnavailable,
    /// The user declined a connect or transaction prompt.
    #[error("wallet request rejected: {reason}")]
    WalletRejected { reason: String },
    #[error("No wallet provider available. Configure BOTDECK_PRIVATE_KEY to connect.")]
    WalletUnavailable,
    #[error("insufficient balance: have {balance} wei, need {required} wei")]
    InsufficientFunds { balance: U256, required: U256 },
    /// Non-2xx backend response, message already normalized.
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("request failed: {message}")]
    Transport { message: String },
    #[error("failed to decode response: {message}")]
    Decode { message: String },
    /// A callback-typed window message missing its fields. Never shown.
    #[error("malformed callback message: {reason}")]
    MalformedCallback { reason: String },
    /// The response was issued under an identity that is no longer current.
    #[error("response belongs to a superseded wallet session")]
    StaleIdentity,
    #[error("A Twitter authorization is already in progress")]
    HandshakeInProgress,
    #[error("could not open authorization window: {reason}")]
    PopupBlocked { reason: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("payment failed: {message}")]
    Payment { message: String },
    /// Local validation refused the action; nothing was sent.
    #[error("{message}")]
    Invalid { message: String },
}

impl DashboardError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }

    /// Text for the page-level banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::InsufficientFunds { required, .. } => format!(
                "Insufficient ETH balance. Please make sure you have at least {} ETH.",
                trim_ether(*required)
            ),
            Self::WalletRejected { .. } => "Wallet request was rejected.".to_string(),
            Self::Payment { .. } => "Failed to process payment. Please try again.".to_string(),
            other => other.to_string(),
        }
    }

    /// Errors that are dropped instead of being shown to the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::MalformedCallback { .. } | Self::StaleIdentity)
    }
}

/// `format_ether` without the trailing zeros: 0.010000000000000000 → 0.01.
pub fn trim_ether(wei: U256) -> String {
    let s = format_ether(wei);
    if !s.contains('.') {
        return s;
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}
