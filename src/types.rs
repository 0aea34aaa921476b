//! Shared error and result types

use hyper::StatusCode;

/// Errors surfaced by the Timeline service
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Database error: {0}")]
    Database(String),

    /// Social graph API failure that cannot be tolerated locally
    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Address resolution failed: {0}")]
    Resolution(String),

    #[error("No unused payout contract available")]
    NoPayoutContract,

    #[error("Payout initialization failed: {0}")]
    PayoutInitialization(String),

    /// The contract rejected `initialize` because its table is already set
    #[error("Payout contract already initialized: {0}")]
    ContractAlreadyInitialized(String),

    /// Another pipeline took over the payout contract claim
    #[error("Payout contract claim lost: {0}")]
    ClaimLost(String),

    /// JSON-RPC read against the chain failed
    #[error("Chain read failed: {0}")]
    Chain(String),

    /// The reconciled share table does not satisfy the payout contract's invariants
    #[error("Share table invariant violated: {0}")]
    ShareInvariant(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TimelineError {
    /// HTTP status used when this error reaches a route handler
    pub fn status_code(&self) -> StatusCode {
        match self {
            TimelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            TimelineError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            TimelineError::NotFound(_) => StatusCode::NOT_FOUND,
            TimelineError::Resolution(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TimelineError::NoPayoutContract => StatusCode::SERVICE_UNAVAILABLE,
            TimelineError::ClaimLost(_) => StatusCode::CONFLICT,
            TimelineError::Upstream(_)
            | TimelineError::PayoutInitialization(_)
            | TimelineError::ContractAlreadyInitialized(_)
            | TimelineError::Chain(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code for JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            TimelineError::Config(_) => "CONFIG",
            TimelineError::InvalidInput(_) => "INVALID_INPUT",
            TimelineError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            TimelineError::Database(_) => "DATABASE",
            TimelineError::Upstream(_) => "UPSTREAM",
            TimelineError::Resolution(_) => "RESOLUTION",
            TimelineError::NoPayoutContract => "NO_PAYOUT_CONTRACT",
            TimelineError::PayoutInitialization(_) => "PAYOUT_INITIALIZATION",
            TimelineError::ContractAlreadyInitialized(_) => "CONTRACT_ALREADY_INITIALIZED",
            TimelineError::ClaimLost(_) => "CLAIM_LOST",
            TimelineError::Chain(_) => "CHAIN",
            TimelineError::ShareInvariant(_) => "SHARE_INVARIANT",
            TimelineError::NotFound(_) => "NOT_FOUND",
            TimelineError::Io(_) => "IO",
        }
    }
}

pub type Result<T> = std::result::Result<T, TimelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            TimelineError::InvalidInput("cap".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TimelineError::NoPayoutContract.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            TimelineError::PayoutInitialization("reverted".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            TimelineError::ClaimLost("0xc0".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            TimelineError::PayloadTooLarge(1024).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            TimelineError::Database("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
