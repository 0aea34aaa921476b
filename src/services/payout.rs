//! Payout contract initialization
//!
//! Each timeline owns a pre-deployed reward manager contract whose one-time
//! `initialize(address[] addresses, uint256[] percentages)` entry point fixes
//! the payout table. Transactions are signed and submitted by a relayer
//! service; this module only hands it a validated share table and waits for
//! the confirmed receipt.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::allocation::{EthAddress, PayoutShareTable};
use crate::types::{Result, TimelineError};

/// Receipt of a confirmed initialization transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// Initializes a payout contract with its share table (allows mocking in tests)
#[async_trait::async_trait]
pub trait PayoutInitializer: Send + Sync {
    /// Call `initialize` on `contract`. Returns only once the transaction is
    /// confirmed; a revert or timeout is an error, and a contract whose table
    /// is already set fails with `ContractAlreadyInitialized`.
    async fn initialize(
        &self,
        contract: &EthAddress,
        table: &PayoutShareTable,
    ) -> Result<TransactionReceipt>;
}

/// Configuration for the relayer-backed initializer
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    /// Relayer base URL, e.g. "https://relayer.internal"
    pub url: String,
    /// Bearer token for the relayer, if it requires one
    pub api_key: Option<String>,
    /// Covers submission and confirmation
    pub request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct InitializeRequest<'a> {
    addresses: Vec<&'a str>,
    percentages: Vec<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResponse {
    tx_hash: String,
    status: TxStatus,
    #[serde(default)]
    block_number: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum TxStatus {
    Confirmed,
    Reverted,
    Pending,
}

pub struct RelayerPayoutInitializer {
    config: RelayerConfig,
    http_client: reqwest::Client,
}

impl RelayerPayoutInitializer {
    pub fn new(config: RelayerConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("timeline-rewards/0.1")
            .build()
            .map_err(|e| TimelineError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn initialize_url(&self, contract: &EthAddress) -> String {
        format!(
            "{}/v1/reward-managers/{}/initialize",
            self.config.url.trim_end_matches('/'),
            contract
        )
    }
}

#[async_trait::async_trait]
impl PayoutInitializer for RelayerPayoutInitializer {
    async fn initialize(
        &self,
        contract: &EthAddress,
        table: &PayoutShareTable,
    ) -> Result<TransactionReceipt> {
        table.validate()?;

        let body = InitializeRequest {
            addresses: table.shares().iter().map(|s| s.address.as_str()).collect(),
            percentages: table.basis_points(),
        };
        let url = self.initialize_url(contract);

        info!(
            contract = %contract,
            recipients = body.addresses.len(),
            "Submitting payout initialization"
        );

        let mut request = self.http_client.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TimelineError::PayoutInitialization(format!("Relayer request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TimelineError::PayoutInitialization(format!(
                "Relayer returned HTTP {status}: {detail}"
            )));
        }

        let result: InitializeResponse = response.json().await.map_err(|e| {
            TimelineError::PayoutInitialization(format!("Malformed relayer response: {e}"))
        })?;

        match result.status {
            TxStatus::Confirmed => {
                info!(contract = %contract, tx_hash = %result.tx_hash, "Payout contract initialized");
                Ok(TransactionReceipt {
                    tx_hash: result.tx_hash,
                    block_number: result.block_number,
                })
            }
            TxStatus::Reverted => Err(revert_error(&result.tx_hash, result.error)),
            TxStatus::Pending => {
                warn!(contract = %contract, tx_hash = %result.tx_hash, "Initialization not confirmed");
                Err(TimelineError::PayoutInitialization(format!(
                    "Transaction {} not confirmed",
                    result.tx_hash
                )))
            }
        }
    }
}

/// Revert reason reported by the contract when its table is already set
const ALREADY_INITIALIZED_REASON: &str = "already initialized";

/// Error for a reverted initialization. A contract that was already
/// initialized must leave the pool rather than return to it.
fn revert_error(tx_hash: &str, reason: Option<String>) -> TimelineError {
    let reason = reason.unwrap_or_else(|| "no reason given".to_string());
    let message = format!("Transaction {tx_hash} reverted: {reason}");
    if reason.to_ascii_lowercase().contains(ALREADY_INITIALIZED_REASON) {
        TimelineError::ContractAlreadyInitialized(message)
    } else {
        TimelineError::PayoutInitialization(message)
    }
}

/// Development initializer that validates and logs the table without submitting it
#[derive(Debug, Default)]
pub struct DryRunPayoutInitializer;

#[async_trait::async_trait]
impl PayoutInitializer for DryRunPayoutInitializer {
    async fn initialize(
        &self,
        contract: &EthAddress,
        table: &PayoutShareTable,
    ) -> Result<TransactionReceipt> {
        table.validate()?;
        warn!(
            contract = %contract,
            addresses = ?table.addresses(),
            percentages = ?table.basis_points(),
            "Dry run: payout initialization not submitted"
        );
        Ok(TransactionReceipt {
            tx_hash: format!("dry-run-{}", uuid::Uuid::new_v4()),
            block_number: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{reconcile, Apportionment};

    #[test]
    fn test_initialize_url() {
        let initializer = RelayerPayoutInitializer::new(RelayerConfig {
            url: "https://relayer.example/".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();
        let contract = EthAddress::parse("0x1111111111111111111111111111111111111111").unwrap();

        assert_eq!(
            initializer.initialize_url(&contract),
            "https://relayer.example/v1/reward-managers/0x1111111111111111111111111111111111111111/initialize"
        );
    }

    #[test]
    fn test_response_parsing() {
        let ok: InitializeResponse =
            serde_json::from_str(r#"{"txHash":"0xabc","status":"confirmed","blockNumber":12}"#).unwrap();
        assert_eq!(ok.status, TxStatus::Confirmed);
        assert_eq!(ok.block_number, Some(12));

        let reverted: InitializeResponse =
            serde_json::from_str(r#"{"txHash":"0xdef","status":"reverted","error":"already initialized"}"#)
                .unwrap();
        assert_eq!(reverted.status, TxStatus::Reverted);
        assert_eq!(reverted.error.as_deref(), Some("already initialized"));
    }

    #[test]
    fn test_already_initialized_revert_is_distinguished() {
        let err = revert_error("0xdef", Some("Initializable: contract is Already Initialized".to_string()));
        assert!(matches!(err, TimelineError::ContractAlreadyInitialized(_)));

        let err = revert_error("0xdef", Some("shares must sum to 10000".to_string()));
        assert!(matches!(err, TimelineError::PayoutInitialization(_)));
        assert!(matches!(revert_error("0xdef", None), TimelineError::PayoutInitialization(_)));
    }

    #[tokio::test]
    async fn test_dry_run_returns_receipt() {
        let creator = EthAddress::parse("0x2222222222222222222222222222222222222222").unwrap();
        let table = reconcile(&[], &creator, Apportionment::LargestRemainder).unwrap();

        let receipt = tokio_test::assert_ok!(
            DryRunPayoutInitializer.initialize(&creator, &table).await
        );
        assert!(receipt.tx_hash.starts_with("dry-run-"));
    }
}
