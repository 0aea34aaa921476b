//! Read-only payout contract and coin queries
//!
//! Supporters check what a timeline pays them by reading the reward manager
//! (`percentageShares`, `getUserEarnings`) and the timeline coin
//! (`balanceOf`) with `eth_call` against a JSON-RPC node.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::allocation::{EthAddress, TOTAL_BASIS_POINTS};
use crate::types::{Result, TimelineError};

/// `percentageShares(address)`
const PERCENTAGE_SHARES: [u8; 4] = [0xce, 0x73, 0x1d, 0x08];
/// `getUserEarnings(address)`
const GET_USER_EARNINGS: [u8; 4] = [0xf4, 0x2b, 0x88, 0x09];
/// ERC-20 `balanceOf(address)`
const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

const WEI_DECIMALS: usize = 18;

/// Executes read-only contract calls (allows mocking in tests)
#[async_trait::async_trait]
pub trait ChainReader: Send + Sync {
    /// `eth_call` against the latest block, returning the raw return data
    async fn call(&self, to: &EthAddress, data: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub request_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://mainnet.base.org".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (CallObject<'a>, &'static str),
}

#[derive(Debug, Serialize)]
struct CallObject<'a> {
    to: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC `eth_call` over HTTP
pub struct EthRpcReader {
    config: RpcConfig,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl EthRpcReader {
    pub fn new(config: RpcConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("timeline-rewards/0.1")
            .build()
            .map_err(|e| TimelineError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
            next_id: AtomicU64::new(1),
        })
    }
}

#[async_trait::async_trait]
impl ChainReader for EthRpcReader {
    async fn call(&self, to: &EthAddress, data: &[u8]) -> Result<Vec<u8>> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_call",
            params: (
                CallObject {
                    to: to.as_str(),
                    data: format!("0x{}", hex::encode(data)),
                },
                "latest",
            ),
        };
        debug!(to = %to, selector = %hex::encode(&data[..data.len().min(4)]), "eth_call");

        let response = self
            .http_client
            .post(&self.config.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TimelineError::Chain(format!("RPC request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TimelineError::Chain(format!("RPC returned HTTP {status}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| TimelineError::Chain(format!("Invalid RPC response: {e}")))?;
        decode_result(body)
    }
}

fn decode_result(body: RpcResponse) -> Result<Vec<u8>> {
    if let Some(err) = body.error {
        return Err(TimelineError::Chain(format!("{} (code {})", err.message, err.code)));
    }
    let result = body
        .result
        .ok_or_else(|| TimelineError::Chain("RPC response has no result".to_string()))?;
    let digits = result.strip_prefix("0x").unwrap_or(&result);
    hex::decode(digits).map_err(|e| TimelineError::Chain(format!("Invalid return data: {e}")))
}

/// Calldata for a single-address-argument function
fn encode_address_call(selector: [u8; 4], account: &EthAddress) -> Result<Vec<u8>> {
    let address = hex::decode(&account.as_str()[2..])
        .map_err(|e| TimelineError::InvalidInput(format!("Invalid address {account}: {e}")))?;
    let mut data = Vec::with_capacity(4 + 32);
    data.extend_from_slice(&selector);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(&address);
    Ok(data)
}

/// First return word as a `uint256`
fn decode_uint(data: &[u8]) -> Result<U256> {
    if data.len() < 32 {
        return Err(TimelineError::Chain(format!(
            "Expected a 32-byte word, got {} bytes",
            data.len()
        )));
    }
    Ok(U256::from_big_endian(&data[..32]))
}

async fn read_uint(
    reader: &dyn ChainReader,
    contract: &EthAddress,
    selector: [u8; 4],
    account: &EthAddress,
) -> Result<U256> {
    let data = encode_address_call(selector, account)?;
    decode_uint(&reader.call(contract, &data).await?)
}

/// Wei as a decimal ether amount without trailing zeros
pub fn format_ether(wei: U256) -> String {
    let (whole, fraction) = wei.div_mod(U256::exp10(WEI_DECIMALS));
    if fraction.is_zero() {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction.to_string(), width = WEI_DECIMALS);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

/// One supporter's position in a timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    /// Share as a percentage, e.g. "13.33%"
    pub supporter_allocation: String,
    pub basis_points: u64,
    /// Claimable earnings in ether
    pub earnings: String,
    /// Timeline coin balance in whole tokens; absent until a coin is minted
    pub balance: Option<String>,
}

/// Read `account`'s share, earnings and coin balance
pub async fn user_stats(
    reader: &dyn ChainReader,
    reward_manager: &EthAddress,
    coin: Option<&EthAddress>,
    account: &EthAddress,
) -> Result<UserStats> {
    let balance = async {
        match coin {
            Some(coin) => read_uint(reader, coin, BALANCE_OF, account).await.map(Some),
            None => Ok(None),
        }
    };
    let (shares, earnings, balance) = tokio::try_join!(
        read_uint(reader, reward_manager, PERCENTAGE_SHARES, account),
        read_uint(reader, reward_manager, GET_USER_EARNINGS, account),
        balance
    )?;

    if shares > U256::from(TOTAL_BASIS_POINTS) {
        return Err(TimelineError::Chain(format!(
            "Share of {account} out of range: {shares}"
        )));
    }
    let basis_points = shares.low_u64();

    Ok(UserStats {
        supporter_allocation: format!("{}%", basis_points as f64 / 100.0),
        basis_points,
        earnings: format_ether(earnings),
        balance: balance.map(format_ether),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn addr(n: u8) -> EthAddress {
        EthAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    fn word(value: u128) -> Vec<u8> {
        let mut out = vec![0u8; 32];
        out[16..].copy_from_slice(&value.to_be_bytes());
        out
    }

    /// Answers by (contract, selector)
    struct StaticChain(HashMap<(EthAddress, [u8; 4]), Vec<u8>>);

    #[async_trait::async_trait]
    impl ChainReader for StaticChain {
        async fn call(&self, to: &EthAddress, data: &[u8]) -> Result<Vec<u8>> {
            let selector: [u8; 4] = data[..4].try_into().unwrap();
            self.0
                .get(&(to.clone(), selector))
                .cloned()
                .ok_or_else(|| TimelineError::Chain("execution reverted".to_string()))
        }
    }

    #[test]
    fn test_address_argument_is_left_padded() {
        let data = encode_address_call(BALANCE_OF, &addr(0xAB)).unwrap();
        assert_eq!(data.len(), 36);
        assert_eq!(hex::encode(&data[..4]), "70a08231");
        assert!(data[4..16].iter().all(|b| *b == 0));
        assert_eq!(&data[16..], &[0xAB; 20]);
    }

    #[test]
    fn test_decode_uint_rejects_short_data() {
        assert!(matches!(decode_uint(&[]), Err(TimelineError::Chain(_))));
        assert_eq!(decode_uint(&word(1333)).unwrap(), U256::from(1333u64));
    }

    #[test]
    fn test_format_ether() {
        assert_eq!(format_ether(U256::zero()), "0");
        assert_eq!(format_ether(U256::exp10(18) * U256::from(3u64)), "3");
        assert_eq!(format_ether(U256::exp10(17) * U256::from(15u64)), "1.5");
        assert_eq!(format_ether(U256::from(1u64)), "0.000000000000000001");
    }

    #[test]
    fn test_rpc_error_object_is_surfaced() {
        let body: RpcResponse = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": 3, "message": "execution reverted" }
        }))
        .unwrap();
        let err = decode_result(body).unwrap_err();
        assert!(err.to_string().contains("execution reverted"));

        let body: RpcResponse = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": "0x0539"
        }))
        .unwrap();
        assert_eq!(decode_result(body).unwrap(), vec![0x05, 0x39]);
    }

    #[tokio::test]
    async fn test_user_stats() {
        let manager = addr(0xC0);
        let coin = addr(0xD0);
        let chain = StaticChain(HashMap::from([
            ((manager.clone(), PERCENTAGE_SHARES), word(1333)),
            ((manager.clone(), GET_USER_EARNINGS), word(25 * 10u128.pow(16))),
            ((coin.clone(), BALANCE_OF), word(1200 * 10u128.pow(18))),
        ]));

        let stats = user_stats(&chain, &manager, Some(&coin), &addr(3)).await.unwrap();
        assert_eq!(stats.supporter_allocation, "13.33%");
        assert_eq!(stats.basis_points, 1333);
        assert_eq!(stats.earnings, "0.25");
        assert_eq!(stats.balance.as_deref(), Some("1200"));

        let stats = user_stats(&chain, &manager, None, &addr(3)).await.unwrap();
        assert_eq!(stats.balance, None);
    }

    #[tokio::test]
    async fn test_out_of_range_share_is_rejected() {
        let manager = addr(0xC0);
        let chain = StaticChain(HashMap::from([
            ((manager.clone(), PERCENTAGE_SHARES), word(20_000)),
            ((manager.clone(), GET_USER_EARNINGS), word(0)),
        ]));

        let err = user_stats(&chain, &manager, None, &addr(3)).await.unwrap_err();
        assert!(matches!(err, TimelineError::Chain(_)));
    }
}
