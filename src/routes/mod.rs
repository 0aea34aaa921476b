//! HTTP routes
//!
//! Handlers take the already-read request body so they can be called
//! directly in tests.

pub mod admin;
pub mod health;
pub mod profile;
pub mod timelines;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, warn};

use crate::types::TimelineError;

pub use admin::{handle_available_reward_managers, handle_register_reward_manager, require_admin_key};
pub use health::health_check;
pub use profile::handle_user_profile;
pub use timelines::{
    handle_calculate_allocations, handle_create_timeline, handle_get_timeline,
    handle_set_coin_address, handle_timeline_casts, handle_user_stats,
};

pub type FullBody = Full<Bytes>;

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: String,
    code: &'a str,
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<FullBody> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

/// JSON error body with the status mapped from `err`
pub fn error_response(err: &TimelineError) -> Response<FullBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!(code = err.code(), error = %err, "Request failed");
    } else {
        warn!(code = err.code(), error = %err, "Request rejected");
    }
    json_response(
        status,
        &ErrorResponse {
            error: err.to_string(),
            code: err.code(),
        },
    )
}

pub fn bad_request_response(message: &str) -> Response<FullBody> {
    error_response(&TimelineError::InvalidInput(message.to_string()))
}

pub fn not_found_response(path: &str) -> Response<FullBody> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({
            "error": "Not Found",
            "path": path,
        }),
    )
}

/// CORS preflight response
pub fn preflight_response() -> Response<FullBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Parse a JSON request body, or the 400 response to send instead
#[allow(clippy::result_large_err)]
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response<FullBody>> {
    serde_json::from_slice(body).map_err(|e| bad_request_response(&format!("Invalid JSON: {e}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use clap::Parser;

    use crate::allocation::{EthAddress, PayoutShareTable};
    use crate::config::Args;
    use crate::engagement::{CollectorConfig, EngagementCollector, EngagementRecord, ReactionKind, ReactionSource};
    use crate::server::AppState;
    use crate::services::neynar::{NeynarClient, NeynarConfig};
    use crate::services::{
        AddressResolver, CastDiscovery, ChainReader, PayoutInitializer, TimelineCreator,
        TimelineCreatorConfig, TransactionReceipt,
    };
    use crate::store::InMemoryTimelineStore;
    use crate::types::Result;

    pub struct OneLikePerFid;

    #[async_trait::async_trait]
    impl ReactionSource for OneLikePerFid {
        async fn fetch_reactions(&self, post_id: &str) -> Result<Vec<EngagementRecord>> {
            Ok(vec![
                EngagementRecord::new(post_id, "1", ReactionKind::Like),
                EngagementRecord::new(post_id, "2", ReactionKind::Recast),
            ])
        }
    }

    pub struct NoCasts;

    #[async_trait::async_trait]
    impl CastDiscovery for NoCasts {
        async fn discover_casts(&self, _author_fid: &str, _keywords: &[String]) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    pub struct Unresolved;

    #[async_trait::async_trait]
    impl AddressResolver for Unresolved {
        async fn resolve(&self, _identity_id: &str) -> Result<Option<EthAddress>> {
            Ok(None)
        }
    }

    pub struct Confirmed;

    #[async_trait::async_trait]
    impl PayoutInitializer for Confirmed {
        async fn initialize(
            &self,
            _contract: &EthAddress,
            _table: &PayoutShareTable,
        ) -> Result<TransactionReceipt> {
            Ok(TransactionReceipt {
                tx_hash: "0xfeed".to_string(),
                block_number: None,
            })
        }
    }

    /// Answers every call with the uint256 2500
    pub struct FixedChain;

    #[async_trait::async_trait]
    impl ChainReader for FixedChain {
        async fn call(&self, _to: &EthAddress, _data: &[u8]) -> Result<Vec<u8>> {
            let mut word = vec![0u8; 32];
            word[30..].copy_from_slice(&2500u16.to_be_bytes());
            Ok(word)
        }
    }

    pub fn addr(n: u8) -> EthAddress {
        EthAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    /// Dev-mode state over an in-memory store with offline collaborators
    pub fn test_state(extra_args: &[&str]) -> (AppState, Arc<InMemoryTimelineStore>) {
        let mut argv = vec!["timeline-rewards", "--dev-mode"];
        argv.extend_from_slice(extra_args);
        let args = Args::try_parse_from(argv).unwrap();

        let store = Arc::new(InMemoryTimelineStore::new(Duration::from_secs(900)));
        let neynar = Arc::new(
            NeynarClient::new(NeynarConfig {
                api_url: "http://127.0.0.1:9".to_string(),
                ..Default::default()
            })
            .unwrap(),
        );
        let creator = TimelineCreator::new(
            TimelineCreatorConfig::default(),
            EngagementCollector::new(Arc::new(OneLikePerFid), CollectorConfig::default()),
            Arc::new(NoCasts),
            Arc::new(Unresolved),
            Arc::new(Confirmed),
            store.clone(),
        );
        (
            AppState::new(args, store.clone(), neynar, Arc::new(FixedChain), creator),
            store,
        )
    }
}
