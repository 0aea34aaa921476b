//! Payout contract pool administration
//!
//! - POST /admin/reward-managers - register pre-deployed contracts
//! - GET /admin/reward-managers/available - count claimable contracts
//!
//! Both require `x-api-key: API_KEY_ADMIN`. In development mode without a
//! configured key the check is skipped.

use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{error_response, json_response, parse_json, FullBody};
use crate::allocation::EthAddress;
use crate::server::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Deserialize)]
pub struct RegisterRewardManagersRequest {
    pub addresses: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterRewardManagersResponse {
    pub registered: Vec<EthAddress>,
    /// Already in the pool
    pub skipped: Vec<EthAddress>,
    pub available: u64,
}

/// Check the admin key, returning the rejection response on failure
#[allow(clippy::result_large_err)]
pub fn require_admin_key(state: &AppState, provided: Option<&str>) -> Result<(), Response<FullBody>> {
    match state.args.api_key_admin.as_deref() {
        Some(expected) if provided == Some(expected) => Ok(()),
        Some(_) => Err(json_response(
            StatusCode::UNAUTHORIZED,
            &serde_json::json!({ "error": "Invalid or missing API key", "code": "UNAUTHORIZED" }),
        )),
        None if state.args.dev_mode => Ok(()),
        None => Err(json_response(
            StatusCode::FORBIDDEN,
            &serde_json::json!({ "error": "Admin API key not configured", "code": "FORBIDDEN" }),
        )),
    }
}

/// POST /admin/reward-managers
pub async fn handle_register_reward_manager(state: &AppState, body: &[u8]) -> Response<FullBody> {
    let request: RegisterRewardManagersRequest = match parse_json(body) {
        Ok(r) => r,
        Err(response) => return response,
    };
    if request.addresses.is_empty() {
        return super::bad_request_response("At least one address is required");
    }

    let mut addresses = Vec::with_capacity(request.addresses.len());
    for raw in &request.addresses {
        match EthAddress::parse(raw) {
            Ok(address) => addresses.push(address),
            Err(e) => return error_response(&e),
        }
    }

    let mut registered = Vec::new();
    let mut skipped = Vec::new();
    for address in addresses {
        match state.store.register_reward_manager(&address).await {
            Ok(true) => registered.push(address),
            Ok(false) => skipped.push(address),
            Err(e) => return error_response(&e),
        }
    }

    let available = match state.store.count_available_reward_managers().await {
        Ok(n) => n,
        Err(e) => return error_response(&e),
    };
    info!(registered = registered.len(), available, "Reward manager pool updated");

    json_response(
        StatusCode::OK,
        &RegisterRewardManagersResponse {
            registered,
            skipped,
            available,
        },
    )
}

/// GET /admin/reward-managers/available
pub async fn handle_available_reward_managers(state: &AppState) -> Response<FullBody> {
    match state.store.count_available_reward_managers().await {
        Ok(available) => json_response(StatusCode::OK, &serde_json::json!({ "available": available })),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{addr, test_state};

    #[test]
    fn test_admin_key_required_when_configured() {
        let (state, _) = test_state(&["--api-key-admin", "secret"]);
        assert!(require_admin_key(&state, Some("secret")).is_ok());

        let rejected = require_admin_key(&state, Some("wrong")).unwrap_err();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
        assert!(require_admin_key(&state, None).is_err());
    }

    #[test]
    fn test_dev_mode_without_key_is_open() {
        let (state, _) = test_state(&[]);
        assert!(require_admin_key(&state, None).is_ok());
    }

    #[tokio::test]
    async fn test_register_and_count() {
        let (state, _) = test_state(&[]);
        let body = serde_json::json!({
            "addresses": [addr(1).to_string(), addr(2).to_string(), addr(1).to_string()]
        })
        .to_string();

        let response = handle_register_reward_manager(&state, body.as_bytes()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.store.count_available_reward_managers().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_address() {
        let (state, _) = test_state(&[]);
        let response =
            handle_register_reward_manager(&state, br#"{"addresses":["0x1234"]}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.store.count_available_reward_managers().await.unwrap(), 0);
    }
}
