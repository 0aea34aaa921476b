//! Timeline endpoints
//!
//! - POST /api/timelines - create a timeline and initialize its payout contract
//! - POST /api/timelines/calculate-allocations - preview supporter allocations
//! - GET /api/timelines/{id} - active timeline with its supporter table
//! - GET /api/timelines/{id}/casts - hydrated casts of a timeline
//! - GET /api/timelines/{id}/user-stats?userAddress= - a supporter's on-chain share, earnings and coin balance
//! - POST /api/timelines/{id}/coin - record the timeline's coin address

use hyper::{Response, StatusCode};
use serde::Deserialize;
use tracing::info;

use super::{bad_request_response, error_response, json_response, parse_json, FullBody};
use crate::allocation::{AllocationCap, EthAddress};
use crate::server::AppState;
use crate::services::{user_stats, CreateTimelineRequest};
use crate::types::TimelineError;

/// A cast given either as its hash or as an object carrying one
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CastRef {
    Hash(String),
    Cast { hash: String },
}

impl CastRef {
    fn into_hash(self) -> String {
        match self {
            CastRef::Hash(hash) | CastRef::Cast { hash } => hash,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateAllocationsRequest {
    pub casts: Vec<CastRef>,
    pub supporter_allocation: AllocationCap,
    #[serde(default)]
    pub author_fid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsQuery {
    pub user_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCoinRequest {
    #[serde(default)]
    pub coin_address: Option<String>,
}

/// POST /api/timelines
pub async fn handle_create_timeline(state: &AppState, body: &[u8]) -> Response<FullBody> {
    let request: CreateTimelineRequest = match parse_json(body) {
        Ok(r) => r,
        Err(response) => return response,
    };
    info!(name = %request.name, creator = %request.creator.fid, "Timeline creation requested");

    match state.creator.create(request).await {
        Ok(outcome) => json_response(StatusCode::CREATED, &outcome),
        Err(e) => error_response(&e),
    }
}

/// POST /api/timelines/calculate-allocations
pub async fn handle_calculate_allocations(state: &AppState, body: &[u8]) -> Response<FullBody> {
    let request: CalculateAllocationsRequest = match parse_json(body) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let post_ids: Vec<String> = request.casts.into_iter().map(CastRef::into_hash).collect();
    let author = request.author_fid.unwrap_or_default();

    match state
        .creator
        .preview_allocations(&author, &post_ids, request.supporter_allocation)
        .await
    {
        Ok(preview) => json_response(StatusCode::OK, &preview),
        Err(e) => error_response(&e),
    }
}

/// GET /api/timelines/{id}
pub async fn handle_get_timeline(state: &AppState, timeline_id: &str) -> Response<FullBody> {
    let timeline = match state.store.get_timeline(timeline_id).await {
        Ok(Some(t)) => t,
        Ok(None) => return error_response(&TimelineError::NotFound(format!("Timeline {timeline_id}"))),
        Err(e) => return error_response(&e),
    };
    match state.store.list_supporters(timeline_id).await {
        Ok(supporters) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "timeline": timeline, "supporters": supporters }),
        ),
        Err(e) => error_response(&e),
    }
}

/// GET /api/timelines/{id}/casts
pub async fn handle_timeline_casts(state: &AppState, timeline_id: &str) -> Response<FullBody> {
    let timeline = match state.store.get_timeline(timeline_id).await {
        Ok(Some(t)) => t,
        Ok(None) => return error_response(&TimelineError::NotFound(format!("Timeline {timeline_id}"))),
        Err(e) => return error_response(&e),
    };
    match state.neynar.fetch_casts(&timeline.cast_hashes).await {
        Ok(casts) => json_response(StatusCode::OK, &serde_json::json!({ "casts": casts })),
        Err(e) => error_response(&e),
    }
}

/// GET /api/timelines/{id}/user-stats
pub async fn handle_user_stats(
    state: &AppState,
    timeline_id: &str,
    query: Option<&str>,
) -> Response<FullBody> {
    let params: UserStatsQuery = serde_urlencoded::from_str(query.unwrap_or_default()).unwrap_or_default();
    let Some(raw) = params.user_address.filter(|a| !a.trim().is_empty()) else {
        return bad_request_response("userAddress is required");
    };
    let user = match EthAddress::parse(&raw) {
        Ok(a) => a,
        Err(e) => return error_response(&e),
    };

    let timeline = match state.store.get_timeline(timeline_id).await {
        Ok(Some(t)) => t,
        Ok(None) => return error_response(&TimelineError::NotFound(format!("Timeline {timeline_id}"))),
        Err(e) => return error_response(&e),
    };

    match user_stats(
        state.chain.as_ref(),
        &timeline.reward_manager,
        timeline.coin_address.as_ref(),
        &user,
    )
    .await
    {
        Ok(stats) => json_response(StatusCode::OK, &stats),
        Err(e) => error_response(&e),
    }
}

/// POST /api/timelines/{id}/coin
pub async fn handle_set_coin_address(
    state: &AppState,
    timeline_id: &str,
    body: &[u8],
) -> Response<FullBody> {
    let request: SetCoinRequest = match parse_json(body) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let Some(raw) = request.coin_address.filter(|c| !c.trim().is_empty()) else {
        return bad_request_response("Coin address is required");
    };
    let coin = match EthAddress::parse(&raw) {
        Ok(a) => a,
        Err(e) => return error_response(&e),
    };

    match state.store.set_coin_address(timeline_id, &coin).await {
        Ok(true) => {
            info!(timeline_id = %timeline_id, coin = %coin, "Coin address recorded");
            json_response(
                StatusCode::OK,
                &serde_json::json!({
                    "success": true,
                    "timelineId": timeline_id,
                    "coinAddress": coin,
                }),
            )
        }
        Ok(false) => error_response(&TimelineError::NotFound(format!("Timeline {timeline_id}"))),
        Err(e) => error_response(&e),
    }
}
