//! GET /api/user-profile?fid= - Farcaster profile proxy

use hyper::{Response, StatusCode};
use serde::Deserialize;

use super::{bad_request_response, error_response, json_response, FullBody};
use crate::server::AppState;
use crate::types::TimelineError;

#[derive(Debug, Default, Deserialize)]
pub struct ProfileQuery {
    pub fid: Option<String>,
}

/// Extract a usable fid from the raw query string
fn requested_fid(query: Option<&str>) -> Option<String> {
    let params: ProfileQuery = serde_urlencoded::from_str(query.unwrap_or_default()).unwrap_or_default();
    params
        .fid
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()))
}

pub async fn handle_user_profile(state: &AppState, query: Option<&str>) -> Response<FullBody> {
    let Some(fid) = requested_fid(query) else {
        return bad_request_response("Missing or invalid fid");
    };

    match state.neynar.fetch_users(&[fid.as_str()]).await {
        Ok(users) => match users.into_iter().next() {
            Some(user) => json_response(StatusCode::OK, &serde_json::json!({ "user": user })),
            None => error_response(&TimelineError::NotFound(format!("User {fid}"))),
        },
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::test_state;

    #[test]
    fn test_requested_fid() {
        assert_eq!(requested_fid(Some("fid=3621")), Some("3621".to_string()));
        assert_eq!(requested_fid(Some("fid=")), None);
        assert_eq!(requested_fid(Some("fid=abc")), None);
        assert_eq!(requested_fid(Some("other=1")), None);
        assert_eq!(requested_fid(None), None);
    }

    #[tokio::test]
    async fn test_missing_fid_is_bad_request() {
        let (state, _) = test_state(&[]);
        let response = handle_user_profile(&state, Some("foo=bar")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
