//! Neynar (Farcaster social graph) API client
//!
//! Covers the handful of endpoints the Timeline service needs:
//!
//! - `GET /v2/farcaster/reactions/cast/` - reactions on a cast (cursor paginated)
//! - `GET /v2/farcaster/cast/search/` - keyword search over an author's casts
//! - `GET /v2/farcaster/user/bulk` - user profiles with verified addresses
//! - `GET /v2/farcaster/casts/` - cast hydration by hash
//!
//! The API key and endpoint come from configuration; nothing is global.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::engagement::{parse_reactions, EngagementRecord, ReactionSource};
use crate::services::timeline_creator::CastDiscovery;
use crate::types::{Result, TimelineError};

/// Configuration for the Neynar client
#[derive(Debug, Clone)]
pub struct NeynarConfig {
    /// Base URL, e.g. "https://api.neynar.com"
    pub api_url: String,
    pub api_key: String,
    /// Timeout applied to every request
    pub request_timeout: Duration,
    /// Reactions requested per page (API maximum is 100)
    pub reactions_page_limit: u32,
    /// Pages followed per cast before giving up on the cursor
    pub reactions_max_pages: u32,
    /// Casts returned by keyword search
    pub cast_search_limit: u32,
}

impl Default for NeynarConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.neynar.com".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(10),
            reactions_page_limit: 25,
            reactions_max_pages: 4,
            cast_search_limit: 25,
        }
    }
}

/// One page of cast reactions
#[derive(Debug, Deserialize)]
pub struct ReactionsPage {
    /// Left untyped here; [`parse_reactions`] validates each item
    #[serde(default)]
    pub reactions: Vec<serde_json::Value>,
    #[serde(default)]
    pub next: Option<NextCursor>,
}

#[derive(Debug, Deserialize)]
pub struct NextCursor {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Verified addresses attached to a Farcaster user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifiedAddresses {
    #[serde(default)]
    pub eth_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sol_addresses: Vec<String>,
}

/// Farcaster user profile. Fields not used by the service are kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeynarUser {
    pub fid: u64,
    #[serde(default)]
    pub verified_addresses: VerifiedAddresses,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<NeynarUser>,
}

#[derive(Debug, Deserialize)]
struct CastsEnvelope {
    #[serde(default)]
    result: Option<CastsResult>,
}

#[derive(Debug, Deserialize)]
struct CastsResult {
    #[serde(default)]
    casts: Vec<RawCast>,
}

#[derive(Debug, Deserialize)]
struct RawCast {
    hash: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    embeds: Vec<RawEmbed>,
    #[serde(default)]
    reactions: Option<RawReactionCounts>,
    #[serde(default)]
    replies: Option<RawReplyCount>,
}

#[derive(Debug, Deserialize)]
struct RawEmbed {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    metadata: Option<RawEmbedMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawEmbedMetadata {
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReactionCounts {
    #[serde(default)]
    likes_count: u64,
    #[serde(default)]
    recasts_count: u64,
}

#[derive(Debug, Deserialize)]
struct RawReplyCount {
    #[serde(default)]
    count: u64,
}

/// Media attached to a cast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastMedia {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastStats {
    pub likes: u64,
    pub recasts: u64,
    pub replies: u64,
}

/// Cast summary served to timeline viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastSummary {
    pub hash: String,
    pub text: String,
    /// Date part of the cast timestamp (YYYY-MM-DD)
    pub timestamp: String,
    pub media: Vec<CastMedia>,
    pub stats: CastStats,
}

impl From<RawCast> for CastSummary {
    fn from(cast: RawCast) -> Self {
        let timestamp = cast
            .timestamp
            .as_deref()
            .and_then(|t| t.split('T').next())
            .unwrap_or_default()
            .to_string();

        let media = cast
            .embeds
            .into_iter()
            .filter_map(|embed| {
                let url = embed.url?;
                let content_type = embed.metadata?.content_type?;
                let kind = if content_type.starts_with("image") {
                    "image"
                } else if content_type.starts_with("video") {
                    "video"
                } else {
                    return None;
                };
                Some(CastMedia {
                    kind: kind.to_string(),
                    url,
                })
            })
            .collect();

        let (likes, recasts) = cast
            .reactions
            .map(|r| (r.likes_count, r.recasts_count))
            .unwrap_or_default();

        Self {
            hash: cast.hash,
            text: cast.text,
            timestamp,
            media,
            stats: CastStats {
                likes,
                recasts,
                replies: cast.replies.map(|r| r.count).unwrap_or_default(),
            },
        }
    }
}

/// Build the search expression `"k1" | "k2"` from creator keywords
pub fn keyword_query(keywords: &[String]) -> String {
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| format!("\"{k}\""))
        .collect::<Vec<_>>()
        .join(" | ")
}

pub struct NeynarClient {
    config: NeynarConfig,
    http_client: reqwest::Client,
}

impl NeynarClient {
    pub fn new(config: NeynarConfig) -> Result<Self> {
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

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path_and_query);
        debug!(url = %url, "Neynar request");

        let response = self
            .http_client
            .get(&url)
            .header("x-api-key", &self.config.api_key)
            .header("x-neynar-experimental", "false")
            .send()
            .await
            .map_err(|e| TimelineError::Upstream(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TimelineError::Upstream(format!("HTTP {status} from {url}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TimelineError::Upstream(format!("Malformed response from {url}: {e}")))
    }

    /// Fetch one page of reactions on `cast_hash`
    pub async fn fetch_reactions_page(
        &self,
        cast_hash: &str,
        cursor: Option<&str>,
    ) -> Result<ReactionsPage> {
        let mut path = format!(
            "/v2/farcaster/reactions/cast/?hash={}&limit={}&types=all",
            urlencoding::encode(cast_hash),
            self.config.reactions_page_limit
        );
        if let Some(cursor) = cursor {
            path.push_str("&cursor=");
            path.push_str(&urlencoding::encode(cursor));
        }
        self.get_json(&path).await
    }

    /// Search the author's casts matching any of `keywords`, returning cast hashes
    pub async fn search_casts(&self, author_fid: &str, keywords: &[String]) -> Result<Vec<String>> {
        let query = keyword_query(keywords);
        if query.is_empty() {
            return Err(TimelineError::InvalidInput(
                "At least one keyword is required".to_string(),
            ));
        }

        let path = format!(
            "/v2/farcaster/cast/search/?limit={}&q={}&author_fid={}",
            self.config.cast_search_limit,
            urlencoding::encode(&query),
            urlencoding::encode(author_fid)
        );
        let envelope: CastsEnvelope = self.get_json(&path).await?;

        Ok(envelope
            .result
            .map(|r| r.casts.into_iter().map(|c| c.hash).collect())
            .unwrap_or_default())
    }

    /// Fetch user profiles for `fids`
    pub async fn fetch_users(&self, fids: &[&str]) -> Result<Vec<NeynarUser>> {
        if fids.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!(
            "/v2/farcaster/user/bulk?fids={}",
            urlencoding::encode(&fids.join(","))
        );
        let response: UsersResponse = self.get_json(&path).await?;
        Ok(response.users)
    }

    /// Hydrate casts by hash, preserving the API's order
    pub async fn fetch_casts(&self, hashes: &[String]) -> Result<Vec<CastSummary>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let path = format!(
            "/v2/farcaster/casts/?casts={}",
            urlencoding::encode(&hashes.join(","))
        );
        let envelope: CastsEnvelope = self.get_json(&path).await?;

        Ok(envelope
            .result
            .map(|r| r.casts.into_iter().map(CastSummary::from).collect())
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ReactionSource for NeynarClient {
    async fn fetch_reactions(&self, post_id: &str) -> Result<Vec<EngagementRecord>> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..self.config.reactions_max_pages.max(1) {
            let page = self.fetch_reactions_page(post_id, cursor.as_deref()).await?;
            records.extend(parse_reactions(post_id, &page.reactions));

            cursor = page.next.and_then(|n| n.cursor).filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        if cursor.is_some() {
            debug!(
                post_id = %post_id,
                max_pages = self.config.reactions_max_pages,
                "Reaction pages truncated"
            );
        }

        Ok(records)
    }
}

#[async_trait::async_trait]
impl CastDiscovery for NeynarClient {
    async fn discover_casts(&self, author_fid: &str, keywords: &[String]) -> Result<Vec<String>> {
        self.search_casts(author_fid, keywords).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keyword_query() {
        let keywords = vec!["base".to_string(), " ".to_string(), "onchain summer".to_string()];
        assert_eq!(keyword_query(&keywords), r#""base" | "onchain summer""#);
        assert_eq!(keyword_query(&[]), "");
    }

    #[test]
    fn test_reactions_page_parsing() {
        let page: ReactionsPage = serde_json::from_value(json!({
            "reactions": [
                { "reaction_type": "like", "user": { "fid": 3 } },
                { "reaction_type": "recast", "user": { "fid": 5 } }
            ],
            "next": { "cursor": "abc" }
        }))
        .unwrap();

        assert_eq!(page.reactions.len(), 2);
        assert_eq!(page.next.and_then(|n| n.cursor).as_deref(), Some("abc"));

        let empty: ReactionsPage = serde_json::from_value(json!({})).unwrap();
        assert!(empty.reactions.is_empty());
        assert!(empty.next.is_none());
    }

    #[test]
    fn test_user_keeps_unknown_fields() {
        let user: NeynarUser = serde_json::from_value(json!({
            "fid": 99,
            "username": "alice",
            "verified_addresses": { "eth_addresses": ["0x01"], "sol_addresses": [] }
        }))
        .unwrap();

        assert_eq!(user.fid, 99);
        assert_eq!(user.verified_addresses.eth_addresses, vec!["0x01"]);
        assert_eq!(user.extra.get("username"), Some(&json!("alice")));

        let bare: NeynarUser = serde_json::from_value(json!({ "fid": 1 })).unwrap();
        assert!(bare.verified_addresses.eth_addresses.is_empty());
    }

    #[test]
    fn test_cast_summary_from_raw() {
        let envelope: CastsEnvelope = serde_json::from_value(json!({
            "result": { "casts": [{
                "hash": "0xabc",
                "text": "gm",
                "timestamp": "2025-05-01T12:30:00.000Z",
                "embeds": [
                    { "url": "https://img/1.png", "metadata": { "content_type": "image/png" } },
                    { "url": "https://vid/1.m3u8", "metadata": { "content_type": "video/mp4" } },
                    { "url": "https://example.com", "metadata": { "content_type": "text/html" } },
                    { "cast_id": { "fid": 1, "hash": "0xdef" } }
                ],
                "reactions": { "likes_count": 12, "recasts_count": 3 },
                "replies": { "count": 4 }
            }]}
        }))
        .unwrap();

        let cast = CastSummary::from(envelope.result.unwrap().casts.remove(0));
        assert_eq!(cast.timestamp, "2025-05-01");
        assert_eq!(
            cast.media,
            vec![
                CastMedia { kind: "image".into(), url: "https://img/1.png".into() },
                CastMedia { kind: "video".into(), url: "https://vid/1.m3u8".into() },
            ]
        );
        assert_eq!(cast.stats, CastStats { likes: 12, recasts: 3, replies: 4 });
    }
}
