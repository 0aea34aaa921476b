//! Configuration for the Timeline rewards service
//!
//! CLI arguments and environment variables, parsed with clap after `.env`
//! has been loaded.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::allocation::Apportionment;
use crate::engagement::CollectorConfig;
use crate::services::address_resolver::AddressResolverConfig;
use crate::services::chain::RpcConfig;
use crate::services::neynar::NeynarConfig;
use crate::services::payout::RelayerConfig;
use crate::services::timeline_creator::TimelineCreatorConfig;

/// Neynar's maximum reactions page size
pub const MAX_REACTIONS_PAGE_LIMIT: u32 = 100;

/// Timeline rewards - engagement-weighted payout tables for curated timelines
#[derive(Parser, Debug, Clone)]
#[command(name = "timeline-rewards")]
#[command(about = "Engagement-weighted reward allocation for Farcaster timelines")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Development mode: in-memory store when MongoDB is absent, dry-run payouts
    /// when no relayer is configured
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI (required outside development mode)
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: Option<String>,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "timeline")]
    pub mongodb_db: String,

    /// Social graph API configuration
    #[command(flatten)]
    pub neynar: NeynarArgs,

    /// Transaction relayer configuration
    #[command(flatten)]
    pub relayer: RelayerArgs,

    /// Chain node for read-only contract queries
    #[command(flatten)]
    pub rpc: RpcArgs,

    /// How fractional shares are rounded to basis points
    #[arg(long, env = "SHARE_APPORTIONMENT", value_enum, default_value_t = Apportionment::LargestRemainder)]
    pub share_apportionment: Apportionment,

    /// Seconds after which an unfinished payout contract claim may be taken over
    #[arg(long, env = "CLAIM_TTL_SECS", default_value = "900")]
    pub claim_ttl_secs: u64,

    /// Seconds a resolved payout address is cached
    #[arg(long, env = "ADDRESS_CACHE_TTL_SECS", default_value = "300")]
    pub address_cache_ttl_secs: u64,

    /// API key for the admin endpoints
    #[arg(long, env = "API_KEY_ADMIN")]
    pub api_key_admin: Option<String>,
}

/// Neynar API configuration
#[derive(Parser, Debug, Clone)]
pub struct NeynarArgs {
    /// Neynar API key (required outside development mode)
    #[arg(long, env = "NEYNAR_API_KEY")]
    pub neynar_api_key: Option<String>,

    /// Neynar API base URL
    #[arg(long, env = "NEYNAR_API_URL", default_value = "https://api.neynar.com")]
    pub neynar_api_url: String,

    /// Per-request timeout in milliseconds
    #[arg(long, env = "NEYNAR_TIMEOUT_MS", default_value = "10000")]
    pub neynar_timeout_ms: u64,

    /// Reactions per page (max 100)
    #[arg(long, env = "REACTIONS_PAGE_LIMIT", default_value = "25")]
    pub reactions_page_limit: u32,

    /// Pages of reactions followed per post
    #[arg(long, env = "REACTIONS_MAX_PAGES", default_value = "4")]
    pub reactions_max_pages: u32,

    /// Posts returned by a keyword search
    #[arg(long, env = "CAST_SEARCH_LIMIT", default_value = "25")]
    pub cast_search_limit: u32,

    /// Concurrent reaction fetches and address lookups
    #[arg(long, env = "FETCH_CONCURRENCY", default_value = "4")]
    pub fetch_concurrency: usize,

    /// Upper bound on one post's reaction fetch, all pages included
    #[arg(long, env = "POST_FETCH_TIMEOUT_MS", default_value = "30000")]
    pub post_fetch_timeout_ms: u64,
}

/// Relayer that signs and submits payout initialization transactions
#[derive(Parser, Debug, Clone)]
pub struct RelayerArgs {
    /// Relayer base URL (required outside development mode)
    #[arg(long, env = "RELAYER_URL")]
    pub relayer_url: Option<String>,

    /// Relayer bearer token
    #[arg(long, env = "RELAYER_API_KEY")]
    pub relayer_api_key: Option<String>,

    /// Time allowed for submission and confirmation, in milliseconds
    #[arg(long, env = "RELAYER_TIMEOUT_MS", default_value = "120000")]
    pub relayer_timeout_ms: u64,
}

/// JSON-RPC node used for supporter stats
#[derive(Parser, Debug, Clone)]
pub struct RpcArgs {
    /// JSON-RPC endpoint of the chain the payout contracts live on
    #[arg(long, env = "RPC_URL", default_value = "https://mainnet.base.org")]
    pub rpc_url: String,

    /// Per-call timeout in milliseconds
    #[arg(long, env = "RPC_TIMEOUT_MS", default_value = "10000")]
    pub rpc_timeout_ms: u64,
}

impl Args {
    pub fn neynar_config(&self) -> NeynarConfig {
        NeynarConfig {
            api_url: self.neynar.neynar_api_url.clone(),
            api_key: self.neynar.neynar_api_key.clone().unwrap_or_default(),
            request_timeout: Duration::from_millis(self.neynar.neynar_timeout_ms),
            reactions_page_limit: self.neynar.reactions_page_limit,
            reactions_max_pages: self.neynar.reactions_max_pages,
            cast_search_limit: self.neynar.cast_search_limit,
        }
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            concurrency: self.neynar.fetch_concurrency,
            per_post_timeout: Duration::from_millis(self.neynar.post_fetch_timeout_ms),
        }
    }

    pub fn resolver_config(&self) -> AddressResolverConfig {
        AddressResolverConfig {
            cache_ttl: Duration::from_secs(self.address_cache_ttl_secs),
            ..Default::default()
        }
    }

    pub fn creator_config(&self) -> TimelineCreatorConfig {
        TimelineCreatorConfig {
            apportionment: self.share_apportionment,
            resolve_concurrency: self.neynar.fetch_concurrency,
            ..Default::default()
        }
    }

    /// Relayer settings, if a relayer is configured
    pub fn relayer_config(&self) -> Option<RelayerConfig> {
        self.relayer.relayer_url.as_ref().map(|url| RelayerConfig {
            url: url.clone(),
            api_key: self.relayer.relayer_api_key.clone(),
            request_timeout: Duration::from_millis(self.relayer.relayer_timeout_ms),
        })
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            url: self.rpc.rpc_url.clone(),
            request_timeout: Duration::from_millis(self.rpc.rpc_timeout_ms),
        }
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.neynar.neynar_api_key.is_none() {
                return Err("NEYNAR_API_KEY is required in production mode".to_string());
            }
            if self.relayer.relayer_url.is_none() {
                return Err("RELAYER_URL is required in production mode".to_string());
            }
            if self.mongodb_uri.is_none() {
                return Err("MONGODB_URI is required in production mode".to_string());
            }
        }

        if self.neynar.reactions_page_limit == 0
            || self.neynar.reactions_page_limit > MAX_REACTIONS_PAGE_LIMIT
        {
            return Err(format!(
                "REACTIONS_PAGE_LIMIT must be between 1 and {MAX_REACTIONS_PAGE_LIMIT}"
            ));
        }
        if self.neynar.reactions_max_pages == 0 {
            return Err("REACTIONS_MAX_PAGES must be at least 1".to_string());
        }
        if self.neynar.fetch_concurrency == 0 {
            return Err("FETCH_CONCURRENCY must be at least 1".to_string());
        }

        // A claim must outlive the longest initialization it guards
        if Duration::from_secs(self.claim_ttl_secs)
            <= Duration::from_millis(self.relayer.relayer_timeout_ms)
        {
            return Err("CLAIM_TTL_SECS must exceed RELAYER_TIMEOUT_MS".to_string());
        }

        Ok(())
    }
}
