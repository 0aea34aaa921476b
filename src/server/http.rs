//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::engagement::EngagementCollector;
use crate::routes::{self, FullBody};
use crate::services::{
    ChainReader, DryRunPayoutInitializer, EthRpcReader, NeynarAddressResolver, NeynarClient,
    PayoutInitializer, RelayerPayoutInitializer, TimelineCreator,
};
use crate::store::TimelineStore;
use crate::types::{Result, TimelineError};

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn TimelineStore>,
    /// Social graph API client for cast hydration and profile lookups
    pub neynar: Arc<NeynarClient>,
    /// Read-only contract queries
    pub chain: Arc<dyn ChainReader>,
    pub creator: TimelineCreator,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        store: Arc<dyn TimelineStore>,
        neynar: Arc<NeynarClient>,
        chain: Arc<dyn ChainReader>,
        creator: TimelineCreator,
    ) -> Self {
        Self {
            args,
            store,
            neynar,
            chain,
            creator,
            started_at: Instant::now(),
        }
    }

    /// Wire the Neynar-backed collaborators and the payout initializer around `store`
    pub fn with_services(args: Args, store: Arc<dyn TimelineStore>) -> Result<Self> {
        let neynar = Arc::new(NeynarClient::new(args.neynar_config())?);
        let resolver = Arc::new(NeynarAddressResolver::new(
            Arc::clone(&neynar),
            args.resolver_config(),
        ));

        let payout: Arc<dyn PayoutInitializer> = match args.relayer_config() {
            Some(config) => Arc::new(RelayerPayoutInitializer::new(config)?),
            None if args.dev_mode => {
                warn!("No relayer configured - payout contracts will not be initialized (dry run)");
                Arc::new(DryRunPayoutInitializer)
            }
            None => {
                return Err(TimelineError::Config(
                    "RELAYER_URL is required in production mode".to_string(),
                ))
            }
        };

        let collector = EngagementCollector::new(neynar.clone(), args.collector_config());
        let creator = TimelineCreator::new(
            args.creator_config(),
            collector,
            neynar.clone(),
            resolver,
            payout,
            Arc::clone(&store),
        );

        let chain = Arc::new(EthRpcReader::new(args.rpc_config())?);

        Ok(Self::new(args, store, neynar, chain, creator))
    }
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Timeline rewards listening on {} (store: {})",
        state.args.listen,
        state.store.backend()
    );

    if state.args.dev_mode {
        warn!("Development mode enabled");
    }

    match state.store.count_available_reward_managers().await {
        Ok(0) => warn!("No unused reward managers available - timeline creation will fail"),
        Ok(n) => info!("{} reward managers available", n),
        Err(e) => warn!("Could not count reward managers: {}", e),
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<FullBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();
    let query = req.uri().query().map(str::to_string);
    let admin_key = req
        .headers()
        .get(routes::admin::ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    info!("[{}] {} {}", addr, method, path);

    let body = if method == Method::POST {
        match read_body(req.into_body(), MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Request body error from {}: {}", addr, e);
                return Ok(routes::error_response(&e));
            }
        }
    } else {
        Bytes::new()
    };

    let state = state.as_ref();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let response = match (&method, segments.as_slice()) {
        (&Method::OPTIONS, _) => routes::preflight_response(),

        (&Method::GET, ["health"]) | (&Method::GET, ["healthz"]) => routes::health_check(state),

        (&Method::GET, ["api", "user-profile"]) => {
            routes::handle_user_profile(state, query.as_deref()).await
        }

        (&Method::POST, ["api", "timelines"]) | (&Method::POST, ["api", "timelines", "create"]) => {
            routes::handle_create_timeline(state, &body).await
        }
        (&Method::POST, ["api", "timelines", "calculate-allocations"]) => {
            routes::handle_calculate_allocations(state, &body).await
        }
        (&Method::GET, ["api", "timelines", id]) => routes::handle_get_timeline(state, id).await,
        (&Method::GET, ["api", "timelines", id, "casts"]) => {
            routes::handle_timeline_casts(state, id).await
        }
        (&Method::GET, ["api", "timelines", id, "user-stats"]) => {
            routes::handle_user_stats(state, id, query.as_deref()).await
        }
        (&Method::POST, ["api", "timelines", id, "coin"]) => {
            routes::handle_set_coin_address(state, id, &body).await
        }

        (_, ["admin", "reward-managers", ..]) => {
            match routes::require_admin_key(state, admin_key.as_deref()) {
                Err(rejection) => rejection,
                Ok(()) => match (&method, segments.as_slice()) {
                    (&Method::POST, ["admin", "reward-managers"]) => {
                        routes::handle_register_reward_manager(state, &body).await
                    }
                    (&Method::GET, ["admin", "reward-managers", "available"]) => {
                        routes::handle_available_reward_managers(state).await
                    }
                    _ => routes::not_found_response(&path),
                },
            }
        }

        _ => {
            debug!("No route for {} {}", method, path);
            routes::not_found_response(&path)
        }
    };

    Ok(response)
}

/// Collect a request body, refusing anything over `limit` bytes
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(TimelineError::PayloadTooLarge(limit))
        }
        Err(e) => Err(TimelineError::InvalidInput(format!(
            "Failed to read request body: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::StatusCode;

    #[tokio::test]
    async fn test_body_within_limit_is_read() {
        let body = Full::new(Bytes::from(vec![b'x'; 512]));
        let bytes = read_body(body, 1024).await.unwrap();
        assert_eq!(bytes.len(), 512);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let body = Full::new(Bytes::from(vec![b'x'; 2048]));
        let err = read_body(body, 1024).await.unwrap_err();
        assert!(matches!(err, TimelineError::PayloadTooLarge(1024)));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
