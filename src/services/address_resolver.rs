//! Address resolution
//!
//! Maps a Farcaster identity (fid) to the payout address linked to it: the
//! first verified Ethereum address on the user's profile. Results, including
//! "no linked address", are cached for a short time.

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::allocation::{AllocationEntry, EthAddress};
use crate::services::neynar::{NeynarClient, NeynarUser};
use crate::types::{Result, TimelineError};

/// Resolves a social identity to zero or one payout address
#[async_trait::async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, identity_id: &str) -> Result<Option<EthAddress>>;
}

/// Configuration for the Neynar-backed resolver
#[derive(Debug, Clone)]
pub struct AddressResolverConfig {
    /// How long a lookup result is reused
    pub cache_ttl: Duration,
    /// Maximum cached identities
    pub max_cache_entries: usize,
}

impl Default for AddressResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            max_cache_entries: 10_000,
        }
    }
}

struct CachedAddress {
    address: Option<EthAddress>,
    expires_at: Instant,
}

pub struct NeynarAddressResolver {
    client: Arc<NeynarClient>,
    config: AddressResolverConfig,
    cache: DashMap<String, CachedAddress>,
}

impl NeynarAddressResolver {
    pub fn new(client: Arc<NeynarClient>, config: AddressResolverConfig) -> Self {
        Self {
            client,
            config,
            cache: DashMap::new(),
        }
    }

    fn cached(&self, identity_id: &str) -> Option<Option<EthAddress>> {
        self.cache.get(identity_id).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.address.clone())
            } else {
                None
            }
        })
    }

    fn remember(&self, identity_id: &str, address: Option<EthAddress>) {
        if self.cache.len() >= self.config.max_cache_entries {
            let now = Instant::now();
            self.cache.retain(|_, v| v.expires_at > now);
        }
        if self.cache.len() < self.config.max_cache_entries {
            self.cache.insert(
                identity_id.to_string(),
                CachedAddress {
                    address,
                    expires_at: Instant::now() + self.config.cache_ttl,
                },
            );
        }
    }
}

/// First verified Ethereum address on a profile that parses as an address
pub fn payout_address(user: &NeynarUser) -> Option<EthAddress> {
    user.verified_addresses
        .eth_addresses
        .iter()
        .find_map(|a| EthAddress::parse(a).ok())
}

/// Payout address of the profile with `fid`, ignoring any other profile in a bulk response
fn address_of(users: &[NeynarUser], fid: &str) -> Option<EthAddress> {
    users
        .iter()
        .find(|u| u.fid.to_string() == fid)
        .and_then(payout_address)
}

#[async_trait::async_trait]
impl AddressResolver for NeynarAddressResolver {
    async fn resolve(&self, identity_id: &str) -> Result<Option<EthAddress>> {
        if let Some(address) = self.cached(identity_id) {
            debug!(fid = %identity_id, "Address resolved from cache");
            return Ok(address);
        }

        let users = self.client.fetch_users(&[identity_id]).await.map_err(|e| {
            TimelineError::Resolution(format!("Lookup for fid {identity_id} failed: {e}"))
        })?;

        let address = address_of(&users, identity_id);

        self.remember(identity_id, address.clone());
        Ok(address)
    }
}

/// Resolve the payout address of every entry in place.
///
/// Each lookup is independent: an identity without a linked address, or one
/// whose lookup fails, is left unresolved and the rest continue. Returns the
/// number of resolved entries.
pub async fn resolve_entries(
    entries: &mut [AllocationEntry],
    resolver: &dyn AddressResolver,
    concurrency: usize,
) -> usize {
    let fids: Vec<String> = entries.iter().map(|e| e.identity_id.clone()).collect();
    let lookups: Vec<Option<EthAddress>> = stream::iter(fids)
        .map(|fid| async move {
            match resolver.resolve(&fid).await {
                Ok(Some(address)) => Some(address),
                Ok(None) => {
                    warn!(fid = %fid, "Supporter has no verified address, dropping from payout");
                    None
                }
                Err(e) => {
                    warn!(fid = %fid, error = %e, "Supporter address lookup failed, dropping from payout");
                    None
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut resolved = 0;
    for (entry, address) in entries.iter_mut().zip(lookups) {
        if address.is_some() {
            resolved += 1;
        }
        entry.resolved_address = address;
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct MapResolver {
        addresses: HashMap<String, Result<Option<EthAddress>>>,
    }

    #[async_trait::async_trait]
    impl AddressResolver for MapResolver {
        async fn resolve(&self, identity_id: &str) -> Result<Option<EthAddress>> {
            match self.addresses.get(identity_id) {
                Some(Ok(a)) => Ok(a.clone()),
                Some(Err(e)) => Err(TimelineError::Resolution(e.to_string())),
                None => Ok(None),
            }
        }
    }

    fn entry(id: &str) -> AllocationEntry {
        AllocationEntry {
            identity_id: id.to_string(),
            like_count: 1,
            recast_count: 0,
            weighted_score: 1,
            fractional_allocation: 1.0,
            resolved_address: None,
        }
    }

    fn addr(n: u8) -> EthAddress {
        EthAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    #[tokio::test]
    async fn test_resolution_failures_are_per_entry() {
        let mut addresses = HashMap::new();
        addresses.insert("1".to_string(), Ok(Some(addr(1))));
        addresses.insert("2".to_string(), Ok(None));
        addresses.insert("3".to_string(), Err(TimelineError::Upstream("HTTP 503".into())));
        addresses.insert("4".to_string(), Ok(Some(addr(4))));
        let resolver = MapResolver { addresses };

        let mut entries = vec![entry("1"), entry("2"), entry("3"), entry("4")];
        let resolved = resolve_entries(&mut entries, &resolver, 2).await;

        assert_eq!(resolved, 2);
        assert_eq!(entries[0].resolved_address, Some(addr(1)));
        assert_eq!(entries[1].resolved_address, None);
        assert_eq!(entries[2].resolved_address, None);
        assert_eq!(entries[3].resolved_address, Some(addr(4)));
    }

    #[test]
    fn test_address_requires_matching_fid() {
        let users: Vec<NeynarUser> = serde_json::from_value(json!([{
            "fid": 6,
            "verified_addresses": {
                "eth_addresses": ["0x0606060606060606060606060606060606060606"]
            }
        }]))
        .unwrap();

        assert_eq!(address_of(&users, "5"), None);
        assert_eq!(address_of(&users, "6"), Some(addr(6)));
    }

    #[test]
    fn test_payout_address_skips_invalid() {
        let user: NeynarUser = serde_json::from_value(json!({
            "fid": 5,
            "verified_addresses": {
                "eth_addresses": ["not-an-address", "0x00000000000000000000000000000000000000Ab"]
            }
        }))
        .unwrap();

        assert_eq!(
            payout_address(&user).map(|a| a.to_string()),
            Some("0x00000000000000000000000000000000000000ab".to_string())
        );
    }
}
