//! In-memory timeline store for development mode and tests

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    NewTimeline, RewardManagerClaim, SupporterRecord, TimelineRecord, TimelineStore,
};
use crate::allocation::EthAddress;
use crate::db::schemas::TimelineStatus;
use crate::types::{Result, TimelineError};

struct PooledContract {
    address: EthAddress,
    initialized: bool,
    claim: Option<(String, Instant)>,
}

impl PooledContract {
    fn available(&self, ttl: Duration) -> bool {
        !self.initialized
            && match &self.claim {
                None => true,
                Some((_, claimed_at)) => claimed_at.elapsed() >= ttl,
            }
    }

    fn held_by(&self, claim_id: &str) -> bool {
        matches!(&self.claim, Some((id, _)) if id == claim_id)
    }
}

struct StoredTimeline {
    record: TimelineRecord,
    status: TimelineStatus,
    supporters: Vec<SupporterRecord>,
}

#[derive(Default)]
struct State {
    contracts: Vec<PooledContract>,
    timelines: HashMap<String, StoredTimeline>,
}

/// Process-local store. All operations take one lock, which makes the
/// contract claim atomic.
pub struct InMemoryTimelineStore {
    claim_ttl: Duration,
    state: Mutex<State>,
}

impl InMemoryTimelineStore {
    pub fn new(claim_ttl: Duration) -> Self {
        Self {
            claim_ttl,
            state: Mutex::new(State::default()),
        }
    }

    /// Store pre-seeded with `addresses` as available contracts
    pub fn with_reward_managers(claim_ttl: Duration, addresses: Vec<EthAddress>) -> Self {
        let contracts = addresses
            .into_iter()
            .map(|address| PooledContract {
                address,
                initialized: false,
                claim: None,
            })
            .collect();
        Self {
            claim_ttl,
            state: Mutex::new(State {
                contracts,
                timelines: HashMap::new(),
            }),
        }
    }

    /// Whether `address` has been initialized
    pub async fn is_consumed(&self, address: &EthAddress) -> bool {
        self.state
            .lock()
            .await
            .contracts
            .iter()
            .any(|c| &c.address == address && c.initialized)
    }

    /// Total number of stored timelines in any state
    pub async fn timeline_count(&self) -> usize {
        self.state.lock().await.timelines.len()
    }
}

#[async_trait::async_trait]
impl TimelineStore for InMemoryTimelineStore {
    async fn register_reward_manager(&self, address: &EthAddress) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.contracts.iter().any(|c| &c.address == address) {
            return Ok(false);
        }
        state.contracts.push(PooledContract {
            address: address.clone(),
            initialized: false,
            claim: None,
        });
        Ok(true)
    }

    async fn count_available_reward_managers(&self) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state
            .contracts
            .iter()
            .filter(|c| c.available(self.claim_ttl))
            .count() as u64)
    }

    async fn claim_reward_manager(&self) -> Result<Option<RewardManagerClaim>> {
        let mut state = self.state.lock().await;
        let ttl = self.claim_ttl;
        let Some(contract) = state.contracts.iter_mut().find(|c| c.available(ttl)) else {
            return Ok(None);
        };

        let claim_id = uuid::Uuid::new_v4().to_string();
        contract.claim = Some((claim_id.clone(), Instant::now()));
        debug!(address = %contract.address, "Reward manager claimed");

        Ok(Some(RewardManagerClaim {
            address: contract.address.clone(),
            claim_id,
        }))
    }

    async fn release_reward_manager(&self, claim: &RewardManagerClaim) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(contract) = state
            .contracts
            .iter_mut()
            .find(|c| c.address == claim.address && !c.initialized && c.held_by(&claim.claim_id))
        {
            contract.claim = None;
        }
        Ok(())
    }

    async fn refresh_reward_manager_claim(&self, claim: &RewardManagerClaim) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state
            .contracts
            .iter_mut()
            .find(|c| c.address == claim.address && !c.initialized && c.held_by(&claim.claim_id))
        {
            Some(contract) => {
                contract.claim = Some((claim.claim_id.clone(), Instant::now()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume_reward_manager(
        &self,
        address: &EthAddress,
        _tx_hash: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let contract = state
            .contracts
            .iter_mut()
            .find(|c| &c.address == address)
            .ok_or_else(|| TimelineError::Database(format!("Unknown reward manager {address}")))?;
        contract.initialized = true;
        contract.claim = None;
        Ok(())
    }

    async fn insert_pending_timeline(&self, timeline: NewTimeline) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.timelines.contains_key(&timeline.timeline_id) {
            return Err(TimelineError::Database(format!(
                "Timeline {} already exists",
                timeline.timeline_id
            )));
        }

        let record = TimelineRecord {
            timeline_id: timeline.timeline_id.clone(),
            name: timeline.name,
            template: timeline.template,
            creator: timeline.creator,
            creator_address: timeline.creator_address,
            tags: timeline.tags,
            keywords: timeline.keywords,
            cast_hashes: timeline.cast_hashes,
            supporter_allocation: timeline.supporter_allocation.percent(),
            cover_image: timeline.cover_image,
            reward_manager: timeline.reward_manager,
            tx_hash: None,
            coin_address: None,
            created_at: Some(Utc::now()),
        };
        state.timelines.insert(
            timeline.timeline_id,
            StoredTimeline {
                record,
                status: TimelineStatus::Pending,
                supporters: timeline.supporters,
            },
        );
        Ok(())
    }

    async fn activate_timeline(&self, timeline_id: &str, tx_hash: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.timelines.get_mut(timeline_id) {
            Some(stored) if stored.status == TimelineStatus::Pending => {
                stored.status = TimelineStatus::Active;
                stored.record.tx_hash = Some(tx_hash.to_string());
                Ok(())
            }
            _ => Err(TimelineError::Database(format!(
                "No pending timeline {timeline_id}"
            ))),
        }
    }

    async fn discard_timeline(&self, timeline_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(
            state.timelines.get(timeline_id),
            Some(stored) if stored.status == TimelineStatus::Pending
        ) {
            state.timelines.remove(timeline_id);
        }
        Ok(())
    }

    async fn get_timeline(&self, timeline_id: &str) -> Result<Option<TimelineRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .timelines
            .get(timeline_id)
            .filter(|s| s.status == TimelineStatus::Active)
            .map(|s| s.record.clone()))
    }

    async fn list_supporters(&self, timeline_id: &str) -> Result<Vec<SupporterRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .timelines
            .get(timeline_id)
            .filter(|s| s.status == TimelineStatus::Active)
            .map(|s| s.supporters.clone())
            .unwrap_or_default())
    }

    async fn set_coin_address(&self, timeline_id: &str, coin: &EthAddress) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.timelines.get_mut(timeline_id) {
            Some(stored) if stored.status == TimelineStatus::Active => {
                stored.record.coin_address = Some(coin.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
