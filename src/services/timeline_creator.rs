//! Timeline creation pipeline
//!
//! Turns a creator's curated posts into an initialized payout contract:
//!
//! 1. Discover posts by keyword (or take explicit hashes)
//! 2. Collect reactions, skipping posts whose fetch fails
//! 3. Compute percentage allocations under the supporter cap
//! 4. Resolve the creator's and supporters' payout addresses
//! 5. Reconcile into a share table
//! 6. Claim a payout contract from the pool
//! 7. Store the timeline as pending and refresh the claim
//! 8. Initialize the contract
//! 9. Consume the contract and activate the timeline
//!
//! Nothing slow runs while a claim is held except the relayer call, whose
//! timeout is shorter than the claim TTL. A failure in steps 7 to 8
//! discards the pending timeline. The claim is released, unless the
//! contract turned out to be initialized already, in which case it is
//! consumed without a transaction and another contract is claimed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::allocation::{
    compute_allocations, reconcile, total_weighted_score, AllocationCap, AllocationEntry,
    Apportionment, EthAddress, PayoutShareTable,
};
use crate::engagement::{unique_posts, EngagementCollector};
use crate::services::address_resolver::{resolve_entries, AddressResolver};
use crate::services::payout::{PayoutInitializer, TransactionReceipt};
use crate::store::{
    CreatorProfile, NewTimeline, RewardManagerClaim, SupporterRecord, TimelineStore,
};
use crate::types::{Result, TimelineError};

/// Finds a creator's posts matching a set of keywords
#[async_trait::async_trait]
pub trait CastDiscovery: Send + Sync {
    async fn discover_casts(&self, author_fid: &str, keywords: &[String]) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct TimelineCreatorConfig {
    pub apportionment: Apportionment,
    /// Concurrent address lookups
    pub resolve_concurrency: usize,
    /// Contracts tried before giving up when claims are lost or contracts
    /// turn out to be initialized already
    pub claim_attempts: usize,
    /// Attempts to mark a confirmed contract used
    pub consume_attempts: usize,
    pub consume_retry_delay: Duration,
}

impl Default for TimelineCreatorConfig {
    fn default() -> Self {
        Self {
            apportionment: Apportionment::default(),
            resolve_concurrency: 4,
            claim_attempts: 3,
            consume_attempts: 3,
            consume_retry_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTimelineRequest {
    pub name: String,
    #[serde(default)]
    pub template: String,
    pub creator: CreatorProfile,
    /// Creator payout address; resolved from the profile when absent
    #[serde(default)]
    pub author_address: Option<EthAddress>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub supporter_allocation: AllocationCap,
    /// Explicit post hashes, bypassing keyword discovery
    #[serde(default)]
    pub cast_hashes: Option<Vec<String>>,
    #[serde(default)]
    pub cover_image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTimelineOutcome {
    pub timeline_id: String,
    pub reward_manager: EthAddress,
    pub tx_hash: String,
    pub supporters: Vec<SupporterRecord>,
    pub share_table: PayoutShareTable,
    /// Posts whose reactions could not be fetched
    pub failed_posts: Vec<String>,
}

/// Side-effect free allocation result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPreview {
    pub supporters: Vec<AllocationEntry>,
    pub total_score: u64,
    pub failed_posts: Vec<String>,
}

pub struct TimelineCreator {
    config: TimelineCreatorConfig,
    collector: EngagementCollector,
    discovery: Arc<dyn CastDiscovery>,
    resolver: Arc<dyn AddressResolver>,
    payout: Arc<dyn PayoutInitializer>,
    store: Arc<dyn TimelineStore>,
}

impl TimelineCreator {
    pub fn new(
        config: TimelineCreatorConfig,
        collector: EngagementCollector,
        discovery: Arc<dyn CastDiscovery>,
        resolver: Arc<dyn AddressResolver>,
        payout: Arc<dyn PayoutInitializer>,
        store: Arc<dyn TimelineStore>,
    ) -> Self {
        Self {
            config,
            collector,
            discovery,
            resolver,
            payout,
            store,
        }
    }

    /// Allocation table for `post_ids` under `cap`, without touching the store
    pub async fn preview_allocations(
        &self,
        author_id: &str,
        post_ids: &[String],
        cap: AllocationCap,
    ) -> Result<AllocationPreview> {
        let report = self.collector.collect(author_id, post_ids).await?;
        let supporters = compute_allocations(&report.records, cap);
        Ok(AllocationPreview {
            total_score: total_weighted_score(&supporters),
            supporters,
            failed_posts: report.failed,
        })
    }

    /// Run the full creation pipeline
    pub async fn create(&self, request: CreateTimelineRequest) -> Result<CreateTimelineOutcome> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(TimelineError::InvalidInput("Timeline name is required".to_string()));
        }
        let creator_fid = request.creator.fid.clone();
        if creator_fid.is_empty() {
            return Err(TimelineError::InvalidInput("Creator fid is required".to_string()));
        }

        let cast_hashes = self.select_casts(&creator_fid, &request).await?;

        let report = self.collector.collect(&creator_fid, &cast_hashes).await?;
        let mut entries = compute_allocations(&report.records, request.supporter_allocation);
        info!(
            creator = %creator_fid,
            casts = cast_hashes.len(),
            supporters = entries.len(),
            "Allocations computed"
        );

        let creator_address = self.creator_address(&creator_fid, request.author_address.clone()).await?;

        let resolved = resolve_entries(
            &mut entries,
            self.resolver.as_ref(),
            self.config.resolve_concurrency,
        )
        .await;
        if resolved < entries.len() {
            warn!(
                unresolved = entries.len() - resolved,
                "Some supporters have no payout address, their share goes to the creator"
            );
        }

        let table = reconcile(&entries, &creator_address, self.config.apportionment)?;
        let supporters = SupporterRecord::from_table(&entries, &table);

        let pending = PendingTimeline {
            name,
            request: &request,
            creator_address: &creator_address,
            cast_hashes: &cast_hashes,
            supporters: &supporters,
        };
        let (claim, timeline_id, receipt) = self.claim_and_initialize(&pending, &table).await?;

        let tx_hash = receipt.tx_hash;
        self.consume(&claim.address, &tx_hash).await?;
        self.store.activate_timeline(&timeline_id, &tx_hash).await?;

        info!(
            timeline_id = %timeline_id,
            contract = %claim.address,
            tx_hash = %tx_hash,
            "Timeline created"
        );

        Ok(CreateTimelineOutcome {
            timeline_id,
            reward_manager: claim.address,
            tx_hash,
            supporters,
            share_table: table,
            failed_posts: report.failed,
        })
    }

    async fn select_casts(&self, creator_fid: &str, request: &CreateTimelineRequest) -> Result<Vec<String>> {
        if let Some(hashes) = request.cast_hashes.as_ref() {
            let hashes = unique_posts(hashes);
            if !hashes.is_empty() {
                return Ok(hashes);
            }
        }
        if request.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(TimelineError::InvalidInput(
                "Either keywords or castHashes are required".to_string(),
            ));
        }

        let casts = unique_posts(&self.discovery.discover_casts(creator_fid, &request.keywords).await?);
        if casts.is_empty() {
            return Err(TimelineError::InvalidInput(
                "No casts matched the keywords".to_string(),
            ));
        }
        Ok(casts)
    }

    async fn creator_address(&self, creator_fid: &str, submitted: Option<EthAddress>) -> Result<EthAddress> {
        if let Some(address) = submitted {
            return Ok(address);
        }
        match self.resolver.resolve(creator_fid).await {
            Ok(Some(address)) => Ok(address),
            Ok(None) => Err(TimelineError::Resolution(format!(
                "Creator {creator_fid} has no verified address"
            ))),
            Err(e) => Err(TimelineError::Resolution(format!(
                "Creator {creator_fid} address lookup failed: {e}"
            ))),
        }
    }

    /// Steps 6 to 8. Returns the claim whose contract now carries `table`
    /// and the id of its pending timeline.
    async fn claim_and_initialize(
        &self,
        pending: &PendingTimeline<'_>,
        table: &PayoutShareTable,
    ) -> Result<(RewardManagerClaim, String, TransactionReceipt)> {
        let mut last_error = TimelineError::NoPayoutContract;

        for attempt in 1..=self.config.claim_attempts.max(1) {
            let claim = self
                .store
                .claim_reward_manager()
                .await?
                .ok_or(TimelineError::NoPayoutContract)?;
            info!(contract = %claim.address, attempt, "Reward manager claimed");

            let timeline_id = uuid::Uuid::new_v4().to_string();
            let timeline = pending.to_new_timeline(&timeline_id, &claim.address);

            match self.initialize_claimed(&claim, timeline, table).await {
                Ok(receipt) => return Ok((claim, timeline_id, receipt)),
                Err(e @ TimelineError::ContractAlreadyInitialized(_)) => {
                    warn!(contract = %claim.address, error = %e, "Retiring initialized reward manager");
                    self.discard(&timeline_id).await;
                    if let Err(consume_err) = self.store.consume_reward_manager(&claim.address, None).await {
                        error!(contract = %claim.address, error = %consume_err, "Failed to retire reward manager");
                    }
                    last_error = e;
                }
                Err(e @ TimelineError::ClaimLost(_)) => {
                    warn!(contract = %claim.address, error = %e, "Reward manager claim lost");
                    self.discard(&timeline_id).await;
                    last_error = e;
                }
                Err(e) => {
                    error!(
                        timeline_id = %timeline_id,
                        contract = %claim.address,
                        error = %e,
                        "Timeline creation failed, releasing reward manager"
                    );
                    self.discard(&timeline_id).await;
                    if let Err(release_err) = self.store.release_reward_manager(&claim).await {
                        error!(contract = %claim.address, error = %release_err, "Failed to release reward manager");
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error)
    }

    async fn initialize_claimed(
        &self,
        claim: &RewardManagerClaim,
        timeline: NewTimeline,
        table: &PayoutShareTable,
    ) -> Result<TransactionReceipt> {
        self.store.insert_pending_timeline(timeline).await?;

        if !self.store.refresh_reward_manager_claim(claim).await? {
            return Err(TimelineError::ClaimLost(format!(
                "Claim on {} expired before initialization",
                claim.address
            )));
        }

        self.payout.initialize(&claim.address, table).await
    }

    /// Mark a confirmed contract used. The contract is initialized on chain
    /// at this point, so the claim is never released on failure.
    async fn consume(&self, address: &EthAddress, tx_hash: &str) -> Result<()> {
        let attempts = self.config.consume_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.consume_reward_manager(address, Some(tx_hash)).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(contract = %address, attempt, error = %e, "Failed to mark reward manager used, retrying");
                    tokio::time::sleep(self.config.consume_retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(contract = %address, tx_hash = %tx_hash, error = %e, "Failed to mark reward manager used");
                    return Err(e);
                }
            }
        }
    }

    async fn discard(&self, timeline_id: &str) {
        if let Err(e) = self.store.discard_timeline(timeline_id).await {
            error!(timeline_id = %timeline_id, error = %e, "Failed to discard pending timeline");
        }
    }
}

struct PendingTimeline<'a> {
    name: String,
    request: &'a CreateTimelineRequest,
    creator_address: &'a EthAddress,
    cast_hashes: &'a [String],
    supporters: &'a [SupporterRecord],
}

impl PendingTimeline<'_> {
    fn to_new_timeline(&self, timeline_id: &str, reward_manager: &EthAddress) -> NewTimeline {
        NewTimeline {
            timeline_id: timeline_id.to_string(),
            name: self.name.clone(),
            template: self.request.template.clone(),
            creator: self.request.creator.clone(),
            creator_address: self.creator_address.clone(),
            tags: self.request.tags.clone(),
            keywords: self.request.keywords.clone(),
            cast_hashes: self.cast_hashes.to_vec(),
            supporter_allocation: self.request.supporter_allocation,
            cover_image: self.request.cover_image.clone(),
            reward_manager: reward_manager.clone(),
            supporters: self.supporters.to_vec(),
        }
    }
}
