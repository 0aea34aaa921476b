//! MongoDB timeline store

use std::time::Duration;

use bson::{doc, DateTime};
use tracing::{debug, info, warn};

use super::{
    CreatorProfile, NewTimeline, RewardManagerClaim, SupporterRecord, TimelineRecord,
    TimelineStore,
};
use crate::allocation::{AllocationEntry, EthAddress};
use crate::db::schemas::{
    CreatorDoc, Metadata, RewardManagerDoc, SupporterDoc, TimelineDoc, TimelineStatus,
    REWARD_MANAGER_COLLECTION, SUPPORTER_COLLECTION, TIMELINE_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{Result, TimelineError};

pub struct MongoTimelineStore {
    reward_managers: MongoCollection<RewardManagerDoc>,
    timelines: MongoCollection<TimelineDoc>,
    supporters: MongoCollection<SupporterDoc>,
    claim_ttl: Duration,
}

impl MongoTimelineStore {
    /// Open the collections, creating their indexes
    pub async fn new(client: MongoClient, claim_ttl: Duration) -> Result<Self> {
        let reward_managers = client.collection(REWARD_MANAGER_COLLECTION).await?;
        let timelines = client.collection(TIMELINE_COLLECTION).await?;
        let supporters = client.collection(SUPPORTER_COLLECTION).await?;

        info!(db = %client.db_name(), "Timeline store ready");

        Ok(Self {
            reward_managers,
            timelines,
            supporters,
            claim_ttl,
        })
    }

    fn stale_before(&self) -> DateTime {
        let ttl_ms = i64::try_from(self.claim_ttl.as_millis()).unwrap_or(i64::MAX);
        DateTime::from_millis(DateTime::now().timestamp_millis().saturating_sub(ttl_ms))
    }
}

fn parse_address(value: &str, what: &str) -> Result<EthAddress> {
    EthAddress::parse(value)
        .map_err(|e| TimelineError::Database(format!("Stored {what} is invalid: {e}")))
}

/// Server error 11000, raised when a unique index rejects a write
fn is_duplicate_key(err: &TimelineError) -> bool {
    matches!(err, TimelineError::Database(msg) if msg.contains("E11000"))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn supporter_doc(timeline_id: &str, position: usize, record: SupporterRecord) -> SupporterDoc {
    let entry = record.entry;
    SupporterDoc {
        _id: None,
        metadata: Metadata::new(),
        timeline_id: timeline_id.to_string(),
        position: i32::try_from(position).unwrap_or(i32::MAX),
        fid: entry.identity_id,
        likes: to_i64(entry.like_count),
        recasts: to_i64(entry.recast_count),
        total_score: to_i64(entry.weighted_score),
        allocation: entry.fractional_allocation,
        address: entry.resolved_address.map(String::from),
        basis_points: record.basis_points.map(to_i64),
    }
}

fn supporter_record(doc: SupporterDoc) -> SupporterRecord {
    SupporterRecord {
        entry: AllocationEntry {
            identity_id: doc.fid,
            like_count: doc.likes.max(0) as u64,
            recast_count: doc.recasts.max(0) as u64,
            weighted_score: doc.total_score.max(0) as u64,
            fractional_allocation: doc.allocation,
            // Addresses are validated on write; a bad one reads back as unresolved
            resolved_address: doc.address.and_then(|a| EthAddress::parse(&a).ok()),
        },
        basis_points: doc.basis_points.map(|p| p.max(0) as u64),
    }
}

fn timeline_record(doc: TimelineDoc) -> Result<TimelineRecord> {
    let coin_address = match doc.coin_address {
        Some(ref a) => Some(parse_address(a, "coin address")?),
        None => None,
    };
    Ok(TimelineRecord {
        creator_address: parse_address(&doc.creator_address, "creator address")?,
        reward_manager: parse_address(&doc.reward_manager, "reward manager")?,
        coin_address,
        timeline_id: doc.timeline_id,
        name: doc.name,
        template: doc.template,
        creator: CreatorProfile {
            fid: doc.creator.fid,
            username: doc.creator.username,
            display_name: doc.creator.display_name,
            pfp_url: doc.creator.pfp_url,
        },
        tags: doc.tags,
        keywords: doc.keywords,
        cast_hashes: doc.cast_hashes,
        supporter_allocation: doc.supporter_allocation,
        cover_image: doc.cover_image,
        tx_hash: doc.tx_hash,
        created_at: doc.metadata.created_at.map(|d| d.to_chrono()),
    })
}

#[async_trait::async_trait]
impl TimelineStore for MongoTimelineStore {
    async fn register_reward_manager(&self, address: &EthAddress) -> Result<bool> {
        let registered = self
            .reward_managers
            .upsert_one(doc! { "address": address.as_str() }, RewardManagerDoc::registration())
            .await;
        match registered {
            Ok(result) if result.upserted_id.is_some() => {
                info!(address = %address, "Reward manager registered");
                Ok(true)
            }
            Ok(_) => Ok(false),
            // A concurrent registration of the same address won the insert
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn count_available_reward_managers(&self) -> Result<u64> {
        self.reward_managers
            .count(RewardManagerDoc::available_filter(self.stale_before()))
            .await
    }

    async fn claim_reward_manager(&self) -> Result<Option<RewardManagerClaim>> {
        let claim_id = uuid::Uuid::new_v4().to_string();
        let update = doc! {
            "$set": Metadata::touched(doc! {
                "claim_id": claim_id.as_str(),
                "claimed_at": DateTime::now(),
            })
        };

        let claimed = self
            .reward_managers
            .find_one_and_update(RewardManagerDoc::available_filter(self.stale_before()), update)
            .await?;

        match claimed {
            Some(doc) => {
                let address = parse_address(&doc.address, "reward manager")?;
                debug!(address = %address, "Reward manager claimed");
                Ok(Some(RewardManagerClaim { address, claim_id }))
            }
            None => Ok(None),
        }
    }

    async fn release_reward_manager(&self, claim: &RewardManagerClaim) -> Result<()> {
        let result = self
            .reward_managers
            .update_one(
                doc! {
                    "address": claim.address.as_str(),
                    "claim_id": claim.claim_id.as_str(),
                    "initialized": false,
                },
                doc! {
                    "$unset": { "claim_id": "", "claimed_at": "" },
                    "$set": Metadata::touched(doc! {}),
                },
            )
            .await?;
        if result.matched_count == 0 {
            warn!(address = %claim.address, "Released a claim that was no longer held");
        }
        Ok(())
    }

    async fn refresh_reward_manager_claim(&self, claim: &RewardManagerClaim) -> Result<bool> {
        let result = self
            .reward_managers
            .update_one(
                doc! {
                    "address": claim.address.as_str(),
                    "claim_id": claim.claim_id.as_str(),
                    "initialized": false,
                },
                doc! { "$set": Metadata::touched(doc! { "claimed_at": DateTime::now() }) },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn consume_reward_manager(
        &self,
        address: &EthAddress,
        tx_hash: Option<&str>,
    ) -> Result<()> {
        let result = self
            .reward_managers
            .update_one(
                doc! { "address": address.as_str() },
                RewardManagerDoc::consumption(tx_hash),
            )
            .await?;
        if result.matched_count == 0 {
            return Err(TimelineError::Database(format!(
                "Unknown reward manager {address}"
            )));
        }
        Ok(())
    }

    async fn insert_pending_timeline(&self, timeline: NewTimeline) -> Result<()> {
        let timeline_id = timeline.timeline_id.clone();
        let supporters: Vec<SupporterDoc> = timeline
            .supporters
            .into_iter()
            .enumerate()
            .map(|(position, record)| supporter_doc(&timeline_id, position, record))
            .collect();

        let doc = TimelineDoc {
            _id: None,
            metadata: Metadata::new(),
            timeline_id: timeline.timeline_id,
            name: timeline.name,
            template: timeline.template,
            creator: CreatorDoc {
                fid: timeline.creator.fid,
                username: timeline.creator.username,
                display_name: timeline.creator.display_name,
                pfp_url: timeline.creator.pfp_url,
            },
            creator_address: timeline.creator_address.into(),
            tags: timeline.tags,
            keywords: timeline.keywords,
            cast_hashes: timeline.cast_hashes,
            supporter_allocation: timeline.supporter_allocation.percent(),
            cover_image: timeline.cover_image,
            status: TimelineStatus::Pending,
            reward_manager: timeline.reward_manager.into(),
            tx_hash: None,
            coin_address: None,
        };

        self.timelines.insert_one(doc).await?;
        if let Err(e) = self.supporters.insert_many(supporters).await {
            // Leave nothing half-written behind
            self.supporters
                .delete_many(doc! { "timeline_id": timeline_id.as_str() })
                .await?;
            self.timelines
                .delete_many(doc! { "timeline_id": timeline_id.as_str() })
                .await?;
            return Err(e);
        }
        Ok(())
    }

    async fn activate_timeline(&self, timeline_id: &str, tx_hash: &str) -> Result<()> {
        let result = self
            .timelines
            .update_one(
                doc! {
                    "timeline_id": timeline_id,
                    "status": TimelineStatus::Pending.as_str(),
                    "metadata.is_deleted": { "$ne": true },
                },
                doc! {
                    "$set": Metadata::touched(doc! {
                        "status": TimelineStatus::Active.as_str(),
                        "tx_hash": tx_hash,
                    }),
                },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(TimelineError::Database(format!(
                "No pending timeline {timeline_id}"
            )));
        }
        Ok(())
    }

    async fn discard_timeline(&self, timeline_id: &str) -> Result<()> {
        self.supporters
            .delete_many(doc! { "timeline_id": timeline_id })
            .await?;
        self.timelines
            .soft_delete(doc! {
                "timeline_id": timeline_id,
                "status": TimelineStatus::Pending.as_str(),
            })
            .await?;
        Ok(())
    }

    async fn get_timeline(&self, timeline_id: &str) -> Result<Option<TimelineRecord>> {
        self.timelines
            .find_one(doc! {
                "timeline_id": timeline_id,
                "status": TimelineStatus::Active.as_str(),
            })
            .await?
            .map(timeline_record)
            .transpose()
    }

    async fn list_supporters(&self, timeline_id: &str) -> Result<Vec<SupporterRecord>> {
        let docs = self
            .supporters
            .find_many_sorted(doc! { "timeline_id": timeline_id }, doc! { "position": 1 })
            .await?;
        Ok(docs.into_iter().map(supporter_record).collect())
    }

    async fn set_coin_address(&self, timeline_id: &str, coin: &EthAddress) -> Result<bool> {
        let result = self
            .timelines
            .update_one(
                doc! {
                    "timeline_id": timeline_id,
                    "status": TimelineStatus::Active.as_str(),
                    "metadata.is_deleted": { "$ne": true },
                },
                doc! { "$set": Metadata::touched(doc! { "coin_address": coin.as_str() }) },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> EthAddress {
        EthAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    #[test]
    fn test_supporter_doc_roundtrip_keeps_order_fields() {
        let record = SupporterRecord {
            entry: AllocationEntry {
                identity_id: "9".to_string(),
                like_count: 3,
                recast_count: 1,
                weighted_score: 5,
                fractional_allocation: 2.5,
                resolved_address: Some(addr(9)),
            },
            basis_points: Some(250),
        };

        let doc = supporter_doc("t1", 4, record.clone());
        assert_eq!(doc.position, 4);
        assert_eq!(doc.timeline_id, "t1");
        assert_eq!(doc.address.as_deref(), Some(addr(9).as_str()));
        assert_eq!(supporter_record(doc), record);
    }

    #[test]
    fn test_duplicate_key_detection() {
        let dup = TimelineError::Database(
            "Upsert failed: E11000 duplicate key error collection: timeline.rewardmanagers index: address_unique".to_string(),
        );
        assert!(is_duplicate_key(&dup));
        assert!(!is_duplicate_key(&TimelineError::Database("Upsert failed: timeout".to_string())));
        assert!(!is_duplicate_key(&TimelineError::NotFound("E11000".to_string())));
    }

    #[test]
    fn test_timeline_record_rejects_corrupt_address() {
        let doc = TimelineDoc {
            timeline_id: "t1".to_string(),
            creator_address: "garbage".to_string(),
            reward_manager: addr(1).to_string(),
            ..Default::default()
        };
        let err = timeline_record(doc).unwrap_err();
        assert!(matches!(err, TimelineError::Database(_)));
    }
}
