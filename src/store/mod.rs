//! Timeline persistence
//!
//! [`TimelineStore`] owns the payout contract pool and the timeline records.
//! Two invariants matter to callers:
//!
//! - `claim_reward_manager` hands each available contract to at most one
//!   caller until it is released, consumed, or its claim goes stale.
//! - A timeline inserted with `insert_pending_timeline` is invisible to
//!   `get_timeline` until `activate_timeline` succeeds.
//! - A consumed contract never returns to the pool; `release_reward_manager`
//!   and stale claims only ever apply to uninitialized contracts.

pub mod memory;
pub mod mongo;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::{AllocationCap, AllocationEntry, EthAddress, PayoutShareTable};
use crate::types::Result;

pub use memory::InMemoryTimelineStore;
pub use mongo::MongoTimelineStore;

/// Creator profile snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorProfile {
    #[serde(deserialize_with = "fid_string")]
    pub fid: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfp_url: Option<String>,
}

/// Fids arrive as JSON numbers or strings
fn fid_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Fid {
        Text(String),
        Number(u64),
    }

    Ok(match Fid::deserialize(deserializer)? {
        Fid::Text(s) => s,
        Fid::Number(n) => n.to_string(),
    })
}

/// A payout contract reserved for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardManagerClaim {
    pub address: EthAddress,
    /// Token proving ownership of the claim
    pub claim_id: String,
}

/// Stored supporter row: its allocation plus the basis points paid to its address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupporterRecord {
    #[serde(flatten)]
    pub entry: AllocationEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basis_points: Option<u64>,
}

impl SupporterRecord {
    /// Pair every allocation entry with its share in `table`
    pub fn from_table(entries: &[AllocationEntry], table: &PayoutShareTable) -> Vec<Self> {
        entries
            .iter()
            .map(|entry| {
                // A supporter paid at the creator's address shares the creator row
                let basis_points = entry.resolved_address.as_ref().and_then(|address| {
                    table
                        .shares()
                        .iter()
                        .find(|s| &s.address == address)
                        .map(|s| s.basis_points)
                });
                SupporterRecord {
                    entry: entry.clone(),
                    basis_points,
                }
            })
            .collect()
    }
}

/// Everything written when a timeline enters the pending state
#[derive(Debug, Clone)]
pub struct NewTimeline {
    pub timeline_id: String,
    pub name: String,
    pub template: String,
    pub creator: CreatorProfile,
    pub creator_address: EthAddress,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    pub cast_hashes: Vec<String>,
    pub supporter_allocation: AllocationCap,
    pub cover_image: Option<String>,
    pub reward_manager: EthAddress,
    pub supporters: Vec<SupporterRecord>,
}

/// An active timeline as served to readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineRecord {
    #[serde(rename = "id")]
    pub timeline_id: String,
    pub name: String,
    pub template: String,
    pub creator: CreatorProfile,
    pub creator_address: EthAddress,
    pub tags: Vec<String>,
    pub keywords: Vec<String>,
    #[serde(rename = "casts")]
    pub cast_hashes: Vec<String>,
    pub supporter_allocation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    pub reward_manager: EthAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_address: Option<EthAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Persistence for the payout contract pool and timelines
#[async_trait::async_trait]
pub trait TimelineStore: Send + Sync {
    /// Add a pre-deployed contract to the pool. Returns false if it is already known.
    async fn register_reward_manager(&self, address: &EthAddress) -> Result<bool>;

    /// Number of contracts that `claim_reward_manager` could hand out now
    async fn count_available_reward_managers(&self) -> Result<u64>;

    /// Atomically reserve one available contract, or `None` if the pool is empty
    async fn claim_reward_manager(&self) -> Result<Option<RewardManagerClaim>>;

    /// Return a claimed contract to the pool. A no-op if the claim was lost.
    async fn release_reward_manager(&self, claim: &RewardManagerClaim) -> Result<()>;

    /// Restart the TTL of a held claim. Returns false if the claim was taken
    /// over or the contract is already initialized.
    async fn refresh_reward_manager_claim(&self, claim: &RewardManagerClaim) -> Result<bool>;

    /// Take a contract out of the pool for good, whoever holds its claim.
    /// `tx_hash` is absent when the contract was found already initialized.
    /// Idempotent.
    async fn consume_reward_manager(&self, address: &EthAddress, tx_hash: Option<&str>)
        -> Result<()>;

    async fn insert_pending_timeline(&self, timeline: NewTimeline) -> Result<()>;

    /// Make a pending timeline visible
    async fn activate_timeline(&self, timeline_id: &str, tx_hash: &str) -> Result<()>;

    /// Remove a pending timeline and its supporter rows
    async fn discard_timeline(&self, timeline_id: &str) -> Result<()>;

    /// Active timeline by id
    async fn get_timeline(&self, timeline_id: &str) -> Result<Option<TimelineRecord>>;

    /// Supporter rows of a timeline in allocation order
    async fn list_supporters(&self, timeline_id: &str) -> Result<Vec<SupporterRecord>>;

    /// Record the coin minted for an active timeline. Returns false if no such timeline.
    async fn set_coin_address(&self, timeline_id: &str, coin: &EthAddress) -> Result<bool>;

    /// Backend name for health reporting
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{reconcile, Apportionment};

    fn addr(n: u8) -> EthAddress {
        EthAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    fn entry(id: &str, pct: f64, address: Option<EthAddress>) -> AllocationEntry {
        AllocationEntry {
            identity_id: id.to_string(),
            like_count: 1,
            recast_count: 0,
            weighted_score: 1,
            fractional_allocation: pct,
            resolved_address: address,
        }
    }

    #[test]
    fn test_supporter_records_carry_table_shares() {
        let entries = vec![entry("1", 10.0, Some(addr(1))), entry("2", 10.0, None)];
        let table = reconcile(&entries, &addr(0xAA), Apportionment::LargestRemainder).unwrap();

        let records = SupporterRecord::from_table(&entries, &table);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].basis_points, Some(1000));
        assert_eq!(records[1].basis_points, None);
    }

    #[test]
    fn test_supporter_at_creator_address_gets_merged_share() {
        let entries = vec![entry("1", 10.0, Some(addr(0xAA))), entry("2", 5.0, Some(addr(2)))];
        let table = reconcile(&entries, &addr(0xAA), Apportionment::LargestRemainder).unwrap();
        assert_eq!(table.basis_points(), vec![9500, 500]);

        let records = SupporterRecord::from_table(&entries, &table);
        assert_eq!(records[0].basis_points, Some(9500));
        assert_eq!(records[1].basis_points, Some(500));
    }

    #[test]
    fn test_creator_fid_accepts_number() {
        let creator: CreatorProfile =
            serde_json::from_value(serde_json::json!({ "fid": 42, "username": "maker" })).unwrap();
        assert_eq!(creator.fid, "42");
    }

    #[test]
    fn test_supporter_record_json_shape() {
        let record = SupporterRecord {
            entry: entry("7", 12.5, Some(addr(7))),
            basis_points: Some(1250),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["fid"], "7");
        assert_eq!(json["allocation"], 12.5);
        assert_eq!(json["basisPoints"], 1250);
    }
}
