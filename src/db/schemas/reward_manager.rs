//! Payout contract pool
//!
//! Pre-deployed reward manager contracts waiting to be bound to a timeline.
//! A contract is available while `initialized` is false and it carries no
//! live claim. Claims are taken with a single conditional update, so two
//! concurrent pipelines can never receive the same contract.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const REWARD_MANAGER_COLLECTION: &str = "rewardmanagers";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RewardManagerDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Contract address, lowercase hex
    pub address: String,

    /// Set once the contract's payout table has been written on chain
    #[serde(default)]
    pub initialized: bool,

    /// Token of the pipeline currently holding the contract
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialized_at: Option<DateTime>,

    /// Initialization transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl RewardManagerDoc {
    /// Update for an upsert keyed on `address`: inserts an available contract,
    /// leaves an existing one untouched
    pub fn registration() -> Document {
        doc! {
            "$setOnInsert": {
                "initialized": false,
                "metadata": {
                    "is_deleted": false,
                    "created_at": DateTime::now(),
                    "updated_at": DateTime::now(),
                },
            }
        }
    }

    /// Update taking a contract out of the pool, dropping any claim on it
    pub fn consumption(tx_hash: Option<&str>) -> Document {
        let mut set = doc! {
            "initialized": true,
            "initialized_at": DateTime::now(),
        };
        if let Some(tx_hash) = tx_hash {
            set.insert("tx_hash", tx_hash);
        }
        doc! {
            "$set": Metadata::touched(set),
            "$unset": { "claim_id": "", "claimed_at": "" },
        }
    }

    /// Filter for contracts that may be claimed: uninitialized, and either
    /// unclaimed or claimed before `stale_before`
    pub fn available_filter(stale_before: DateTime) -> Document {
        doc! {
            "initialized": false,
            "$or": [
                { "claim_id": null },
                { "claimed_at": { "$lt": stale_before } },
            ],
        }
    }
}

impl IntoIndexes for RewardManagerDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "address": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("address_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "initialized": 1, "claimed_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("availability_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for RewardManagerDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_only_sets_on_insert() {
        let update = RewardManagerDoc::registration();
        assert_eq!(update.len(), 1);
        let on_insert = update.get_document("$setOnInsert").unwrap();
        assert!(!on_insert.get_bool("initialized").unwrap());
        assert!(on_insert.get("claim_id").is_none());
    }

    #[test]
    fn test_consumption_clears_claim() {
        let update = RewardManagerDoc::consumption(Some("0xfeed"));
        let set = update.get_document("$set").unwrap();
        assert!(set.get_bool("initialized").unwrap());
        assert_eq!(set.get_str("tx_hash").unwrap(), "0xfeed");
        let unset = update.get_document("$unset").unwrap();
        assert!(unset.contains_key("claim_id") && unset.contains_key("claimed_at"));

        let quarantine = RewardManagerDoc::consumption(None);
        assert!(quarantine.get_document("$set").unwrap().get("tx_hash").is_none());
    }
}
