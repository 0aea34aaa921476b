//! Timeline document schema

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const TIMELINE_COLLECTION: &str = "timelines";

/// Lifecycle of a timeline document
///
/// A timeline is written as `Pending` before its payout contract is
/// initialized and flipped to `Active` afterwards. Readers only see
/// active timelines.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimelineStatus {
    #[default]
    Pending,
    Active,
}

impl TimelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineStatus::Pending => "pending",
            TimelineStatus::Active => "active",
        }
    }
}

/// Creator profile snapshot taken at creation time
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct CreatorDoc {
    pub fid: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfp_url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TimelineDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Public identifier (UUID)
    pub timeline_id: String,

    pub name: String,

    #[serde(default)]
    pub template: String,

    pub creator: CreatorDoc,

    /// Creator payout address
    pub creator_address: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Curated post hashes
    #[serde(default)]
    pub cast_hashes: Vec<String>,

    /// Supporter cap in percent
    pub supporter_allocation: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,

    #[serde(default)]
    pub status: TimelineStatus,

    /// Claimed payout contract
    pub reward_manager: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin_address: Option<String>,
}

impl IntoIndexes for TimelineDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "timeline_id": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("timeline_id_unique".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "creator.fid": 1, "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("creator_status_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for TimelineDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
