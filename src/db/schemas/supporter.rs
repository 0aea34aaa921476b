//! Supporter rows of a timeline
//!
//! One document per engaged identity, ordered by `position` (allocation
//! order). Counters are stored as i64 because BSON has no unsigned integers.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const SUPPORTER_COLLECTION: &str = "supporters";

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SupporterDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub timeline_id: String,

    pub position: i32,

    pub fid: String,

    pub likes: i64,

    pub recasts: i64,

    pub total_score: i64,

    /// Percent of the total pool
    pub allocation: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Basis points paid to `address`; absent when unresolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basis_points: Option<i64>,
}

impl IntoIndexes for SupporterDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "timeline_id": 1, "position": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("timeline_position_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for SupporterDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
