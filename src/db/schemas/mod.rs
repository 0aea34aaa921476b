//! Document schemas for timelines, their supporters, and the payout contract pool

mod reward_manager;
mod supporter;
mod timeline;

use bson::{DateTime, Document};
use serde::{Deserialize, Serialize};

pub use reward_manager::{RewardManagerDoc, REWARD_MANAGER_COLLECTION};
pub use supporter::{SupporterDoc, SUPPORTER_COLLECTION};
pub use timeline::{CreatorDoc, TimelineDoc, TimelineStatus, TIMELINE_COLLECTION};

/// Creation, update and soft deletion bookkeeping shared by every document
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    #[serde(default)]
    pub is_deleted: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    pub fn new() -> Self {
        Self {
            is_deleted: false,
            deleted_at: None,
            updated_at: Some(DateTime::now()),
            created_at: Some(DateTime::now()),
        }
    }

    /// `$set` fields for a document mutation: `fields` plus a fresh `updated_at`
    pub fn touched(mut fields: Document) -> Document {
        fields.insert("metadata.updated_at", DateTime::now());
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_touched_adds_timestamp() {
        let set = Metadata::touched(doc! { "status": "active" });
        assert_eq!(set.get_str("status").unwrap(), "active");
        assert!(set.get_datetime("metadata.updated_at").is_ok());
    }
}
