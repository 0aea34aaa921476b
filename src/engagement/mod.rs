//! Engagement records
//!
//! Raw reaction payloads from the social graph API are converted into
//! [`EngagementRecord`]s here. The conversion fails closed: a reaction with a
//! missing or malformed field is dropped instead of being passed on to the
//! allocation engine.

pub mod collector;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

pub use collector::{CollectionReport, CollectorConfig, EngagementCollector, ReactionSource};

/// Kind of engagement a social identity performed on a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Recast,
}

impl ReactionKind {
    /// Map the API's `reaction_type` string. Unknown types are ignored.
    pub fn from_api(reaction_type: &str) -> Option<Self> {
        match reaction_type {
            "like" => Some(ReactionKind::Like),
            "recast" => Some(ReactionKind::Recast),
            _ => None,
        }
    }

    /// Score contributed by one reaction of this kind
    pub fn weight(self) -> u64 {
        match self {
            ReactionKind::Like => 1,
            ReactionKind::Recast => 2,
        }
    }
}

/// One (post, identity) interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementRecord {
    pub post_id: String,
    pub identity_id: String,
    pub kind: ReactionKind,
}

impl EngagementRecord {
    pub fn new(post_id: impl Into<String>, identity_id: impl Into<String>, kind: ReactionKind) -> Self {
        Self {
            post_id: post_id.into(),
            identity_id: identity_id.into(),
            kind,
        }
    }
}

/// Post ids in first-seen order with blanks and repeats removed, so no
/// post's reactions are counted twice
pub fn unique_posts(post_ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    post_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Reaction as returned by the social graph API
#[derive(Debug, Deserialize)]
struct RawReaction {
    reaction_type: String,
    user: RawReactionUser,
}

#[derive(Debug, Deserialize)]
struct RawReactionUser {
    fid: u64,
}

/// Convert raw reaction objects for `post_id` into engagement records.
///
/// Items that do not match the expected shape, or carry an unknown reaction
/// type, are skipped.
pub fn parse_reactions(post_id: &str, raw: &[serde_json::Value]) -> Vec<EngagementRecord> {
    let mut records = Vec::with_capacity(raw.len());

    for value in raw {
        let reaction: RawReaction = match serde_json::from_value(value.clone()) {
            Ok(r) => r,
            Err(e) => {
                debug!(post_id = %post_id, error = %e, "Dropping malformed reaction");
                continue;
            }
        };

        let Some(kind) = ReactionKind::from_api(&reaction.reaction_type) else {
            debug!(
                post_id = %post_id,
                reaction_type = %reaction.reaction_type,
                "Ignoring unsupported reaction type"
            );
            continue;
        };

        records.push(EngagementRecord::new(
            post_id,
            reaction.user.fid.to_string(),
            kind,
        ));
    }

    records
}
