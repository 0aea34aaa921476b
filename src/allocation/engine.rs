//! Engagement-weighted allocation
//!
//! Folds engagement records into per-identity tallies and turns them into
//! percentage allocations bounded by the collection's supporter cap:
//!
//! ```text
//! weighted_score = likes * 1 + recasts * 2
//! allocation     = weighted_score / total_weighted_score * cap
//! ```
//!
//! With zero total engagement every allocation is 0.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::EthAddress;
use crate::engagement::{EngagementRecord, ReactionKind};
use crate::types::TimelineError;

/// Share of the payout reserved for supporters, in percent (0..=100)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct AllocationCap(f64);

impl AllocationCap {
    pub const ZERO: AllocationCap = AllocationCap(0.0);

    /// Validate a caller-supplied cap. Out-of-range values are rejected, not clamped.
    pub fn new(percent: f64) -> Result<Self, TimelineError> {
        if !percent.is_finite() {
            return Err(TimelineError::InvalidInput(
                "Supporter allocation must be a finite number".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&percent) {
            return Err(TimelineError::InvalidInput(format!(
                "Supporter allocation must be between 0 and 100, got {percent}"
            )));
        }
        Ok(Self(percent))
    }

    /// Parse the form value ("20", "12.5")
    pub fn parse(value: &str) -> Result<Self, TimelineError> {
        let percent: f64 = value.trim().parse().map_err(|_| {
            TimelineError::InvalidInput(format!("Supporter allocation is not a number: {value}"))
        })?;
        Self::new(percent)
    }

    pub fn percent(&self) -> f64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for AllocationCap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // The web client sends the cap either as a number or as a form string
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawCap {
            Number(f64),
            Text(String),
        }

        let cap = match RawCap::deserialize(deserializer)? {
            RawCap::Number(n) => AllocationCap::new(n),
            RawCap::Text(s) => AllocationCap::parse(&s),
        };
        cap.map_err(serde::de::Error::custom)
    }
}

/// Engagement aggregated per identity across all posts of a collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngagementTally {
    pub identity_id: String,
    pub like_count: u64,
    pub recast_count: u64,
    pub weighted_score: u64,
}

impl EngagementTally {
    fn new(identity_id: &str) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            like_count: 0,
            recast_count: 0,
            weighted_score: 0,
        }
    }

    fn record(&mut self, kind: ReactionKind) {
        match kind {
            ReactionKind::Like => self.like_count += 1,
            ReactionKind::Recast => self.recast_count += 1,
        }
        self.weighted_score += kind.weight();
    }
}

/// One supporter row of a collection's allocation table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEntry {
    #[serde(rename = "fid")]
    pub identity_id: String,
    #[serde(rename = "likes")]
    pub like_count: u64,
    #[serde(rename = "recasts")]
    pub recast_count: u64,
    #[serde(rename = "totalScore")]
    pub weighted_score: u64,
    /// Percentage of the total payout, in `[0, cap]`
    #[serde(rename = "allocation")]
    pub fractional_allocation: f64,
    /// Payout address, absent when the identity has no linked address
    #[serde(rename = "address", default, skip_serializing_if = "Option::is_none")]
    pub resolved_address: Option<EthAddress>,
}

/// Fold records into tallies keyed by identity, in first-seen order.
///
/// Every call starts from an empty tally, so re-running over the same records
/// never double counts.
pub fn tally(records: &[EngagementRecord]) -> Vec<EngagementTally> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut tallies: Vec<EngagementTally> = Vec::new();

    for record in records {
        let slot = *index.entry(record.identity_id.as_str()).or_insert_with(|| {
            tallies.push(EngagementTally::new(&record.identity_id));
            tallies.len() - 1
        });
        tallies[slot].record(record.kind);
    }

    tallies
}

/// Convert tallies into percentage allocations bounded by `cap`
pub fn allocate(tallies: Vec<EngagementTally>, cap: AllocationCap) -> Vec<AllocationEntry> {
    let total: u64 = tallies.iter().map(|t| t.weighted_score).sum();

    tallies
        .into_iter()
        .map(|t| {
            let fractional_allocation = if total > 0 {
                t.weighted_score as f64 / total as f64 * cap.percent()
            } else {
                0.0
            };
            AllocationEntry {
                identity_id: t.identity_id,
                like_count: t.like_count,
                recast_count: t.recast_count,
                weighted_score: t.weighted_score,
                fractional_allocation,
                resolved_address: None,
            }
        })
        .collect()
}

/// Aggregate `records` and compute each identity's allocation
pub fn compute_allocations(records: &[EngagementRecord], cap: AllocationCap) -> Vec<AllocationEntry> {
    allocate(tally(records), cap)
}

/// Sum of weighted scores across entries
pub fn total_weighted_score(entries: &[AllocationEntry]) -> u64 {
    entries.iter().map(|e| e.weighted_score).sum()
}
