//! Share reconciliation
//!
//! Converts percentage allocations into the integer basis-point table used to
//! initialize a payout contract. The creator comes first, followed by every
//! supporter with a resolved address in allocation order. The table always
//! sums to exactly [`TOTAL_BASIS_POINTS`]. Supporters without an address are
//! left out and their share accrues to the creator.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, warn};

use super::{AllocationEntry, EthAddress};
use crate::types::TimelineError;

/// Total of every payout table (100% in hundredths of a percent)
pub const TOTAL_BASIS_POINTS: u64 = 10_000;

/// How fractional basis points are turned into integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Apportionment {
    /// Hamilton apportionment across the creator and all supporters
    #[default]
    LargestRemainder,
    /// Round each supporter independently; the creator absorbs the difference
    Rounded,
}

/// One row of the payout table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutShare {
    pub address: EthAddress,
    pub basis_points: u64,
}

/// Integer share table, creator first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutShareTable {
    shares: Vec<PayoutShare>,
}

impl PayoutShareTable {
    pub fn creator(&self) -> &PayoutShare {
        &self.shares[0]
    }

    pub fn supporters(&self) -> &[PayoutShare] {
        &self.shares[1..]
    }

    pub fn shares(&self) -> &[PayoutShare] {
        &self.shares
    }

    pub fn addresses(&self) -> Vec<EthAddress> {
        self.shares.iter().map(|s| s.address.clone()).collect()
    }

    pub fn basis_points(&self) -> Vec<u64> {
        self.shares.iter().map(|s| s.basis_points).collect()
    }

    pub fn total(&self) -> u64 {
        self.shares.iter().map(|s| s.basis_points).sum()
    }

    /// Check the invariants the payout contract relies on
    pub fn validate(&self) -> Result<(), TimelineError> {
        if self.shares.is_empty() {
            return Err(TimelineError::ShareInvariant("Share table is empty".to_string()));
        }
        let total = self.total();
        if total != TOTAL_BASIS_POINTS {
            return Err(TimelineError::ShareInvariant(format!(
                "Shares sum to {total}, expected {TOTAL_BASIS_POINTS}"
            )));
        }
        for (i, share) in self.shares.iter().enumerate() {
            if self.shares[..i].iter().any(|s| s.address == share.address) {
                return Err(TimelineError::ShareInvariant(format!(
                    "Duplicate payout address {}",
                    share.address
                )));
            }
        }
        Ok(())
    }
}

/// Build the payout table for `entries` with `creator` receiving the remainder
pub fn reconcile(
    entries: &[AllocationEntry],
    creator: &EthAddress,
    method: Apportionment,
) -> Result<PayoutShareTable, TimelineError> {
    let kept: Vec<(&EthAddress, f64)> = entries
        .iter()
        .filter_map(|e| e.resolved_address.as_ref().map(|a| (a, e.fractional_allocation)))
        .collect();

    if let Some((address, _)) = kept.iter().find(|(_, pct)| !pct.is_finite() || *pct < 0.0) {
        return Err(TimelineError::ShareInvariant(format!(
            "Invalid allocation for supporter {address}"
        )));
    }

    let dropped = entries.len() - kept.len();
    if dropped > 0 {
        debug!(dropped, "Supporters without an address forfeit to the creator");
    }

    // Percent -> basis points
    let quotas: Vec<f64> = kept.iter().map(|(_, pct)| pct * 100.0).collect();

    let (creator_points, mut supporter_points) = match method {
        Apportionment::LargestRemainder => largest_remainder(&quotas),
        Apportionment::Rounded => rounded(&quotas),
    };

    let mut shares = Vec::with_capacity(kept.len() + 1);
    shares.push(PayoutShare {
        address: creator.clone(),
        basis_points: creator_points,
    });

    // The contract keys shares by address, so repeated addresses are merged
    for ((address, _), points) in kept.iter().zip(supporter_points.drain(..)) {
        match shares.iter_mut().find(|s| &s.address == *address) {
            Some(existing) => existing.basis_points += points,
            None => shares.push(PayoutShare {
                address: (*address).clone(),
                basis_points: points,
            }),
        }
    }

    let table = PayoutShareTable { shares };
    table.validate()?;
    Ok(table)
}

/// Hamilton apportionment of [`TOTAL_BASIS_POINTS`] over the creator's residual
/// quota and the supporter quotas. Ties go to the earlier party, creator first.
fn largest_remainder(quotas: &[f64]) -> (u64, Vec<u64>) {
    let supporter_total: f64 = quotas.iter().sum();
    let creator_quota = (TOTAL_BASIS_POINTS as f64 - supporter_total).max(0.0);

    let mut parties: Vec<f64> = Vec::with_capacity(quotas.len() + 1);
    parties.push(creator_quota);
    parties.extend_from_slice(quotas);

    let mut points: Vec<u64> = parties.iter().map(|q| q.floor() as u64).collect();
    let assigned: u64 = points.iter().sum();

    if assigned <= TOTAL_BASIS_POINTS {
        let mut order: Vec<usize> = (0..parties.len()).collect();
        order.sort_by(|&a, &b| {
            let ra = parties[a] - parties[a].floor();
            let rb = parties[b] - parties[b].floor();
            rb.partial_cmp(&ra).unwrap_or(Ordering::Equal).then(a.cmp(&b))
        });
        let seats = (TOTAL_BASIS_POINTS - assigned) as usize;
        for k in 0..seats {
            points[order[k % order.len()]] += 1;
        }
    } else {
        let mut supporters = points.split_off(1);
        trim_overdraft(&mut supporters, assigned - TOTAL_BASIS_POINTS);
        points.extend(supporters);
    }

    let creator = points.remove(0);
    (creator, points)
}

/// Independent rounding per supporter; the creator takes what is left.
fn rounded(quotas: &[f64]) -> (u64, Vec<u64>) {
    let mut points: Vec<u64> = quotas
        .iter()
        .map(|q| (q.round() as u64).min(TOTAL_BASIS_POINTS))
        .collect();

    let total: u64 = points.iter().sum();
    if total > TOTAL_BASIS_POINTS {
        trim_overdraft(&mut points, total - TOTAL_BASIS_POINTS);
    }

    let creator = TOTAL_BASIS_POINTS - points.iter().sum::<u64>();
    (creator, points)
}

/// Remove `excess` points starting from the last supporter
fn trim_overdraft(points: &mut [u64], mut excess: u64) {
    warn!(excess, "Supporter shares exceed the total, trimming from the last supporter");
    for p in points.iter_mut().rev() {
        if excess == 0 {
            break;
        }
        let cut = (*p).min(excess);
        *p -= cut;
        excess -= cut;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> EthAddress {
        EthAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    fn entry(id: &str, pct: f64, address: Option<EthAddress>) -> AllocationEntry {
        AllocationEntry {
            identity_id: id.to_string(),
            like_count: 0,
            recast_count: 0,
            weighted_score: 0,
            fractional_allocation: pct,
            resolved_address: address,
        }
    }

    fn three_supporters() -> Vec<AllocationEntry> {
        vec![
            entry("1", 20.0 * 5.0 / 45.0, Some(addr(1))),
            entry("2", 20.0 * 10.0 / 45.0, Some(addr(2))),
            entry("3", 20.0 * 30.0 / 45.0, Some(addr(3))),
        ]
    }

    #[test]
    fn test_rounded_three_supporters() {
        let table = reconcile(&three_supporters(), &addr(0xAA), Apportionment::Rounded).unwrap();
        assert_eq!(table.basis_points(), vec![8001, 222, 444, 1333]);
        assert_eq!(table.creator().address, addr(0xAA));
        assert_eq!(table.addresses()[1..].to_vec(), vec![addr(1), addr(2), addr(3)]);
    }

    #[test]
    fn test_largest_remainder_three_supporters() {
        let table =
            reconcile(&three_supporters(), &addr(0xAA), Apportionment::LargestRemainder).unwrap();
        // 222.2, 444.4, 1333.3 and a creator residual of 8000: the spare point
        // goes to the largest fraction
        assert_eq!(table.basis_points(), vec![8000, 222, 445, 1333]);
        assert_eq!(table.total(), TOTAL_BASIS_POINTS);
    }

    #[test]
    fn test_zero_engagement_gives_creator_everything() {
        let entries = vec![entry("1", 0.0, Some(addr(1))), entry("2", 0.0, Some(addr(2)))];
        for method in [Apportionment::LargestRemainder, Apportionment::Rounded] {
            let table = reconcile(&entries, &addr(0xAA), method).unwrap();
            assert_eq!(table.creator().basis_points, 10_000);
            assert!(table.supporters().iter().all(|s| s.basis_points == 0));
        }
    }

    #[test]
    fn test_no_supporters() {
        let table = reconcile(&[], &addr(0xAA), Apportionment::LargestRemainder).unwrap();
        assert_eq!(table.basis_points(), vec![10_000]);
        assert!(table.supporters().is_empty());
    }

    #[test]
    fn test_unresolved_entry_forfeits_to_creator() {
        let mut entries = three_supporters();
        entries[1].resolved_address = None;

        for method in [Apportionment::LargestRemainder, Apportionment::Rounded] {
            let table = reconcile(&entries, &addr(0xAA), method).unwrap();
            assert_eq!(table.addresses(), vec![addr(0xAA), addr(1), addr(3)]);
            assert!(!table.addresses().contains(&addr(2)));
            assert!(table.creator().basis_points >= 8444);
            assert_eq!(table.total(), TOTAL_BASIS_POINTS);
        }
    }

    #[test]
    fn test_rounding_overdraft_is_guarded() {
        // Four quotas of 2501 overshoot the total by 4 points
        let entries: Vec<_> = (1..=4u8)
            .map(|i| entry(&i.to_string(), 25.01, Some(addr(i))))
            .collect();

        for method in [Apportionment::LargestRemainder, Apportionment::Rounded] {
            let table = reconcile(&entries, &addr(0xAA), method).unwrap();
            assert_eq!(table.total(), TOTAL_BASIS_POINTS);
            assert_eq!(table.creator().basis_points, 0);
        }
    }

    #[test]
    fn test_many_small_supporters_sum_exactly() {
        let n = 7u8;
        let entries: Vec<_> = (1..=n)
            .map(|i| entry(&i.to_string(), 100.0 / n as f64, Some(addr(i))))
            .collect();

        let table = reconcile(&entries, &addr(0xAA), Apportionment::LargestRemainder).unwrap();
        assert_eq!(table.total(), TOTAL_BASIS_POINTS);
        let supporter_points: Vec<_> = table.supporters().iter().map(|s| s.basis_points).collect();
        assert!(supporter_points.iter().all(|p| *p == 1428 || *p == 1429));
    }

    #[test]
    fn test_duplicate_addresses_are_merged() {
        let entries = vec![
            entry("1", 10.0, Some(addr(1))),
            entry("2", 5.0, Some(addr(1))),
            entry("3", 5.0, Some(addr(0xAA))),
        ];
        let table = reconcile(&entries, &addr(0xAA), Apportionment::Rounded).unwrap();
        assert_eq!(table.addresses(), vec![addr(0xAA), addr(1)]);
        assert_eq!(table.basis_points(), vec![8500, 1500]);
    }

    #[test]
    fn test_invalid_allocation_rejected() {
        let entries = vec![entry("1", f64::NAN, Some(addr(1)))];
        let err = reconcile(&entries, &addr(0xAA), Apportionment::Rounded).unwrap_err();
        assert!(matches!(err, TimelineError::ShareInvariant(_)));
    }
}
