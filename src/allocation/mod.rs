//! Supporter reward allocation
//!
//! - **engine**: engagement tallies and percentage allocations
//! - **reconcile**: percentage allocations to integer payout shares
//! - **address**: validated payout addresses

pub mod address;
pub mod engine;
pub mod reconcile;

pub use address::EthAddress;
pub use engine::{
    allocate, compute_allocations, tally, total_weighted_score, AllocationCap, AllocationEntry,
    EngagementTally,
};
pub use reconcile::{
    reconcile, Apportionment, PayoutShare, PayoutShareTable, TOTAL_BASIS_POINTS,
};
