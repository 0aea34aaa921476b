//! Timeline rewards
//!
//! Curated Farcaster timelines whose supporters share in the rewards.
//!
//! A timeline bundles a creator's casts. Reactions on those casts are
//! weighted (like 1, recast 2), scored per supporter, and turned into a
//! basis-point payout table that is written to a pre-deployed payout
//! contract claimed from a pool.
//!
//! ## Modules
//!
//! - **engagement**: bounded-concurrency reaction collection
//! - **allocation**: score-weighted allocation and share reconciliation
//! - **services**: Neynar client, address resolution, payout relayer, creation pipeline
//! - **store**: timelines, supporters, and the payout contract pool
//! - **routes**/**server**: HTTP API

pub mod allocation;
pub mod config;
pub mod db;
pub mod engagement;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, TimelineError};
