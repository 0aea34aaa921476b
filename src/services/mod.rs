//! Services layer
//!
//! Business logic coordinating the social graph API, the store, and the
//! transaction relayer.
//!
//! ## Services
//!
//! - **Neynar**: Farcaster API client (reactions, users, cast search and hydration)
//! - **AddressResolver**: fid to payout address, with a TTL cache
//! - **Payout**: payout contract initialization through a relayer
//! - **Chain**: read-only `eth_call` queries for supporter stats
//! - **TimelineCreator**: the end-to-end timeline creation pipeline

pub mod address_resolver;
pub mod chain;
pub mod neynar;
pub mod payout;
pub mod timeline_creator;

pub use address_resolver::{
    payout_address, resolve_entries, AddressResolver, AddressResolverConfig,
    NeynarAddressResolver,
};
pub use chain::{user_stats, ChainReader, EthRpcReader, RpcConfig, UserStats};
pub use neynar::{CastSummary, NeynarClient, NeynarConfig, NeynarUser};
pub use payout::{
    DryRunPayoutInitializer, PayoutInitializer, RelayerConfig, RelayerPayoutInitializer,
    TransactionReceipt,
};
pub use timeline_creator::{
    AllocationPreview, CastDiscovery, CreateTimelineOutcome, CreateTimelineRequest,
    TimelineCreator, TimelineCreatorConfig,
};
