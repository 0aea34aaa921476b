//! End-to-end creation pipeline over the in-memory store

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use timeline_rewards::allocation::{EthAddress, PayoutShareTable};
use timeline_rewards::engagement::{
    CollectorConfig, EngagementCollector, EngagementRecord, ReactionKind, ReactionSource,
};
use timeline_rewards::services::{
    AddressResolver, CastDiscovery, CreateTimelineRequest, PayoutInitializer, TimelineCreator,
    TimelineCreatorConfig, TransactionReceipt,
};
use timeline_rewards::store::{InMemoryTimelineStore, TimelineStore};
use timeline_rewards::{Result, TimelineError};

fn addr(n: u8) -> EthAddress {
    EthAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
}

/// p1: fid 10 like, fid 20 recast. p2: fid 10 like. p3: fid 30 like.
struct Reactions;

#[async_trait]
impl ReactionSource for Reactions {
    async fn fetch_reactions(&self, post_id: &str) -> Result<Vec<EngagementRecord>> {
        Ok(match post_id {
            "p1" => vec![
                EngagementRecord::new(post_id, "10", ReactionKind::Like),
                EngagementRecord::new(post_id, "20", ReactionKind::Recast),
            ],
            "p2" => vec![EngagementRecord::new(post_id, "10", ReactionKind::Like)],
            "p3" => vec![EngagementRecord::new(post_id, "30", ReactionKind::Like)],
            _ => return Err(TimelineError::Upstream(format!("unknown cast {post_id}"))),
        })
    }
}

struct Keywords;

#[async_trait]
impl CastDiscovery for Keywords {
    async fn discover_casts(&self, _author_fid: &str, _keywords: &[String]) -> Result<Vec<String>> {
        Ok(vec!["p1".to_string(), "p2".to_string(), "p3".to_string()])
    }
}

/// fid 30 has no verified address
struct Directory(HashMap<String, EthAddress>);

#[async_trait]
impl AddressResolver for Directory {
    async fn resolve(&self, identity_id: &str) -> Result<Option<EthAddress>> {
        Ok(self.0.get(identity_id).cloned())
    }
}

#[derive(Default)]
struct Relayer {
    calls: AtomicUsize,
    fail_first: bool,
}

#[async_trait]
impl PayoutInitializer for Relayer {
    async fn initialize(&self, _contract: &EthAddress, table: &PayoutShareTable) -> Result<TransactionReceipt> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        table.validate()?;
        if self.fail_first && call == 0 {
            return Err(TimelineError::PayoutInitialization("transaction reverted".to_string()));
        }
        Ok(TransactionReceipt {
            tx_hash: format!("0x{call:064x}"),
            block_number: Some(100 + call as u64),
        })
    }
}

fn creator_with(store: Arc<InMemoryTimelineStore>, relayer: Arc<Relayer>) -> TimelineCreator {
    let directory = Directory(HashMap::from([
        ("1".to_string(), addr(0x01)),
        ("10".to_string(), addr(0x10)),
        ("20".to_string(), addr(0x20)),
    ]));
    TimelineCreator::new(
        TimelineCreatorConfig::default(),
        EngagementCollector::new(Arc::new(Reactions), CollectorConfig::default()),
        Arc::new(Keywords),
        Arc::new(directory),
        relayer,
        store,
    )
}

fn request() -> CreateTimelineRequest {
    serde_json::from_value(serde_json::json!({
        "name": "Protocol week",
        "creator": { "fid": "1", "username": "curator" },
        "keywords": ["protocol"],
        "supporterAllocation": 50,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_keyword_timeline_pays_resolved_supporters() {
    let store = Arc::new(InMemoryTimelineStore::with_reward_managers(
        Duration::from_secs(900),
        vec![addr(0xC1), addr(0xC2)],
    ));
    let relayer = Arc::new(Relayer::default());
    let creator = creator_with(store.clone(), relayer.clone());

    let outcome = creator.create(request()).await.unwrap();

    // Scores 2, 2, 1 of 5 under a 50% cap: 20%, 20%, 10%.
    // fid 30 is unresolved, so its 10% stays with the creator.
    let table = &outcome.share_table;
    assert_eq!(table.total(), 10_000);
    assert_eq!(table.creator().address, addr(0x01));
    assert_eq!(table.creator().basis_points, 6_000);
    assert_eq!(table.basis_points(), vec![6_000, 2_000, 2_000]);
    assert_eq!(table.addresses(), vec![addr(0x01), addr(0x10), addr(0x20)]);

    assert_eq!(outcome.supporters.len(), 3);
    let unresolved = outcome
        .supporters
        .iter()
        .find(|s| s.entry.identity_id == "30")
        .unwrap();
    assert_eq!(unresolved.basis_points, None);

    let timeline = store.get_timeline(&outcome.timeline_id).await.unwrap().unwrap();
    assert_eq!(timeline.cast_hashes, vec!["p1", "p2", "p3"]);
    assert_eq!(store.list_supporters(&outcome.timeline_id).await.unwrap().len(), 3);
    assert_eq!(store.count_available_reward_managers().await.unwrap(), 1);
    assert_eq!(relayer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pool_exhaustion_and_retry_after_failed_payout() {
    let store = Arc::new(InMemoryTimelineStore::with_reward_managers(
        Duration::from_secs(900),
        vec![addr(0xC1)],
    ));
    let relayer = Arc::new(Relayer {
        fail_first: true,
        ..Default::default()
    });
    let creator = creator_with(store.clone(), relayer);

    let err = creator.create(request()).await.unwrap_err();
    assert!(matches!(err, TimelineError::PayoutInitialization(_)));
    // Released, and no half-written timeline is left behind
    assert_eq!(store.count_available_reward_managers().await.unwrap(), 1);
    assert_eq!(store.timeline_count().await, 0);

    let outcome = creator.create(request()).await.unwrap();
    assert_eq!(outcome.reward_manager, addr(0xC1));
    assert_eq!(store.count_available_reward_managers().await.unwrap(), 0);

    let err = creator.create(request()).await.unwrap_err();
    assert!(matches!(err, TimelineError::NoPayoutContract));
    assert_eq!(store.timeline_count().await, 1);
}
