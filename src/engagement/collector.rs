//! Engagement collection
//!
//! Fetches the reaction set of every curated post. Collection is best effort:
//! a post whose reactions cannot be fetched (network error, non-2xx response,
//! malformed payload, timeout) is logged and skipped, and the remaining posts
//! still contribute. Fetches run concurrently but results are consumed in post
//! order, so the record sequence is reproducible.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{unique_posts, EngagementRecord};
use crate::types::{Result, TimelineError};

/// Source of per-post reactions (allows mocking in tests)
#[async_trait::async_trait]
pub trait ReactionSource: Send + Sync {
    /// Fetch every supported reaction on one post
    async fn fetch_reactions(&self, post_id: &str) -> Result<Vec<EngagementRecord>>;
}

/// Configuration for the engagement collector
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Maximum number of posts fetched at once
    pub concurrency: usize,
    /// Upper bound on a single post's fetch, including pagination
    pub per_post_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            per_post_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one collection run
#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    /// Records from all successfully fetched posts, in post order
    pub records: Vec<EngagementRecord>,
    /// Posts whose reactions were fetched
    pub succeeded: Vec<String>,
    /// Posts that were skipped
    pub failed: Vec<String>,
}

pub struct EngagementCollector {
    source: Arc<dyn ReactionSource>,
    config: CollectorConfig,
}

impl EngagementCollector {
    pub fn new(source: Arc<dyn ReactionSource>, config: CollectorConfig) -> Self {
        Self { source, config }
    }

    /// Collect reactions for `post_ids`, authored by `author_id`.
    ///
    /// Errors only when `post_ids` is empty. Failure of every post yields an
    /// empty report.
    pub async fn collect(&self, author_id: &str, post_ids: &[String]) -> Result<CollectionReport> {
        let post_ids = unique_posts(post_ids);
        if post_ids.is_empty() {
            return Err(TimelineError::InvalidInput(
                "At least one post is required".to_string(),
            ));
        }

        let concurrency = self.config.concurrency.max(1);
        let per_post_timeout = self.config.per_post_timeout;

        let outcomes: Vec<(String, Result<Vec<EngagementRecord>>)> = stream::iter(post_ids.iter().cloned())
            .map(|post_id| {
                let source = Arc::clone(&self.source);
                async move {
                    let outcome = match tokio::time::timeout(per_post_timeout, source.fetch_reactions(&post_id)).await {
                        Ok(result) => result,
                        Err(_) => Err(TimelineError::Upstream(format!(
                            "Timed out after {}ms",
                            per_post_timeout.as_millis()
                        ))),
                    };
                    (post_id, outcome)
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut report = CollectionReport::default();
        for (post_id, outcome) in outcomes {
            match outcome {
                Ok(records) => {
                    report.records.extend(records);
                    report.succeeded.push(post_id);
                }
                Err(e) => {
                    warn!(post_id = %post_id, error = %e, "Skipping post, reactions unavailable");
                    report.failed.push(post_id);
                }
            }
        }

        info!(
            author = %author_id,
            posts = post_ids.len(),
            failed = report.failed.len(),
            records = report.records.len(),
            "Engagement collected"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::ReactionKind;
    use std::collections::HashMap;

    struct StaticSource {
        posts: HashMap<String, Vec<EngagementRecord>>,
    }

    #[async_trait::async_trait]
    impl ReactionSource for StaticSource {
        async fn fetch_reactions(&self, post_id: &str) -> Result<Vec<EngagementRecord>> {
            self.posts
                .get(post_id)
                .cloned()
                .ok_or_else(|| TimelineError::Upstream(format!("HTTP 500 for {post_id}")))
        }
    }

    struct SlowSource;

    #[async_trait::async_trait]
    impl ReactionSource for SlowSource {
        async fn fetch_reactions(&self, post_id: &str) -> Result<Vec<EngagementRecord>> {
            if post_id == "slow" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(vec![EngagementRecord::new(post_id, "1", ReactionKind::Like)])
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successful_posts() {
        let mut posts = HashMap::new();
        for (i, post) in ["a", "c", "e"].iter().enumerate() {
            posts.insert(
                post.to_string(),
                vec![EngagementRecord::new(*post, (i + 1).to_string(), ReactionKind::Like)],
            );
        }
        let collector = EngagementCollector::new(
            Arc::new(StaticSource { posts }),
            CollectorConfig::default(),
        );

        let report = collector
            .collect("100", &ids(&["a", "b", "c", "d", "e"]))
            .await
            .unwrap();

        assert_eq!(report.succeeded, ids(&["a", "c", "e"]));
        assert_eq!(report.failed, ids(&["b", "d"]));
        let identities: Vec<_> = report.records.iter().map(|r| r.identity_id.as_str()).collect();
        assert_eq!(identities, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_repeated_post_is_collected_once() {
        let posts = HashMap::from([(
            "a".to_string(),
            vec![EngagementRecord::new("a", "1", ReactionKind::Recast)],
        )]);
        let collector = EngagementCollector::new(
            Arc::new(StaticSource { posts }),
            CollectorConfig::default(),
        );

        let report = collector.collect("100", &ids(&["a", "a", "a"])).await.unwrap();
        assert_eq!(report.succeeded, ids(&["a"]));
        assert_eq!(report.records.len(), 1);
    }

    #[tokio::test]
    async fn test_total_failure_is_empty_not_error() {
        let collector = EngagementCollector::new(
            Arc::new(StaticSource { posts: HashMap::new() }),
            CollectorConfig::default(),
        );

        let report = collector.collect("100", &ids(&["x", "y"])).await.unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.failed.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_post_list_rejected() {
        let collector = EngagementCollector::new(
            Arc::new(StaticSource { posts: HashMap::new() }),
            CollectorConfig::default(),
        );

        let err = collector.collect("100", &[]).await.unwrap_err();
        assert!(matches!(err, TimelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_per_post_failure() {
        let collector = EngagementCollector::new(
            Arc::new(SlowSource),
            CollectorConfig {
                concurrency: 2,
                per_post_timeout: Duration::from_millis(50),
            },
        );

        let report = collector
            .collect("100", &ids(&["fast", "slow"]))
            .await
            .unwrap();

        assert_eq!(report.succeeded, ids(&["fast"]));
        assert_eq!(report.failed, ids(&["slow"]));
    }
}
