//! Association status of catalog objects, owned by an external scheduler.
//!
//! Statuses only narrow bucket listings, so a failing or slow provider is
//! never fatal: [`CachingAssociationProvider`] turns errors and timeouts into
//! "no associations".

use crate::services::cache::{Clock, SystemClock, TtlCache};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::warn;

/// Matches objects with at least one association, whatever its status.
pub const ALL_STATUSES: &str = "ALL";
/// Matches objects without any association.
pub const UNPLANNED_STATUS: &str = "UNPLANNED";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectAssociation {
    pub object_name: String,
    pub statuses: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketAssociations {
    pub bucket_name: String,
    pub objects: Vec<ObjectAssociation>,
}

/// Statuses of one object, `None` when it has no association.
pub fn statuses_of<'a>(
    associations: &'a [BucketAssociations],
    bucket: &str,
    object: &str,
) -> Option<&'a [String]> {
    associations
        .iter()
        .filter(|b| b.bucket_name == bucket)
        .flat_map(|b| b.objects.iter())
        .find(|o| o.object_name == object)
        .map(|o| o.statuses.as_slice())
        .filter(|statuses| !statuses.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationFilter {
    All,
    Unplanned,
    Status(String),
}

impl AssociationFilter {
    /// `None` for an empty filter.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            None
        } else if raw.eq_ignore_ascii_case(ALL_STATUSES) {
            Some(Self::All)
        } else if raw.eq_ignore_ascii_case(UNPLANNED_STATUS) {
            Some(Self::Unplanned)
        } else {
            Some(Self::Status(raw.to_string()))
        }
    }

    pub fn matches(&self, statuses: Option<&[String]>) -> bool {
        match (self, statuses) {
            (Self::All, statuses) => statuses.is_some(),
            (Self::Unplanned, statuses) => statuses.is_none(),
            (Self::Status(_), None) => false,
            (Self::Status(wanted), Some(statuses)) => {
                statuses.iter().any(|s| s.eq_ignore_ascii_case(wanted))
            }
        }
    }
}

#[async_trait]
pub trait AssociationStatusProvider: Send + Sync {
    async fn associated_objects(&self, session_id: &str) -> anyhow::Result<Vec<BucketAssociations>>;
}

pub struct CachingAssociationProvider<P> {
    inner: P,
    cache: TtlCache<String, Vec<BucketAssociations>>,
    timeout: Duration,
}

impl<P: AssociationStatusProvider> CachingAssociationProvider<P> {
    pub fn new(inner: P, ttl: Duration, timeout: Duration) -> Self {
        Self::with_clock(inner, ttl, timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(inner: P, ttl: Duration, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            cache: TtlCache::with_clock(ttl, clock),
            timeout,
        }
    }

    /// Associations visible to the session. Only successful answers are
    /// cached.
    pub async fn associated_objects(&self, session_id: &str) -> Vec<BucketAssociations> {
        let key = session_id.to_string();
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        match tokio::time::timeout(self.timeout, self.inner.associated_objects(session_id)).await {
            Ok(Ok(associations)) => {
                self.cache.insert(key, associations.clone());
                associations
            }
            Ok(Err(err)) => {
                warn!("association status lookup failed, assuming none: {:#}", err);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "association status lookup timed out after {:?}, assuming none",
                    self.timeout
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> Vec<BucketAssociations> {
        vec![BucketAssociations {
            bucket_name: "flows".into(),
            objects: vec![
                ObjectAssociation {
                    object_name: "etl".into(),
                    statuses: vec!["PLANNED".into()],
                },
                ObjectAssociation {
                    object_name: "idle".into(),
                    statuses: Vec::new(),
                },
            ],
        }]
    }

    #[test]
    fn filter_semantics() {
        let associations = sample();
        let etl = statuses_of(&associations, "flows", "etl");
        let idle = statuses_of(&associations, "flows", "idle");
        let other = statuses_of(&associations, "other", "etl");
        assert!(idle.is_none());
        assert!(other.is_none());

        let all = AssociationFilter::parse("all").unwrap();
        assert!(all.matches(etl) && !all.matches(idle));

        let unplanned = AssociationFilter::parse("Unplanned").unwrap();
        assert!(!unplanned.matches(etl) && unplanned.matches(idle));

        let planned = AssociationFilter::parse("planned").unwrap();
        assert!(planned.matches(etl) && !planned.matches(idle));
        assert!(!AssociationFilter::parse("failed").unwrap().matches(etl));

        assert_eq!(AssociationFilter::parse(" "), None);
    }

    struct Flaky {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AssociationStatusProvider for Arc<Flaky> {
        async fn associated_objects(&self, _session_id: &str) -> anyhow::Result<Vec<BucketAssociations>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("scheduler unreachable");
            }
            Ok(sample())
        }
    }

    #[tokio::test]
    async fn failures_degrade_to_empty_and_are_not_cached() {
        let inner = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let provider =
            CachingAssociationProvider::new(inner.clone(), Duration::from_secs(60), Duration::from_secs(1));
        assert!(provider.associated_objects("s").await.is_empty());
        assert!(provider.associated_objects("s").await.is_empty());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn successes_are_cached_until_expiry() {
        let inner = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let clock = ManualClock::new();
        let provider = CachingAssociationProvider::with_clock(
            inner.clone(),
            Duration::from_secs(60),
            Duration::from_secs(1),
            Arc::new(clock.clone()),
        );
        assert_eq!(provider.associated_objects("s").await, sample());
        provider.associated_objects("s").await;
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(61));
        provider.associated_objects("s").await;
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
