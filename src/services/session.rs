//! Session id to identity resolution.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::identity::AuthenticatedUser,
    services::cache::{Clock, SystemClock, TtlCache},
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// Resolves a session id to the user and groups behind it.
///
/// Fails with `NotAuthenticated` for an unknown, expired or empty session.
#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    async fn authenticate(&self, session_id: &str) -> CatalogResult<AuthenticatedUser>;
}

/// Remembers successful authentications for a while. Failures are never
/// cached.
pub struct CachingAuthenticator<A> {
    inner: A,
    cache: TtlCache<String, AuthenticatedUser>,
}

impl<A: SessionAuthenticator> CachingAuthenticator<A> {
    pub fn new(inner: A, ttl: Duration) -> Self {
        Self::with_clock(inner, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(inner: A, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            cache: TtlCache::with_clock(ttl, clock),
        }
    }

    /// Forget a session, e.g. after logout.
    pub fn invalidate(&self, session_id: &str) {
        self.cache.invalidate(&session_id.to_string());
    }
}

#[async_trait]
impl<A: SessionAuthenticator> SessionAuthenticator for CachingAuthenticator<A> {
    async fn authenticate(&self, session_id: &str) -> CatalogResult<AuthenticatedUser> {
        if session_id.trim().is_empty() {
            return Err(CatalogError::NotAuthenticated("empty session id".into()));
        }
        if let Some(user) = self.cache.get(&session_id.to_string()) {
            return Ok(user);
        }
        let user = self.inner.authenticate(session_id).await?;
        debug!("authenticated session as `{}`", user.name);
        self.cache.insert(session_id.to_string(), user.clone());
        Ok(user)
    }
}
