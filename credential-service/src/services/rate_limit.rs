use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use uuid::Uuid;

use super::error::AuthError;
use crate::models::ApiKey;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-key request budget applied after a key validates.
pub trait ApiKeyRateLimiter: Send + Sync {
    fn check(&self, key: &ApiKey) -> Result<(), AuthError>;
}

/// No limiting at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl ApiKeyRateLimiter for Unlimited {
    fn check(&self, _key: &ApiKey) -> Result<(), AuthError> {
        Ok(())
    }
}

/// In-process GCRA limiter per key id, sized from each key's per-minute
/// `rate_limit`. A key whose limit changes gets a fresh bucket.
#[derive(Default)]
pub struct GovernorRateLimiter {
    limiters: DashMap<Uuid, (u32, Arc<DirectLimiter>)>,
}

impl GovernorRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn limiter_for(&self, key_id: Uuid, per_minute: NonZeroU32) -> Arc<DirectLimiter> {
        let mut entry = self
            .limiters
            .entry(key_id)
            .or_insert_with(|| (per_minute.get(), new_limiter(per_minute)));
        if entry.0 != per_minute.get() {
            *entry = (per_minute.get(), new_limiter(per_minute));
        }
        entry.1.clone()
    }
}

fn new_limiter(per_minute: NonZeroU32) -> Arc<DirectLimiter> {
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

impl ApiKeyRateLimiter for GovernorRateLimiter {
    fn check(&self, key: &ApiKey) -> Result<(), AuthError> {
        // Non-positive limits mean "unlimited".
        let Some(per_minute) = u32::try_from(key.rate_limit).ok().and_then(NonZeroU32::new) else {
            return Ok(());
        };

        match self.limiter_for(key.id, per_minute).check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                tracing::warn!(key_id = %key.id, "API key rate limit exceeded");
                Err(AuthError::RateLimitExceeded {
                    retry_after_secs: wait.as_secs().max(1),
                })
            }
        }
    }
}
