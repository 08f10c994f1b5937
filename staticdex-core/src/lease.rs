//! Guard lease for the lifecycle of the rebuild flag.
//!
//! A lease exists only while this worker holds the flag. Both ways out of
//! that state consume it, so a released lease cannot be released or
//! abandoned a second time.
//!
//! ```text
//! (flag absent) ─── acquire() ──→ held ─── release() ─────────→ (flag absent)
//!                                  │
//!                                  └──── leave_to_expire() ──→ (flag until TTL)
//! ```
//!
//! The lease is local bookkeeping. The cache only stores a boolean flag with
//! a TTL, so holding a lease is not proof that no other worker holds one too.

use crate::{GuardKey, RunId, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// What a worker knows about the flag it set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseData {
    pub run_id: RunId,
    pub guard_key: GuardKey,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl LeaseData {
    /// Build lease data for a flag set at `acquired_at` with the given TTL.
    pub fn new(
        run_id: RunId,
        guard_key: GuardKey,
        acquired_at: Timestamp,
        ttl: Duration,
    ) -> Result<Self, LeaseStateError> {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| acquired_at.checked_add_signed(ttl))
            .ok_or(LeaseStateError::TtlOutOfRange {
                ttl_secs: ttl.as_secs(),
            })?;
        Ok(Self {
            run_id,
            guard_key,
            acquired_at,
            expires_at,
        })
    }

    /// Check if the flag's TTL has elapsed.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// A rebuild flag set by this worker and not yet released.
#[derive(Debug)]
pub struct GuardLease {
    data: LeaseData,
}

impl GuardLease {
    /// Create a held lease. Only the rebuild guard should call this, right
    /// after it has set the flag.
    pub fn new(data: LeaseData) -> Self {
        GuardLease { data }
    }

    pub fn expires_at(&self) -> Timestamp {
        self.data.expires_at
    }

    /// Fail if the flag has outlived its TTL. Past that point another worker
    /// may have set the flag again, and releasing would clear theirs.
    pub fn ensure_live(&self, now: Timestamp) -> Result<(), LeaseStateError> {
        if self.data.is_expired(now) {
            return Err(LeaseStateError::Expired {
                run_id: self.data.run_id,
                expired_at: self.data.expires_at,
            });
        }
        Ok(())
    }

    /// Consume the lease once the flag has been cleared.
    pub fn release(self) -> LeaseData {
        self.data
    }

    /// Consume the lease without clearing the flag; it lapses at `expires_at`.
    pub fn leave_to_expire(self) -> LeaseData {
        self.data
    }
}

/// Errors when building or checking a lease.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseStateError {
    #[error("Guard lease for run {run_id} expired at {expired_at}")]
    Expired { run_id: RunId, expired_at: Timestamp },

    #[error("Guard TTL of {ttl_secs}s cannot be represented as an expiry time")]
    TtlOutOfRange { ttl_secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn make_lease_data() -> LeaseData {
        LeaseData::new(
            Uuid::now_v7(),
            GuardKey::default(),
            Utc::now(),
            Duration::from_secs(120),
        )
        .unwrap()
    }

    #[test]
    fn test_lease_expiry_from_ttl() {
        let data = make_lease_data();
        assert_eq!(data.expires_at - data.acquired_at, chrono::Duration::seconds(120));
        assert!(!data.is_expired(data.acquired_at));
        assert!(data.is_expired(data.expires_at));
    }

    #[test]
    fn test_oversized_ttl_is_rejected() {
        for ttl in [Duration::from_secs(10_000_000_000_000), Duration::MAX] {
            let result = LeaseData::new(Uuid::now_v7(), GuardKey::default(), Utc::now(), ttl);
            assert_eq!(
                result,
                Err(LeaseStateError::TtlOutOfRange {
                    ttl_secs: ttl.as_secs()
                })
            );
        }
    }

    #[test]
    fn test_release_consumes() {
        let data = make_lease_data();
        let lease = GuardLease::new(data.clone());

        let released = lease.release();
        assert_eq!(released.run_id, data.run_id);
    }

    #[test]
    fn test_ensure_live_after_ttl() {
        let data = make_lease_data();
        let lease = GuardLease::new(data.clone());

        assert!(lease.ensure_live(data.acquired_at).is_ok());
        let late = data.expires_at + chrono::Duration::seconds(1);
        assert!(matches!(
            lease.ensure_live(late),
            Err(LeaseStateError::Expired { .. })
        ));
    }
}
