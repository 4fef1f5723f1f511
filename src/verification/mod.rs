//! Email verification with bounded attempts.
//!
//! An identity starts `Unverified { attempts: 0 }`. A matching code moves it to
//! `Verified`; a wrong code bumps the counter, and the submission that reaches
//! the configured maximum deletes the identity. The counter is incremented in
//! the store and the threshold is judged on the value the store returns, so
//! concurrent submissions cannot share a count. A failed delete still leaves
//! the attempt recorded.

mod store;

pub use store::{IdentityStore, SqliteIdentityStore};

use std::sync::Arc;

use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// Verification columns of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub code: String,
    pub is_verified: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub verification: VerificationRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    Unverified { attempts: u32 },
    Verified,
    Deleted,
}

impl VerificationState {
    /// A record at or past the limit counts as deleted even if removing it failed earlier.
    pub fn of(record: &VerificationRecord, max_attempts: u32) -> Self {
        if record.is_verified {
            VerificationState::Verified
        } else {
            Self::counting(record.attempts, max_attempts)
        }
    }

    fn counting(attempts: u32, max_attempts: u32) -> Self {
        if attempts >= max_attempts {
            VerificationState::Deleted
        } else {
            VerificationState::Unverified { attempts }
        }
    }

    pub fn on_submit(self, code_matches: bool, max_attempts: u32) -> AppResult<Self> {
        match self {
            VerificationState::Verified => Err(AppError::conflict("identity is already verified")),
            VerificationState::Deleted => Err(AppError::locked("too many verification attempts")),
            VerificationState::Unverified { .. } if code_matches => Ok(VerificationState::Verified),
            VerificationState::Unverified { attempts } => Ok(Self::counting(attempts + 1, max_attempts)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    Rejected { attempts: u32, remaining: u32 },
    LockedOut,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub identity_id: Uuid,
    pub email: String,
    pub outcome: VerificationOutcome,
}

pub struct VerificationTracker {
    store: Arc<dyn IdentityStore>,
    max_attempts: u32,
}

impl VerificationTracker {
    pub fn new(store: Arc<dyn IdentityStore>, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn submit(&self, email: &str, code: &str) -> AppResult<Submission> {
        let identity = self
            .store
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::not_found("identity not found"))?;

        let current = VerificationState::of(&identity.verification, self.max_attempts);
        if current == VerificationState::Deleted {
            // a previous lockout did not manage to remove the identity
            self.remove(&identity).await?;
            return Ok(submission(&identity, VerificationOutcome::LockedOut));
        }

        let code_matches = !code.is_empty() && identity.verification.code == code;
        match current.on_submit(code_matches, self.max_attempts)? {
            VerificationState::Verified => {
                if !self.store.mark_verified(identity.id, self.max_attempts).await? {
                    return self.settle(&identity).await;
                }
                tracing::info!(identity = %identity.id, "identity verified");
                Ok(submission(&identity, VerificationOutcome::Verified))
            }
            _ => self.reject(&identity).await,
        }
    }

    async fn reject(&self, identity: &Identity) -> AppResult<Submission> {
        let Some(attempts) = self.store.record_failed_attempt(identity.id).await? else {
            return self.settle(identity).await;
        };

        match VerificationState::counting(attempts, self.max_attempts) {
            VerificationState::Unverified { attempts } => {
                tracing::info!(identity = %identity.id, attempts, "verification code rejected");
                Ok(submission(
                    identity,
                    VerificationOutcome::Rejected {
                        attempts,
                        remaining: self.max_attempts - attempts,
                    },
                ))
            }
            _ => {
                self.remove(identity).await?;
                Ok(submission(identity, VerificationOutcome::LockedOut))
            }
        }
    }

    /// Reports the state another submission left behind when a conditional
    /// update found nothing to change.
    async fn settle(&self, identity: &Identity) -> AppResult<Submission> {
        let fresh = match self.store.find_by_email(&identity.email).await? {
            Some(fresh) if fresh.id == identity.id => fresh,
            _ => return Err(AppError::not_found("identity not found")),
        };

        match VerificationState::of(&fresh.verification, self.max_attempts) {
            VerificationState::Verified => Err(AppError::conflict("identity is already verified")),
            VerificationState::Deleted => {
                self.remove(&fresh).await?;
                Ok(submission(&fresh, VerificationOutcome::LockedOut))
            }
            VerificationState::Unverified { .. } => {
                Err(AppError::conflict("verification state changed during submission; retry"))
            }
        }
    }

    async fn remove(&self, identity: &Identity) -> AppResult<()> {
        match self.store.delete(identity.id).await {
            Ok(()) => {
                tracing::warn!(identity = %identity.id, "identity deleted after too many verification attempts");
                Ok(())
            }
            // a concurrent lockout got there first
            Err(AppError::NotFound(_)) => Ok(()),
            Err(err) => {
                tracing::error!(identity = %identity.id, error = %err, "failed to delete locked out identity");
                Err(err)
            }
        }
    }
}

fn submission(identity: &Identity, outcome: VerificationOutcome) -> Submission {
    Submission {
        identity_id: identity.id,
        email: identity.email.clone(),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryIdentities {
        rows: Mutex<HashMap<String, Identity>>,
        fail_delete: bool,
        // every read returns this copy, like a caller racing other submissions
        frozen: Option<Identity>,
    }

    impl MemoryIdentities {
        fn with(email: &str, code: &str) -> Self {
            let store = Self::default();
            store.rows.lock().unwrap().insert(
                email.to_string(),
                Identity {
                    id: Uuid::new_v4(),
                    email: email.to_string(),
                    verification: VerificationRecord {
                        code: code.to_string(),
                        is_verified: false,
                        attempts: 0,
                    },
                },
            );
            store
        }

        fn failing_delete(mut self) -> Self {
            self.fail_delete = true;
            self
        }

        fn frozen_reads(mut self, email: &str) -> Self {
            self.frozen = self.get(email);
            self
        }

        fn get(&self, email: &str) -> Option<Identity> {
            self.rows.lock().unwrap().get(email).cloned()
        }
    }

    #[async_trait]
    impl IdentityStore for MemoryIdentities {
        async fn find_by_email(&self, email: &str) -> AppResult<Option<Identity>> {
            if let Some(frozen) = &self.frozen {
                return Ok(Some(frozen.clone()));
            }
            Ok(self.get(email))
        }

        async fn record_failed_attempt(&self, id: Uuid) -> AppResult<Option<u32>> {
            let mut rows = self.rows.lock().unwrap();
            Ok(rows
                .values_mut()
                .find(|identity| identity.id == id && !identity.verification.is_verified)
                .map(|identity| {
                    identity.verification.attempts += 1;
                    identity.verification.attempts
                }))
        }

        async fn mark_verified(&self, id: Uuid, max_attempts: u32) -> AppResult<bool> {
            let mut rows = self.rows.lock().unwrap();
            let Some(identity) = rows.values_mut().find(|identity| {
                identity.id == id && !identity.verification.is_verified && identity.verification.attempts < max_attempts
            }) else {
                return Ok(false);
            };
            identity.verification.is_verified = true;
            identity.verification.attempts = 0;
            Ok(true)
        }

        async fn delete(&self, id: Uuid) -> AppResult<()> {
            if self.fail_delete {
                return Err(AppError::internal("storage unavailable"));
            }
            self.rows.lock().unwrap().retain(|_, identity| identity.id != id);
            Ok(())
        }
    }

    fn tracker(store: Arc<MemoryIdentities>) -> VerificationTracker {
        VerificationTracker::new(store, 5)
    }

    #[test]
    fn wrong_codes_count_up_to_deletion() {
        let mut state = VerificationState::Unverified { attempts: 0 };
        for expected in 1..5 {
            state = state.on_submit(false, 5).unwrap();
            assert_eq!(state, VerificationState::Unverified { attempts: expected });
        }
        assert_eq!(state.on_submit(false, 5).unwrap(), VerificationState::Deleted);
    }

    #[test]
    fn verified_identities_do_not_accept_submissions() {
        let state = VerificationState::Verified;
        assert!(matches!(state.on_submit(true, 5), Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn matching_code_verifies_and_resets_counter() {
        let store = Arc::new(MemoryIdentities::with("ada@example.com", "424242"));
        let tracker = tracker(store.clone());

        tracker.submit("ada@example.com", "000000").await.unwrap();
        let submission = tracker.submit("ada@example.com", "424242").await.unwrap();

        assert_eq!(submission.outcome, VerificationOutcome::Verified);
        let record = store.get("ada@example.com").unwrap().verification;
        assert!(record.is_verified);
        assert_eq!(record.attempts, 0);
    }

    #[tokio::test]
    async fn fifth_wrong_code_locks_out_and_deletes() {
        let store = Arc::new(MemoryIdentities::with("ada@example.com", "424242"));
        let tracker = tracker(store.clone());

        for attempt in 1..5 {
            let submission = tracker.submit("ada@example.com", "bad").await.unwrap();
            assert_eq!(
                submission.outcome,
                VerificationOutcome::Rejected {
                    attempts: attempt,
                    remaining: 5 - attempt
                }
            );
        }

        let submission = tracker.submit("ada@example.com", "bad").await.unwrap();
        assert_eq!(submission.outcome, VerificationOutcome::LockedOut);
        assert!(store.get("ada@example.com").is_none());

        let err = tracker.submit("ada@example.com", "424242").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_delete_keeps_the_incremented_counter() {
        let store = Arc::new(MemoryIdentities::with("ada@example.com", "424242").failing_delete());
        let tracker = tracker(store.clone());

        for _ in 1..5 {
            tracker.submit("ada@example.com", "bad").await.unwrap();
        }
        let err = tracker.submit("ada@example.com", "bad").await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let record = store.get("ada@example.com").unwrap().verification;
        assert_eq!(record.attempts, 5);
        assert!(!record.is_verified);

        // the right code no longer helps once the limit is reached
        assert!(tracker.submit("ada@example.com", "424242").await.is_err());
        assert!(!store.get("ada@example.com").unwrap().verification.is_verified);
    }

    #[tokio::test]
    async fn threshold_follows_the_stored_counter_not_the_read() {
        let store = Arc::new(MemoryIdentities::with("ada@example.com", "424242").frozen_reads("ada@example.com"));
        let tracker = tracker(store.clone());

        // every submission sees attempts = 0, yet the fifth still locks out
        for attempt in 1..5 {
            let submission = tracker.submit("ada@example.com", "bad").await.unwrap();
            assert_eq!(
                submission.outcome,
                VerificationOutcome::Rejected {
                    attempts: attempt,
                    remaining: 5 - attempt
                }
            );
        }
        let submission = tracker.submit("ada@example.com", "bad").await.unwrap();
        assert_eq!(submission.outcome, VerificationOutcome::LockedOut);
        assert!(store.get("ada@example.com").is_none());
    }

    #[tokio::test]
    async fn correct_code_after_the_limit_does_not_verify() {
        let store = Arc::new(
            MemoryIdentities::with("ada@example.com", "424242")
                .frozen_reads("ada@example.com")
                .failing_delete(),
        );
        let tracker = tracker(store.clone());
        for _ in 0..5 {
            store.record_failed_attempt(store.get("ada@example.com").unwrap().id).await.unwrap();
        }

        // the read still says 0 attempts; the conditional update refuses
        assert!(tracker.submit("ada@example.com", "424242").await.is_err());
        assert!(!store.get("ada@example.com").unwrap().verification.is_verified);
    }

    #[tokio::test]
    async fn unknown_identity_is_not_found() {
        let tracker = tracker(Arc::new(MemoryIdentities::default()));
        assert!(matches!(
            tracker.submit("nobody@example.com", "1").await,
            Err(AppError::NotFound(_))
        ));
    }
}
