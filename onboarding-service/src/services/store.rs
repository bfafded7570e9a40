//! Storage traits for signup requests and the RM directory.
//!
//! Both traits have a PostgreSQL implementation (`services::database`) and an
//! in-memory implementation used by the hermetic test suites.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{RelationshipManager, SignupRequest, SignupStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("an active signup already exists for this contact pair")]
    DuplicateContact,

    #[error("unique value already taken: {0}")]
    DuplicateValue(String),

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Durable keyed storage for in-flight onboarding attempts.
#[async_trait]
pub trait SignupRequestStore: Send + Sync {
    /// Persist a new request, atomically reserving its `(email, phone)` pair
    /// against concurrent creates. Fails with `DuplicateContact` when an
    /// active request for the pair already exists.
    async fn create(
        &self,
        request: &SignupRequest,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<SignupRequest>, StoreError>;

    async fn update(&self, request: &SignupRequest) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Find the request currently blocking the pair, if any. Requests whose
    /// windows have lapsed are not considered active.
    async fn find_active_by_contact(
        &self,
        email: &str,
        phone: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<SignupRequest>, StoreError>;
}

/// Directory of completed RM records with uniqueness guarantees on
/// `rm_code`, `email` and `phone`.
#[async_trait]
pub trait RmDirectory: Send + Sync {
    /// Insert a new RM record; the row and its uniqueness entries land
    /// atomically or not at all.
    async fn insert(&self, rm: &RelationshipManager) -> Result<(), StoreError>;

    async fn find_by_contact(
        &self,
        email: &str,
        phone: &str,
    ) -> Result<Option<RelationshipManager>, StoreError>;

    async fn find_by_signup_request(
        &self,
        signup_request_id: Uuid,
    ) -> Result<Option<RelationshipManager>, StoreError>;

    async fn find_by_code(&self, rm_code: &str) -> Result<Option<RelationshipManager>, StoreError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory signup request store. The `create_guard` serializes creates so
/// the active-pair scan and the insert are one atomic step, matching the
/// partial unique index the Postgres backend relies on.
#[derive(Default)]
pub struct InMemorySignupStore {
    requests: DashMap<Uuid, SignupRequest>,
    create_guard: tokio::sync::Mutex<()>,
}

impl InMemorySignupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignupRequestStore for InMemorySignupStore {
    async fn create(
        &self,
        request: &SignupRequest,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let _guard = self.create_guard.lock().await;

        for mut entry in self.requests.iter_mut() {
            if entry.email == request.email && entry.phone == request.phone {
                if entry.is_active(now, ttl) {
                    return Err(StoreError::DuplicateContact);
                }
                // Lapsed rows stop blocking the pair once observed.
                if entry.has_lapsed(now, ttl) {
                    entry.status = SignupStatus::Expired;
                }
            }
        }

        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SignupRequest>, StoreError> {
        Ok(self.requests.get(&id).map(|r| r.clone()))
    }

    async fn update(&self, request: &SignupRequest) -> Result<(), StoreError> {
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.requests.remove(&id);
        Ok(())
    }

    async fn find_active_by_contact(
        &self,
        email: &str,
        phone: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<SignupRequest>, StoreError> {
        Ok(self
            .requests
            .iter()
            .find(|r| r.email == email && r.phone == phone && r.is_active(now, ttl))
            .map(|r| r.clone()))
    }
}

/// In-memory RM directory with the same uniqueness semantics as the
/// database-backed one.
#[derive(Default)]
pub struct InMemoryRmDirectory {
    rms: DashMap<Uuid, RelationshipManager>,
    insert_guard: tokio::sync::Mutex<()>,
}

impl InMemoryRmDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RmDirectory for InMemoryRmDirectory {
    async fn insert(&self, rm: &RelationshipManager) -> Result<(), StoreError> {
        let _guard = self.insert_guard.lock().await;

        for existing in self.rms.iter() {
            if existing.rm_code == rm.rm_code {
                return Err(StoreError::DuplicateValue("rm_code".to_string()));
            }
            if existing.email == rm.email {
                return Err(StoreError::DuplicateValue("email".to_string()));
            }
            if existing.phone == rm.phone {
                return Err(StoreError::DuplicateValue("phone".to_string()));
            }
        }

        self.rms.insert(rm.id, rm.clone());
        Ok(())
    }

    async fn find_by_contact(
        &self,
        email: &str,
        phone: &str,
    ) -> Result<Option<RelationshipManager>, StoreError> {
        Ok(self
            .rms
            .iter()
            .find(|rm| rm.email == email || rm.phone == phone)
            .map(|rm| rm.clone()))
    }

    async fn find_by_signup_request(
        &self,
        signup_request_id: Uuid,
    ) -> Result<Option<RelationshipManager>, StoreError> {
        Ok(self
            .rms
            .iter()
            .find(|rm| rm.signup_request_id == signup_request_id)
            .map(|rm| rm.clone()))
    }

    async fn find_by_code(&self, rm_code: &str) -> Result<Option<RelationshipManager>, StoreError> {
        Ok(self
            .rms
            .iter()
            .find(|rm| rm.rm_code == rm_code)
            .map(|rm| rm.clone()))
    }
}
