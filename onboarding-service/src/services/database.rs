//! PostgreSQL-backed stores for signup requests and the RM directory.
//!
//! Channel state is stored flat (one column set per channel) and document
//! references as JSONB. Contact-pair exclusivity relies on a partial unique
//! index over non-terminal rows; lapsed rows are flipped to `EXPIRED` inside
//! the create transaction so the index never blocks a fresh attempt.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{
    ChannelState, RelationshipManager, RmStatus, SignupRequest, SignupStatus,
};
use crate::services::store::{RmDirectory, SignupRequestStore, StoreError};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(sqlx::FromRow)]
struct SignupRequestRow {
    id: Uuid,
    name: String,
    email: String,
    phone: String,
    password_hash: String,
    document_refs: Json<BTreeMap<String, String>>,
    status: String,
    mobile_otp_hash: String,
    mobile_otp_expires_at: DateTime<Utc>,
    mobile_last_sent_at: DateTime<Utc>,
    mobile_attempts: i32,
    mobile_verified: bool,
    email_otp_hash: String,
    email_otp_expires_at: DateTime<Utc>,
    email_last_sent_at: DateTime<Utc>,
    email_attempts: i32,
    email_verified: bool,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<SignupRequestRow> for SignupRequest {
    type Error = StoreError;

    fn try_from(row: SignupRequestRow) -> Result<Self, StoreError> {
        let status = SignupStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!("unknown signup status: {}", row.status))
        })?;
        Ok(SignupRequest {
            id: row.id,
            name: row.name,
            email: row.email,
            phone: row.phone,
            password_hash: row.password_hash,
            document_refs: row.document_refs.0,
            status,
            mobile: ChannelState {
                otp_hash: row.mobile_otp_hash,
                otp_expires_at: row.mobile_otp_expires_at,
                last_sent_at: row.mobile_last_sent_at,
                attempts: row.mobile_attempts,
                verified: row.mobile_verified,
            },
            email_channel: ChannelState {
                otp_hash: row.email_otp_hash,
                otp_expires_at: row.email_otp_expires_at,
                last_sent_at: row.email_last_sent_at,
                attempts: row.email_attempts,
                verified: row.email_verified,
            },
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RmRow {
    id: Uuid,
    rm_code: String,
    name: String,
    email: String,
    phone: String,
    document_refs: Json<BTreeMap<String, String>>,
    status: String,
    signup_request_id: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<RmRow> for RelationshipManager {
    type Error = StoreError;

    fn try_from(row: RmRow) -> Result<Self, StoreError> {
        let status = RmStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Backend(anyhow::anyhow!("unknown RM status: {}", row.status))
        })?;
        Ok(RelationshipManager {
            id: row.id,
            rm_code: row.rm_code,
            name: row.name,
            email: row.email,
            phone: row.phone,
            document_refs: row.document_refs.0,
            status,
            signup_request_id: row.signup_request_id,
            created_at: row.created_at,
        })
    }
}

/// SQL predicate fragment matching rows that have lapsed per the wall-clock
/// rules. `$N` and `$N+1` bind `now` and the earliest non-TTL-expired
/// `created_at`.
fn lapsed_predicate(now_param: usize) -> String {
    format!(
        "(((NOT mobile_verified) AND (NOT email_verified) \
          AND mobile_otp_expires_at < ${now} AND email_otp_expires_at < ${now}) \
         OR created_at < ${min_created})",
        now = now_param,
        min_created = now_param + 1
    )
}

#[derive(Clone)]
pub struct PgSignupStore {
    pool: PgPool,
}

impl PgSignupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignupRequestStore for PgSignupStore {
    async fn create(
        &self,
        request: &SignupRequest,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let min_created = now - ttl;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;

        // Flip lapsed rows for this pair out of the partial index's scope.
        sqlx::query(&format!(
            "UPDATE signup_requests SET status = 'EXPIRED' \
             WHERE email = $3 AND phone = $4 \
             AND status NOT IN ('COMPLETED', 'EXPIRED', 'FAILED') \
             AND {}",
            lapsed_predicate(1)
        ))
        .bind(now)
        .bind(min_created)
        .bind(&request.email)
        .bind(&request.phone)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;

        let insert = sqlx::query(
            r#"
            INSERT INTO signup_requests (
                id, name, email, phone, password_hash, document_refs, status,
                mobile_otp_hash, mobile_otp_expires_at, mobile_last_sent_at,
                mobile_attempts, mobile_verified,
                email_otp_hash, email_otp_expires_at, email_last_sent_at,
                email_attempts, email_verified,
                created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(request.id)
        .bind(&request.name)
        .bind(&request.email)
        .bind(&request.phone)
        .bind(&request.password_hash)
        .bind(Json(&request.document_refs))
        .bind(request.status.as_str())
        .bind(&request.mobile.otp_hash)
        .bind(request.mobile.otp_expires_at)
        .bind(request.mobile.last_sent_at)
        .bind(request.mobile.attempts)
        .bind(request.mobile.verified)
        .bind(&request.email_channel.otp_hash)
        .bind(request.email_channel.otp_expires_at)
        .bind(request.email_channel.last_sent_at)
        .bind(request.email_channel.attempts)
        .bind(request.email_channel.verified)
        .bind(request.created_at)
        .bind(request.completed_at)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::DuplicateContact),
            Err(e) => return Err(StoreError::Backend(anyhow::anyhow!(e))),
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SignupRequest>, StoreError> {
        let row = sqlx::query_as::<_, SignupRequestRow>(
            "SELECT * FROM signup_requests WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;

        row.map(SignupRequest::try_from).transpose()
    }

    async fn update(&self, request: &SignupRequest) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE signup_requests SET
                status = $2,
                mobile_otp_hash = $3, mobile_otp_expires_at = $4,
                mobile_last_sent_at = $5, mobile_attempts = $6, mobile_verified = $7,
                email_otp_hash = $8, email_otp_expires_at = $9,
                email_last_sent_at = $10, email_attempts = $11, email_verified = $12,
                completed_at = $13
            WHERE id = $1
            "#,
        )
        .bind(request.id)
        .bind(request.status.as_str())
        .bind(&request.mobile.otp_hash)
        .bind(request.mobile.otp_expires_at)
        .bind(request.mobile.last_sent_at)
        .bind(request.mobile.attempts)
        .bind(request.mobile.verified)
        .bind(&request.email_channel.otp_hash)
        .bind(request.email_channel.otp_expires_at)
        .bind(request.email_channel.last_sent_at)
        .bind(request.email_channel.attempts)
        .bind(request.email_channel.verified)
        .bind(request.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM signup_requests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn find_active_by_contact(
        &self,
        email: &str,
        phone: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Option<SignupRequest>, StoreError> {
        let min_created = now - ttl;
        let row = sqlx::query_as::<_, SignupRequestRow>(&format!(
            "SELECT * FROM signup_requests \
             WHERE email = $3 AND phone = $4 \
             AND status NOT IN ('COMPLETED', 'EXPIRED', 'FAILED') \
             AND NOT {}",
            lapsed_predicate(1)
        ))
        .bind(now)
        .bind(min_created)
        .bind(email)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;

        row.map(SignupRequest::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PgRmDirectory {
    pool: PgPool,
}

impl PgRmDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RmDirectory for PgRmDirectory {
    async fn insert(&self, rm: &RelationshipManager) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO rms (id, rm_code, name, email, phone, document_refs, status, signup_request_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(rm.id)
        .bind(&rm.rm_code)
        .bind(&rm.name)
        .bind(&rm.email)
        .bind(&rm.phone)
        .bind(Json(&rm.document_refs))
        .bind(rm.status.as_str())
        .bind(rm.signup_request_id)
        .bind(rm.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::DuplicateValue(violated_field(&e)))
            }
            Err(e) => Err(StoreError::Backend(anyhow::anyhow!(e))),
        }
    }

    async fn find_by_contact(
        &self,
        email: &str,
        phone: &str,
    ) -> Result<Option<RelationshipManager>, StoreError> {
        let row = sqlx::query_as::<_, RmRow>(
            "SELECT * FROM rms WHERE email = $1 OR phone = $2",
        )
        .bind(email)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;

        row.map(RelationshipManager::try_from).transpose()
    }

    async fn find_by_signup_request(
        &self,
        signup_request_id: Uuid,
    ) -> Result<Option<RelationshipManager>, StoreError> {
        let row = sqlx::query_as::<_, RmRow>(
            "SELECT * FROM rms WHERE signup_request_id = $1",
        )
        .bind(signup_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;

        row.map(RelationshipManager::try_from).transpose()
    }

    async fn find_by_code(&self, rm_code: &str) -> Result<Option<RelationshipManager>, StoreError> {
        let row = sqlx::query_as::<_, RmRow>("SELECT * FROM rms WHERE rm_code = $1")
            .bind(rm_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(anyhow::anyhow!(e)))?;

        row.map(RelationshipManager::try_from).transpose()
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

/// Map a unique constraint name to the logical field it protects.
fn violated_field(err: &sqlx::Error) -> String {
    let constraint = match err {
        sqlx::Error::Database(db) => db.constraint().unwrap_or_default().to_string(),
        _ => String::new(),
    };
    for field in ["rm_code", "email", "phone"] {
        if constraint.contains(field) {
            return field.to_string();
        }
    }
    constraint
}
