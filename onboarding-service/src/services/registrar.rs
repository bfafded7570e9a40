//! RM registrar: turns a fully verified signup request into a durable RM
//! record, exactly once.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;

use crate::models::{RelationshipManager, RmStatus, SignupRequest};
use crate::services::error::SignupError;
use crate::services::store::{RmDirectory, StoreError};

const RM_CODE_SUFFIX_LEN: usize = 8;
const RM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const RM_CODE_MAX_RETRIES: usize = 5;

/// Generate a referral-style RM code, e.g. `RM-7KQ2M4XP`.
fn generate_rm_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..RM_CODE_SUFFIX_LEN)
        .map(|_| RM_CODE_ALPHABET[rng.gen_range(0..RM_CODE_ALPHABET.len())] as char)
        .collect();
    format!("RM-{}", suffix)
}

#[derive(Clone)]
pub struct RmRegistrar {
    directory: Arc<dyn RmDirectory>,
}

impl RmRegistrar {
    pub fn new(directory: Arc<dyn RmDirectory>) -> Self {
        Self { directory }
    }

    /// Create the RM record for a verified signup request.
    ///
    /// Idempotent: if a record for this request already exists (a previous
    /// attempt committed before the caller saw the result), it is returned
    /// unchanged. Code collisions are retried with fresh codes.
    pub async fn create(&self, request: &SignupRequest) -> Result<RelationshipManager, SignupError> {
        if let Some(existing) = self
            .directory
            .find_by_signup_request(request.id)
            .await
            .map_err(store_internal)?
        {
            return Ok(existing);
        }

        for _ in 0..RM_CODE_MAX_RETRIES {
            let rm = RelationshipManager {
                id: uuid::Uuid::new_v4(),
                rm_code: generate_rm_code(),
                name: request.name.clone(),
                email: request.email.clone(),
                phone: request.phone.clone(),
                document_refs: request.document_refs.clone(),
                status: RmStatus::Active,
                signup_request_id: request.id,
                created_at: Utc::now(),
            };

            match self.directory.insert(&rm).await {
                Ok(()) => {
                    tracing::info!(rm_id = %rm.id, rm_code = %rm.rm_code, "RM record created");
                    return Ok(rm);
                }
                Err(StoreError::DuplicateValue(field)) if field == "rm_code" => {
                    tracing::warn!("RM code collision, regenerating");
                    continue;
                }
                // Email/phone raced with another completed signup.
                Err(StoreError::DuplicateValue(_)) | Err(StoreError::DuplicateContact) => {
                    return Err(SignupError::DuplicateContact);
                }
                Err(e) => return Err(store_internal(e)),
            }
        }

        Err(SignupError::Internal(anyhow::anyhow!(
            "exhausted RM code generation retries"
        )))
    }

    /// Check whether a contact pair is already bound to an RM record.
    pub async fn find_by_contact(
        &self,
        email: &str,
        phone: &str,
    ) -> Result<Option<RelationshipManager>, SignupError> {
        self.directory
            .find_by_contact(email, phone)
            .await
            .map_err(store_internal)
    }

    /// The RM record minted for a signup request, if one exists.
    pub async fn find_by_signup_request(
        &self,
        signup_request_id: uuid::Uuid,
    ) -> Result<Option<RelationshipManager>, SignupError> {
        self.directory
            .find_by_signup_request(signup_request_id)
            .await
            .map_err(store_internal)
    }

    /// Look up an RM by its referral code, for partner signup validation.
    pub async fn find_by_code(
        &self,
        rm_code: &str,
    ) -> Result<Option<RelationshipManager>, SignupError> {
        self.directory
            .find_by_code(rm_code)
            .await
            .map_err(store_internal)
    }
}

fn store_internal(err: StoreError) -> SignupError {
    SignupError::Internal(anyhow::anyhow!("RM directory failure: {}", err))
}
