//! Relationship Manager record, created once onboarding completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RmStatus {
    Active,
    Inactive,
}

impl RmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RmStatus::Active => "active",
            RmStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RmStatus::Active),
            "inactive" => Some(RmStatus::Inactive),
            _ => None,
        }
    }
}

/// Durable RM record. Immutable at creation; `status` is managed by the
/// wider admin console, not by this workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipManager {
    pub id: Uuid,
    pub rm_code: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub document_refs: BTreeMap<String, String>,
    pub status: RmStatus,
    pub signup_request_id: Uuid,
    pub created_at: DateTime<Utc>,
}
