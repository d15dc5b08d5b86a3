//! Domain entities persisted by [`crate::repository`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPreference {
    Lip,
    Audio,
}

impl Default for ModelPreference {
    fn default() -> Self {
        ModelPreference::Audio
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub model_preference: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn preference(&self) -> ModelPreference {
        match self.model_preference.as_str() {
            "lip" => ModelPreference::Lip,
            _ => ModelPreference::Audio,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactSummary {
    pub user_id: Uuid,
    pub username: String,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub jti: Uuid,
    pub user_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub speaker_id: Uuid,
    pub text: String,
    pub source: ModelPreference,
    pub spoken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub caller_id: Uuid,
    pub callee_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
    /// Relative to the user the history was fetched for, derived from
    /// `caller_id`/`end_reason` rather than stored, since it depends on
    /// which side of the call is asking.
    pub call_type: CallType,
    pub transcript: Vec<TranscriptLine>,
}
