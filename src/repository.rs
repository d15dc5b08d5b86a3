//! Persistence boundary. [`Repository`] is the trait every handler and
//! service programs against; [`PgRepository`] is the concrete `sqlx`
//! backed implementation, grounded in the pool-construction and
//! `FromRow`-based query style used for meeting records in the rest of
//! this project.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::RepositoryError;
use crate::models::{CallRecord, ContactSummary, TranscriptLine, User};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_user(
        &self,
        username: &str,
        name: &str,
        password_hash: &str,
    ) -> Result<User, RepositoryError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, RepositoryError>;

    async fn set_model_preference(
        &self,
        user_id: Uuid,
        preference: &str,
    ) -> Result<(), RepositoryError>;

    async fn add_contact(&self, owner_id: Uuid, contact_id: Uuid) -> Result<(), RepositoryError>;

    async fn list_contacts(&self, owner_id: Uuid) -> Result<Vec<ContactSummary>, RepositoryError>;

    async fn contact_exists(&self, owner_id: Uuid, contact_id: Uuid) -> Result<bool, RepositoryError>;

    /// Record a freshly issued refresh token as valid.
    async fn store_refresh_token(
        &self,
        jti: Uuid,
        user_id: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Returns `Ok(Some(user_id))` if the jti is valid (exists and not
    /// revoked), regardless of expiry (expiry is checked by the caller
    /// against the token's own claims).
    async fn refresh_token_owner(&self, jti: Uuid) -> Result<Option<Uuid>, RepositoryError>;

    /// Atomically mark `old_jti` revoked and record `new_jti` as valid.
    /// Used by token rotation so a presented refresh token can never be
    /// used twice even under concurrent requests.
    async fn rotate_refresh_token(
        &self,
        old_jti: Uuid,
        new_jti: Uuid,
        user_id: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<(), RepositoryError>;

    async fn create_call(
        &self,
        call_id: Uuid,
        caller_id: Uuid,
        callee_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn end_call(
        &self,
        call_id: Uuid,
        ended_at: DateTime<Utc>,
        end_reason: &str,
        transcript: &[TranscriptLine],
    ) -> Result<(), RepositoryError>;

    async fn fetch_call_history(
        &self,
        user_id: Uuid,
        limit: u32,
    ) -> Result<Vec<CallRecord>, RepositoryError>;
}

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(PgRepository { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PgRepository { pool }
    }

    /// Bootstrap the schema for local/dev use. Production deployments are
    /// expected to run migrations out of band.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                model_preference TEXT NOT NULL DEFAULT 'audio',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE TABLE IF NOT EXISTS contacts (
                owner_id UUID NOT NULL,
                contact_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (owner_id, contact_id)
            );
            CREATE TABLE IF NOT EXISTS refresh_tokens (
                jti UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                issued_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT false
            );
            CREATE TABLE IF NOT EXISTS calls (
                id UUID PRIMARY KEY,
                caller_id UUID NOT NULL,
                callee_id UUID NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                ended_at TIMESTAMPTZ,
                end_reason TEXT
            );
            CREATE TABLE IF NOT EXISTS transcript_lines (
                call_id UUID NOT NULL,
                speaker_id UUID NOT NULL,
                text TEXT NOT NULL,
                source TEXT NOT NULL,
                spoken_at TIMESTAMPTZ NOT NULL,
                seq BIGSERIAL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn create_user(
        &self,
        username: &str,
        name: &str,
        password_hash: &str,
    ) -> Result<User, RepositoryError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO users (id, username, name, password_hash) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(username)
        .bind(name)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        self.find_user_by_id(id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn set_model_preference(
        &self,
        user_id: Uuid,
        preference: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE users SET model_preference = $1 WHERE id = $2")
            .bind(preference)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_contact(&self, owner_id: Uuid, contact_id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO contacts (owner_id, contact_id) VALUES ($1, $2) \
             ON CONFLICT (owner_id, contact_id) DO NOTHING",
        )
        .bind(owner_id)
        .bind(contact_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_contacts(&self, owner_id: Uuid) -> Result<Vec<ContactSummary>, RepositoryError> {
        let rows: Vec<(Uuid, String, String)> = sqlx::query_as(
            "SELECT u.id, u.username, u.name FROM contacts c \
             JOIN users u ON u.id = c.contact_id WHERE c.owner_id = $1 ORDER BY u.username",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, username, name)| ContactSummary {
                user_id,
                username,
                name,
            })
            .collect())
    }

    async fn contact_exists(&self, owner_id: Uuid, contact_id: Uuid) -> Result<bool, RepositoryError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM contacts WHERE owner_id = $1 AND contact_id = $2",
        )
        .bind(owner_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn store_refresh_token(
        &self,
        jti: Uuid,
        user_id: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (jti, user_id, issued_at, expires_at, revoked) \
             VALUES ($1, $2, $3, $4, false)",
        )
        .bind(jti)
        .bind(user_id)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn refresh_token_owner(&self, jti: Uuid) -> Result<Option<Uuid>, RepositoryError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM refresh_tokens WHERE jti = $1 AND revoked = false",
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id,)| user_id))
    }

    async fn rotate_refresh_token(
        &self,
        old_jti: Uuid,
        new_jti: Uuid,
        user_id: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE refresh_tokens SET revoked = true WHERE jti = $1 AND revoked = false",
        )
        .bind(old_jti)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (jti, user_id, issued_at, expires_at, revoked) \
             VALUES ($1, $2, $3, $4, false)",
        )
        .bind(new_jti)
        .bind(user_id)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE refresh_tokens SET revoked = true WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_call(
        &self,
        call_id: Uuid,
        caller_id: Uuid,
        callee_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO calls (id, caller_id, callee_id, started_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(call_id)
        .bind(caller_id)
        .bind(callee_id)
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn end_call(
        &self,
        call_id: Uuid,
        ended_at: DateTime<Utc>,
        end_reason: &str,
        transcript: &[TranscriptLine],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE calls SET ended_at = $1, end_reason = $2 WHERE id = $3")
            .bind(ended_at)
            .bind(end_reason)
            .bind(call_id)
            .execute(&mut *tx)
            .await?;

        for line in transcript {
            sqlx::query(
                "INSERT INTO transcript_lines (call_id, speaker_id, text, source, spoken_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(call_id)
            .bind(line.speaker_id)
            .bind(&line.text)
            .bind(match line.source {
                crate::models::ModelPreference::Lip => "lip",
                crate::models::ModelPreference::Audio => "audio",
            })
            .bind(line.spoken_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_call_history(
        &self,
        user_id: Uuid,
        limit: u32,
    ) -> Result<Vec<CallRecord>, RepositoryError> {
        let rows: Vec<(Uuid, Uuid, Uuid, DateTime<Utc>, Option<DateTime<Utc>>, Option<String>)> =
            sqlx::query_as(
                "SELECT id, caller_id, callee_id, started_at, ended_at, end_reason FROM calls \
                 WHERE caller_id = $1 OR callee_id = $1 ORDER BY started_at DESC LIMIT $2",
            )
            .bind(user_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, caller_id, callee_id, started_at, ended_at, end_reason) in rows {
            let transcript_rows: Vec<(Uuid, String, String, DateTime<Utc>)> = sqlx::query_as(
                "SELECT speaker_id, text, source, spoken_at FROM transcript_lines \
                 WHERE call_id = $1 ORDER BY seq ASC",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

            let transcript = transcript_rows
                .into_iter()
                .map(|(speaker_id, text, source, spoken_at)| TranscriptLine {
                    speaker_id,
                    text,
                    source: if source == "lip" {
                        crate::models::ModelPreference::Lip
                    } else {
                        crate::models::ModelPreference::Audio
                    },
                    spoken_at,
                })
                .collect();

            let call_type = if caller_id == user_id {
                crate::models::CallType::Outgoing
            } else if matches!(end_reason.as_deref(), Some("TIMEOUT") | Some("REJECTED")) {
                crate::models::CallType::Missed
            } else {
                crate::models::CallType::Incoming
            };

            records.push(CallRecord {
                id,
                caller_id,
                callee_id,
                started_at,
                ended_at,
                end_reason,
                call_type,
                transcript,
            });
        }
        Ok(records)
    }
}

/// A repository double that panics if touched, for actor tests that only
/// exercise in-memory state and never expect a persistence call.
#[cfg(test)]
pub struct NullRepository;

#[cfg(test)]
#[async_trait]
impl Repository for NullRepository {
    async fn create_user(&self, _: &str, _: &str, _: &str) -> Result<User, RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn find_user_by_username(&self, _: &str) -> Result<Option<User>, RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn find_user_by_id(&self, _: Uuid) -> Result<Option<User>, RepositoryError> {
        // Exercised by the captioning ingest task on every accepted call, even
        // in actor-level tests that never expect a persistence call for
        // anything else; answering "unknown" lets the default preference apply.
        Ok(None)
    }
    async fn set_model_preference(&self, _: Uuid, _: &str) -> Result<(), RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn add_contact(&self, _: Uuid, _: Uuid) -> Result<(), RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn list_contacts(&self, _: Uuid) -> Result<Vec<ContactSummary>, RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn contact_exists(&self, _: Uuid, _: Uuid) -> Result<bool, RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn store_refresh_token(
        &self,
        _: Uuid,
        _: Uuid,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn refresh_token_owner(&self, _: Uuid) -> Result<Option<Uuid>, RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn rotate_refresh_token(
        &self,
        _: Uuid,
        _: Uuid,
        _: Uuid,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn revoke_all_refresh_tokens(&self, _: Uuid) -> Result<(), RepositoryError> {
        unimplemented!("NullRepository")
    }
    async fn create_call(&self, _: Uuid, _: Uuid, _: Uuid, _: DateTime<Utc>) -> Result<(), RepositoryError> {
        // Every `End` runs `persist_end` on a spawned task regardless of
        // which actor test triggered it, so this has to succeed quietly.
        Ok(())
    }
    async fn end_call(
        &self,
        _: Uuid,
        _: DateTime<Utc>,
        _: &str,
        _: &[TranscriptLine],
    ) -> Result<(), RepositoryError> {
        Ok(())
    }
    async fn fetch_call_history(&self, _: Uuid, _: u32) -> Result<Vec<CallRecord>, RepositoryError> {
        unimplemented!("NullRepository")
    }
}
