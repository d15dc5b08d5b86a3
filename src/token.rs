//! Access/refresh token issuance and verification.
//!
//! Access tokens are short-lived and carry no server-side state. Refresh
//! tokens are long-lived and tracked by `jti` in [`crate::repository`] so
//! a single presented token can be redeemed at most once: `rotate`
//! revokes the old `jti` and records the new one inside a single
//! transaction (see [`crate::repository::Repository::rotate_refresh_token`]).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::TokenError;
use crate::repository::Repository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
}

pub struct IssuedTokens {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    repository: Arc<dyn Repository>,
}

impl TokenService {
    pub fn new(
        rsa_private_key_pem: &[u8],
        rsa_public_key_pem: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
        repository: Arc<dyn Repository>,
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(TokenService {
            encoding_key: EncodingKey::from_rsa_pem(rsa_private_key_pem)?,
            decoding_key: DecodingKey::from_rsa_pem(rsa_public_key_pem)?,
            access_ttl,
            refresh_ttl,
            repository,
        })
    }

    fn encode(&self, claims: &Claims) -> String {
        encode(&Header::new(Algorithm::RS256), claims, &self.encoding_key)
            .expect("signing a well-formed claims struct never fails")
    }

    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::InvalidSignature,
            })
    }

    /// Issue a fresh access/refresh pair for `user_id` and record the new
    /// refresh `jti` as valid.
    pub async fn issue(&self, user_id: Uuid) -> Result<IssuedTokens, TokenError> {
        let now = Utc::now();
        let access = Claims {
            sub: user_id,
            token_type: TokenType::Access,
            iat: now.timestamp(),
            exp: (now + chrono::Duration::from_std(self.access_ttl).unwrap()).timestamp(),
            jti: None,
        };
        let jti = Uuid::new_v4();
        let expires_at = now + chrono::Duration::from_std(self.refresh_ttl).unwrap();
        let refresh = Claims {
            sub: user_id,
            token_type: TokenType::Refresh,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Some(jti),
        };

        self.repository
            .store_refresh_token(jti, user_id, now, expires_at)
            .await
            .map_err(|_| TokenError::InvalidSignature)?;

        Ok(IssuedTokens {
            user_id,
            access_token: self.encode(&access),
            refresh_token: self.encode(&refresh),
        })
    }

    pub fn verify_access(&self, token: &str, expected_user_id: Uuid) -> Result<(), TokenError> {
        let claims = self.decode(token)?;
        if claims.token_type != TokenType::Access {
            return Err(TokenError::WrongType);
        }
        if claims.sub != expected_user_id {
            return Err(TokenError::UserMismatch);
        }
        Ok(())
    }

    /// Redeem a refresh token for a new access token, rotating the
    /// refresh `jti` atomically so the presented token cannot be reused.
    pub async fn rotate(&self, refresh_token: &str) -> Result<IssuedTokens, TokenError> {
        let claims = self.decode(refresh_token)?;
        if claims.token_type != TokenType::Refresh {
            return Err(TokenError::WrongType);
        }
        let old_jti = claims.jti.ok_or(TokenError::InvalidSignature)?;

        match self.repository.refresh_token_owner(old_jti).await {
            Ok(Some(owner)) if owner == claims.sub => {}
            Ok(Some(_)) => return Err(TokenError::UserMismatch),
            Ok(None) => return Err(TokenError::Revoked),
            Err(_) => return Err(TokenError::InvalidSignature),
        }

        let now = Utc::now();
        let new_jti = Uuid::new_v4();
        let expires_at = now + chrono::Duration::from_std(self.refresh_ttl).unwrap();

        self.repository
            .rotate_refresh_token(old_jti, new_jti, claims.sub, now, expires_at)
            .await
            .map_err(|_| TokenError::Revoked)?;

        let access = Claims {
            sub: claims.sub,
            token_type: TokenType::Access,
            iat: now.timestamp(),
            exp: (now + chrono::Duration::from_std(self.access_ttl).unwrap()).timestamp(),
            jti: None,
        };
        let refresh = Claims {
            sub: claims.sub,
            token_type: TokenType::Refresh,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Some(new_jti),
        };

        Ok(IssuedTokens {
            user_id: claims.sub,
            access_token: self.encode(&access),
            refresh_token: self.encode(&refresh),
        })
    }

    pub async fn revoke_all(&self, user_id: Uuid) -> Result<(), TokenError> {
        self.repository
            .revoke_all_refresh_tokens(user_id)
            .await
            .map_err(|_| TokenError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CallRecord, ContactSummary, TranscriptLine, User};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::HashMap;
    use std::sync::Mutex;

    // Minimal in-memory double, just enough to exercise TokenService
    // without a Postgres instance.
    #[derive(Default)]
    struct FakeRepository {
        tokens: Mutex<HashMap<Uuid, (Uuid, bool)>>,
    }

    #[async_trait]
    impl Repository for FakeRepository {
        async fn create_user(&self, _: &str, _: &str, _: &str) -> Result<User, crate::errors::RepositoryError> {
            unimplemented!()
        }
        async fn find_user_by_username(&self, _: &str) -> Result<Option<User>, crate::errors::RepositoryError> {
            unimplemented!()
        }
        async fn find_user_by_id(&self, _: Uuid) -> Result<Option<User>, crate::errors::RepositoryError> {
            unimplemented!()
        }
        async fn set_model_preference(&self, _: Uuid, _: &str) -> Result<(), crate::errors::RepositoryError> {
            unimplemented!()
        }
        async fn add_contact(&self, _: Uuid, _: Uuid) -> Result<(), crate::errors::RepositoryError> {
            unimplemented!()
        }
        async fn list_contacts(&self, _: Uuid) -> Result<Vec<ContactSummary>, crate::errors::RepositoryError> {
            unimplemented!()
        }
        async fn contact_exists(&self, _: Uuid, _: Uuid) -> Result<bool, crate::errors::RepositoryError> {
            unimplemented!()
        }
        async fn store_refresh_token(
            &self,
            jti: Uuid,
            user_id: Uuid,
            _issued_at: DateTime<Utc>,
            _expires_at: DateTime<Utc>,
        ) -> Result<(), crate::errors::RepositoryError> {
            self.tokens.lock().unwrap().insert(jti, (user_id, false));
            Ok(())
        }
        async fn refresh_token_owner(&self, jti: Uuid) -> Result<Option<Uuid>, crate::errors::RepositoryError> {
            Ok(self
                .tokens
                .lock()
                .unwrap()
                .get(&jti)
                .filter(|(_, revoked)| !revoked)
                .map(|(owner, _)| *owner))
        }
        async fn rotate_refresh_token(
            &self,
            old_jti: Uuid,
            new_jti: Uuid,
            user_id: Uuid,
            _issued_at: DateTime<Utc>,
            _expires_at: DateTime<Utc>,
        ) -> Result<(), crate::errors::RepositoryError> {
            let mut tokens = self.tokens.lock().unwrap();
            match tokens.get_mut(&old_jti) {
                Some(entry) if !entry.1 => entry.1 = true,
                _ => return Err(crate::errors::RepositoryError::NotFound),
            }
            tokens.insert(new_jti, (user_id, false));
            Ok(())
        }
        async fn revoke_all_refresh_tokens(&self, user_id: Uuid) -> Result<(), crate::errors::RepositoryError> {
            for entry in self.tokens.lock().unwrap().values_mut() {
                if entry.0 == user_id {
                    entry.1 = true;
                }
            }
            Ok(())
        }
        async fn create_call(&self, _: Uuid, _: Uuid, _: Uuid, _: DateTime<Utc>) -> Result<(), crate::errors::RepositoryError> {
            unimplemented!()
        }
        async fn end_call(&self, _: Uuid, _: DateTime<Utc>, _: &str, _: &[TranscriptLine]) -> Result<(), crate::errors::RepositoryError> {
            unimplemented!()
        }
        async fn fetch_call_history(&self, _: Uuid, _: u32) -> Result<Vec<CallRecord>, crate::errors::RepositoryError> {
            unimplemented!()
        }
    }

    // 1024-bit RSA keypair, test-only.
    const TEST_PRIVATE_KEY: &str = include_str!("../tests/fixtures/test_rsa_private.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("../tests/fixtures/test_rsa_public.pem");

    fn service() -> TokenService {
        TokenService::new(
            TEST_PRIVATE_KEY.as_bytes(),
            TEST_PUBLIC_KEY.as_bytes(),
            Duration::from_secs(900),
            Duration::from_secs(3600),
            Arc::new(FakeRepository::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn verify_access_accepts_matching_user() {
        let service = service();
        let user_id = Uuid::new_v4();
        let tokens = service.issue(user_id).await.unwrap();
        assert!(service.verify_access(&tokens.access_token, user_id).is_ok());
    }

    #[tokio::test]
    async fn verify_access_rejects_mismatched_user() {
        let service = service();
        let tokens = service.issue(Uuid::new_v4()).await.unwrap();
        assert_eq!(
            service.verify_access(&tokens.access_token, Uuid::new_v4()),
            Err(TokenError::UserMismatch)
        );
    }

    #[tokio::test]
    async fn rotate_revokes_the_old_refresh_token() {
        let service = service();
        let user_id = Uuid::new_v4();
        let first = service.issue(user_id).await.unwrap();

        let second = service.rotate(&first.refresh_token).await.unwrap();
        assert!(service.verify_access(&second.access_token, user_id).is_ok());

        let replay = service.rotate(&first.refresh_token).await;
        assert_eq!(replay.err(), Some(TokenError::Revoked));
    }
}
