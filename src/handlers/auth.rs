use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use regex::Regex;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::AuthError;
use crate::handlers::Handlers;
use crate::token::IssuedTokens;
use crate::VALID_USERNAME_PATTERN;

fn is_strong_password(password: &str) -> bool {
    if password.len() < 8 {
        return false;
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit_or_symbol = password.chars().any(|c| !c.is_alphabetic());
    has_letter && has_digit_or_symbol
}

fn tokens_to_json(tokens: IssuedTokens, user_id: Uuid) -> Value {
    json!({
        "user_id": user_id,
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
    })
}

impl Handlers {
    pub async fn signup(
        &self,
        username: &str,
        password: &str,
        name: &str,
    ) -> Result<Value, AuthError> {
        let re = Regex::new(VALID_USERNAME_PATTERN).expect("pattern is a valid regex literal");
        if !re.is_match(username) {
            return Err(AuthError::InvalidUsername);
        }
        if !is_strong_password(password) {
            return Err(AuthError::WeakPassword);
        }
        if self.repository.find_user_by_username(username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|_| AuthError::WeakPassword)?
            .to_string();

        let user = self.repository.create_user(username, name, &password_hash).await?;
        let tokens = self.tokens.issue(user.id).await?;
        Ok(tokens_to_json(tokens, user.id))
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Value, AuthError> {
        let user = self
            .repository
            .find_user_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed_hash =
            PasswordHash::new(&user.password_hash).map_err(|_| AuthError::InvalidCredentials)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let tokens = self.tokens.issue(user.id).await?;
        Ok(tokens_to_json(tokens, user.id))
    }

    pub async fn refresh_token(&self, refresh_jwt: &str) -> Result<Value, AuthError> {
        let tokens = self.tokens.rotate(refresh_jwt).await?;
        let user = self
            .repository
            .find_user_by_id(tokens.user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        Ok(json!({
            "user_id": user.id,
            "username": user.username,
            "name": user.name,
            "access_token": tokens.access_token,
        }))
    }

    pub async fn logout(&self, user_id: Uuid) -> Result<Value, AuthError> {
        self.tokens.revoke_all(user_id).await?;
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_passwords_are_rejected() {
        assert!(!is_strong_password("short"));
        assert!(!is_strong_password("alllettersnodigits"));
        assert!(is_strong_password("Abcdef!1"));
    }
}
