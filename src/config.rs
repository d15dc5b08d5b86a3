//! Environment-driven configuration for the signaling server.
//!
//! Mirrors the `Config::from_env` convention used across the rest of this
//! project: every field is read once at startup, required fields fail fast
//! with a descriptive message, and optional fields fall back to sane
//! defaults instead of silently defaulting security-relevant settings.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub jwt_rsa_private_key_path: String,
    pub jwt_rsa_public_key_path: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub handshake_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub ring_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL env var must be defined".to_string())?;

        let jwt_rsa_private_key_path = std::env::var("JWT_RSA_PRIVATE_KEY_PATH")
            .map_err(|_| "JWT_RSA_PRIVATE_KEY_PATH env var must be defined".to_string())?;

        let jwt_rsa_public_key_path = std::env::var("JWT_RSA_PUBLIC_KEY_PATH")
            .map_err(|_| "JWT_RSA_PUBLIC_KEY_PATH env var must be defined".to_string())?;

        let access_ttl = Duration::from_secs(parse_env_u64("ACCESS_TTL_SECS", 900)?);
        let refresh_ttl = Duration::from_secs(parse_env_u64("REFRESH_TTL_SECS", 7 * 24 * 3600)?);
        let handshake_timeout = Duration::from_secs(parse_env_u64("HANDSHAKE_TIMEOUT_SECS", 5)?);
        let heartbeat_interval = Duration::from_secs(parse_env_u64("HEARTBEAT_INTERVAL_SECS", 10)?);
        let heartbeat_timeout = Duration::from_secs(parse_env_u64("HEARTBEAT_TIMEOUT_SECS", 15)?);
        let ring_timeout = Duration::from_secs(parse_env_u64("RING_TIMEOUT_SECS", 30)?);

        Ok(Config {
            bind_addr,
            database_url,
            jwt_rsa_private_key_path,
            jwt_rsa_public_key_path,
            access_ttl,
            refresh_ttl,
            handshake_timeout,
            heartbeat_interval,
            heartbeat_timeout,
            ring_timeout,
        })
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("{name} must be a positive integer, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_u64_defaults_when_unset() {
        std::env::remove_var("SOME_UNSET_DURATION");
        assert_eq!(parse_env_u64("SOME_UNSET_DURATION", 42).unwrap(), 42);
    }

    #[test]
    fn parse_env_u64_rejects_non_numeric() {
        std::env::set_var("CONFIG_TEST_BAD_VALUE", "not-a-number");
        assert!(parse_env_u64("CONFIG_TEST_BAD_VALUE", 1).is_err());
        std::env::remove_var("CONFIG_TEST_BAD_VALUE");
    }
}
