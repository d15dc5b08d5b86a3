//! Error taxonomy shared by every subsystem.
//!
//! Each subsystem gets its own `thiserror` enum; [`WireError`] is the
//! common shape the router flattens any handler error into before it is
//! written to the wire, pairing a stable `error_code` with a human
//! `error_message` the way `meeting-api`'s `AppError` pairs a status code
//! with a body.

use thiserror::Error;

#[derive(Debug, Clone, serde::Serialize)]
pub struct WireError {
    pub error_code: &'static str,
    pub error_message: String,
}

impl WireError {
    pub fn new(error_code: &'static str, error_message: impl Into<String>) -> Self {
        WireError {
            error_code,
            error_message: error_message.into(),
        }
    }
}

pub trait IntoWireError {
    fn into_wire_error(self) -> WireError;
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("malformed handshake message")]
    MalformedHandshake,
    #[error("frame decryption failed")]
    DecryptFailed,
    #[error("received plaintext frame after handshake completed")]
    PlaintextAfterHandshake,
}

impl IntoWireError for CryptoError {
    fn into_wire_error(self) -> WireError {
        match self {
            CryptoError::HandshakeTimeout => WireError::new("HANDSHAKE_TIMEOUT", self.to_string()),
            CryptoError::MalformedHandshake => {
                WireError::new("MALFORMED_HANDSHAKE", self.to_string())
            }
            CryptoError::DecryptFailed => WireError::new("DECRYPT_FAILED", self.to_string()),
            CryptoError::PlaintextAfterHandshake => {
                WireError::new("PLAINTEXT_AFTER_HANDSHAKE", self.to_string())
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token has the wrong type for this operation")]
    WrongType,
    #[error("refresh token has been revoked")]
    Revoked,
    #[error("token subject does not match the expected user")]
    UserMismatch,
}

impl IntoWireError for TokenError {
    fn into_wire_error(self) -> WireError {
        let code = match self {
            TokenError::InvalidSignature => "INVALID_SIGNATURE",
            TokenError::Expired => "EXPIRED",
            TokenError::WrongType => "WRONG_TYPE",
            TokenError::Revoked => "REVOKED",
            TokenError::UserMismatch => "USER_MISMATCH",
        };
        WireError::new(code, self.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username is already taken")]
    UsernameTaken,
    #[error("password does not meet strength requirements")]
    WeakPassword,
    #[error("username has an invalid format")]
    InvalidUsername,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl IntoWireError for AuthError {
    fn into_wire_error(self) -> WireError {
        match self {
            AuthError::InvalidCredentials => {
                WireError::new("INVALID_CREDENTIALS", self.to_string())
            }
            AuthError::UsernameTaken => WireError::new("USERNAME_TAKEN", self.to_string()),
            AuthError::WeakPassword => WireError::new("WEAK_PASSWORD", self.to_string()),
            AuthError::InvalidUsername => WireError::new("INVALID_USERNAME", self.to_string()),
            AuthError::Token(e) => e.into_wire_error(),
            AuthError::Repository(e) => e.into_wire_error(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("target user is not connected")]
    TargetNotAvailable,
    #[error("target user is already in a call")]
    TargetBusy,
    #[error("an invite to this target is already pending")]
    AlreadyInviting,
    #[error("no call with that id exists")]
    NoSuchCall,
    #[error("the other participant disconnected")]
    PeerDisconnected,
    #[error("the session was replaced by a newer connection")]
    SessionReplaced,
    #[error("a user cannot call themselves")]
    SelfCall,
}

impl IntoWireError for CallError {
    fn into_wire_error(self) -> WireError {
        let code = match self {
            CallError::TargetNotAvailable => "TARGET_NOT_AVAILABLE",
            CallError::TargetBusy => "TARGET_BUSY",
            CallError::AlreadyInviting => "ALREADY_INVITING",
            CallError::NoSuchCall => "NO_SUCH_CALL",
            CallError::PeerDisconnected => "PEER_DISCONNECTED",
            CallError::SessionReplaced => "SESSION_REPLACED",
            CallError::SelfCall => "SELF_CALL",
        };
        WireError::new(code, self.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("message did not match the expected schema: {0}")]
    Schema(String),
    #[error("cannot add yourself as a contact")]
    SelfContact,
    #[error("contact already exists")]
    DuplicateContact,
    #[error("no user with that username exists")]
    UnknownUsername,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl IntoWireError for ValidationError {
    fn into_wire_error(self) -> WireError {
        match self {
            ValidationError::Schema(_) => WireError::new("SCHEMA_ERROR", self.to_string()),
            ValidationError::SelfContact => WireError::new("SELF_CONTACT", self.to_string()),
            ValidationError::DuplicateContact => WireError::new("DUPLICATE_CONTACT", self.to_string()),
            ValidationError::UnknownUsername => WireError::new("UNKNOWN_USERNAME", self.to_string()),
            ValidationError::Repository(e) => e.into_wire_error(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("record not found")]
    NotFound,
}

impl IntoWireError for RepositoryError {
    fn into_wire_error(self) -> WireError {
        match &self {
            RepositoryError::Storage(detail) => {
                tracing::error!("repository storage error: {detail}");
                WireError::new("STORAGE_ERROR", "internal storage error")
            }
            RepositoryError::NotFound => WireError::new("NOT_FOUND", self.to_string()),
        }
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        RepositoryError::Storage(e.to_string())
    }
}
