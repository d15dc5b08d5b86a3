//! Plaintext message envelope exchanged once the crypto handshake has
//! completed. `msg_type` decodes into [`ClientPayload`], a tagged enum,
//! rather than a loosely typed JSON value, so every handler receives a
//! known shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::WireError;
use crate::models::ModelPreference;

/// A decoded, not-yet-dispatched client frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ClientPayload,
    pub jwt: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "msg_type", content = "payload", rename_all = "snake_case")]
pub enum ClientPayload {
    Ping,
    Pong,
    Signup {
        username: String,
        password: String,
        name: String,
    },
    Authenticate {
        username: String,
        password: String,
    },
    RefreshToken {
        refresh_jwt: String,
    },
    Logout,
    GetContacts,
    AddContact {
        contact_username: String,
    },
    FetchCallHistory {
        limit: u32,
    },
    SetModelPreference {
        model_type: ModelPreference,
    },
    CallInvite {
        target: Uuid,
    },
    CallAccept {
        call_id: Uuid,
    },
    CallReject {
        call_id: Uuid,
    },
    CallEnd {
        call_id: Uuid,
    },
    Offer {
        call_id: Uuid,
        target: String,
        sdp: String,
    },
    Answer {
        call_id: Uuid,
        target: String,
        sdp: String,
    },
    IceCandidate {
        call_id: Uuid,
        target: String,
        candidate: serde_json::Value,
    },
    VideoState {
        call_id: Uuid,
        enabled: bool,
    },
}

impl ClientPayload {
    /// Whether this message type may be sent before authentication.
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            ClientPayload::Ping
                | ClientPayload::Pong
                | ClientPayload::Signup { .. }
                | ClientPayload::Authenticate { .. }
                | ClientPayload::RefreshToken { .. }
        )
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            ClientPayload::Ping => "ping",
            ClientPayload::Pong => "pong",
            ClientPayload::Signup { .. } => "signup",
            ClientPayload::Authenticate { .. } => "authenticate",
            ClientPayload::RefreshToken { .. } => "refresh_token",
            ClientPayload::Logout => "logout",
            ClientPayload::GetContacts => "get_contacts",
            ClientPayload::AddContact { .. } => "add_contact",
            ClientPayload::FetchCallHistory { .. } => "fetch_call_history",
            ClientPayload::SetModelPreference { .. } => "set_model_preference",
            ClientPayload::CallInvite { .. } => "call_invite",
            ClientPayload::CallAccept { .. } => "call_accept",
            ClientPayload::CallReject { .. } => "call_reject",
            ClientPayload::CallEnd { .. } => "call_end",
            ClientPayload::Offer { .. } => "offer",
            ClientPayload::Answer { .. } => "answer",
            ClientPayload::IceCandidate { .. } => "ice_candidate",
            ClientPayload::VideoState { .. } => "video_state",
        }
    }
}

/// A frame written back to the client. Replies echo `message_id`;
/// server-initiated pushes (invites, relayed signaling, captions) mint a
/// fresh one.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEnvelope {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub msg_type: &'static str,
    pub success: bool,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ServerEnvelope {
    pub fn reply_ok(in_reply_to: Uuid, msg_type: &'static str, payload: serde_json::Value) -> Self {
        ServerEnvelope {
            message_id: in_reply_to,
            timestamp: Utc::now(),
            msg_type,
            success: true,
            payload,
            error_code: None,
            error_message: None,
        }
    }

    pub fn reply_err(in_reply_to: Uuid, msg_type: &'static str, err: WireError) -> Self {
        ServerEnvelope {
            message_id: in_reply_to,
            timestamp: Utc::now(),
            msg_type,
            success: false,
            payload: serde_json::Value::Null,
            error_code: Some(err.error_code),
            error_message: Some(err.error_message),
        }
    }

    pub fn push(msg_type: &'static str, payload: serde_json::Value) -> Self {
        ServerEnvelope {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            msg_type,
            success: true,
            payload,
            error_code: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_authenticate_payload() {
        let raw = serde_json::json!({
            "message_id": Uuid::new_v4(),
            "timestamp": Utc::now(),
            "msg_type": "authenticate",
            "payload": {"username": "ada", "password": "secret123"},
        });
        let envelope: ClientEnvelope = serde_json::from_value(raw).unwrap();
        match envelope.payload {
            ClientPayload::Authenticate { username, .. } => assert_eq!(username, "ada"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_msg_type_fails_to_decode() {
        let raw = serde_json::json!({
            "message_id": Uuid::new_v4(),
            "timestamp": Utc::now(),
            "msg_type": "not_a_real_type",
            "payload": {},
        });
        assert!(serde_json::from_value::<ClientEnvelope>(raw).is_err());
    }

    #[test]
    fn ping_requires_no_auth_but_call_invite_does() {
        assert!(!ClientPayload::Ping.requires_auth());
        assert!(ClientPayload::CallInvite { target: Uuid::new_v4() }.requires_auth());
    }
}
