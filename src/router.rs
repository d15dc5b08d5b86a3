//! Decodes one envelope into a [`ClientPayload`], checks authentication,
//! dispatches to a handler or the call subsystem, and produces the reply
//! envelope. Transport-agnostic: [`crate::connection::ConnectionSession`]
//! is the only caller.

use std::sync::Arc;

use actix::Addr;
use serde_json::json;
use uuid::Uuid;

use crate::call::{Accept, CallSupervisor, End, Invite, LookupCall, Reject, RelaySignal, SignalKind};
use crate::errors::{CallError, IntoWireError, WireError};
use crate::handlers::Handlers;
use crate::message::{ClientEnvelope, ClientPayload, ServerEnvelope};
use crate::registry::{IsOnline, SessionRegistry};
use crate::token::TokenService;

pub struct Router {
    pub handlers: Arc<Handlers>,
    pub tokens: Arc<TokenService>,
    pub session_registry: Addr<SessionRegistry>,
    pub call_supervisor: Addr<CallSupervisor>,
}

pub struct DispatchOutcome {
    pub reply: ServerEnvelope,
    /// Set when this message authenticated the connection for the first
    /// time (signup/authenticate); the caller registers the session.
    pub newly_authenticated: Option<Uuid>,
}

impl Router {
    pub async fn dispatch(&self, envelope: ClientEnvelope, current_user: Option<Uuid>) -> DispatchOutcome {
        let msg_type = envelope.payload.msg_type();

        if envelope.payload.requires_auth() {
            if let Err(err) = self.check_auth(&envelope, current_user) {
                return DispatchOutcome {
                    reply: ServerEnvelope::reply_err(envelope.message_id, msg_type, err),
                    newly_authenticated: None,
                };
            }
        }

        let authed_user = current_user.or(envelope.user_id);

        let (result, newly_authenticated) = self.run(envelope.payload, authed_user).await;
        let reply = match result {
            Ok(payload) => ServerEnvelope::reply_ok(envelope.message_id, msg_type, payload),
            Err(err) => ServerEnvelope::reply_err(envelope.message_id, msg_type, err),
        };
        DispatchOutcome { reply, newly_authenticated }
    }

    fn check_auth(&self, envelope: &ClientEnvelope, current_user: Option<Uuid>) -> Result<(), WireError> {
        let user_id = current_user
            .or(envelope.user_id)
            .ok_or_else(|| WireError::new("MISSING_JWT", "user_id is required"))?;
        let jwt = envelope
            .jwt
            .as_deref()
            .ok_or_else(|| WireError::new("MISSING_JWT", "jwt is required"))?;
        self.tokens
            .verify_access(jwt, user_id)
            .map_err(|e| e.into_wire_error())
    }

    async fn run(
        &self,
        payload: ClientPayload,
        user_id: Option<Uuid>,
    ) -> (Result<serde_json::Value, WireError>, Option<Uuid>) {
        match payload {
            ClientPayload::Ping => (Ok(json!({})), None),
            ClientPayload::Pong => (Ok(json!({})), None),
            ClientPayload::Signup { username, password, name } => {
                match self.handlers.signup(&username, &password, &name).await {
                    Ok(body) => {
                        let new_user = body.get("user_id").and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
                        (Ok(body), new_user)
                    }
                    Err(e) => (Err(e.into_wire_error()), None),
                }
            }
            ClientPayload::Authenticate { username, password } => {
                match self.handlers.authenticate(&username, &password).await {
                    Ok(body) => {
                        let new_user = body.get("user_id").and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
                        (Ok(body), new_user)
                    }
                    Err(e) => (Err(e.into_wire_error()), None),
                }
            }
            ClientPayload::RefreshToken { refresh_jwt } => {
                match self.handlers.refresh_token(&refresh_jwt).await {
                    Ok(body) => {
                        // A reconnecting client authenticates purely via refresh
                        // token, with no prior `Authenticate`/`Signup` on this
                        // connection, so the session must be (re-)registered here.
                        let user_id = body.get("user_id").and_then(|v| v.as_str()).and_then(|s| s.parse().ok());
                        (Ok(body), user_id)
                    }
                    Err(e) => (Err(e.into_wire_error()), None),
                }
            }
            ClientPayload::Logout => match user_id {
                Some(uid) => (
                    self.handlers.logout(uid).await.map_err(|e| e.into_wire_error()),
                    None,
                ),
                None => (Err(WireError::new("MISSING_JWT", "not authenticated")), None),
            },
            ClientPayload::GetContacts => match user_id {
                Some(uid) => (
                    self.handlers.get_contacts(uid).await.map_err(|e| e.into_wire_error()),
                    None,
                ),
                None => (Err(WireError::new("MISSING_JWT", "not authenticated")), None),
            },
            ClientPayload::AddContact { contact_username } => match user_id {
                Some(uid) => (
                    self.handlers
                        .add_contact(uid, &contact_username)
                        .await
                        .map_err(|e| e.into_wire_error()),
                    None,
                ),
                None => (Err(WireError::new("MISSING_JWT", "not authenticated")), None),
            },
            ClientPayload::FetchCallHistory { limit } => match user_id {
                Some(uid) => (
                    self.handlers
                        .fetch_call_history(uid, limit)
                        .await
                        .map_err(|e| e.into_wire_error()),
                    None,
                ),
                None => (Err(WireError::new("MISSING_JWT", "not authenticated")), None),
            },
            ClientPayload::SetModelPreference { model_type } => match user_id {
                Some(uid) => (
                    self.handlers
                        .set_model_preference(uid, model_type)
                        .await
                        .map_err(|e| e.into_wire_error()),
                    None,
                ),
                None => (Err(WireError::new("MISSING_JWT", "not authenticated")), None),
            },
            ClientPayload::CallInvite { target } => {
                let Some(uid) = user_id else {
                    return (Err(WireError::new("MISSING_JWT", "not authenticated")), None);
                };
                if !self.online(target).await {
                    return (Err(CallError::TargetNotAvailable.into_wire_error()), None);
                }
                let result = self
                    .call_supervisor
                    .send(Invite { caller_id: uid, callee_id: target })
                    .await;
                match result {
                    Ok(Ok(call_id)) => (Ok(json!({ "call_id": call_id })), None),
                    Ok(Err(e)) => (Err(e.into_wire_error()), None),
                    Err(_) => (Err(CallError::NoSuchCall.into_wire_error()), None),
                }
            }
            ClientPayload::CallAccept { call_id } => {
                self.call_action(call_id, user_id, |addr, by| async move {
                    addr.send(Accept { by }).await
                })
                .await
            }
            ClientPayload::CallReject { call_id } => {
                self.call_action(call_id, user_id, |addr, by| async move {
                    addr.send(Reject { by }).await
                })
                .await
            }
            ClientPayload::CallEnd { call_id } => {
                self.call_action(call_id, user_id, |addr, by| async move {
                    addr.send(End { by: Some(by), reason: "ENDED" }).await
                })
                .await
            }
            ClientPayload::Offer { call_id, target, sdp } => {
                self.relay(call_id, user_id, SignalKind::Offer, target, json!({ "sdp": sdp })).await
            }
            ClientPayload::Answer { call_id, target, sdp } => {
                self.relay(call_id, user_id, SignalKind::Answer, target, json!({ "sdp": sdp })).await
            }
            ClientPayload::IceCandidate { call_id, target, candidate } => {
                self.relay(
                    call_id,
                    user_id,
                    SignalKind::IceCandidate,
                    target,
                    json!({ "candidate": candidate }),
                )
                .await
            }
            ClientPayload::VideoState { call_id, enabled } => {
                (Ok(json!({ "call_id": call_id, "enabled": enabled })), None)
            }
        }
    }

    async fn online(&self, user_id: Uuid) -> bool {
        self.session_registry
            .send(IsOnline { user_id })
            .await
            .unwrap_or(false)
    }

    async fn call_action<F, Fut>(
        &self,
        call_id: Uuid,
        user_id: Option<Uuid>,
        action: F,
    ) -> (Result<serde_json::Value, WireError>, Option<Uuid>)
    where
        F: FnOnce(Addr<crate::call::CallCoordinator>, Uuid) -> Fut,
        Fut: std::future::Future<Output = Result<Result<(), CallError>, actix::MailboxError>>,
    {
        let Some(uid) = user_id else {
            return (Err(WireError::new("MISSING_JWT", "not authenticated")), None);
        };
        let coordinator = match self.call_supervisor.send(LookupCall { call_id }).await {
            Ok(Some(addr)) => addr,
            _ => return (Err(CallError::NoSuchCall.into_wire_error()), None),
        };
        match action(coordinator, uid).await {
            Ok(Ok(())) => (Ok(json!({ "call_id": call_id })), None),
            Ok(Err(e)) => (Err(e.into_wire_error()), None),
            Err(_) => (Err(CallError::NoSuchCall.into_wire_error()), None),
        }
    }

    async fn relay(
        &self,
        call_id: Uuid,
        user_id: Option<Uuid>,
        kind: SignalKind,
        target: String,
        payload: serde_json::Value,
    ) -> (Result<serde_json::Value, WireError>, Option<Uuid>) {
        let Some(uid) = user_id else {
            return (Err(WireError::new("MISSING_JWT", "not authenticated")), None);
        };
        let coordinator = match self.call_supervisor.send(LookupCall { call_id }).await {
            Ok(Some(addr)) => addr,
            _ => return (Err(CallError::NoSuchCall.into_wire_error()), None),
        };
        match coordinator.send(RelaySignal { from: uid, kind, target, payload }).await {
            Ok(Ok(())) => (Ok(json!({})), None),
            Ok(Err(e)) => (Err(e.into_wire_error()), None),
            Err(_) => (Err(CallError::NoSuchCall.into_wire_error()), None),
        }
    }
}
