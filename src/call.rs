//! Per-call state machine and the supervisor that owns the
//! `(call_id -> CallCoordinator)` and `(user_id -> call_id)` indices.
//!
//! One `CallCoordinator` actor is started per call, generalizing the
//! "logical actor per Call" design and the single-writer registry pattern
//! this project already uses for its room/session maps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix::{Actor, ActorContext, Addr, AsyncContext, Context, Handler, Message};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::caption::CaptionFanOut;
use crate::errors::CallError;
use crate::media::{MediaAgent, NullMediaAgent};
use crate::message::ServerEnvelope;
use crate::models::{ModelPreference, TranscriptLine};
use crate::registry::{Deliver, Lookup, SessionRegistry};
use crate::repository::Repository;
use crate::transcriber::{ScriptedTranscriber, Transcriber};

/// ~15fps, matching the frame rate ceiling the captioning ingest loop is
/// specified against.
const CAPTION_TICK: Duration = Duration::from_millis(66);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Inviting,
    Accepted,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

// ---------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetSessionRegistry(pub Addr<SessionRegistry>);

#[derive(Message)]
#[rtype(result = "Result<Uuid, CallError>")]
pub struct Invite {
    pub caller_id: Uuid,
    pub callee_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "Option<Addr<CallCoordinator>>")]
pub struct LookupCall {
    pub call_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct RemoveCall {
    pub call_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct EndActiveCallForUser {
    pub user_id: Uuid,
    pub reason: &'static str,
}

pub struct CallSupervisor {
    calls: HashMap<Uuid, Addr<CallCoordinator>>,
    active_pair: HashMap<Uuid, Uuid>, // user_id -> call_id, only non-terminal calls
    session_registry: Option<Addr<SessionRegistry>>,
    repository: Option<Arc<dyn Repository>>,
    ring_timeout: Duration,
}

impl CallSupervisor {
    pub fn new(repository: Arc<dyn Repository>, ring_timeout: Duration) -> Self {
        CallSupervisor {
            calls: HashMap::new(),
            active_pair: HashMap::new(),
            session_registry: None,
            repository: Some(repository),
            ring_timeout,
        }
    }
}

impl Actor for CallSupervisor {
    type Context = Context<Self>;
}

impl Handler<SetSessionRegistry> for CallSupervisor {
    type Result = ();
    fn handle(&mut self, msg: SetSessionRegistry, _ctx: &mut Self::Context) -> Self::Result {
        self.session_registry = Some(msg.0);
    }
}

impl Handler<Invite> for CallSupervisor {
    type Result = Result<Uuid, CallError>;

    fn handle(&mut self, msg: Invite, ctx: &mut Self::Context) -> Self::Result {
        if msg.caller_id == msg.callee_id {
            return Err(CallError::SelfCall);
        }
        if self.active_pair.contains_key(&msg.caller_id) {
            return Err(CallError::AlreadyInviting);
        }
        if self.active_pair.contains_key(&msg.callee_id) {
            return Err(CallError::TargetBusy);
        }

        let registry = self
            .session_registry
            .clone()
            .expect("session registry must be wired before accepting invites");
        let repository = self.repository.clone().expect("repository must be set");

        let call_id = Uuid::new_v4();
        let coordinator = CallCoordinator::new(
            call_id,
            msg.caller_id,
            msg.callee_id,
            registry,
            repository,
            ctx.address(),
            self.ring_timeout,
        )
        .start();

        self.calls.insert(call_id, coordinator);
        self.active_pair.insert(msg.caller_id, call_id);
        self.active_pair.insert(msg.callee_id, call_id);
        crate::metrics::CALLS_ACTIVE.inc();

        Ok(call_id)
    }
}

impl Handler<LookupCall> for CallSupervisor {
    type Result = Option<Addr<CallCoordinator>>;

    fn handle(&mut self, msg: LookupCall, _ctx: &mut Self::Context) -> Self::Result {
        self.calls.get(&msg.call_id).cloned()
    }
}

impl Handler<RemoveCall> for CallSupervisor {
    type Result = ();

    fn handle(&mut self, msg: RemoveCall, _ctx: &mut Self::Context) -> Self::Result {
        self.calls.remove(&msg.call_id);
        self.active_pair.retain(|_, v| *v != msg.call_id);
    }
}

impl Handler<EndActiveCallForUser> for CallSupervisor {
    type Result = ();

    fn handle(&mut self, msg: EndActiveCallForUser, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(call_id) = self.active_pair.get(&msg.user_id).copied() {
            if let Some(coordinator) = self.calls.get(&call_id) {
                coordinator.do_send(End {
                    by: None,
                    reason: msg.reason,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------

#[derive(Message)]
#[rtype(result = "Result<(), CallError>")]
pub struct Accept {
    pub by: Uuid,
}

#[derive(Message)]
#[rtype(result = "Result<(), CallError>")]
pub struct Reject {
    pub by: Uuid,
}

#[derive(Message)]
#[rtype(result = "Result<(), CallError>")]
pub struct End {
    pub by: Option<Uuid>,
    pub reason: &'static str,
}

#[derive(Message)]
#[rtype(result = "Result<(), CallError>")]
pub struct RelaySignal {
    pub from: Uuid,
    pub kind: SignalKind,
    /// The peer's `user_id` as a string, or the literal `"server"` to
    /// address the call's own captioning `MediaAgent`.
    pub target: String,
    pub payload: serde_json::Value,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct ParticipantDisconnected {
    pub user_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct CaptionDelta {
    pub speaker_id: Uuid,
    pub text: String,
    pub source: ModelPreference,
}

struct RingTimeoutTick;
impl Message for RingTimeoutTick {
    type Result = ();
}

pub struct CallCoordinator {
    call_id: Uuid,
    caller_id: Uuid,
    callee_id: Uuid,
    state: CallState,
    started_at: chrono::DateTime<Utc>,
    registry: Addr<SessionRegistry>,
    repository: Arc<dyn Repository>,
    supervisor: Addr<CallSupervisor>,
    ring_timeout: Duration,
    caption: CaptionFanOut,
    /// One server-side `MediaAgent` per participant, used to negotiate the
    /// media leg the server itself ingests frames on for captioning.
    media_agents: HashMap<Uuid, Arc<Mutex<Box<dyn MediaAgent>>>>,
    /// Cancels the matching frame-ingest task; fired in [`Self::end`].
    media_cancels: Vec<tokio::sync::oneshot::Sender<()>>,
}

impl CallCoordinator {
    #[allow(clippy::too_many_arguments)]
    fn new(
        call_id: Uuid,
        caller_id: Uuid,
        callee_id: Uuid,
        registry: Addr<SessionRegistry>,
        repository: Arc<dyn Repository>,
        supervisor: Addr<CallSupervisor>,
        ring_timeout: Duration,
    ) -> Self {
        CallCoordinator {
            call_id,
            caller_id,
            callee_id,
            state: CallState::Inviting,
            started_at: Utc::now(),
            registry,
            repository,
            supervisor,
            ring_timeout,
            caption: CaptionFanOut::new(call_id, caller_id, callee_id),
            media_agents: HashMap::new(),
            media_cancels: Vec::new(),
        }
    }

    fn other(&self, user_id: Uuid) -> Uuid {
        if user_id == self.caller_id {
            self.callee_id
        } else {
            self.caller_id
        }
    }

    fn is_participant(&self, user_id: Uuid) -> bool {
        user_id == self.caller_id || user_id == self.callee_id
    }

    fn deliver(&self, target: Uuid, envelope: ServerEnvelope) {
        let registry = self.registry.clone();
        actix::spawn(async move {
            if let Ok(Some(recipient)) = registry.send(Lookup { user_id: target }).await {
                let _ = recipient.send(Deliver(envelope)).await;
            }
        });
    }

    fn persist_end(&self, reason: &'static str) {
        let repository = self.repository.clone();
        let call_id = self.call_id;
        let caller_id = self.caller_id;
        let callee_id = self.callee_id;
        let started_at = self.started_at;
        let transcript: Vec<TranscriptLine> = self.caption.transcript().to_vec();
        actix::spawn(async move {
            if let Err(e) = repository.create_call(call_id, caller_id, callee_id, started_at).await
            {
                warn!("failed to persist call start for {call_id}: {e}");
            }
            if let Err(e) = repository
                .end_call(call_id, Utc::now(), reason, &transcript)
                .await
            {
                warn!("failed to persist call end for {call_id}: {e}");
            }
        });
    }

    /// Starts a server-side `MediaAgent` and a frame-ingest task per
    /// participant. Each task polls its agent on a fixed tick, feeds a
    /// `Transcriber` chosen from that participant's model preference, and
    /// posts any resulting delta back to this coordinator.
    fn start_captioning(&mut self, ctx: &mut Context<Self>) {
        for participant in [self.caller_id, self.callee_id] {
            let agent: Arc<Mutex<Box<dyn MediaAgent>>> =
                Arc::new(Mutex::new(Box::new(NullMediaAgent::default())));
            self.media_agents.insert(participant, agent.clone());

            let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel();
            self.media_cancels.push(cancel_tx);

            let repository = self.repository.clone();
            let addr = ctx.address();
            actix::spawn(async move {
                let preference = repository
                    .find_user_by_id(participant)
                    .await
                    .ok()
                    .flatten()
                    .map(|user| user.preference())
                    .unwrap_or_default();
                let mut transcriber: Box<dyn Transcriber> =
                    Box::new(ScriptedTranscriber::new(preference, Vec::new()));
                let mut ticker = tokio::time::interval(CAPTION_TICK);
                loop {
                    tokio::select! {
                        _ = &mut cancel_rx => break,
                        _ = ticker.tick() => {
                            let frame_available = agent.lock().unwrap().poll_frame();
                            if frame_available {
                                if let Some(delta) = transcriber.on_frame(participant) {
                                    addr.do_send(CaptionDelta {
                                        speaker_id: delta.speaker_id,
                                        text: delta.text,
                                        source: delta.source,
                                    });
                                }
                            }
                        }
                    }
                }
                agent.lock().unwrap().dispose();
            });
        }
    }

    /// Routes an `offer`/`answer`/`ice_candidate` addressed to the literal
    /// `"server"` target into the sender's own `MediaAgent`, replying with
    /// the negotiated answer where one is produced.
    fn relay_to_media_agent(&self, from: Uuid, kind: SignalKind, payload: serde_json::Value) {
        let Some(agent) = self.media_agents.get(&from) else {
            return;
        };
        match kind {
            SignalKind::Offer => {
                let sdp = payload.get("sdp").and_then(|v| v.as_str()).unwrap_or_default();
                let answer = agent.lock().unwrap().accept_offer(sdp);
                self.deliver(
                    from,
                    ServerEnvelope::push(
                        "answer",
                        json!({"call_id": self.call_id, "from": "server", "sdp": answer}),
                    ),
                );
            }
            SignalKind::Answer => {
                // The server never sends its own offer over this path today,
                // so an answer addressed to it has nothing to negotiate.
            }
            SignalKind::IceCandidate => {
                if let Some(candidate) = payload.get("candidate") {
                    agent.lock().unwrap().add_ice_candidate(&candidate.to_string());
                }
            }
        }
    }

    fn end(&mut self, reason: &'static str, notify: Option<Uuid>) {
        if self.state == CallState::Ended {
            return;
        }
        self.state = CallState::Ended;
        crate::metrics::CALLS_ACTIVE.dec();
        crate::metrics::CALLS_ENDED_TOTAL.inc();
        for cancel in self.media_cancels.drain(..) {
            let _ = cancel.send(());
        }
        self.media_agents.clear();
        self.persist_end(reason);
        if let Some(user_id) = notify {
            self.deliver(
                user_id,
                ServerEnvelope::push(
                    "call_end",
                    json!({"call_id": self.call_id, "reason": reason}),
                ),
            );
        }
        self.supervisor.do_send(RemoveCall { call_id: self.call_id });
    }
}

impl Actor for CallCoordinator {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.deliver(
            self.callee_id,
            ServerEnvelope::push(
                "call_invite",
                json!({"call_id": self.call_id, "from": self.caller_id}),
            ),
        );
        ctx.notify_later(RingTimeoutTick, self.ring_timeout);
    }
}

impl Handler<RingTimeoutTick> for CallCoordinator {
    type Result = ();

    fn handle(&mut self, _msg: RingTimeoutTick, ctx: &mut Self::Context) -> Self::Result {
        if self.state == CallState::Inviting {
            info!(call_id = %self.call_id, "ring timeout");
            self.end("TIMEOUT", Some(self.caller_id));
            ctx.stop();
        }
    }
}

impl Handler<Accept> for CallCoordinator {
    type Result = Result<(), CallError>;

    fn handle(&mut self, msg: Accept, ctx: &mut Self::Context) -> Self::Result {
        if self.state != CallState::Inviting || msg.by != self.callee_id {
            return Err(CallError::NoSuchCall);
        }
        self.state = CallState::Accepted;
        self.deliver(
            self.caller_id,
            ServerEnvelope::push("call_accept", json!({"call_id": self.call_id})),
        );
        self.start_captioning(ctx);
        Ok(())
    }
}

impl Handler<Reject> for CallCoordinator {
    type Result = Result<(), CallError>;

    fn handle(&mut self, msg: Reject, ctx: &mut Self::Context) -> Self::Result {
        if self.state != CallState::Inviting || msg.by != self.callee_id {
            return Err(CallError::NoSuchCall);
        }
        self.end("REJECTED", Some(self.caller_id));
        ctx.stop();
        Ok(())
    }
}

impl Handler<End> for CallCoordinator {
    type Result = Result<(), CallError>;

    fn handle(&mut self, msg: End, ctx: &mut Self::Context) -> Self::Result {
        if self.state == CallState::Ended {
            return Err(CallError::NoSuchCall);
        }
        if !matches!(self.state, CallState::Accepted | CallState::Active) && msg.by.is_some() {
            return Err(CallError::NoSuchCall);
        }
        let notify = match msg.by {
            Some(by) if self.is_participant(by) => Some(self.other(by)),
            Some(_) => return Err(CallError::NoSuchCall),
            None => None,
        };
        self.end(msg.reason, notify);
        ctx.stop();
        Ok(())
    }
}

impl Handler<RelaySignal> for CallCoordinator {
    type Result = Result<(), CallError>;

    fn handle(&mut self, msg: RelaySignal, _ctx: &mut Self::Context) -> Self::Result {
        if !matches!(self.state, CallState::Accepted | CallState::Active) {
            return Err(CallError::NoSuchCall);
        }
        if !self.is_participant(msg.from) {
            return Err(CallError::NoSuchCall);
        }
        if self.state == CallState::Accepted {
            self.state = CallState::Active;
        }

        if msg.target == "server" {
            self.relay_to_media_agent(msg.from, msg.kind, msg.payload);
            return Ok(());
        }

        let msg_type = match msg.kind {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::IceCandidate => "ice_candidate",
        };
        let target = self.other(msg.from);
        let mut payload = msg.payload;
        if let serde_json::Value::Object(ref mut map) = payload {
            map.insert("call_id".to_string(), json!(self.call_id));
            map.insert("from".to_string(), json!(msg.from));
        }
        self.deliver(target, ServerEnvelope::push(msg_type, payload));
        Ok(())
    }
}

impl Handler<ParticipantDisconnected> for CallCoordinator {
    type Result = ();

    fn handle(&mut self, msg: ParticipantDisconnected, ctx: &mut Self::Context) -> Self::Result {
        if !self.is_participant(msg.user_id) || self.state == CallState::Ended {
            return;
        }
        let notify = self.other(msg.user_id);
        self.end("PEER_DISCONNECTED", Some(notify));
        ctx.stop();
    }
}

impl Handler<CaptionDelta> for CallCoordinator {
    type Result = ();

    fn handle(&mut self, msg: CaptionDelta, _ctx: &mut Self::Context) -> Self::Result {
        if self.state != CallState::Active {
            return;
        }
        let line = self.caption.push(msg.speaker_id, msg.text, msg.source);
        crate::metrics::CAPTION_DELTAS_TOTAL.inc();
        let payload = json!({
            "from": "server",
            "speaker": line.speaker_id,
            "prediction": line.text,
            "source": line.source,
        });
        for participant in [self.caller_id, self.callee_id] {
            self.deliver(
                participant,
                ServerEnvelope::push("lip_reading_prediction", payload.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use crate::repository::NullRepository;

    fn start_coordinator() -> (Addr<CallCoordinator>, Uuid, Uuid) {
        let supervisor = CallSupervisor::new(Arc::new(NullRepository), Duration::from_secs(30)).start();
        let registry = SessionRegistry::new(supervisor.clone()).start();
        let caller_id = Uuid::new_v4();
        let callee_id = Uuid::new_v4();
        let call_id = Uuid::new_v4();
        let coordinator = CallCoordinator::new(
            call_id,
            caller_id,
            callee_id,
            registry,
            Arc::new(NullRepository),
            supervisor,
            Duration::from_secs(30),
        )
        .start();
        (coordinator, caller_id, callee_id)
    }

    #[actix_rt::test]
    async fn accept_is_rejected_unless_sent_by_the_callee_while_inviting() {
        let (coordinator, caller_id, _callee_id) = start_coordinator();

        let by_caller = coordinator.send(Accept { by: caller_id }).await.unwrap();
        assert_eq!(by_caller, Err(CallError::NoSuchCall));

        let by_stranger = coordinator.send(Accept { by: Uuid::new_v4() }).await.unwrap();
        assert_eq!(by_stranger, Err(CallError::NoSuchCall));
    }

    #[actix_rt::test]
    async fn reject_is_rejected_unless_sent_by_the_callee_while_inviting() {
        let (coordinator, caller_id, _callee_id) = start_coordinator();
        let result = coordinator.send(Reject { by: caller_id }).await.unwrap();
        assert_eq!(result, Err(CallError::NoSuchCall));
    }

    #[actix_rt::test]
    async fn relay_signal_is_rejected_before_the_call_is_accepted() {
        let (coordinator, caller_id, _callee_id) = start_coordinator();
        let result = coordinator
            .send(RelaySignal {
                from: caller_id,
                kind: SignalKind::Offer,
                target: "server".to_string(),
                payload: json!({}),
            })
            .await
            .unwrap();
        assert_eq!(result, Err(CallError::NoSuchCall));
    }

    #[actix_rt::test]
    async fn relay_signal_from_a_non_participant_is_rejected() {
        let (coordinator, caller_id, callee_id) = start_coordinator();
        coordinator.send(Accept { by: callee_id }).await.unwrap().unwrap();
        let result = coordinator
            .send(RelaySignal {
                from: Uuid::new_v4(),
                kind: SignalKind::IceCandidate,
                target: caller_id.to_string(),
                payload: json!({}),
            })
            .await
            .unwrap();
        assert_eq!(result, Err(CallError::NoSuchCall));
    }

    #[actix_rt::test]
    async fn relay_signal_targeting_server_is_accepted_after_accept() {
        let (coordinator, caller_id, callee_id) = start_coordinator();
        coordinator.send(Accept { by: callee_id }).await.unwrap().unwrap();
        let result = coordinator
            .send(RelaySignal {
                from: caller_id,
                kind: SignalKind::Offer,
                target: "server".to_string(),
                payload: json!({"sdp": "v=0..."}),
            })
            .await
            .unwrap();
        assert_eq!(result, Ok(()));
    }

    #[actix_rt::test]
    async fn end_is_idempotent_once_the_call_has_already_ended() {
        let (coordinator, caller_id, callee_id) = start_coordinator();
        coordinator.send(Accept { by: callee_id }).await.unwrap().unwrap();
        coordinator
            .send(End { by: Some(caller_id), reason: "ENDED" })
            .await
            .unwrap()
            .unwrap();
        let second = coordinator
            .send(End { by: Some(caller_id), reason: "ENDED" })
            .await
            .unwrap();
        assert_eq!(second, Err(CallError::NoSuchCall));
    }

    #[actix_rt::test]
    async fn end_by_a_non_participant_is_rejected() {
        let (coordinator, _caller_id, callee_id) = start_coordinator();
        coordinator.send(Accept { by: callee_id }).await.unwrap().unwrap();
        let result = coordinator
            .send(End { by: Some(Uuid::new_v4()), reason: "ENDED" })
            .await
            .unwrap();
        assert_eq!(result, Err(CallError::NoSuchCall));
    }

    #[actix_rt::test]
    async fn caption_delta_before_active_is_silently_ignored() {
        let (coordinator, caller_id, _callee_id) = start_coordinator();
        // Still Inviting: the handler must not panic and must not broadcast.
        coordinator.do_send(CaptionDelta {
            speaker_id: caller_id,
            text: "hello".to_string(),
            source: ModelPreference::Audio,
        });
        // Give the mailbox a tick to process; absence of a panic is the assertion.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
