//! Accepts a WebSocket transport, drives the crypto handshake, and owns
//! the inbound/outbound loop for one client, generalized from this
//! project's per-connection chat session actor: the actor's
//! `StreamHandler` is the inbound loop, its context is the outbound
//! queue, and `stopping()` is the cleanup path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, ActorFutureExt, AsyncContext, Handler, Running, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use tracing::{error, info, warn};
use uuid::Uuid;
use x25519_dalek::EphemeralSecret;

use crate::call::{CallSupervisor, ParticipantDisconnected};
use crate::crypto::{CryptoEnvelope, HandshakeClientHello, WireFrame};
use crate::message::{ClientEnvelope, ServerEnvelope};
use crate::registry::{Deliver, ForceClose, Register, SessionRegistry, Unregister};
use crate::router::Router;

pub struct ConnectionSession {
    id: Uuid,
    crypto: CryptoEnvelope,
    pending_secret: Option<EphemeralSecret>,
    pending_salt: Option<Vec<u8>>,
    authenticated_user: Option<Uuid>,
    handshake_started_at: Instant,
    last_pong: Instant,
    router: Arc<Router>,
    session_registry: actix::Addr<SessionRegistry>,
    call_supervisor: actix::Addr<CallSupervisor>,
    handshake_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
}

impl ConnectionSession {
    pub fn new(
        router: Arc<Router>,
        session_registry: actix::Addr<SessionRegistry>,
        call_supervisor: actix::Addr<CallSupervisor>,
        handshake_timeout: Duration,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        ConnectionSession {
            id: Uuid::new_v4(),
            crypto: CryptoEnvelope::new(),
            pending_secret: None,
            pending_salt: None,
            authenticated_user: None,
            handshake_started_at: Instant::now(),
            last_pong: Instant::now(),
            router,
            session_registry,
            call_supervisor,
            handshake_timeout,
            heartbeat_interval,
            heartbeat_timeout,
        }
    }

    fn start_handshake(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let (secret, hello) = CryptoEnvelope::start_handshake();
        self.pending_salt = Some(
            B64.decode(&hello.salt)
                .expect("freshly generated salt is valid base64"),
        );
        self.pending_secret = Some(secret);
        let text = serde_json::to_string(&hello).expect("handshake hello serializes");
        ctx.text(text);

        ctx.run_later(self.handshake_timeout, |act, ctx| {
            if !act.crypto.is_established() {
                warn!(connection_id = %act.id, "handshake timed out");
                ctx.stop();
            }
        });
    }

    fn complete_handshake(&mut self, raw: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let hello: Result<HandshakeClientHello, _> = serde_json::from_str(raw);
        let (secret, salt) = match (self.pending_secret.take(), self.pending_salt.take()) {
            (Some(s), Some(salt)) => (s, salt),
            _ => {
                ctx.stop();
                return;
            }
        };
        match hello {
            Ok(client_hello) => {
                if self.crypto.complete_handshake(secret, &salt, &client_hello).is_err() {
                    warn!(connection_id = %self.id, "handshake failed");
                    ctx.stop();
                } else {
                    crate::metrics::CONNECTIONS_ACTIVE.inc();
                    crate::metrics::HANDSHAKE_DURATION_SECONDS
                        .observe(self.handshake_started_at.elapsed().as_secs_f64());
                    self.heartbeat(ctx);
                }
            }
            Err(_) => {
                warn!(connection_id = %self.id, "malformed handshake reply");
                ctx.stop();
            }
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_pong) > act.heartbeat_timeout {
                warn!(connection_id = %act.id, "heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            if let Ok(frame) = act.crypto.encrypt(b"{\"msg_type\":\"ping\"}") {
                let text = serde_json::to_string(&frame).expect("wire frame serializes");
                ctx.text(text);
            }
        });
    }

    fn handle_decrypted(&mut self, raw: Vec<u8>, ctx: &mut ws::WebsocketContext<Self>) {
        let envelope: ClientEnvelope = match serde_json::from_slice(&raw) {
            Ok(e) => e,
            Err(_) => return,
        };

        if matches!(envelope.payload, crate::message::ClientPayload::Pong) {
            self.last_pong = Instant::now();
            return;
        }

        let router = self.router.clone();
        let current_user = self.authenticated_user;

        let fut = async move { router.dispatch(envelope, current_user).await }
            .into_actor(self)
            .map(|outcome, act, ctx| {
                if let Some(user_id) = outcome.newly_authenticated {
                    act.authenticated_user = Some(user_id);
                    act.session_registry.do_send(Register {
                        user_id,
                        recipient: ctx.address().recipient(),
                        close_recipient: ctx.address().recipient(),
                    });
                    crate::metrics::SESSIONS_ACTIVE.inc();
                }
                act.send_envelope(&outcome.reply, ctx);
            });
        ctx.spawn(fut);
    }

    fn send_envelope(&self, envelope: &ServerEnvelope, ctx: &mut ws::WebsocketContext<Self>) {
        let plaintext = serde_json::to_vec(envelope).expect("server envelope serializes");
        match self.crypto.encrypt(&plaintext) {
            Ok(frame) => {
                let text = serde_json::to_string(&frame).expect("wire frame serializes");
                ctx.text(text);
            }
            Err(_) => error!(connection_id = %self.id, "failed to encrypt outbound frame"),
        }
    }
}

impl Actor for ConnectionSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.id, "connection opened");
        self.start_handshake(ctx);
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> Running {
        info!(connection_id = %self.id, "connection closing");
        crate::metrics::CONNECTIONS_ACTIVE.dec();
        if let Some(user_id) = self.authenticated_user {
            crate::metrics::SESSIONS_ACTIVE.dec();
            self.session_registry.do_send(Unregister { user_id });
            self.call_supervisor.do_send(ParticipantDisconnected { user_id });
        }
        Running::Stop
    }
}

impl Handler<Deliver> for ConnectionSession {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) -> Self::Result {
        self.send_envelope(&msg.0, ctx);
    }
}

impl Handler<ForceClose> for ConnectionSession {
    type Result = ();

    fn handle(&mut self, msg: ForceClose, ctx: &mut Self::Context) -> Self::Result {
        info!(connection_id = %self.id, reason = msg.reason, "force closing connection");
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConnectionSession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match item {
            Ok(msg) => msg,
            Err(err) => {
                error!(connection_id = %self.id, "protocol error: {err:?}");
                ctx.stop();
                return;
            }
        };

        match msg {
            ws::Message::Text(text) => {
                if !self.crypto.is_established() {
                    self.complete_handshake(&text, ctx);
                    return;
                }
                match serde_json::from_str::<WireFrame>(&text) {
                    Ok(frame) => match self.crypto.decrypt(&frame) {
                        Ok(plaintext) => self.handle_decrypted(plaintext, ctx),
                        Err(_) => {
                            warn!(connection_id = %self.id, "decrypt failure, dropping connection");
                            ctx.stop();
                        }
                    },
                    Err(_) => {
                        warn!(connection_id = %self.id, "malformed frame after handshake");
                        ctx.stop();
                    }
                }
            }
            ws::Message::Binary(_) => {
                warn!(connection_id = %self.id, "unexpected binary frame");
            }
            ws::Message::Ping(bytes) => ctx.pong(&bytes),
            ws::Message::Pong(_) => {
                self.last_pong = Instant::now();
            }
            ws::Message::Close(reason) => {
                info!(connection_id = %self.id, "client closed: {reason:?}");
                ctx.stop();
            }
            ws::Message::Continuation(_) | ws::Message::Nop => {}
        }
    }
}
