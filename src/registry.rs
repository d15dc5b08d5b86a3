//! Single-writer map from authenticated user identity to the connection
//! currently serving that user, generalized from the session map kept by
//! this project's chat server actor.

use std::collections::HashMap;

use actix::{Actor, Context, Handler, Message, Recipient};
use tracing::info;
use uuid::Uuid;

use crate::call::{CallSupervisor, EndActiveCallForUser};
use crate::message::ServerEnvelope;

/// Sent to a connection actor to have it push a frame to its client.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub ServerEnvelope);

/// Sent to a connection actor to force it closed (e.g. session replaced).
#[derive(Message)]
#[rtype(result = "()")]
pub struct ForceClose {
    pub reason: &'static str,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Register {
    pub user_id: Uuid,
    pub recipient: Recipient<Deliver>,
    pub close_recipient: Recipient<ForceClose>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Unregister {
    pub user_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "Option<Recipient<Deliver>>")]
pub struct Lookup {
    pub user_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "bool")]
pub struct IsOnline {
    pub user_id: Uuid,
}

struct SessionEntry {
    recipient: Recipient<Deliver>,
    close_recipient: Recipient<ForceClose>,
}

pub struct SessionRegistry {
    sessions: HashMap<Uuid, SessionEntry>,
    call_supervisor: actix::Addr<CallSupervisor>,
}

impl SessionRegistry {
    pub fn new(call_supervisor: actix::Addr<CallSupervisor>) -> Self {
        SessionRegistry {
            sessions: HashMap::new(),
            call_supervisor,
        }
    }
}

impl Actor for SessionRegistry {
    type Context = Context<Self>;
}

impl Handler<Register> for SessionRegistry {
    type Result = ();

    fn handle(&mut self, msg: Register, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(previous) = self.sessions.remove(&msg.user_id) {
            info!(user_id = %msg.user_id, "displacing existing session");
            previous.close_recipient.do_send(ForceClose {
                reason: "SESSION_REPLACED",
            });
            self.call_supervisor.do_send(EndActiveCallForUser {
                user_id: msg.user_id,
                reason: "SESSION_REPLACED",
            });
        }
        self.sessions.insert(
            msg.user_id,
            SessionEntry {
                recipient: msg.recipient,
                close_recipient: msg.close_recipient,
            },
        );
    }
}

impl Handler<Unregister> for SessionRegistry {
    type Result = ();

    fn handle(&mut self, msg: Unregister, _ctx: &mut Self::Context) -> Self::Result {
        self.sessions.remove(&msg.user_id);
    }
}

impl Handler<Lookup> for SessionRegistry {
    type Result = Option<Recipient<Deliver>>;

    fn handle(&mut self, msg: Lookup, _ctx: &mut Self::Context) -> Self::Result {
        self.sessions.get(&msg.user_id).map(|e| e.recipient.clone())
    }
}

impl Handler<IsOnline> for SessionRegistry {
    type Result = bool;

    fn handle(&mut self, msg: IsOnline, _ctx: &mut Self::Context) -> Self::Result {
        self.sessions.contains_key(&msg.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::repository::NullRepository;

    fn test_supervisor() -> CallSupervisor {
        CallSupervisor::new(Arc::new(NullRepository), Duration::from_secs(30))
    }

    struct EchoRecipient;
    impl Actor for EchoRecipient {
        type Context = Context<Self>;
    }
    impl Handler<Deliver> for EchoRecipient {
        type Result = ();
        fn handle(&mut self, _msg: Deliver, _ctx: &mut Self::Context) {}
    }
    impl Handler<ForceClose> for EchoRecipient {
        type Result = ();
        fn handle(&mut self, _msg: ForceClose, _ctx: &mut Self::Context) {}
    }

    #[actix_rt::test]
    async fn lookup_returns_none_for_unknown_user() {
        let supervisor = test_supervisor().start();
        let registry = SessionRegistry::new(supervisor).start();
        let result = registry.send(Lookup { user_id: Uuid::new_v4() }).await.unwrap();
        assert!(result.is_none());
    }

    #[actix_rt::test]
    async fn register_then_lookup_finds_the_session() {
        let supervisor = test_supervisor().start();
        let registry = SessionRegistry::new(supervisor).start();
        let echo = EchoRecipient.start();
        let user_id = Uuid::new_v4();

        registry
            .send(Register {
                user_id,
                recipient: echo.clone().recipient(),
                close_recipient: echo.recipient(),
            })
            .await
            .unwrap();

        let found = registry.send(Lookup { user_id }).await.unwrap();
        assert!(found.is_some());
    }
}
