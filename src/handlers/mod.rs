//! Plain request/response handlers dispatched by [`crate::router`]. Each
//! one is a thin layer over [`crate::repository::Repository`] and
//! [`crate::token::TokenService`]; none of them touch the transport or
//! actor system directly, mirroring the way this project separates
//! business logic (`SessionManager`, `MeetingManager`) from the actors
//! that drive it.

pub mod auth;
pub mod calls;
pub mod contacts;

use std::sync::Arc;

use crate::repository::Repository;
use crate::token::TokenService;

pub struct Handlers {
    pub repository: Arc<dyn Repository>,
    pub tokens: Arc<TokenService>,
}

impl Handlers {
    pub fn new(repository: Arc<dyn Repository>, tokens: Arc<TokenService>) -> Self {
        Handlers { repository, tokens }
    }
}
