/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use std::sync::Arc;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{get, web, App, Error, HttpRequest, HttpResponse, HttpServer};
use actix_web_actors::ws;

use callsign::call::{CallSupervisor, SetSessionRegistry};
use callsign::config::Config;
use callsign::connection::ConnectionSession;
use callsign::handlers::Handlers;
use callsign::registry::SessionRegistry;
use callsign::repository::PgRepository;
use callsign::router::Router;
use callsign::token::TokenService;

struct AppState {
    router: Arc<Router>,
    session_registry: actix::Addr<SessionRegistry>,
    call_supervisor: actix::Addr<CallSupervisor>,
    handshake_timeout: std::time::Duration,
    heartbeat_interval: std::time::Duration,
    heartbeat_timeout: std::time::Duration,
}

#[get("/connect")]
async fn connect(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session = ConnectionSession::new(
        state.router.clone(),
        state.session_registry.clone(),
        state.call_supervisor.clone(),
        state.handshake_timeout,
        state.heartbeat_interval,
        state.heartbeat_timeout,
    );
    ws::start(session, &req, stream)
}

#[get("/metrics")]
async fn metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(callsign::metrics::render())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("starting");

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::error!("invalid configuration: {e}");
        std::process::exit(1);
    });

    let repository = PgRepository::connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    repository.migrate().await.expect("failed to bootstrap schema");
    let repository: Arc<dyn callsign::repository::Repository> = Arc::new(repository);

    let private_key = std::fs::read(&config.jwt_rsa_private_key_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", config.jwt_rsa_private_key_path));
    let public_key = std::fs::read(&config.jwt_rsa_public_key_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", config.jwt_rsa_public_key_path));

    let tokens = Arc::new(
        TokenService::new(
            &private_key,
            &public_key,
            config.access_ttl,
            config.refresh_ttl,
            repository.clone(),
        )
        .expect("failed to initialize token service"),
    );

    let handlers = Arc::new(Handlers::new(repository.clone(), tokens.clone()));

    let call_supervisor = CallSupervisor::new(repository.clone(), config.ring_timeout).start();
    let session_registry = SessionRegistry::new(call_supervisor.clone()).start();
    call_supervisor.do_send(SetSessionRegistry(session_registry.clone()));

    let router = Arc::new(Router {
        handlers,
        tokens,
        session_registry: session_registry.clone(),
        call_supervisor: call_supervisor.clone(),
    });

    let bind_addr = config.bind_addr.clone();
    let handshake_timeout = config.handshake_timeout;
    let heartbeat_interval = config.heartbeat_interval;
    let heartbeat_timeout = config.heartbeat_timeout;

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(AppState {
                router: router.clone(),
                session_registry: session_registry.clone(),
                call_supervisor: call_supervisor.clone(),
                handshake_timeout,
                heartbeat_interval,
                heartbeat_timeout,
            }))
            .service(connect)
            .service(metrics)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
