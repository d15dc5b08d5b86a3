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
 */

//! End-to-end signup/authenticate/refresh/logout scenario against a real
//! Postgres-backed repository, gated behind `DATABASE_URL`.

mod test_helpers;

use std::sync::Arc;

use callsign::errors::TokenError;
use callsign::handlers::Handlers;
use callsign::repository::{PgRepository, Repository};
use serial_test::serial;
use test_helpers::{cleanup_test_users, get_test_pool, test_token_service};

#[tokio::test]
#[serial]
async fn signup_then_authenticate_then_refresh_rotation() {
    let pool = get_test_pool().await;
    let usernames = ["alice_auth_flow"];
    cleanup_test_users(&pool, &usernames).await;

    let repository: Arc<dyn Repository> = Arc::new(PgRepository::from_pool(pool.clone()));
    let tokens = Arc::new(test_token_service(repository.clone()));
    let handlers = Handlers::new(repository.clone(), tokens.clone());

    let signup = handlers
        .signup("alice_auth_flow", "correcthorsebattery1", "Alice")
        .await
        .expect("signup should succeed for a fresh username");
    let user_id = signup["user_id"].as_str().unwrap().to_string();
    let access_token = signup["access_token"].as_str().unwrap().to_string();
    let refresh_token = signup["refresh_token"].as_str().unwrap().to_string();

    let again = handlers
        .signup("alice_auth_flow", "correcthorsebattery1", "Alice")
        .await;
    assert!(again.is_err(), "signing up with a taken username must fail");

    let authed = handlers
        .authenticate("alice_auth_flow", "correcthorsebattery1")
        .await
        .expect("authenticate should succeed with the right password");
    assert_eq!(authed["user_id"].as_str().unwrap(), user_id);

    let wrong_password = handlers.authenticate("alice_auth_flow", "wrong-password").await;
    assert!(wrong_password.is_err());

    let expected_user_id: uuid::Uuid = user_id.parse().unwrap();
    assert!(tokens.verify_access(&access_token, expected_user_id).is_ok());

    let rotated = handlers
        .refresh_token(&refresh_token)
        .await
        .expect("fresh refresh token should rotate");
    assert_eq!(rotated["user_id"].as_str().unwrap(), user_id);
    assert_eq!(rotated["username"].as_str().unwrap(), "alice_auth_flow");
    assert_eq!(rotated["name"].as_str().unwrap(), "Alice");
    let rotated_access = rotated["access_token"].as_str().unwrap();
    assert!(tokens.verify_access(rotated_access, expected_user_id).is_ok());
    assert!(rotated.get("refresh_token").is_none(), "the wire response must not leak a raw refresh token");

    let replay = handlers.refresh_token(&refresh_token).await;
    assert!(replay.is_err(), "a rotated-out refresh token must not be redeemable twice");

    // Drive a second refresh token through the service directly (bypassing
    // the handler, whose wire response never discloses the rotated value)
    // to confirm logout revokes it too.
    let second_pair = tokens.issue(expected_user_id).await.unwrap();
    let rotated_again = tokens.rotate(&second_pair.refresh_token).await.unwrap();

    handlers.logout(expected_user_id).await.expect("logout should succeed");
    let after_logout = tokens.rotate(&rotated_again.refresh_token).await;
    assert!(after_logout.is_err(), "logout revokes every outstanding refresh token");

    cleanup_test_users(&pool, &usernames).await;
}

#[tokio::test]
#[serial]
async fn access_token_does_not_verify_for_a_different_user() {
    let pool = get_test_pool().await;
    let usernames = ["bob_auth_flow", "carol_auth_flow"];
    cleanup_test_users(&pool, &usernames).await;

    let repository: Arc<dyn Repository> = Arc::new(PgRepository::from_pool(pool.clone()));
    let tokens = test_token_service(repository.clone());
    let handlers = Handlers::new(repository.clone(), Arc::new(test_token_service(repository.clone())));

    let bob = handlers
        .signup("bob_auth_flow", "correcthorsebattery1", "Bob")
        .await
        .unwrap();
    let carol = handlers
        .signup("carol_auth_flow", "correcthorsebattery1", "Carol")
        .await
        .unwrap();

    let bob_access = bob["access_token"].as_str().unwrap();
    let carol_id: uuid::Uuid = carol["user_id"].as_str().unwrap().parse().unwrap();

    assert_eq!(
        tokens.verify_access(bob_access, carol_id),
        Err(TokenError::UserMismatch)
    );

    cleanup_test_users(&pool, &usernames).await;
}
