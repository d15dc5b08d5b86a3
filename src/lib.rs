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

pub mod call;
pub mod caption;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod media;
pub mod message;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod repository;
pub mod router;
pub mod token;
pub mod transcriber;

pub const VALID_USERNAME_PATTERN: &str = r"^[a-zA-Z0-9_\-\.]{3,32}$";
