// Copyright (c) quilldoc.dev 2025
// This file is licensed under the AGPL-3.0-or-later

//! Authentication: the password core (PBKDF2-HMAC-SHA256 triples), the
//! session store over `["sessions", token]`, and the account service that
//! ties registration, login and profile mutation together.

pub mod password;
pub mod service;
pub mod session;

pub use service::{AuthService, LoginRequest, ProfilePatch, RegisterRequest};
pub use session::{ClientInfo, SessionStore};
