//! Colloquy credential primitives.
//!
//! - `PasswordVault`: Argon2id hashing for stored passwords.
//! - `TokenIssuer`: HS256 access tokens (stateless) and opaque refresh tokens
//!   (stateful, checked against the refresh-token store by the caller).

pub mod password;
pub mod tokens;

pub use password::PasswordVault;
pub use tokens::{TokenIssuer, refresh_fingerprint};
