//! Token models: redacted secrets, cached access tokens, and persisted refresh payloads.

pub mod cached;
pub mod payload;
pub mod secret;
