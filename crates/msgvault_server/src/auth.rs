//! Bearer-token handling: hashing, extraction from request headers, and the
//! two lookups every authenticated handler needs — "which namespace does
//! this token belong to" and "is this the admin token". Actual bearer-token
//! *parsing* is explicitly an external collaborator's job (spec §5); this is
//! the minimal contract the store-facing layer needs to fulfil it.

use axum::http::{header, HeaderMap};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

/// SHA-256 hex digest of a bearer token, the form stored in the registry and
/// compared against (spec §3 "Namespace": "token-hash (unique, SHA-256 of a
/// bearer token)").
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

/// Generates a fresh random bearer token, returned to the caller exactly
/// once by `ns.create` — only its hash is ever persisted.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Resolves the namespace a request is authorized for. Every
/// namespace-scoped RPC method and both the `/subscribe` and `/import`
/// transports call this instead of taking a namespace argument directly
/// (spec §4.3 "resolve(token_hash) -> id").
pub async fn require_namespace(state: &AppState, headers: &HeaderMap) -> Result<String, ApiError> {
    let token = bearer_token(headers).ok_or(msgvault::Error::AuthRequired)?;
    let namespace = state.registry.resolve(hash_token(token)).await?;
    Ok(namespace)
}

/// Verifies the request carries the admin token, required by `ns.create`,
/// `ns.delete`, and `ns.list` (spec §4.3). Disabled in test mode, which is
/// signalled by the registry having been opened without an admin token hash.
pub async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token_hash = bearer_token(headers).map(hash_token);
    state.registry.check_admin(token_hash).await?;
    Ok(())
}
