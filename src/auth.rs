//! Pilot-token authentication.
//!
//! Tokens are opaque 32-byte random strings handed to pilot institutions.
//! Only an HMAC-SHA256 hash (keyed by a deployment salt) is ever stored or
//! configured; verification hashes the presented token and looks the hash up
//! in the store. The orchestrator never sees raw credentials — it receives
//! the resolved institution id.

use crate::request::is_plausible_token;
use crate::store::{PilotStore, PilotTokenRecord};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const MIN_SALT_LENGTH: usize = 16;
const TOKEN_BYTES: usize = 32;

/// Token verification failures.
#[derive(Debug, Error)]
pub enum PilotTokenError {
    #[error("Pilot token is missing.")]
    Missing,
    #[error("Pilot token is invalid.")]
    Invalid,
    #[error("Pilot token has been revoked.")]
    Revoked,
    #[error("Pilot token has expired.")]
    Expired,
    #[error("token store unavailable: {0}")]
    Store(String),
}

impl PilotTokenError {
    pub fn code(&self) -> &'static str {
        match self {
            PilotTokenError::Missing => "TOKEN_MISSING",
            PilotTokenError::Invalid => "TOKEN_INVALID",
            PilotTokenError::Revoked => "TOKEN_REVOKED",
            PilotTokenError::Expired => "TOKEN_EXPIRED",
            PilotTokenError::Store(_) => "UNKNOWN_ERROR",
        }
    }

    pub fn retryable(&self) -> bool {
        // A replacement token resolves expiry; everything else needs an operator.
        matches!(self, PilotTokenError::Expired)
    }
}

/// Resolved identity for an authenticated request.
#[derive(Debug, Clone)]
pub struct PilotIdentity {
    pub institution_id: String,
    pub token_hash: String,
}

/// Read the token salt from `SPROUT_TOKEN_SALT`, enforcing a minimum length.
pub fn token_salt_from_env() -> anyhow::Result<String> {
    let salt = std::env::var("SPROUT_TOKEN_SALT").unwrap_or_default();
    if salt.trim().len() < MIN_SALT_LENGTH {
        anyhow::bail!(
            "SPROUT_TOKEN_SALT must be set to a secret of at least {} characters",
            MIN_SALT_LENGTH
        );
    }
    Ok(salt)
}

/// HMAC-SHA256 hash of a pilot token, hex encoded.
pub fn hash_token(salt: &str, token: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(token.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Mint a fresh pilot token: 32 random bytes, base64url, no padding.
pub fn mint_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Verify a presented pilot token against the store.
pub async fn verify_pilot_token(
    store: &dyn PilotStore,
    salt: &str,
    pilot_token: &str,
) -> Result<PilotIdentity, PilotTokenError> {
    let token = pilot_token.trim();
    if !is_plausible_token(token) {
        return Err(PilotTokenError::Missing);
    }

    let token_hash = hash_token(salt, token);
    let record: Option<PilotTokenRecord> = store
        .find_token(&token_hash)
        .await
        .map_err(|err| PilotTokenError::Store(err.to_string()))?;

    let Some(record) = record else {
        return Err(PilotTokenError::Invalid);
    };

    if record.revoked_at.is_some() {
        return Err(PilotTokenError::Revoked);
    }

    if record.expires_at <= Utc::now() {
        return Err(PilotTokenError::Expired);
    }

    Ok(PilotIdentity {
        institution_id: record.institution_id,
        token_hash: record.token_hash,
    })
}
