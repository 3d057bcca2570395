//! Access-token claims decoding.
//!
//! Access tokens are JWTs issued by the API. The client never verifies the
//! signature (that is the server's job); it only peeks at the payload
//! segment to learn who the token belongs to and when it expires, so that
//! route guards can answer "still logged in?" without a network call.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::clock::Clock;
use crate::models::id::deserialize_id;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("token does not have three segments")]
    Format,

    #[error("payload is not valid base64url")]
    Encoding,

    #[error("payload is not a claims object: {0}")]
    Payload(String),
}

/// The subset of access-token claims the client cares about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject identifier (the user id as the server sees it). Issuers
    /// send it as a string or a bare number.
    #[serde(deserialize_with = "deserialize_id")]
    pub sub: String,
    /// Expiry, in epoch seconds. Fractional values are floored.
    #[serde(deserialize_with = "deserialize_epoch_secs")]
    pub exp: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEpoch {
    Int(i64),
    Float(f64),
}

fn deserialize_epoch_secs<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawEpoch::deserialize(deserializer)? {
        RawEpoch::Int(secs) => secs,
        RawEpoch::Float(secs) => secs.floor() as i64,
    })
}

impl AccessTokenClaims {
    /// Decode the claims carried in the middle segment of `token`.
    pub fn decode(token: &str) -> Result<Self, ClaimsError> {
        let mut segments = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(ClaimsError::Format);
        };

        // Some issuers keep the base64 padding; the no-pad engine rejects it.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|_| ClaimsError::Encoding)?;

        serde_json::from_slice(&bytes).map_err(|e| ClaimsError::Payload(e.to_string()))
    }

    /// True while `exp` is strictly in the future.
    pub fn is_live_at(&self, now_epoch_secs: i64) -> bool {
        self.exp > now_epoch_secs
    }

    /// Seconds left before expiry, floored at zero.
    pub fn seconds_remaining(&self, now_epoch_secs: i64) -> i64 {
        (self.exp - now_epoch_secs).max(0)
    }
}

/// Whether `token` decodes and has not yet expired.
///
/// Malformed tokens are reported as not live; the decode error never
/// reaches the caller.
pub fn is_token_live(token: &str, clock: &dyn Clock) -> bool {
    match AccessTokenClaims::decode(token) {
        Ok(claims) => claims.is_live_at(clock.now_epoch_secs()),
        Err(e) => {
            tracing::debug!(error = %e, "Access token could not be decoded");
            false
        }
    }
}
