//! Pure logic shared between the blocking and suspendable transports: retry
//! classification, timeout arithmetic, and the TCP challenge-signing step.
//! Kept free of any `std::io`/`tokio` types so both flavors can call it
//! verbatim.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::SecretKey;
use serde::Deserialize;

use crate::error::{Error, ErrorCode, Result};

pub const RETRIABLE_STATUSES: &[u16] = &[500, 503, 504, 507, 509, 523, 524, 529, 599];

pub fn is_retriable_status(status: u16) -> bool {
    RETRIABLE_STATUSES.contains(&status)
}

/// `request_timeout + length / request_min_throughput` seconds, per attempt.
pub fn per_attempt_timeout(
    request_timeout: Duration,
    request_min_throughput: u64,
    length: usize,
) -> Duration {
    let scaled = if request_min_throughput > 0 {
        Duration::from_secs_f64(length as f64 / request_min_throughput as f64)
    } else {
        Duration::ZERO
    };
    request_timeout + scaled
}

/// `10ms ± uniform(-5, +5)ms`, clamped to non-negative.
pub fn retry_backoff() -> Duration {
    let jitter_ms: i64 = rand::Rng::gen_range(&mut rand::thread_rng(), -5..=5);
    Duration::from_millis((10i64 + jitter_ms).max(0) as u64)
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    line: Option<i64>,
    #[serde(rename = "errorId")]
    error_id: Option<String>,
}

/// Renders a non-2xx HTTP response body into a human-readable message,
/// parsing the documented `{code,message,line,errorId}` JSON shape when the
/// response declares `application/json`.
pub fn describe_error_body(status: u16, is_json: bool, body: &str) -> String {
    if is_json {
        if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
            return format!(
                "status {} code={:?} message={:?} line={:?} errorId={:?}",
                status, parsed.code, parsed.message, parsed.line, parsed.error_id
            );
        }
    }
    format!("status {} body={}", status, body)
}

/// Decodes `token` as a secp256r1 private key and signs `challenge` with
/// ECDSA/SHA-256, returning the base64url-encoded DER signature with a
/// trailing `\n`, ready to write to the TCP socket.
pub fn sign_challenge(token: &str, challenge: &[u8]) -> Result<String> {
    let key_bytes = URL_SAFE_NO_PAD
        .decode(token.trim_end_matches('='))
        .map_err(|e| Error::with_cause(ErrorCode::AuthError, "token is not valid base64url", e))?;
    let secret_key = SecretKey::from_slice(&key_bytes).map_err(|e| {
        Error::with_cause(ErrorCode::AuthError, "token is not a valid secp256r1 key", e)
    })?;
    let signing_key = SigningKey::from(secret_key);
    let signature: Signature = signing_key.sign(challenge);
    let der = signature.to_der();
    let mut encoded = URL_SAFE_NO_PAD.encode(der.as_bytes());
    encoded.push('\n');
    Ok(encoded)
}
