//! Payment-provider webhook verification.
//!
//! Verifies the HMAC signature and timestamp of an inbound notification
//! before anything downstream trusts its contents, then parses the payload
//! into a [`PaymentCallback`].

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::Result;

use super::error::SettlementError;
use super::payment::PaymentCallback;

/// Verifies provider webhook signatures.
///
/// The signing secret is stored as a [`SecretString`] so it never appears in
/// logs or debug output. The signature header carries a unix timestamp and a
/// hex HMAC-SHA256 over `"{timestamp}.{body}"`, in the form
/// `t=1700000000,v1=deadbeef...`.
pub struct WebhookVerifier {
    signing_secret: SecretString,
    tolerance_seconds: i64,
}

impl WebhookVerifier {
    /// Create a verifier with the given replay-window tolerance.
    #[must_use]
    pub fn new(signing_secret: impl Into<SecretString>, tolerance_seconds: i64) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            tolerance_seconds,
        }
    }

    /// Verify the signature header and parse the payload.
    ///
    /// # Errors
    /// Returns a bad-request error when the header is malformed, the
    /// timestamp falls outside the tolerance window, the signature does not
    /// match, or the payload is not a valid callback.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<PaymentCallback> {
        let parts = parse_signature_header(signature_header)?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0) as i64;
        let age = (now - parts.timestamp).abs();
        if age > self.tolerance_seconds {
            return Err(SettlementError::WebhookTimestampExpired { age_seconds: age }.into());
        }

        let signed_payload =
            format!("{}.{}", parts.timestamp, String::from_utf8_lossy(payload));
        let expected = compute_signature(
            self.signing_secret.expose_secret(),
            signed_payload.as_bytes(),
        )?;

        let expected_bytes = hex::decode(&expected)
            .map_err(|_| SettlementError::internal("hex encode produced invalid hex"))?;
        let provided_bytes = hex::decode(&parts.signature)
            .map_err(|_| SettlementError::InvalidWebhookSignature)?;

        if expected_bytes.ct_eq(&provided_bytes).unwrap_u8() != 1 {
            return Err(SettlementError::InvalidWebhookSignature.into());
        }

        // Log the parse failure internally, return a generic message to the
        // provider
        let callback: PaymentCallback = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(
                target: "turnstile::settlement::webhook",
                error = %e,
                "Failed to parse webhook payload"
            );
            SettlementError::InvalidWebhookPayload {
                message: "malformed JSON payload".to_string(),
            }
        })?;

        Ok(callback)
    }
}

/// Parsed signature header parts.
struct SignatureParts {
    timestamp: i64,
    signature: String,
}

fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            return Err(SettlementError::InvalidWebhookSignature.into());
        };

        match key.trim() {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value.to_string()),
            _ => {} // Ignore other scheme versions
        }
    }

    Ok(SignatureParts {
        timestamp: timestamp.ok_or(SettlementError::InvalidWebhookSignature)?,
        signature: signature.ok_or(SettlementError::InvalidWebhookSignature)?,
    })
}

/// Compute a hex HMAC-SHA256 signature.
fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SettlementError::internal("HMAC key error"))?;
    mac.update(payload);

    Ok(hex::encode(mac.finalize().into_bytes()))
}
