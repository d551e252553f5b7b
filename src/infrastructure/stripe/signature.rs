//! `Stripe-Signature` header verification.
//!
//! The header looks like `t=1700000000,v1=<hex>,v1=<hex>`. Each `v1` is an
//! HMAC-SHA256 over `"{t}.{raw body}"` keyed with the endpoint secret.

use crate::error::{Result, ServiceError};
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_SCHEME: &str = "v1";

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Result<()> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    /// Verifies against an explicit clock reading, in unix seconds.
    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<()> {
        let header = parse_header(header)?;

        let age = now.abs_diff(header.timestamp);
        if age > self.tolerance_secs.unsigned_abs() {
            tracing::warn!(
                event_timestamp = header.timestamp,
                current_time = now,
                age_secs = age,
                "Webhook timestamp outside tolerance"
            );
            return Err(ServiceError::InvalidSignature(format!(
                "timestamp outside tolerance ({age} seconds)"
            )));
        }

        let mac = self.mac_for(header.timestamp, payload)?;
        let matched = header
            .signatures
            .iter()
            .any(|candidate| mac.clone().verify_slice(candidate).is_ok());
        if !matched {
            tracing::warn!("Webhook signature mismatch");
            return Err(ServiceError::InvalidSignature(
                "no matching v1 signature".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds a header value for `payload`, as the provider would send it.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
        let digest = self.mac_for(timestamp, payload)?.finalize().into_bytes();
        Ok(format!(
            "t={timestamp},{SIGNATURE_SCHEME}={}",
            hex::encode(digest)
        ))
    }

    fn mac_for(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
        let secret = self.secret.expose_secret();
        if secret.is_empty() {
            return Err(ServiceError::InvalidSignature(
                "webhook secret is not configured".to_string(),
            ));
        }
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ServiceError::InvalidSignature(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

fn parse_header(header: &str) -> Result<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    ServiceError::InvalidSignature(format!("bad timestamp {value:?}"))
                })?);
            }
            SIGNATURE_SCHEME => {
                // Undecodable entries cannot match; skip them.
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ServiceError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(ServiceError::InvalidSignature(
            "missing v1 signature".to_string(),
        ));
    }
    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}
