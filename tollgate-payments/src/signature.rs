//! Webhook signature generation and verification

use crate::error::{GatewayError, GatewayResult};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Sha256, Sha512};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// HMAC digest used by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    HmacSha256,
    HmacSha512,
}

/// Shared-secret webhook signer
#[derive(Debug)]
pub struct WebhookSigner {
    secret: SecretString,
    algorithm: SignatureAlgorithm,
}

impl WebhookSigner {
    pub fn new(secret: impl Into<String>, algorithm: SignatureAlgorithm) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
            algorithm,
        }
    }

    fn mac_bytes(&self, data: &[u8]) -> GatewayResult<Vec<u8>> {
        let key = self.secret.expose_secret().as_bytes();
        let bytes = match self.algorithm {
            SignatureAlgorithm::HmacSha256 => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .map_err(|e| GatewayError::Config(e.to_string()))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            SignatureAlgorithm::HmacSha512 => {
                let mut mac = HmacSha512::new_from_slice(key)
                    .map_err(|e| GatewayError::Config(e.to_string()))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(bytes)
    }

    fn verify_bytes(&self, data: &[u8], expected: &[u8]) -> GatewayResult<()> {
        let key = self.secret.expose_secret().as_bytes();
        let verified = match self.algorithm {
            SignatureAlgorithm::HmacSha256 => {
                let mut mac = HmacSha256::new_from_slice(key)
                    .map_err(|e| GatewayError::Config(e.to_string()))?;
                mac.update(data);
                mac.verify_slice(expected).is_ok()
            }
            SignatureAlgorithm::HmacSha512 => {
                let mut mac = HmacSha512::new_from_slice(key)
                    .map_err(|e| GatewayError::Config(e.to_string()))?;
                mac.update(data);
                mac.verify_slice(expected).is_ok()
            }
        };

        if verified {
            Ok(())
        } else {
            Err(GatewayError::SignatureInvalid)
        }
    }

    /// Hex-encoded signature of the raw payload
    pub fn sign(&self, payload: &[u8]) -> GatewayResult<String> {
        Ok(hex::encode(self.mac_bytes(payload)?))
    }

    /// Verify a hex-encoded signature of the raw payload in constant time
    pub fn verify(&self, payload: &[u8], signature: &str) -> GatewayResult<()> {
        let expected = hex::decode(signature.trim()).map_err(|_| GatewayError::SignatureInvalid)?;
        self.verify_bytes(payload, &expected)
    }

    /// `t={timestamp},v1={hex}` over `"{timestamp}.{payload}"`
    pub fn sign_timestamped(&self, payload: &[u8], timestamp: i64) -> GatewayResult<String> {
        let signature = hex::encode(self.mac_bytes(&timestamped_payload(payload, timestamp))?);
        Ok(format!("t={},v1={}", timestamp, signature))
    }

    /// Verify a `t=..,v1=..` header, rejecting timestamps further than
    /// `tolerance_secs` from `now`. Any one matching `v1` entry suffices.
    pub fn verify_timestamped(
        &self,
        payload: &[u8],
        header: &str,
        tolerance_secs: u64,
        now: i64,
    ) -> GatewayResult<()> {
        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => timestamp = t.parse::<i64>().ok(),
                Some(("v1", v)) => candidates.push(v),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(GatewayError::SignatureInvalid)?;
        if (now - timestamp).unsigned_abs() > tolerance_secs {
            return Err(GatewayError::SignatureInvalid);
        }

        let signed = timestamped_payload(payload, timestamp);
        let matched = candidates.into_iter().any(|candidate| {
            hex::decode(candidate)
                .map(|expected| self.verify_bytes(&signed, &expected).is_ok())
                .unwrap_or(false)
        });

        if matched {
            Ok(())
        } else {
            Err(GatewayError::SignatureInvalid)
        }
    }
}

fn timestamped_payload(payload: &[u8], timestamp: i64) -> Vec<u8> {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    signed
}
