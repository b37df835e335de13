// src/signing/context.rs
//! Deterministic request signing
//!
//! secp256k1 ECDSA with RFC 6979 nonces: the same key and payload always
//! yield the same signature, so a retried submission is byte-identical.

use crate::utils::errors::{AgentError, Result};
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::Serialize;
use std::fmt;

/// Length of a hex-encoded private key (32 bytes, no prefix)
pub const PRIVATE_KEY_HEX_LEN: usize = 64;

/// Signature material attached to one outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    /// Agent that produced the signature
    pub signer_id: String,

    /// Subnet the request is scoped to
    pub chain_id: String,

    /// Compact (r, s) signature, 64 bytes
    pub signature: Vec<u8>,

    /// Transmission time, seconds since epoch (not covered by the signature)
    pub timestamp: i64,
}

impl RequestSignature {
    pub fn signature_hex(&self) -> String {
        hex::encode(&self.signature)
    }
}

/// Private key plus the identity it signs for
#[derive(Clone)]
pub struct SigningContext {
    key: SigningKey,
    agent_id: String,
    subnet_id: String,
}

impl SigningContext {
    /// Parse a 64-character hex key
    pub fn from_hex(
        private_key: &str,
        agent_id: impl Into<String>,
        subnet_id: impl Into<String>,
    ) -> Result<Self> {
        let trimmed = private_key.trim();
        if trimmed.len() != PRIVATE_KEY_HEX_LEN {
            return Err(AgentError::InvalidKey(format!(
                "expected {} hex characters, got {}",
                PRIVATE_KEY_HEX_LEN,
                trimmed.len()
            )));
        }

        let bytes = hex::decode(trimmed)
            .map_err(|e| AgentError::InvalidKey(format!("not valid hex: {}", e)))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| AgentError::InvalidKey("not a valid secp256k1 scalar".to_string()))?;

        Ok(Self {
            key,
            agent_id: agent_id.into(),
            subnet_id: subnet_id.into(),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn subnet_id(&self) -> &str {
        &self.subnet_id
    }

    /// Compressed SEC1 public key, hex encoded
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_encoded_point(true).as_bytes())
    }

    /// Sign raw bytes
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let signature: Signature = self.key.sign(payload);
        signature.to_bytes().to_vec()
    }

    /// Sign a request for `method`, binding it to this subnet
    pub fn sign_request<T: Serialize>(&self, method: &str, request: &T) -> Result<RequestSignature> {
        let payload = self.signing_bytes(method, request)?;

        Ok(RequestSignature {
            signer_id: self.agent_id.clone(),
            chain_id: self.subnet_id.clone(),
            signature: self.sign(&payload),
            timestamp: chrono::Utc::now().timestamp(),
        })
    }

    /// Canonical bytes covered by a request signature
    pub fn signing_bytes<T: Serialize>(&self, method: &str, request: &T) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(request)?;

        let mut payload = Vec::with_capacity(self.subnet_id.len() + method.len() + body.len() + 2);
        payload.extend_from_slice(self.subnet_id.as_bytes());
        payload.push(b'|');
        payload.extend_from_slice(method.as_bytes());
        payload.push(b'|');
        payload.extend_from_slice(&body);
        Ok(payload)
    }

    /// Check a signature against a hex-encoded compressed public key
    pub fn verify(public_key_hex: &str, payload: &[u8], signature: &[u8]) -> Result<bool> {
        let key_bytes = hex::decode(public_key_hex)
            .map_err(|e| AgentError::InvalidKey(format!("public key not valid hex: {}", e)))?;
        let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes)
            .map_err(|_| AgentError::InvalidKey("not a valid secp256k1 public key".to_string()))?;

        let signature = match Signature::from_slice(signature) {
            Ok(signature) => signature,
            Err(_) => return Ok(false),
        };

        Ok(verifying_key.verify(payload, &signature).is_ok())
    }
}

impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field("agent_id", &self.agent_id)
            .field("subnet_id", &self.subnet_id)
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}
