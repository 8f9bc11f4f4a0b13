//! Ed25519 signing keys and the rotating key set used for access tokens.
//!
//! The key set is an immutable snapshot behind an `Arc`. Rotation builds a
//! new snapshot and swaps the pointer; verifiers clone the pointer and never
//! observe a half-rotated set.

use crate::application_port::SessionError;
use crate::domain_model::{KeyId, PublicKeyInfo};
use crate::logger::*;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

pub const SIGNING_ALGORITHM: &str = "EdDSA";

pub struct SigningKey {
    kid: KeyId,
    public_key: Vec<u8>,
    created_at: DateTime<Utc>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SigningKey {
    pub fn generate() -> Result<Self, SessionError> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| SessionError::Internal(format!("key generation failed: {e}")))?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| SessionError::Internal(format!("generated key rejected: {e}")))?;
        let public_key = pair.public_key().as_ref().to_vec();

        Ok(SigningKey {
            kid: key_id_for(&public_key),
            encoding_key: EncodingKey::from_ed_der(pkcs8.as_ref()),
            decoding_key: DecodingKey::from_ed_der(&public_key),
            public_key,
            created_at: Utc::now(),
        })
    }

    pub fn kid(&self) -> &KeyId {
        &self.kid
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn public_info(&self) -> PublicKeyInfo {
        PublicKeyInfo {
            kid: self.kid.clone(),
            algorithm: SIGNING_ALGORITHM.to_string(),
            public_key: URL_SAFE_NO_PAD.encode(&self.public_key),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

fn key_id_for(public_key: &[u8]) -> KeyId {
    let digest = Sha256::digest(public_key);
    KeyId(URL_SAFE_NO_PAD.encode(&digest[..12]))
}

#[derive(Debug, Clone)]
struct RetiredKey {
    key: Arc<SigningKey>,
    retired_at: DateTime<Utc>,
}

/// One consistent view of the signing keys.
#[derive(Debug, Clone)]
pub struct KeySet {
    current: Arc<SigningKey>,
    retired: Vec<RetiredKey>,
}

impl KeySet {
    pub fn current(&self) -> &Arc<SigningKey> {
        &self.current
    }

    pub fn find(&self, kid: &KeyId) -> Option<&Arc<SigningKey>> {
        if self.current.kid() == kid {
            return Some(&self.current);
        }
        self.retired
            .iter()
            .find(|r| r.key.kid() == kid)
            .map(|r| &r.key)
    }

    /// Current key first, then retired keys newest first.
    pub fn verification_keys(&self) -> Vec<PublicKeyInfo> {
        std::iter::once(&self.current)
            .chain(self.retired.iter().rev().map(|r| &r.key))
            .map(|k| k.public_info())
            .collect()
    }

    pub fn len(&self) -> usize {
        1 + self.retired.len()
    }
}

pub struct KeyStore {
    keys: RwLock<Arc<KeySet>>,
    /// How long a retired key keeps verifying: the longest access-token lifetime.
    retention: chrono::Duration,
}

impl KeyStore {
    pub fn new(max_token_lifetime: Duration) -> Result<Self, SessionError> {
        let retention = chrono::Duration::from_std(max_token_lifetime)
            .map_err(|e| SessionError::Config(format!("access token ttl out of range: {e}")))?;
        let current = Arc::new(SigningKey::generate()?);
        info!(kid = %current.kid(), "signing key created");

        Ok(KeyStore {
            keys: RwLock::new(Arc::new(KeySet {
                current,
                retired: Vec::new(),
            })),
            retention,
        })
    }

    pub fn snapshot(&self) -> Arc<KeySet> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn rotate(&self) -> Result<KeyId, SessionError> {
        self.rotate_at(Utc::now())
    }

    pub(crate) fn rotate_at(&self, now: DateTime<Utc>) -> Result<KeyId, SessionError> {
        // Generate outside the write lock.
        let next = Arc::new(SigningKey::generate()?);
        let kid = next.kid().clone();

        let mut guard = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let mut retired: Vec<RetiredKey> = guard
            .retired
            .iter()
            .filter(|r| r.retired_at + self.retention > now)
            .cloned()
            .collect();
        let previous = guard.current.clone();
        retired.push(RetiredKey {
            key: previous,
            retired_at: now,
        });
        let retained = retired.len();
        *guard = Arc::new(KeySet {
            current: next,
            retired,
        });
        drop(guard);

        info!(%kid, retained, "signing key rotated");
        Ok(kid)
    }

    /// Drops retired keys whose tokens can no longer be valid. Returns how many were dropped.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let before = guard.retired.len();
        let retired: Vec<RetiredKey> = guard
            .retired
            .iter()
            .filter(|r| r.retired_at + self.retention > now)
            .cloned()
            .collect();
        let dropped = before - retired.len();
        if dropped > 0 {
            let current = guard.current.clone();
            *guard = Arc::new(KeySet { current, retired });
            debug!(dropped, "retired signing keys discarded");
        }
        dropped
    }
}
