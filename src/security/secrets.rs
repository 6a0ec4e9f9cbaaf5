//! Signing secret ring.
//!
//! # Responsibilities
//! - Sign new tokens with the single active secret
//! - Verify tokens against every non-retired secret, newest first
//! - Rotate (demote active to retiring, install new active) and retire
//!
//! # Design Decisions
//! - Algorithm is pinned per secret; the token header cannot pick it
//! - Mutations publish a whole new snapshot through `ArcSwap`, so a
//!   verification in flight sees either the old set or the new one
//! - Retired secrets stay listed for audit but never verify

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::{AuthError, SecretError};

/// Minimum secret material length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// HMAC algorithms a secret may be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::HS256 => "HS256",
            SigningAlgorithm::HS384 => "HS384",
            SigningAlgorithm::HS512 => "HS512",
        }
    }

    fn from_jwt(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::HS256 => Some(SigningAlgorithm::HS256),
            Algorithm::HS384 => Some(SigningAlgorithm::HS384),
            Algorithm::HS512 => Some(SigningAlgorithm::HS512),
            _ => None,
        }
    }
}

impl From<SigningAlgorithm> for Algorithm {
    fn from(alg: SigningAlgorithm) -> Self {
        match alg {
            SigningAlgorithm::HS256 => Algorithm::HS256,
            SigningAlgorithm::HS384 => Algorithm::HS384,
            SigningAlgorithm::HS512 => Algorithm::HS512,
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(SigningAlgorithm::HS256),
            "HS384" => Ok(SigningAlgorithm::HS384),
            "HS512" => Ok(SigningAlgorithm::HS512),
            other => Err(SecretError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStatus {
    Active,
    Retiring,
    Retired,
}

/// A single signing secret.
#[derive(Clone)]
pub struct Secret {
    id: String,
    material: Vec<u8>,
    algorithm: SigningAlgorithm,
    status: SecretStatus,
    activated_at: u64,
}

impl Secret {
    pub fn new(
        id: impl Into<String>,
        material: impl Into<Vec<u8>>,
        algorithm: SigningAlgorithm,
    ) -> Result<Self, SecretError> {
        let id = id.into();
        let material = material.into();
        if material.len() < MIN_SECRET_LEN {
            return Err(SecretError::WeakMaterial {
                id,
                len: material.len(),
                min: MIN_SECRET_LEN,
            });
        }
        Ok(Self {
            id,
            material,
            algorithm,
            status: SecretStatus::Active,
            activated_at: 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    pub fn status(&self) -> SecretStatus {
        self.status
    }

    pub fn activated_at(&self) -> u64 {
        self.activated_at
    }

    fn with_status(&self, status: SecretStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    fn info(&self) -> SecretInfo {
        SecretInfo {
            id: self.id.clone(),
            status: self.status,
            algorithm: self.algorithm,
            activated_at: self.activated_at,
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("id", &self.id)
            .field("material", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("status", &self.status)
            .field("activated_at", &self.activated_at)
            .finish()
    }
}

/// Public view of a secret, safe to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretInfo {
    pub id: String,
    pub status: SecretStatus,
    pub algorithm: SigningAlgorithm,
    pub activated_at: u64,
}

/// Immutable view of the ring. Index 0 is the active secret, the rest are
/// ordered by how recently they were active.
#[derive(Debug)]
struct RingSnapshot {
    secrets: Vec<Arc<Secret>>,
}

impl RingSnapshot {
    fn active(&self) -> &Arc<Secret> {
        // Constructors and mutations keep an active secret at index 0.
        &self.secrets[0]
    }
}

/// Ordered collection of signing secrets.
#[derive(Debug)]
pub struct SecretRing {
    snapshot: ArcSwap<RingSnapshot>,
    // Serializes rotate/retire; readers never take it.
    write_lock: Mutex<()>,
    clock: SharedClock,
}

impl SecretRing {
    /// Build a ring from an ordered list. The first secret becomes active,
    /// the rest are retiring.
    pub fn new(secrets: Vec<Secret>, clock: SharedClock) -> Result<Self, SecretError> {
        if secrets.is_empty() {
            return Err(SecretError::Empty);
        }

        let mut seen = HashSet::new();
        for secret in &secrets {
            if !seen.insert(secret.id.clone()) {
                return Err(SecretError::DuplicateId(secret.id.clone()));
            }
        }

        let now = clock.now_secs();
        let secrets = secrets
            .into_iter()
            .enumerate()
            .map(|(i, mut s)| {
                s.status = if i == 0 {
                    SecretStatus::Active
                } else {
                    SecretStatus::Retiring
                };
                if s.activated_at == 0 {
                    s.activated_at = now;
                }
                Arc::new(s)
            })
            .collect();

        Ok(Self {
            snapshot: ArcSwap::from_pointee(RingSnapshot { secrets }),
            write_lock: Mutex::new(()),
            clock,
        })
    }

    /// Id of the secret new tokens are signed with.
    pub fn active_id(&self) -> String {
        self.snapshot.load().active().id.clone()
    }

    /// Sign `claims` with the active secret.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        let snapshot = self.snapshot.load();
        let active = snapshot.active();

        let mut header = Header::new(active.algorithm.into());
        header.kid = Some(active.id.clone());

        encode(&header, claims, &EncodingKey::from_secret(&active.material))
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Verify a token's signature and decode its claims.
    ///
    /// Expiry is not checked here; callers compare `exp` against their own
    /// clock.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::Malformed)?;
        let Some(token_alg) = SigningAlgorithm::from_jwt(header.alg) else {
            tracing::debug!(alg = ?header.alg, "Rejecting token with non-HMAC algorithm");
            return Err(AuthError::BadSignature);
        };

        let snapshot = self.snapshot.load();
        for secret in snapshot
            .secrets
            .iter()
            .filter(|s| s.status != SecretStatus::Retired && s.algorithm == token_alg)
        {
            let mut validation = Validation::new(secret.algorithm.into());
            validation.validate_exp = false;
            validation.validate_aud = false;
            validation.required_spec_claims = HashSet::new();

            match decode::<T>(token, &DecodingKey::from_secret(&secret.material), &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => match e.kind() {
                    ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => continue,
                    ErrorKind::InvalidToken
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_)
                    | ErrorKind::MissingRequiredClaim(_) => return Err(AuthError::Malformed),
                    _ => continue,
                },
            }
        }

        Err(AuthError::BadSignature)
    }

    /// Install `secret` as the new active secret. The previous active secret
    /// keeps verifying as `retiring`.
    pub fn rotate(&self, secret: Secret) -> Result<(), SecretError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot.load_full();

        if current.secrets.iter().any(|s| s.id == secret.id) {
            return Err(SecretError::DuplicateId(secret.id));
        }

        let mut installed = secret;
        installed.status = SecretStatus::Active;
        installed.activated_at = self.clock.now_secs();
        let new_id = installed.id.clone();

        let mut secrets = Vec::with_capacity(current.secrets.len() + 1);
        secrets.push(Arc::new(installed));
        for s in &current.secrets {
            if s.status == SecretStatus::Active {
                secrets.push(Arc::new(s.with_status(SecretStatus::Retiring)));
            } else {
                secrets.push(s.clone());
            }
        }

        self.snapshot.store(Arc::new(RingSnapshot { secrets }));
        tracing::info!(
            active = %new_id,
            previous = %current.active().id,
            "Signing secret rotated"
        );
        Ok(())
    }

    /// Remove a retiring secret from the verification set.
    pub fn retire(&self, id: &str) -> Result<(), SecretError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot.load_full();

        let target = current
            .secrets
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| SecretError::UnknownSecret(id.to_string()))?;

        match target.status {
            SecretStatus::Active => return Err(SecretError::RetireActive(id.to_string())),
            SecretStatus::Retired => return Ok(()),
            SecretStatus::Retiring => {}
        }

        let secrets = current
            .secrets
            .iter()
            .map(|s| {
                if s.id == id {
                    Arc::new(s.with_status(SecretStatus::Retired))
                } else {
                    s.clone()
                }
            })
            .collect();

        self.snapshot.store(Arc::new(RingSnapshot { secrets }));
        tracing::info!(secret = %id, "Signing secret retired");
        Ok(())
    }

    pub fn list(&self) -> Vec<SecretInfo> {
        self.snapshot.load().secrets.iter().map(|s| s.info()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::{json, Value};

    fn secret(id: &str, alg: SigningAlgorithm) -> Secret {
        Secret::new(id, format!("{id}-material-that-is-long-enough-0123456789"), alg).unwrap()
    }

    fn ring(secrets: Vec<Secret>) -> SecretRing {
        SecretRing::new(secrets, Arc::new(ManualClock::at_secs(1_000))).unwrap()
    }

    #[test]
    fn test_short_material_rejected() {
        let err = Secret::new("k1", "short", SigningAlgorithm::HS256).unwrap_err();
        assert!(matches!(err, SecretError::WeakMaterial { len: 5, .. }));
    }

    #[test]
    fn test_debug_redacts_material() {
        let s = secret("k1", SigningAlgorithm::HS256);
        let out = format!("{:?}", s);
        assert!(out.contains("<redacted>"));
        assert!(!out.contains("material-that-is-long"));
    }

    #[test]
    fn test_empty_and_duplicate_rings_rejected() {
        let clock: SharedClock = Arc::new(ManualClock::default());
        assert_eq!(SecretRing::new(vec![], clock.clone()).unwrap_err(), SecretError::Empty);
        let err = SecretRing::new(
            vec![secret("a", SigningAlgorithm::HS256), secret("a", SigningAlgorithm::HS256)],
            clock,
        )
        .unwrap_err();
        assert_eq!(err, SecretError::DuplicateId("a".into()));
    }

    #[test]
    fn test_sign_and_verify_with_kid() {
        let ring = ring(vec![secret("s1", SigningAlgorithm::HS256)]);
        let token = ring.sign(&json!({"sub": "alice"})).unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("s1"));

        let claims: Value = ring.verify(&token).unwrap();
        assert_eq!(claims["sub"], "alice");
    }

    #[test]
    fn test_rotation_keeps_old_tokens_until_retired() {
        let ring = ring(vec![secret("s1", SigningAlgorithm::HS256)]);
        let old = ring.sign(&json!({"sub": "alice"})).unwrap();

        ring.rotate(secret("s2", SigningAlgorithm::HS256)).unwrap();
        assert_eq!(ring.active_id(), "s2");
        assert!(ring.verify::<Value>(&old).is_ok());

        let new = ring.sign(&json!({"sub": "bob"})).unwrap();
        assert_eq!(decode_header(&new).unwrap().kid.as_deref(), Some("s2"));

        ring.retire("s1").unwrap();
        assert_eq!(ring.verify::<Value>(&old).unwrap_err(), AuthError::BadSignature);
        assert!(ring.verify::<Value>(&new).is_ok());
    }

    #[test]
    fn test_verify_during_concurrent_rotation() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let ring = ring(vec![secret("s1", SigningAlgorithm::HS256)]);
        let tokens: Vec<String> = (0..8)
            .map(|i| ring.sign(&json!({ "sub": format!("user-{i}") })).unwrap())
            .collect();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let verifiers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let mut checked = 0u64;
                        loop {
                            let finished = done.load(Ordering::Acquire);
                            for token in &tokens {
                                assert!(ring.verify::<Value>(token).is_ok(), "s1 token rejected mid-rotation");
                                checked += 1;
                            }
                            if finished {
                                break checked;
                            }
                        }
                    })
                })
                .collect();

            scope.spawn(|| {
                for generation in 2..40 {
                    ring.rotate(secret(&format!("s{generation}"), SigningAlgorithm::HS256)).unwrap();
                    if generation > 2 {
                        ring.retire(&format!("s{}", generation - 1)).unwrap();
                    }
                }
                done.store(true, Ordering::Release);
            });

            for verifier in verifiers {
                assert!(verifier.join().unwrap() > 0);
            }
        });

        assert_eq!(ring.active_id(), "s39");
        ring.retire("s1").unwrap();
        for token in &tokens {
            assert_eq!(ring.verify::<Value>(token).unwrap_err(), AuthError::BadSignature);
        }
    }

    #[test]
    fn test_statuses_after_rotation() {
        let ring = ring(vec![secret("s1", SigningAlgorithm::HS256)]);
        ring.rotate(secret("s2", SigningAlgorithm::HS512)).unwrap();
        ring.rotate(secret("s3", SigningAlgorithm::HS256)).unwrap();
        ring.retire("s1").unwrap();

        let list = ring.list();
        let statuses: Vec<_> = list.iter().map(|s| (s.id.as_str(), s.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("s3", SecretStatus::Active),
                ("s2", SecretStatus::Retiring),
                ("s1", SecretStatus::Retired),
            ]
        );
    }

    #[test]
    fn test_retire_rules() {
        let ring = ring(vec![secret("s1", SigningAlgorithm::HS256)]);
        assert_eq!(ring.retire("s1").unwrap_err(), SecretError::RetireActive("s1".into()));
        assert_eq!(ring.retire("nope").unwrap_err(), SecretError::UnknownSecret("nope".into()));
        assert_eq!(
            ring.rotate(secret("s1", SigningAlgorithm::HS256)).unwrap_err(),
            SecretError::DuplicateId("s1".into())
        );
    }

    #[test]
    fn test_algorithm_is_pinned_per_secret() {
        let hs256 = ring(vec![secret("s1", SigningAlgorithm::HS256)]);
        // Same material, different pinned algorithm.
        let hs512 = ring(vec![secret("s1", SigningAlgorithm::HS512)]);

        let token = hs512.sign(&json!({"sub": "alice"})).unwrap();
        assert_eq!(hs256.verify::<Value>(&token).unwrap_err(), AuthError::BadSignature);
    }

    #[test]
    fn test_foreign_secret_and_garbage() {
        let ring_a = ring(vec![secret("a", SigningAlgorithm::HS256)]);
        let ring_b = ring(vec![secret("b", SigningAlgorithm::HS256)]);
        let token = ring_b.sign(&json!({"sub": "alice"})).unwrap();

        assert_eq!(ring_a.verify::<Value>(&token).unwrap_err(), AuthError::BadSignature);
        assert_eq!(ring_a.verify::<Value>("not-a-jwt").unwrap_err(), AuthError::Malformed);
        assert_eq!(ring_a.verify::<Value>("").unwrap_err(), AuthError::Malformed);
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("hs512".parse::<SigningAlgorithm>().unwrap(), SigningAlgorithm::HS512);
        assert!("RS256".parse::<SigningAlgorithm>().is_err());
    }
}
