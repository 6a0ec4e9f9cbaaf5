//! Access/refresh token issuance and verification.
//!
//! # Lifecycle
//! ```text
//! Issued → Valid → Expired   (now >= exp)
//!                → Revoked   (subject revoked, or refresh token exchanged)
//! ```
//! Terminal states are final: rotating secrets never revives a token.
//!
//! # Design Decisions
//! - Refresh tokens are single use: each carries the subject's token
//!   version, and an exchange bumps it
//! - Revocation raises a per-subject floor that access tokens must meet
//! - Expiry is checked against the injected clock, not inside jsonwebtoken

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::{AuthError, SecretError};
use crate::security::secrets::{Secret, SecretInfo, SecretRing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default, rename = "perms")]
    pub permissions: BTreeSet<String>,
    pub iat: u64,
    pub exp: u64,
    pub kind: TokenKind,
    pub ver: u64,
    pub jti: String,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        now_secs >= self.exp
    }
}

/// The pair handed to a client after login or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct SubjectVersion {
    current: u64,
    floor: u64,
}

/// Issues, verifies and refreshes tokens on top of a [`SecretRing`].
#[derive(Debug)]
pub struct TokenManager {
    ring: Arc<SecretRing>,
    clock: SharedClock,
    access_ttl: Duration,
    refresh_ttl: Duration,
    versions: DashMap<String, SubjectVersion>,
}

impl TokenManager {
    pub fn new(ring: Arc<SecretRing>, clock: SharedClock, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            ring,
            clock,
            access_ttl,
            refresh_ttl,
            versions: DashMap::new(),
        }
    }

    pub fn ring(&self) -> &Arc<SecretRing> {
        &self.ring
    }

    /// Issue a fresh pair for `subject` at its current token version.
    pub fn issue<R, P>(&self, subject: &str, roles: R, permissions: P) -> Result<TokenPair, AuthError>
    where
        R: IntoIterator,
        R::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        let ver = self.versions.entry(subject.to_string()).or_default().current;
        let roles = roles.into_iter().map(Into::into).collect();
        let permissions = permissions.into_iter().map(Into::into).collect();
        self.mint(subject, roles, permissions, ver)
    }

    /// Verify a token presented on a business route.
    pub fn verify_access(&self, token: &str) -> Result<Claims, AuthError> {
        let claims: Claims = self.ring.verify(token)?;
        if claims.kind != TokenKind::Access {
            return Err(AuthError::WrongKind);
        }
        if claims.is_expired_at(self.clock.now_secs()) {
            return Err(AuthError::Expired);
        }
        let floor = self.versions.get(&claims.sub).map(|v| v.floor).unwrap_or(0);
        if claims.ver < floor {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    /// Verify a refresh token without consuming it.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AuthError> {
        let claims: Claims = self.ring.verify(token)?;
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::WrongKind);
        }
        if claims.is_expired_at(self.clock.now_secs()) {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair. Each refresh token works
    /// once: the exchange bumps the subject's version under the map's entry
    /// lock, so concurrent exchanges of the same token yield one winner.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.verify_refresh(refresh_token).map_err(|e| match e {
            AuthError::Expired => AuthError::Expired,
            _ => AuthError::InvalidRefreshToken,
        })?;

        let ver = {
            let mut entry = self.versions.entry(claims.sub.clone()).or_default();
            if claims.ver != entry.current || claims.ver < entry.floor {
                tracing::warn!(subject = %claims.sub, presented = claims.ver, current = entry.current, "Stale refresh token presented");
                return Err(AuthError::InvalidRefreshToken);
            }
            entry.current += 1;
            entry.current
        };

        self.mint(&claims.sub, claims.roles, claims.permissions, ver)
    }

    /// Revoke every outstanding token of `subject`.
    pub fn revoke(&self, subject: &str) {
        let mut entry = self.versions.entry(subject.to_string()).or_default();
        entry.current += 1;
        entry.floor = entry.current;
        tracing::info!(subject = %subject, version = entry.current, "Subject tokens revoked");
    }

    pub fn rotate(&self, secret: Secret) -> Result<(), SecretError> {
        self.ring.rotate(secret)
    }

    pub fn retire(&self, secret_id: &str) -> Result<(), SecretError> {
        self.ring.retire(secret_id)
    }

    pub fn secrets(&self) -> Vec<SecretInfo> {
        self.ring.list()
    }

    fn mint(
        &self,
        subject: &str,
        roles: BTreeSet<String>,
        permissions: BTreeSet<String>,
        ver: u64,
    ) -> Result<TokenPair, AuthError> {
        let iat = self.clock.now_secs();
        let access = Claims {
            sub: subject.to_string(),
            roles,
            permissions,
            iat,
            exp: iat + self.access_ttl.as_secs().max(1),
            kind: TokenKind::Access,
            ver,
            jti: Uuid::new_v4().to_string(),
        };
        let refresh = Claims {
            exp: iat + self.refresh_ttl.as_secs().max(1),
            kind: TokenKind::Refresh,
            jti: Uuid::new_v4().to_string(),
            ..access.clone()
        };

        Ok(TokenPair {
            access_token: self.ring.sign(&access)?,
            refresh_token: self.ring.sign(&refresh)?,
            token_type: "Bearer".to_string(),
            expires_in: access.exp - access.iat,
        })
    }
}
