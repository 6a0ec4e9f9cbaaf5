//! Client address resolution and forwarded identity headers.
//!
//! # Responsibilities
//! - Resolve the client address used as the anonymous rate limit key
//! - Strip client-supplied identity headers before forwarding
//! - Add identity headers carrying verified claims upstream
//!
//! # Design Decisions
//! - Never trust existing X-Forwarded-For from untrusted peers
//! - Behind trusted proxies, the right-most untrusted hop is the client
//! - Configurable trusted proxy list (CIDR) for header trust

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use ipnet::IpNet;

use crate::security::token::Claims;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_AUTH_SUBJECT: HeaderName = HeaderName::from_static("x-auth-subject");
pub const X_AUTH_ROLES: HeaderName = HeaderName::from_static("x-auth-roles");
pub const X_AUTH_PERMISSIONS: HeaderName = HeaderName::from_static("x-auth-permissions");

#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    networks: Vec<IpNet>,
}

impl TrustedProxies {
    pub fn new(networks: Vec<IpNet>) -> Self {
        Self { networks }
    }

    pub fn parse(cidrs: &[String]) -> Result<Self, ipnet::AddrParseError> {
        let networks = cidrs.iter().map(|s| s.parse::<IpNet>()).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.networks.iter().any(|net| net.contains(ip))
    }

    /// The client address for a request arriving from `peer`.
    pub fn client_ip(&self, peer: IpAddr, headers: &HeaderMap) -> IpAddr {
        if !self.contains(&peer) {
            return peer;
        }

        let hops: Vec<IpAddr> = headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|hop| hop.trim().parse().ok())
            .collect();

        hops.iter()
            .rev()
            .find(|ip| !self.contains(ip))
            .or(hops.first())
            .copied()
            .unwrap_or(peer)
    }
}

/// Peer address from axum's connect info; unspecified when served without it
/// (in-process tests).
pub fn peer_ip<B>(request: &Request<B>) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Remove identity headers a client may have forged.
pub fn strip_identity_headers(headers: &mut HeaderMap) {
    headers.remove(X_AUTH_SUBJECT);
    headers.remove(X_AUTH_ROLES);
    headers.remove(X_AUTH_PERMISSIONS);
}

/// Attach verified claims for the upstream.
pub fn insert_identity_headers(headers: &mut HeaderMap, claims: &Claims) {
    strip_identity_headers(headers);
    let joined = |set: &std::collections::BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");

    if let Ok(v) = HeaderValue::from_str(&claims.sub) {
        headers.insert(X_AUTH_SUBJECT, v);
    }
    if let Ok(v) = HeaderValue::from_str(&joined(&claims.roles)) {
        headers.insert(X_AUTH_ROLES, v);
    }
    if let Ok(v) = HeaderValue::from_str(&joined(&claims.permissions)) {
        headers.insert(X_AUTH_PERMISSIONS, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xff(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn proxies() -> TrustedProxies {
        TrustedProxies::parse(&["10.0.0.0/8".to_string()]).unwrap()
    }

    #[test]
    fn test_untrusted_peer_ignores_forwarded_header() {
        let peer: IpAddr = "203.0.113.9".parse().unwrap();
        assert_eq!(proxies().client_ip(peer, &xff("1.2.3.4")), peer);
    }

    #[test]
    fn test_rightmost_untrusted_hop_wins() {
        let peer: IpAddr = "10.0.0.2".parse().unwrap();
        let headers = xff("6.6.6.6, 198.51.100.7, 10.0.0.5");
        assert_eq!(proxies().client_ip(peer, &headers), "198.51.100.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_trusted_peer_without_header_is_client() {
        let peer: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(proxies().client_ip(peer, &HeaderMap::new()), peer);
    }

    #[test]
    fn test_forged_identity_headers_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(X_AUTH_SUBJECT, HeaderValue::from_static("root"));
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "sub": "alice",
            "roles": ["user", "editor"],
            "perms": ["expenses:write"],
            "iat": 1,
            "exp": 2,
            "kind": "access",
            "ver": 0,
            "jti": "j"
        }))
        .unwrap();

        insert_identity_headers(&mut headers, &claims);
        assert_eq!(headers[X_AUTH_SUBJECT], "alice");
        assert_eq!(headers[X_AUTH_ROLES], "editor,user");
        assert_eq!(headers[X_AUTH_PERMISSIONS], "expenses:write");
    }
}
