use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};

pub const UNKNOWN_IP: &str = "Unknown IP";
pub const UNKNOWN_UA: &str = "Unknown UA";

/// Who sent the request, as far as the headers and the socket tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip: String,
    pub user_agent: String,
}

/// Resolves the client IP.
///
/// Order: first `X-Forwarded-For` entry, `X-Real-IP`, the socket peer,
/// then `Unknown IP`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// The address the view rate limit counts against.
///
/// A direct peer is taken as is, whatever headers it sends. Only a peer
/// listed in `trusted` may name the client: the rightmost `X-Forwarded-For`
/// entry that is not itself a trusted proxy, then `X-Real-IP`. Entries that
/// do not parse as IP addresses are ignored.
pub fn rate_limit_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted: &[IpAddr],
) -> Option<IpAddr> {
    match peer.map(|addr| addr.ip()) {
        Some(ip) if trusted.contains(&ip) => forwarded_client(headers, trusted).or(Some(ip)),
        Some(ip) => Some(ip),
        None => forwarded_client(headers, trusted),
    }
}

fn forwarded_client(headers: &HeaderMap, trusted: &[IpAddr]) -> Option<IpAddr> {
    let forwarded: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|entry| entry.trim().parse().ok())
        .collect();

    forwarded
        .into_iter()
        .rev()
        .find(|ip| !trusted.contains(ip))
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        })
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_UA)
        .to_string()
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);

        Ok(ClientMeta {
            ip: client_ip(&parts.headers, peer),
            user_agent: user_agent(&parts.headers),
        })
    }
}
