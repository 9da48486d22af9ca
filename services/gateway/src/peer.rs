use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use std::net::SocketAddr;

/// Identity of the remote peer, used as a rate-limit key.
///
/// Prefers the first `X-Forwarded-For` hop, then the socket address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerKey(pub String);

impl<S> FromRequestParts<S> for PeerKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return Ok(PeerKey(hop.to_string()));
        }

        let socket = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(PeerKey(socket.unwrap_or_else(|| "unknown".to_string())))
    }
}
