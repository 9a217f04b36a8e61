//! Request context extraction
//!
//! Client address, user agent, correlation ids and the caller identity, read
//! from request parts so both the capture middleware and handlers see the same
//! values.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use rams_common::{
    identity::{USER_ID_HEADER, USER_ROLE_HEADER},
    Actor,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::debug;
use uuid::Uuid;

use super::models::RecordMetadata;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Per-request values copied into audit metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: String,
    pub session_id: Option<String>,
    pub method: String,
    pub path: String,
    pub actor: Option<Actor>,
}

impl RequestContext {
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            ip: client_ip(parts),
            user_agent: header_str(&parts.headers, "user-agent"),
            request_id: header_str(&parts.headers, REQUEST_ID_HEADER)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            session_id: header_str(&parts.headers, SESSION_ID_HEADER),
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            actor: caller_from_parts(parts),
        }
    }

    /// Metadata block for a record originating from this request
    pub fn metadata(&self, source: &str) -> RecordMetadata {
        let mut metadata = RecordMetadata::new(source);
        metadata.ip = self.ip.clone();
        metadata.user_agent = self.user_agent.clone();
        metadata.request_id = Some(self.request_id.clone());
        metadata.session_id = self.session_id.clone();
        metadata.actor_role = self.actor.map(|a| a.role);
        metadata
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// The authenticated caller, if any
///
/// Never rejects: unauthenticated requests yield `CallerIdentity(None)` and
/// the service decides what that caller may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity(pub Option<Actor>);

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(caller_from_parts(parts)))
    }
}

/// Actor inserted into the extensions by authentication.
///
/// Identity headers are never read here; [`crate::middleware::identity_from_headers`]
/// turns them into an extension only when the deployment trusts them.
pub fn caller_from_parts(parts: &Parts) -> Option<Actor> {
    parts.extensions.get::<Actor>().copied()
}

/// Actor named by the `x-user-id` / `x-user-role` headers
pub fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let id = header_str(headers, USER_ID_HEADER)?;
    let role = header_str(headers, USER_ROLE_HEADER);
    match Actor::from_header_values(Some(&id), role.as_deref()) {
        Ok(actor) => Some(actor),
        Err(err) => {
            debug!(error = %err, "Ignoring malformed identity headers");
            None
        },
    }
}

/// First `x-forwarded-for` hop, then `x-real-ip`, then the socket peer
fn client_ip(parts: &Parts) -> Option<String> {
    header_str(&parts.headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(&parts.headers, REAL_IP_HEADER))
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use rams_common::Role;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_context_from_headers() {
        let id = Uuid::new_v4();
        let mut p = parts(
            Request::post("/api/v1/projects/42")
                .header("user-agent", "rams-web/2.1")
                .header(FORWARDED_FOR_HEADER, "203.0.113.7, 10.0.0.1")
                .header(REQUEST_ID_HEADER, "req-1"),
        );
        p.extensions.insert(Actor::new(id, Role::Manager));

        let ctx = RequestContext::from_parts(&p);
        assert_eq!(ctx.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(ctx.user_agent.as_deref(), Some("rams-web/2.1"));
        assert_eq!(ctx.request_id, "req-1");
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.path, "/api/v1/projects/42");
        assert_eq!(ctx.actor, Some(Actor::new(id, Role::Manager)));

        let metadata = ctx.metadata("http");
        assert_eq!(metadata.source.as_deref(), Some("http"));
        assert_eq!(metadata.actor_role, Some(Role::Manager));
    }

    #[test]
    fn test_socket_peer_fallback_and_generated_request_id() {
        let mut p = parts(Request::delete("/api/v1/grants/7"));
        p.extensions
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 5000))));

        let ctx = RequestContext::from_parts(&p);
        assert_eq!(ctx.ip.as_deref(), Some("192.168.1.20"));
        assert!(Uuid::parse_str(&ctx.request_id).is_ok());
        assert!(ctx.actor.is_none());
    }

    #[test]
    fn test_identity_headers_alone_are_anonymous() {
        let mut p = parts(
            Request::get("/api/v1/audit-logs")
                .header(USER_ID_HEADER, Uuid::new_v4().to_string())
                .header(USER_ROLE_HEADER, "admin"),
        );
        assert_eq!(caller_from_parts(&p), None);

        let injected = Actor::new(Uuid::new_v4(), Role::Auditor);
        p.extensions.insert(injected);
        assert_eq!(caller_from_parts(&p), Some(injected));
    }

    #[test]
    fn test_actor_from_headers() {
        let id = Uuid::new_v4();
        let p = parts(
            Request::get("/")
                .header(USER_ID_HEADER, id.to_string())
                .header(USER_ROLE_HEADER, "Auditor"),
        );
        assert_eq!(actor_from_headers(&p.headers), Some(Actor::new(id, Role::Auditor)));

        let p = parts(Request::get("/").header(USER_ID_HEADER, "not-a-uuid"));
        assert_eq!(actor_from_headers(&p.headers), None);
        assert_eq!(actor_from_headers(&HeaderMap::new()), None);
    }
}
