//! Session attachment.
//!
//! The gateway only needs a stable per-client identifier to bind CSRF
//! tokens against. A uuid-v4 id rides in an HttpOnly cookie; clients
//! without one get a fresh id minted on first contact.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "whois_gateway_sid";

/// Per-request session identifier, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

/// Attach a session id to every request; set the cookie when minting one.
pub async fn attach_session(mut request: Request, next: Next) -> Response {
    let existing = session_id_from_headers(request.headers());
    let is_new = existing.is_none();
    let session_id = existing.unwrap_or_else(new_session_id);

    request.extensions_mut().insert(SessionId(session_id.clone()));

    let mut response = next.run(request).await;

    if is_new {
        if let Ok(cookie) = HeaderValue::from_str(&session_cookie(&session_id)) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }

    response
}

pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;

    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name == SESSION_COOKIE && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

fn session_cookie(session_id: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, session_id
    )
}
