//! Inbound authentication (spec §4.12).
//!
//! The system accepts two credential forms from callers: a source-repository
//! ticket (either as the `alf_ticket` query parameter, or disguised inside
//! an `Authorization: Basic` header whose decoded value has no colon and
//! starts with `TICKET_`), or real HTTP Basic credentials, which are
//! exchanged for a ticket via the source repository's own ticket-issuance
//! endpoint. Ticket is tried first; Basic is the fallback.

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::sync::Arc;

use crate::source_client::SourceClient;

const TICKET_PREFIX: &str = "TICKET_";

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    pub ticket: String,
}

pub struct AuthError(pub String);

#[derive(Serialize)]
struct AuthErrorBody {
    error: AuthErrorDetail,
}

#[derive(Serialize)]
struct AuthErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = AuthErrorBody {
            error: AuthErrorDetail { code: "authentication_failed", message: self.0 },
        };
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<SourceClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let source = Arc::<SourceClient>::from_ref(state);

        if let Some(ticket) = ticket_from_query(parts) {
            let username = source
                .validate_ticket(&ticket)
                .await
                .map_err(|e| AuthError(format!("invalid ticket: {e}")))?;
            return Ok(AuthenticatedUser { username, ticket });
        }

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AuthError("missing Authorization header or alf_ticket".to_string()))?;

        let encoded = header
            .strip_prefix("Basic ")
            .ok_or_else(|| AuthError("unsupported Authorization scheme".to_string()))?;

        let decoded = STANDARD
            .decode(encoded)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .ok_or_else(|| AuthError("invalid Authorization encoding".to_string()))?;

        if !decoded.contains(':') && decoded.starts_with(TICKET_PREFIX) {
            let username = source
                .validate_ticket(&decoded)
                .await
                .map_err(|e| AuthError(format!("invalid ticket: {e}")))?;
            return Ok(AuthenticatedUser { username, ticket: decoded });
        }

        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| AuthError("malformed basic credentials".to_string()))?;

        let ticket = source
            .issue_ticket(username, password)
            .await
            .map_err(|e| AuthError(e.to_string()))?;

        Ok(AuthenticatedUser { username: username.to_string(), ticket })
    }
}

fn ticket_from_query(parts: &Parts) -> Option<String> {
    let query = parts.uri.query()?;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=')?;
        if key == "alf_ticket" {
            return Some(value.to_string());
        }
    }
    None
}
