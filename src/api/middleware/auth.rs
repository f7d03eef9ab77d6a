use crate::AppState;
use crate::utils::auth::{Claims, validate_jwt};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

#[derive(Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

/// Bearer header first, then `?token=`.
fn bearer_token(req: &Request) -> Option<String> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    if auth_header.is_some() {
        return auth_header;
    }

    // Try query parameter
    let query = req.uri().query().unwrap_or_default();
    serde_urlencoded::from_str::<AuthQuery>(query)
        .ok()
        .and_then(|q| q.token)
}

fn owner_claims(state: &AppState, req: &Request) -> Option<Claims> {
    let token = bearer_token(req)?;
    validate_jwt(&token, &state.config.jwt_secret).ok()
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match owner_claims(&state, &req) {
        Some(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Attaches claims when a valid token is present, lets the request through either way.
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(claims) = owner_claims(&state, &req) {
        req.extensions_mut().insert(claims);
    }
    next.run(req).await
}
