//! Login, logout and the authentication middleware.

use crate::server::error::AppError;
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
    Extension, Json,
};
use axum_extra::{
    extract::cookie::{Cookie, CookieJar, SameSite},
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeader,
};
use mediabatch_common::OwnerId;
use serde::{Deserialize, Serialize};

pub const TOKEN_COOKIE_NAME: &str = "mediabatch_token";

/// Login request payload
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response
#[derive(Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl LoginResponse {
    fn rejected() -> Json<Self> {
        Json(Self {
            success: false,
            message: "Invalid credentials".to_string(),
            token: None,
        })
    }
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub authenticated: bool,
    pub username: String,
}

/// Pick the token from a bearer header, falling back to the cookie.
fn presented_token(
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: &CookieJar,
) -> Option<String> {
    bearer
        .map(|TypedHeader(auth)| auth.token().to_string())
        .or_else(|| jar.get(TOKEN_COOKIE_NAME).map(|c| c.value().to_string()))
}

/// Resolve the caller and attach their [`OwnerId`] to the request.
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = presented_token(bearer, &jar)
        .ok_or_else(|| AppError::unauthorized("authentication required"))?;

    let owner = ctx
        .tokens
        .lookup(&token)
        .ok_or_else(|| AppError::unauthorized("invalid or expired token"))?;

    request.extensions_mut().insert(owner);
    Ok(next.run(request).await)
}

/// Login handler
pub async fn login(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), (StatusCode, Json<LoginResponse>)> {
    let user = ctx
        .config
        .auth
        .users
        .iter()
        .find(|user| user.username == payload.username);

    let Some(user) = user else {
        tracing::info!(username = %payload.username, "Login for unknown user");
        return Err((StatusCode::UNAUTHORIZED, LoginResponse::rejected()));
    };

    let password = payload.password;
    let hash = user.password_hash.clone();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or(false);

    let owner = match OwnerId::new(user.username.clone()) {
        Ok(owner) if verified => owner,
        _ => {
            tracing::info!(username = %payload.username, "Login rejected");
            return Err((StatusCode::UNAUTHORIZED, LoginResponse::rejected()));
        }
    };

    let token = ctx.tokens.issue(owner);
    let cookie = Cookie::build((TOKEN_COOKIE_NAME, token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(
            ctx.config.auth.session_timeout_hours as i64,
        ))
        .build();

    tracing::info!(username = %payload.username, "New login");
    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            success: true,
            message: "Login successful".to_string(),
            token: Some(token),
        }),
    ))
}

/// Logout handler
pub async fn logout(
    State(ctx): State<AppContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    jar: CookieJar,
) -> (CookieJar, StatusCode) {
    if let Some(token) = presented_token(bearer, &jar) {
        ctx.tokens.revoke(&token);
    }

    let cookie = Cookie::build((TOKEN_COOKIE_NAME, ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .build();

    (jar.remove(cookie), StatusCode::OK)
}

/// Confirm the caller is logged in. Only reachable through the middleware.
pub async fn check(Extension(owner): Extension<OwnerId>) -> Json<CheckResponse> {
    Json(CheckResponse {
        authenticated: true,
        username: owner.as_str().to_string(),
    })
}

/// Generate a bcrypt password hash
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_verifies() {
        let hash = bcrypt::hash("hunter2", 4).unwrap();
        assert!(bcrypt::verify("hunter2", &hash).unwrap());
        assert!(!bcrypt::verify("hunter3", &hash).unwrap());
    }

    #[test]
    fn test_bearer_wins_over_cookie() {
        let jar = CookieJar::new().add(Cookie::new(TOKEN_COOKIE_NAME, "from-cookie"));
        let bearer = Authorization::bearer("from-header").unwrap();

        assert_eq!(
            presented_token(Some(TypedHeader(bearer)), &jar).as_deref(),
            Some("from-header")
        );
        assert_eq!(presented_token(None, &jar).as_deref(), Some("from-cookie"));
        assert_eq!(presented_token(None, &CookieJar::new()), None);
    }
}
