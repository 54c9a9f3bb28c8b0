use axum::{
    extract::Request,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";

/// The access token presented with a request, if any. Whether it is valid is
/// decided by the service layer, which also owns the resulting 401.
#[derive(Debug, Clone)]
pub struct Credential(pub Option<String>);

/// Pick up the access token from `Authorization: Bearer` or, failing that,
/// from the access cookie.
pub async fn attach_credential(mut req: Request, next: Next) -> Response {
    let token = bearer_token(req.headers()).or_else(|| {
        CookieJar::from_headers(req.headers())
            .get(ACCESS_COOKIE)
            .map(|c| c.value().to_string())
    });

    req.extensions_mut().insert(Credential(token));
    next.run(req).await
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
