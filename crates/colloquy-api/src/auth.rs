use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use tracing::info;

use colloquy_core::Session;
use colloquy_types::api::{LoginRequest, RefreshResponse, RegisterRequest, SessionResponse};

use crate::AppState;
use crate::error::into_status;
use crate::middleware::{ACCESS_COOKIE, REFRESH_COOKIE};

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let session = state
        .accounts
        .register(&req.email, &req.password, req.remember)
        .await
        .map_err(into_status)?;

    let (jar, body) = issue_session(&state, jar, session);
    Ok((StatusCode::CREATED, jar, body))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let session = state
        .accounts
        .login(&req.email, &req.password, req.remember)
        .await
        .map_err(into_status)?;

    info!("User {} logged in", session.user.id);
    Ok(issue_session(&state, jar, session))
}

/// Trade the refresh cookie for a fresh access token.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, StatusCode> {
    let presented = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    let access_token = state
        .accounts
        .refresh(presented.as_deref())
        .await
        .map_err(into_status)?;

    let ttl = colloquy_core::accounts::access_ttl(false);
    let jar = jar.add(credential_cookie(
        ACCESS_COOKIE,
        access_token.clone(),
        ttl.num_seconds(),
        state.secure_cookies,
    ));
    Ok((jar, Json(RefreshResponse { access_token })))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, StatusCode> {
    let presented = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    state
        .accounts
        .logout(presented.as_deref())
        .await
        .map_err(into_status)?;

    let jar = jar
        .remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"));
    Ok((StatusCode::NO_CONTENT, jar))
}

fn issue_session(state: &AppState, jar: CookieJar, session: Session) -> (CookieJar, Json<SessionResponse>) {
    let jar = jar
        .add(credential_cookie(
            ACCESS_COOKIE,
            session.access_token.clone(),
            session.access_ttl.num_seconds(),
            state.secure_cookies,
        ))
        .add(credential_cookie(
            REFRESH_COOKIE,
            session.refresh_token,
            session.refresh_ttl.num_seconds(),
            state.secure_cookies,
        ));

    let body = SessionResponse {
        user_id: session.user.id,
        email: session.user.email,
        access_token: session.access_token,
    };
    (jar, Json(body))
}

fn credential_cookie(name: &'static str, value: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}
