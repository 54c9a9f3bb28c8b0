pub mod auth;
pub mod conversations;
pub mod error;
pub mod middleware;

use std::sync::Arc;

use axum::{
    Json, Router,
    middleware::from_fn,
    routing::{get, post},
};
use serde_json::{Value, json};

use colloquy_core::{AccountService, ConversationService};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub accounts: AccountService,
    pub conversations: ConversationService,
    /// Mark credential cookies `Secure`. Off for plain-HTTP local setups.
    pub secure_cookies: bool,
}

/// All routes, without the CORS/trace layers the binary adds on top.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/conversations", post(conversations::create_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::list_messages).post(conversations::add_message),
        )
        .layer(from_fn(middleware::attach_credential))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
