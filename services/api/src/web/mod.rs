pub mod account;
pub mod auth;
pub mod billing;
pub mod middleware;
pub mod migration;
pub mod rest;
pub mod state;

pub use middleware::require_auth;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use rest::ApiDoc;
use state::AppState;

/// Builds the complete application: API routes, CORS and the Swagger UI.
pub fn router(app_state: Arc<AppState>) -> Router {
    let mut cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);
    match app_state.config.app_origin.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(_) => warn!(
            origin = %app_state.config.app_origin,
            "APP_ORIGIN is not a valid header value; CORS origin left unset."
        ),
    }

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler))
        .route("/session", get(account::session_handler))
        .route("/plans", get(account::plans_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/migration", get(migration::migration_status_handler))
        .route("/migration/start", post(migration::start_migration_handler))
        .route("/migration/skip", post(migration::skip_migration_handler))
        .route("/records", get(migration::records_handler))
        .route("/records/hydrate", post(migration::hydrate_handler))
        .route("/profile", put(account::update_profile_handler))
        .route("/usage", post(account::record_usage_handler))
        .route("/subscription/refresh", post(account::refresh_subscription_handler))
        .route("/billing/checkout", post(billing::checkout_handler))
        .route("/billing/portal", post(billing::portal_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
