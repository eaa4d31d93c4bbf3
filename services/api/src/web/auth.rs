//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user signup, login, and logout.
//!
//! Each handler applies the resulting auth event to the session right away, so
//! the next request already sees it. The listener receives the same event from
//! the provider afterwards; applying it twice is harmless.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use custodyx_core::domain::{AuthEvent, AuthSession};
use custodyx_core::ports::AuthError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&AuthSession> for AuthResponse {
    fn from(session: &AuthSession) -> Self {
        Self {
            user_id: session.user.id,
            email: session.user.email.clone().unwrap_or_default(),
            expires_at: session.expires_at,
        }
    }
}

/// Maps an identity failure to the status shown to the user.
pub fn auth_error_response(e: AuthError) -> (StatusCode, String) {
    let status = match &e {
        AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AuthError::EmailTaken => StatusCode::CONFLICT,
        AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AuthError::Provider(_) => {
            error!("Identity provider failure: {}", e);
            StatusCode::BAD_GATEWAY
        }
    };
    (status, e.to_string())
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/signup - Create a new user account
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created and signed in", body = AuthResponse),
        (status = 400, description = "Invalid email or password"),
        (status = 409, description = "Email already registered"),
        (status = 502, description = "Identity provider error")
    )
)]
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let metadata = req.name.map(|name| json!({ "name": name }));
    let session = state
        .session
        .sign_up(&req.email, &req.password, metadata)
        .await
        .map_err(auth_error_response)?;

    let response = AuthResponse::from(&session);
    state.session.handle_event(AuthEvent::SignedIn(session)).await;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 502, description = "Identity provider error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let session = state
        .session
        .sign_in(&req.email, &req.password)
        .await
        .map_err(auth_error_response)?;

    let response = AuthResponse::from(&session);
    state.session.handle_event(AuthEvent::SignedIn(session)).await;
    Ok((StatusCode::OK, Json(response)))
}

/// POST /auth/logout - Sign out of this device
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 502, description = "Identity provider error")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state.session.sign_out().await.map_err(auth_error_response)?;
    state.session.handle_event(AuthEvent::SignedOut).await;
    info!("Signed out.");
    Ok(StatusCode::OK)
}
