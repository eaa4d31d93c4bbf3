//! services/api/src/web/billing.rs
//!
//! Checkout and customer-portal redirects for paid plans.

use axum::{extract::State, http::StatusCode, Extension, Json};
use custodyx_core::domain::{AuthUser, SubscriptionTier};
use custodyx_core::plans::price_id_for;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::web::account::session_error_response;
use crate::web::state::AppState;

#[derive(Deserialize, ToSchema)]
pub struct CheckoutRequest {
    /// `Plus` or `Pro`.
    pub tier: String,
}

#[derive(Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct PortalResponse {
    pub url: String,
}

/// POST /billing/checkout - Start a checkout for a paid plan
#[utoipa::path(
    post,
    path = "/billing/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Checkout created; redirect the user to it", body = CheckoutResponse),
        (status = 400, description = "Tier cannot be bought"),
        (status = 401, description = "Not signed in"),
        (status = 502, description = "Billing backend error")
    )
)]
pub async fn checkout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, (StatusCode, String)> {
    let tier = SubscriptionTier::parse(&req.tier).ok_or_else(|| {
        (StatusCode::BAD_REQUEST, format!("Unknown tier '{}'", req.tier))
    })?;
    let price_id = price_id_for(&state.plans, tier).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("The {} plan cannot be bought", tier.as_str()),
        )
    })?;

    let session = state
        .billing
        .create_checkout_session(price_id, user.id)
        .await
        .map_err(|e| {
            error!(user_id = %user.id, "Failed to create checkout session: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string())
        })?;

    info!(user_id = %user.id, tier = tier.as_str(), "Checkout session created.");
    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

/// POST /billing/portal - Open the billing portal for the current subscription
#[utoipa::path(
    post,
    path = "/billing/portal",
    responses(
        (status = 200, description = "Portal created; redirect the user to it", body = PortalResponse),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "No billing customer on file"),
        (status = 502, description = "Billing backend error")
    )
)]
pub async fn portal_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<PortalResponse>, (StatusCode, String)> {
    let customer_id = state
        .session
        .current_subscription()
        .await
        .map_err(session_error_response)?
        .and_then(|subscription| subscription.stripe_customer_id)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                "No billing customer on file".to_string(),
            )
        })?;

    let portal = state
        .billing
        .create_portal_session(&customer_id)
        .await
        .map_err(|e| {
            error!(user_id = %user.id, "Failed to create portal session: {}", e);
            (StatusCode::BAD_GATEWAY, e.to_string())
        })?;
    Ok(Json(PortalResponse { url: portal.url }))
}
