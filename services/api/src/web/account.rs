//! services/api/src/web/account.rs
//!
//! Endpoints over the session context: who is signed in, their profile,
//! subscription tier and monthly token usage, plus the public plan list.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use custodyx_core::domain::{Role, SubscriptionTier, TokenUsage, UserProfile};
use custodyx_core::plans::PricingPlan;
use custodyx_core::session::{SessionError, SessionState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ProfileView {
    pub name: String,
    /// `Mother`, `Father`, or absent.
    pub role: Option<String>,
    pub children: Vec<String>,
}

impl From<&UserProfile> for ProfileView {
    fn from(profile: &UserProfile) -> Self {
        Self {
            name: profile.name.clone(),
            role: profile.role.map(|role| role.as_str().to_string()),
            children: profile.children.clone(),
        }
    }
}

impl ProfileView {
    fn into_profile(self) -> Result<UserProfile, (StatusCode, String)> {
        let role = match self.role.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(Role::parse(raw).ok_or_else(|| {
                (StatusCode::BAD_REQUEST, format!("Unknown role '{}'", raw))
            })?),
        };
        Ok(UserProfile {
            name: self.name,
            role,
            children: self.children,
        })
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageView {
    pub used: i64,
    pub reset_date: DateTime<Utc>,
    pub remaining: i64,
}

impl UsageView {
    fn new(usage: TokenUsage, tier: SubscriptionTier) -> Self {
        Self {
            used: usage.used,
            reset_date: usage.reset_date,
            remaining: usage.remaining(tier),
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub profile: Option<ProfileView>,
    /// `Free`, `Plus` or `Pro`.
    pub tier: String,
    pub token_usage: UsageView,
    pub loading: bool,
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        Self {
            user_id: state.user.as_ref().map(|user| user.id),
            email: state.user.as_ref().and_then(|user| user.email.clone()),
            profile: state.profile.as_ref().map(ProfileView::from),
            tier: state.tier.as_str().to_string(),
            token_usage: UsageView::new(state.token_usage, state.tier),
            loading: state.loading,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct RecordUsageRequest {
    pub tokens: i64,
}

#[derive(Serialize, ToSchema)]
pub struct TierResponse {
    pub tier: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub tier: String,
    pub name: String,
    pub price: u32,
    pub price_id: String,
    pub monthly_tokens: i64,
    pub features: Vec<String>,
    pub popular: bool,
}

impl From<&PricingPlan> for PlanView {
    fn from(plan: &PricingPlan) -> Self {
        Self {
            tier: plan.tier.as_str().to_string(),
            name: plan.name.clone(),
            price: plan.price,
            price_id: plan.price_id.clone(),
            monthly_tokens: plan.monthly_tokens,
            features: plan.features.clone(),
            popular: plan.popular,
        }
    }
}

pub fn session_error_response(e: SessionError) -> (StatusCode, String) {
    match e {
        SessionError::NotSignedIn => (StatusCode::UNAUTHORIZED, e.to_string()),
        SessionError::Remote(remote) => {
            error!("Remote store failure: {}", remote);
            (StatusCode::BAD_GATEWAY, remote.to_string())
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /session - The current session as seen by this device
#[utoipa::path(
    get,
    path = "/session",
    responses((status = 200, description = "Current session; user fields are null when signed out", body = SessionView))
)]
pub async fn session_handler(State(state): State<Arc<AppState>>) -> Json<SessionView> {
    Json(SessionView::from(&state.session.snapshot().await))
}

/// PUT /profile - Save the signed-in user's profile
#[utoipa::path(
    put,
    path = "/profile",
    request_body = ProfileView,
    responses(
        (status = 200, description = "Profile saved", body = ProfileView),
        (status = 400, description = "Unknown role"),
        (status = 401, description = "Not signed in"),
        (status = 502, description = "Profile could not be saved; the previous one is kept")
    )
)]
pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProfileView>,
) -> Result<Json<ProfileView>, (StatusCode, String)> {
    let profile = req.into_profile()?;
    let view = ProfileView::from(&profile);
    state
        .session
        .update_profile(profile)
        .await
        .map_err(session_error_response)?;
    Ok(Json(view))
}

/// POST /usage - Count AI tokens against this month's allowance
#[utoipa::path(
    post,
    path = "/usage",
    request_body = RecordUsageRequest,
    responses(
        (status = 200, description = "Usage recorded", body = UsageView),
        (status = 400, description = "Token count must be positive"),
        (status = 401, description = "Not signed in"),
        (status = 502, description = "Usage could not be recorded; the count is unchanged")
    )
)]
pub async fn record_usage_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecordUsageRequest>,
) -> Result<Json<UsageView>, (StatusCode, String)> {
    if req.tokens <= 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "tokens must be a positive number".to_string(),
        ));
    }
    let usage = state
        .session
        .record_token_usage(req.tokens)
        .await
        .map_err(session_error_response)?;
    let tier = state.session.snapshot().await.tier;
    Ok(Json(UsageView::new(usage, tier)))
}

/// POST /subscription/refresh - Re-read the subscription, e.g. after checkout
#[utoipa::path(
    post,
    path = "/subscription/refresh",
    responses(
        (status = 200, description = "Current tier", body = TierResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn refresh_subscription_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TierResponse>, (StatusCode, String)> {
    let tier = state
        .session
        .refresh_subscription()
        .await
        .map_err(session_error_response)?;
    Ok(Json(TierResponse {
        tier: tier.as_str().to_string(),
    }))
}

/// GET /plans - The plans offered on the pricing page
#[utoipa::path(
    get,
    path = "/plans",
    responses((status = 200, description = "Pricing plans", body = [PlanView]))
)]
pub async fn plans_handler(State(state): State<Arc<AppState>>) -> Json<Vec<PlanView>> {
    Json(state.plans.iter().map(PlanView::from).collect())
}
