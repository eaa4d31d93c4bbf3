//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification.

use utoipa::OpenApi;

use crate::web::{account, auth, billing, migration};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        account::session_handler,
        account::update_profile_handler,
        account::record_usage_handler,
        account::refresh_subscription_handler,
        account::plans_handler,
        migration::migration_status_handler,
        migration::start_migration_handler,
        migration::skip_migration_handler,
        migration::records_handler,
        migration::hydrate_handler,
        billing::checkout_handler,
        billing::portal_handler,
    ),
    components(
        schemas(
            auth::SignupRequest,
            auth::LoginRequest,
            auth::AuthResponse,
            account::SessionView,
            account::ProfileView,
            account::UsageView,
            account::RecordUsageRequest,
            account::TierResponse,
            account::PlanView,
            migration::MigrationStateView,
            migration::SummaryView,
            migration::RecordsResponse,
            billing::CheckoutRequest,
            billing::CheckoutResponse,
            billing::PortalResponse,
        )
    ),
    tags(
        (name = "CustodyX API", description = "Account, migration and billing endpoints for the CustodyX device service.")
    )
)]
pub struct ApiDoc;
