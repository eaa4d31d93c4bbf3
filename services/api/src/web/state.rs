//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use custodyx_core::migration::MigrationFlow;
use custodyx_core::plans::{pricing_plans, PricingPlan};
use custodyx_core::ports::BillingService;
use custodyx_core::session::SessionContext;
use std::sync::Arc;
use tokio::sync::Mutex;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: Arc<SessionContext>,
    /// Only held for a transition, never across the migration's remote writes.
    pub migration: Arc<Mutex<MigrationFlow>>,
    pub billing: Arc<dyn BillingService>,
    pub plans: Arc<Vec<PricingPlan>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        session: Arc<SessionContext>,
        migration: MigrationFlow,
        billing: Arc<dyn BillingService>,
    ) -> Self {
        let plans = pricing_plans(config.plus_price_id.as_deref(), config.pro_price_id.as_deref());
        Self {
            config,
            session,
            migration: Arc::new(Mutex::new(migration)),
            billing,
            plans: Arc::new(plans),
        }
    }
}
