//! End-to-end runs of the HTTP surface over in-memory stores.

use api_lib::config::Config;
use api_lib::web::{router, state::AppState};
use async_trait::async_trait;
use custodyx_core::domain::SubscriptionTier;
use custodyx_core::memory::{MemoryIdentityProvider, MemoryRemoteStore, MemoryStorage};
use custodyx_core::migration::{DataMigrationService, MigrationFlow};
use custodyx_core::ports::{
    BillingService, CheckoutSession, KeyValueStore, PortResult, PortalSession, RemoteStore, Table,
};
use custodyx_core::remote::RemoteClient;
use custodyx_core::session::SessionContext;
use custodyx_core::snapshot::{SnapshotReader, PROFILE_KEY, REPORTS_KEY, TEMPLATES_KEY};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

//=========================================================================================
// Harness
//=========================================================================================

#[derive(Default)]
struct RecordingBilling {
    checkouts: Mutex<Vec<(String, Uuid)>>,
}

#[async_trait]
impl BillingService for RecordingBilling {
    async fn create_checkout_session(
        &self,
        price_id: &str,
        user_id: Uuid,
    ) -> PortResult<CheckoutSession> {
        self.checkouts
            .lock()
            .unwrap()
            .push((price_id.to_string(), user_id));
        Ok(CheckoutSession {
            id: "cs_test".to_string(),
            url: Some("https://pay.test/cs_test".to_string()),
        })
    }

    async fn create_portal_session(&self, customer_id: &str) -> PortResult<PortalSession> {
        Ok(PortalSession {
            url: format!("https://pay.test/portal/{}", customer_id),
        })
    }
}

struct TestApp {
    base_url: String,
    client: Client,
    storage: Arc<MemoryStorage>,
    remote: Arc<MemoryRemoteStore>,
    billing: Arc<RecordingBilling>,
}

impl TestApp {
    async fn spawn() -> Self {
        let config = Config::from_vars(|name| match name {
            "DATABASE_URL" => Some("postgres://unused".to_string()),
            "PLUS_PRICE_ID" => Some("price_plus".to_string()),
            _ => None,
        })
        .unwrap();

        let storage = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let billing = Arc::new(RecordingBilling::default());
        let client = RemoteClient::new(remote.clone());

        let session = Arc::new(SessionContext::new(
            Arc::new(MemoryIdentityProvider::new()),
            client.clone(),
        ));
        let flow = MigrationFlow::new(Arc::new(DataMigrationService::new(
            SnapshotReader::new(storage.clone()),
            client,
        )));
        let state = Arc::new(AppState::new(Arc::new(config), session, flow, billing.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", address),
            client: Client::new(),
            storage,
            remote,
            billing,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        read(response).await
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        read(response).await
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self.client.put(self.url(path)).json(&body).send().await.unwrap();
        read(response).await
    }

    async fn sign_up(&self) -> Uuid {
        let (status, body) = self
            .post(
                "/auth/signup",
                json!({ "email": "parent@example.com", "password": "hunter22" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["user_id"].as_str().unwrap().parse().unwrap()
    }

    fn seed_local_data(&self) {
        let reports = json!([
            { "id": "r1", "content": "Late pickup", "category": "Scheduling", "tags": ["pickup"], "images": [], "createdAt": "2024-03-01T08:00:00Z" },
            { "id": "r2", "content": "Missed call", "category": "Communication", "tags": [], "images": [], "createdAt": "2024-03-02T08:00:00Z" },
            { "id": "r3", "content": "Gift refused", "category": "Other", "tags": [], "images": [], "createdAt": "2024-03-03T08:00:00Z" }
        ]);
        let templates = json!([{ "id": "t1", "title": "Late", "content": "Arrived {time} late", "category": "Scheduling" }]);
        let profile = json!({ "name": "Jordan", "role": "Mother", "children": ["Mia"] });

        self.storage.set_item(REPORTS_KEY, &reports.to_string()).unwrap();
        self.storage.set_item(TEMPLATES_KEY, &templates.to_string()).unwrap();
        self.storage.set_item(PROFILE_KEY, &profile.to_string()).unwrap();
    }
}

async fn read(response: reqwest::Response) -> (StatusCode, Value) {
    let status = response.status();
    let text = response.text().await.unwrap();
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    (status, body)
}

//=========================================================================================
// Tests
//=========================================================================================

#[tokio::test]
async fn protected_routes_require_a_signed_in_user() {
    let app = TestApp::spawn().await;

    let (status, _) = app.get("/migration").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.get("/session").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["userId"].is_null());
    assert_eq!(body["tier"], "Free");
}

#[tokio::test]
async fn auth_failures_map_to_statuses() {
    let app = TestApp::spawn().await;
    app.sign_up().await;

    let (status, _) = app
        .post(
            "/auth/signup",
            json!({ "email": "parent@example.com", "password": "hunter22" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post("/auth/signup", json!({ "email": "nobody", "password": "x" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/auth/login",
            json!({ "email": "parent@example.com", "password": "wrong-password" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn local_records_migrate_and_are_cleared() {
    let app = TestApp::spawn().await;
    app.seed_local_data();
    let user_id = app.sign_up().await;

    let (status, state) = app.get("/migration").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["status"], "ready");
    assert_eq!(state["summary"]["reports"], 3);
    assert_eq!(state["summary"]["documents"], 0);
    assert_eq!(state["summary"]["templates"], 1);
    assert_eq!(state["summary"]["hasProfile"], true);

    let (status, state) = app.post("/migration/start", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["status"], "complete");

    let reports = app.remote.rows(Table::Reports);
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r["user_id"] == json!(user_id)));
    assert_eq!(app.remote.rows(Table::IncidentTemplates).len(), 1);
    assert!(app.storage.is_empty());

    let (_, records) = app.get("/records").await;
    let ids: Vec<&str> = records["reports"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["r3", "r2", "r1"]);
}

#[tokio::test]
async fn failed_migration_keeps_local_data_and_can_be_retried() {
    let app = TestApp::spawn().await;
    app.seed_local_data();
    app.sign_up().await;
    app.remote.fail_writes_to(Table::IncidentTemplates);

    app.get("/migration").await;
    let (_, state) = app.post("/migration/start", json!({})).await;
    assert_eq!(state["status"], "error");
    assert!(state["error"].as_str().unwrap().contains("incident_templates"));
    assert_eq!(app.remote.rows(Table::Reports).len(), 3);
    assert!(!app.storage.is_empty());

    app.remote.restore(Table::IncidentTemplates);
    let (_, state) = app.post("/migration/start", json!({})).await;
    assert_eq!(state["status"], "complete");
    assert_eq!(app.remote.rows(Table::Reports).len(), 3);
    assert!(app.storage.is_empty());
}

#[tokio::test]
async fn hydrate_reports_a_failed_read_and_keeps_local_data() {
    let app = TestApp::spawn().await;
    app.seed_local_data();
    app.sign_up().await;
    let before = app.storage.get_item(REPORTS_KEY).unwrap();
    app.remote.fail_reads_from(Table::Reports);

    let (status, _) = app.post("/records/hydrate", json!({})).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(app.storage.get_item(REPORTS_KEY).unwrap(), before);
    assert!(app.storage.get_item(PROFILE_KEY).unwrap().is_some());
}

#[tokio::test]
async fn a_device_without_local_data_completes_immediately() {
    let app = TestApp::spawn().await;
    app.sign_up().await;

    let (_, state) = app.get("/migration").await;
    assert_eq!(state["status"], "complete");
    assert_eq!(state["hasLocalData"], false);

    let (status, _) = app.post("/migration/start", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn profile_usage_and_subscription_flow_through_the_session() {
    let app = TestApp::spawn().await;
    let user_id = app.sign_up().await;

    let (status, _) = app
        .put(
            "/profile",
            json!({ "name": "Jordan", "role": "Father", "children": ["Leo"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.remote.rows(Table::Users)[0]["role"], "Father");

    let (status, _) = app
        .put("/profile", json!({ "name": "Jordan", "role": "Uncle", "children": [] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, usage) = app.post("/usage", json!({ "tokens": 1200 })).await;
    assert_eq!(usage["used"], 1200);
    assert_eq!(usage["remaining"], 50_000 - 1200);

    app.remote
        .upsert(
            Table::Subscriptions,
            vec![json!({
                "id": Uuid::new_v4(), "user_id": user_id, "tier": SubscriptionTier::Pro,
                "status": "active", "stripe_customer_id": "cus_42"
            })],
            "id",
        )
        .await
        .unwrap();
    let (_, tier) = app.post("/subscription/refresh", json!({})).await;
    assert_eq!(tier["tier"], "Pro");

    let (_, portal) = app.post("/billing/portal", json!({})).await;
    assert_eq!(portal["url"], "https://pay.test/portal/cus_42");

    let (_, session) = app.get("/session").await;
    assert_eq!(session["profile"]["name"], "Jordan");
    assert_eq!(session["tokenUsage"]["remaining"], 5_000_000 - 1200);
}

#[tokio::test]
async fn checkout_uses_the_configured_price() {
    let app = TestApp::spawn().await;
    let user_id = app.sign_up().await;

    let (status, body) = app.post("/billing/checkout", json!({ "tier": "Plus" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "cs_test");
    assert_eq!(
        app.billing.checkouts.lock().unwrap().as_slice(),
        &[("price_plus".to_string(), user_id)]
    );

    let (status, _) = app.post("/billing/checkout", json!({ "tier": "Pro" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, plans) = app.get("/plans").await;
    assert_eq!(plans.as_array().unwrap().len(), 3);
    assert_eq!(plans[1]["priceId"], "price_plus");
}

#[tokio::test]
async fn signing_out_locks_the_protected_routes_again() {
    let app = TestApp::spawn().await;
    app.sign_up().await;

    let (status, _) = app.post("/auth/logout", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.post("/usage", json!({ "tokens": 5 })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
