//! crates/custodyx_core/src/domain.rs
//!
//! Defines the core data structures for the application.
//!
//! There are two shapes for every record: the *local* shape kept in device
//! storage (camelCase JSON, no owner) and the *remote* row shape stored in the
//! relational backend (snake_case columns, always owned by one user). The
//! conversions between the two live next to the row structs.

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of an authenticated user, as issued by the identity provider.
pub type UserId = Uuid;

//=========================================================================================
// Local Records (device storage shape)
//=========================================================================================

/// A single incident report written by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_context: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An uploaded document. `data` is the encoded payload and is never inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub data: String,
    pub folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A reusable incident template. Has no timestamp while it lives on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentTemplate {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Mother,
    Father,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Mother => "Mother",
            Role::Father => "Father",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Mother" => Some(Role::Mother),
            "Father" => Some(Role::Father),
            _ => None,
        }
    }
}

/// The parent profile filled in during onboarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "role_or_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub children: Vec<String>,
}

// Older clients stored an empty string for "no role".
fn role_or_none<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Role::parse))
}

/// Everything found in device storage in one read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSnapshot {
    pub reports: Vec<Report>,
    pub documents: Vec<StoredDocument>,
    pub incident_templates: Vec<IncidentTemplate>,
    pub user_profile: Option<UserProfile>,
}

impl LocalSnapshot {
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
            && self.documents.is_empty()
            && self.incident_templates.is_empty()
            && self.user_profile.is_none()
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            reports: self.reports.len(),
            documents: self.documents.len(),
            templates: self.incident_templates.len(),
            has_profile: self.user_profile.is_some(),
        }
    }
}

/// What the user is shown before committing to a migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub reports: usize,
    pub documents: usize,
    pub templates: usize,
    pub has_profile: bool,
}

//=========================================================================================
// Subscriptions and Usage
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionTier {
    #[default]
    Free,
    Plus,
    Pro,
}

impl SubscriptionTier {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionTier::Free => "Free",
            SubscriptionTier::Plus => "Plus",
            SubscriptionTier::Pro => "Pro",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Free" => Some(SubscriptionTier::Free),
            "Plus" => Some(SubscriptionTier::Plus),
            "Pro" => Some(SubscriptionTier::Pro),
            _ => None,
        }
    }

    /// AI tokens a user on this tier may spend per calendar month.
    pub fn monthly_token_limit(self) -> i64 {
        match self {
            SubscriptionTier::Free => 50_000,
            SubscriptionTier::Plus => 500_000,
            SubscriptionTier::Pro => 5_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    Trialing,
}

/// Monthly token counter. Always derived from usage rows, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub used: i64,
    pub reset_date: DateTime<Utc>,
}

impl TokenUsage {
    /// A zeroed counter that resets one calendar month from `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            used: 0,
            reset_date: one_month_after(now),
        }
    }

    /// Sums the events that fall inside the calendar month containing `now`.
    pub fn aggregate(events: &[TokenUsageRow], now: DateTime<Utc>) -> Self {
        let since = start_of_month(now);
        let used = events
            .iter()
            .filter(|event| event.used_at >= since)
            .map(|event| event.tokens_used)
            .fold(0, i64::saturating_add);
        Self {
            used,
            reset_date: one_month_after(now),
        }
    }

    pub fn remaining(&self, tier: SubscriptionTier) -> i64 {
        tier.monthly_token_limit().saturating_sub(self.used).max(0)
    }
}

/// Midnight UTC on the first day of the month containing `now`.
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

pub fn one_month_after(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_months(Months::new(1)).unwrap_or(now)
}

//=========================================================================================
// Remote Rows (relational store shape)
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub id: String,
    pub user_id: UserId,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub legal_context: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportRow {
    pub fn from_local(report: Report, user_id: UserId) -> Self {
        Self {
            id: report.id,
            user_id,
            content: report.content,
            category: report.category,
            tags: Some(report.tags),
            legal_context: report.legal_context.filter(|text| !text.is_empty()),
            images: Some(report.images),
            created_at: report.created_at,
            updated_at: report.created_at,
        }
    }

    pub fn to_local(self) -> Report {
        Report {
            id: self.id,
            content: self.content,
            category: self.category,
            tags: self.tags.unwrap_or_default(),
            legal_context: self.legal_context,
            images: self.images.unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRow {
    pub id: String,
    pub user_id: UserId,
    pub name: String,
    pub mime_type: String,
    pub data: String,
    pub folder: String,
    #[serde(default)]
    pub structured_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRow {
    pub fn from_local(document: StoredDocument, user_id: UserId) -> Self {
        Self {
            id: document.id,
            user_id,
            name: document.name,
            mime_type: document.mime_type,
            data: document.data,
            folder: document.folder,
            structured_data: document.structured_data.filter(|value| !value.is_null()),
            created_at: document.created_at,
            updated_at: document.created_at,
        }
    }

    pub fn to_local(self) -> StoredDocument {
        StoredDocument {
            id: self.id,
            name: self.name,
            mime_type: self.mime_type,
            data: self.data,
            folder: self.folder,
            structured_data: self.structured_data,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRow {
    pub id: String,
    pub user_id: UserId,
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub legal_context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TemplateRow {
    /// Templates carry no timestamp locally, so `now` stamps both columns.
    pub fn from_local(template: IncidentTemplate, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: template.id,
            user_id,
            title: template.title,
            content: template.content,
            category: template.category,
            tags: Some(template.tags),
            legal_context: template.legal_context.filter(|text| !text.is_empty()),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_local(self) -> IncidentTemplate {
        IncidentTemplate {
            id: self.id,
            title: self.title,
            content: self.content,
            category: self.category,
            tags: self.tags.unwrap_or_default(),
            legal_context: self.legal_context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "role_or_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub children: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn from_profile(
        user_id: UserId,
        email: String,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: user_id,
            email,
            name: Some(profile.name.clone()),
            role: profile.role,
            children: Some(profile.children.clone()),
            created_at: None,
            updated_at: now,
        }
    }

    pub fn to_profile(self) -> UserProfile {
        UserProfile {
            name: self.name.unwrap_or_default(),
            role: self.role,
            children: self.children.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: UserId,
    pub tier: SubscriptionTier,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    #[serde(default)]
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub current_period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
}

impl SubscriptionRow {
    /// Only an active subscription grants its tier.
    pub fn effective_tier(&self) -> SubscriptionTier {
        match self.status {
            SubscriptionStatus::Active => self.tier,
            _ => SubscriptionTier::Free,
        }
    }
}

/// One usage event. `id` is assigned by the store on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub user_id: UserId,
    pub tokens_used: i64,
    pub used_at: DateTime<Utc>,
}

//=========================================================================================
// Identity
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: Option<String>,
}

/// A signed-in session handed out by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
    pub expires_at: DateTime<Utc>,
}

/// A change in authentication state, delivered on the provider's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn token_usage_only_counts_the_current_month() {
        let user_id = Uuid::new_v4();
        let event = |when, tokens_used| TokenUsageRow {
            id: None,
            user_id,
            tokens_used,
            used_at: when,
        };
        let events = vec![
            event(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(), 100),
            event(at(2024, 5, 15), 250),
            event(at(2024, 4, 30), 9999),
        ];

        let usage = TokenUsage::aggregate(&events, at(2024, 5, 20));

        assert_eq!(usage.used, 350);
        assert_eq!(usage.reset_date, at(2024, 6, 20));
    }

    #[test]
    fn remaining_tokens_never_goes_negative() {
        let usage = TokenUsage {
            used: 60_000,
            reset_date: at(2024, 6, 1),
        };
        assert_eq!(usage.remaining(SubscriptionTier::Free), 0);
        assert_eq!(usage.remaining(SubscriptionTier::Plus), 440_000);
    }

    #[test]
    fn profile_tolerates_blank_role_and_missing_children() {
        let profile: UserProfile =
            serde_json::from_value(json!({ "name": "Sam", "role": "" })).unwrap();
        assert_eq!(profile.role, None);
        assert!(profile.children.is_empty());

        let profile: UserProfile =
            serde_json::from_value(json!({ "name": "Sam", "role": "Father", "children": ["Ada"] }))
                .unwrap();
        assert_eq!(profile.role, Some(Role::Father));
    }

    #[test]
    fn report_row_uses_remote_column_names() {
        let report = Report {
            id: "r-1".into(),
            content: "Late pickup".into(),
            category: "Scheduling".into(),
            tags: vec!["pickup".into()],
            legal_context: Some(String::new()),
            images: vec![],
            created_at: at(2024, 3, 2),
        };

        let row = serde_json::to_value(ReportRow::from_local(report, Uuid::nil())).unwrap();

        assert_eq!(row["legal_context"], Value::Null);
        assert_eq!(row["created_at"], row["updated_at"]);
        assert_eq!(row["user_id"], json!(Uuid::nil()));
    }

    #[test]
    fn inactive_subscription_falls_back_to_free() {
        let mut row = SubscriptionRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tier: SubscriptionTier::Pro,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            status: SubscriptionStatus::PastDue,
            current_period_start: None,
            current_period_end: None,
        };
        assert_eq!(row.effective_tier(), SubscriptionTier::Free);

        row.status = SubscriptionStatus::Active;
        assert_eq!(row.effective_tier(), SubscriptionTier::Pro);
    }
}
