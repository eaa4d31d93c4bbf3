//! crates/custodyx_core/src/session.rs
//!
//! The single source of truth for who is signed in on this device and what
//! they have: profile, subscription tier and this month's token usage.
//!
//! State changes are driven by the identity provider's event stream. Sign-in
//! and sign-out calls only talk to the provider; the resulting events are what
//! update the context.

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::{
    start_of_month, AuthEvent, AuthSession, AuthUser, SubscriptionRow, SubscriptionTier,
    TokenUsage, TokenUsageRow, UserId, UserProfile, UserRow,
};
use crate::ports::{AuthError, AuthEventStream, IdentityProvider, Table};
use crate::remote::{RemoteClient, RemoteError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No user is signed in")]
    NotSignedIn,
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub session: Option<AuthSession>,
    pub user: Option<AuthUser>,
    pub profile: Option<UserProfile>,
    pub tier: SubscriptionTier,
    pub token_usage: TokenUsage,
    /// True until the first session check (and any data load it triggers) ends.
    pub loading: bool,
}

impl SessionState {
    fn anonymous() -> Self {
        Self {
            session: None,
            user: None,
            profile: None,
            tier: SubscriptionTier::Free,
            token_usage: TokenUsage::fresh(Utc::now()),
            loading: true,
        }
    }

    fn is_signed_out(&self) -> bool {
        self.user.is_none()
            && self.profile.is_none()
            && self.tier == SubscriptionTier::Free
            && self.token_usage.used == 0
    }

    pub fn remaining_tokens(&self) -> i64 {
        self.token_usage.remaining(self.tier)
    }
}

pub struct SessionContext {
    identity: Arc<dyn IdentityProvider>,
    remote: RemoteClient,
    state: RwLock<SessionState>,
}

impl SessionContext {
    pub fn new(identity: Arc<dyn IdentityProvider>, remote: RemoteClient) -> Self {
        Self {
            identity,
            remote,
            state: RwLock::new(SessionState::anonymous()),
        }
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn current_user(&self) -> Option<AuthUser> {
        self.state.read().await.user.clone()
    }

    /// Picks up a session persisted by an earlier run, if any.
    pub async fn initialize(&self) {
        match self.identity.get_session().await {
            Ok(Some(session)) => self.handle_event(AuthEvent::SignedIn(session)).await,
            Ok(None) => self.state.write().await.loading = false,
            Err(e) => {
                error!("Error restoring session: {}", e);
                self.state.write().await.loading = false;
            }
        }
    }

    /// Applies auth events until `cancel` fires or the provider closes the stream.
    pub fn subscribe(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut events = self.identity.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.next() => match event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    },
                }
            }
            info!("Auth listener stopped.");
        })
    }

    /// Applies one auth event. Applying the same event twice is harmless.
    pub async fn handle_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                let user_id = session.user.id;
                {
                    let mut state = self.state.write().await;
                    if state.user.as_ref().map(|u| u.id) != Some(user_id) {
                        // A different account: nothing cached belongs to it.
                        state.profile = None;
                        state.tier = SubscriptionTier::Free;
                        state.token_usage = TokenUsage::fresh(Utc::now());
                    }
                    state.user = Some(session.user.clone());
                    state.session = Some(session);
                }
                self.load_user_data(user_id).await;
            }
            AuthEvent::SignedOut => {
                let mut state = self.state.write().await;
                if !state.is_signed_out() {
                    *state = SessionState::anonymous();
                }
                state.session = None;
                state.loading = false;
            }
        }
    }

    /// Loads profile, tier and usage. Each load stands on its own; a failure
    /// is logged and the others still apply.
    async fn load_user_data(&self, user_id: UserId) {
        let profile = match self.remote.read_one::<UserRow>(Table::Users, user_id).await {
            Ok(row) => Some(row.map(UserRow::to_profile)),
            Err(e) => {
                error!(%user_id, "Error loading user profile: {}", e);
                None
            }
        };
        let tier = self.fetch_tier(user_id).await;
        let usage = match self.user_token_usage(user_id).await {
            Ok(usage) => usage,
            Err(e) => {
                error!(%user_id, "Error loading token usage: {}", e);
                TokenUsage::fresh(Utc::now())
            }
        };

        let mut state = self.state.write().await;
        if state.user.as_ref().map(|u| u.id) != Some(user_id) {
            warn!(%user_id, "Discarding user data loaded for a session that has ended.");
            return;
        }
        if let Some(profile) = profile {
            state.profile = profile;
        }
        state.tier = tier;
        state.token_usage = usage;
        state.loading = false;
    }

    async fn fetch_tier(&self, user_id: UserId) -> SubscriptionTier {
        match self.current_subscription_for(user_id).await {
            Ok(Some(subscription)) => subscription.effective_tier(),
            Ok(None) => SubscriptionTier::Free,
            Err(e) => {
                error!(%user_id, "Error loading subscription: {}", e);
                SubscriptionTier::Free
            }
        }
    }

    async fn current_subscription_for(
        &self,
        user_id: UserId,
    ) -> Result<Option<SubscriptionRow>, RemoteError> {
        self.remote.read_one(Table::Subscriptions, user_id).await
    }

    /// Tokens used this calendar month, summed from the usage events.
    pub async fn user_token_usage(&self, user_id: UserId) -> Result<TokenUsage, RemoteError> {
        let now = Utc::now();
        let events: Vec<TokenUsageRow> = self
            .remote
            .read_for_owner_since(Table::TokenUsage, user_id, "used_at", start_of_month(now))
            .await?;
        Ok(TokenUsage::aggregate(&events, now))
    }

    async fn require_user(&self) -> Result<AuthUser, SessionError> {
        self.current_user().await.ok_or(SessionError::NotSignedIn)
    }

    //-------------------------------------------------------------------------------------
    // Identity
    //-------------------------------------------------------------------------------------

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Option<Value>,
    ) -> Result<AuthSession, AuthError> {
        self.identity.sign_up(email, password, metadata).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        self.identity.sign_in(email, password).await
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.identity.sign_out().await
    }

    //-------------------------------------------------------------------------------------
    // Mutations
    //-------------------------------------------------------------------------------------

    /// Saves the profile remotely, then caches it. A failed save leaves the
    /// cached profile as it was.
    pub async fn update_profile(&self, profile: UserProfile) -> Result<(), SessionError> {
        let user = self.require_user().await?;
        let row = UserRow::from_profile(
            user.id,
            user.email.unwrap_or_default(),
            &profile,
            Utc::now(),
        );
        self.remote.write(Table::Users, &[row], "id").await?;
        self.state.write().await.profile = Some(profile);
        Ok(())
    }

    /// Counts `tokens` against this month right away and records the event.
    /// If the event cannot be stored the count is taken back.
    pub async fn record_token_usage(&self, tokens: i64) -> Result<TokenUsage, SessionError> {
        let user = self.require_user().await?;
        {
            let mut state = self.state.write().await;
            state.token_usage.used = state.token_usage.used.saturating_add(tokens);
        }

        let event = TokenUsageRow {
            id: None,
            user_id: user.id,
            tokens_used: tokens,
            used_at: Utc::now(),
        };
        if let Err(e) = self.remote.insert(Table::TokenUsage, &[event]).await {
            warn!(user_id = %user.id, "Failed to record token usage: {}", e);
            let mut state = self.state.write().await;
            state.token_usage.used = state.token_usage.used.saturating_sub(tokens);
            return Err(e.into());
        }
        Ok(self.state.read().await.token_usage)
    }

    pub async fn refresh_subscription(&self) -> Result<SubscriptionTier, SessionError> {
        let user = self.require_user().await?;
        let tier = self.fetch_tier(user.id).await;
        self.state.write().await.tier = tier;
        Ok(tier)
    }

    /// The signed-in user's subscription row, read fresh.
    pub async fn current_subscription(&self) -> Result<Option<SubscriptionRow>, SessionError> {
        let user = self.require_user().await?;
        Ok(self.current_subscription_for(user.id).await?)
    }
}

/// Adapts a broadcast receiver into the event stream identity providers hand out.
pub fn event_stream(receiver: broadcast::Receiver<AuthEvent>) -> AuthEventStream {
    Box::pin(futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((event, receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth listener fell behind; events dropped.");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }))
}
