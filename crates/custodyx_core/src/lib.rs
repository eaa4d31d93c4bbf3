pub mod domain;
pub mod memory;
pub mod migration;
pub mod plans;
pub mod ports;
pub mod remote;
pub mod session;
pub mod snapshot;

pub use domain::{AuthEvent, AuthSession, AuthUser, LocalSnapshot, SnapshotSummary, SubscriptionTier, TokenUsage, UserId, UserProfile};
pub use migration::{DataMigrationService, MigrationFlow, MigrationState, MigrationStatus, TransitionError};
pub use ports::{
    AuthError, BillingService, IdentityProvider, KeyValueStore, PortError, PortResult, RemoteStore, Table,
};
pub use remote::{RemoteClient, RemoteError};
pub use session::{SessionContext, SessionError, SessionState};
pub use snapshot::SnapshotReader;
