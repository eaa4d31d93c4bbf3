pub mod billing;
pub mod db;
pub mod identity;
pub mod local_store;

pub use billing::HttpBillingAdapter;
pub use db::PgRemoteStore;
pub use identity::PgIdentityProvider;
pub use local_store::FileKeyValueStore;
