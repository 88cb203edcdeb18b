pub mod connection;
pub mod memory;
pub mod migrations;
pub mod notifications;
pub mod relationships;
pub mod stores;
pub mod users;

pub use connection::{get_db_pool, DatabaseConfig};
pub use memory::{MemoryNotificationSink, MemoryRelationshipStore, MemoryUserDirectory};
pub use notifications::PgNotificationSink;
pub use relationships::PgRelationshipStore;
pub use stores::{NotificationSink, RelationshipStore, UserDirectory};
pub use users::PgUserDirectory;
