pub mod database;
pub mod error;
pub mod events;
pub mod projection;
mod store;

pub use database::Database;
pub use error::StoreError;
pub use store::ConversationStore;
