// Persistence for groups, memberships and assignment rows
pub mod memory;
pub mod models;
pub mod repository;
pub mod traits;

pub use memory::MemoryStore;
pub use repository::PgStore;
pub use traits::SyncStore;
