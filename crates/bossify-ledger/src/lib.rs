pub mod paths;
pub mod sqlite_store;

pub use paths::BossPaths;
pub use sqlite_store::SqliteStore;
