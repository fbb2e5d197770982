pub mod memory_engine;
pub mod sqlite_engine;

pub use memory_engine::MemoryStorageEngine;
pub use sqlite_engine::SqliteStorageEngine;
