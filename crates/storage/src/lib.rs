pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use memory::MemoryCurveStore;
pub use sqlite::SqliteCurveStore;
pub use traits::*;
