pub mod predicate;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use predicate::{Comparison, Field, Op, Predicate, Value};
pub use sqlite::SqliteStore;
pub use traits::{FindOptions, GraphStore};
