pub mod integrity;
pub mod models;
pub mod queries;
pub mod settings;
pub mod sqlite;
pub mod tags;

pub use sqlite::Database;
