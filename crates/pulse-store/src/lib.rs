pub mod access;
pub mod database;
pub mod error;
pub mod schema;
pub mod tasks;
pub mod teams;
pub mod users;

pub use access::StoreOracle;
pub use database::Database;
pub use error::StoreError;
