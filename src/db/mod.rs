pub mod migrations;
mod repository;
pub mod schema;

pub use repository::LocalStore;
