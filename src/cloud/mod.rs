mod document;
mod memory;
mod rest;
mod store;

pub use document::DocumentStore;
pub use memory::MemoryDocumentStore;
pub use rest::RestDocumentStore;
pub use store::{UserCloudStore, MAX_HISTORY_ITEMS, RECOMMENDATION_QUERY_LIMIT};
