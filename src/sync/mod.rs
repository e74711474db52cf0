mod coordinator;
mod pagination;

pub use coordinator::{SyncCoordinator, SyncOptions};
pub use pagination::{CategoryKey, LoadState, PageKind, PageTicket, PaginationCache, PaginationState};
