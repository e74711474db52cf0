//! Offline-first data layer for a news reader client.
//!
//! Articles flow from the news API ([`news`]) into an expiring on-device
//! cache ([`db`]) and, for a signed-in user, into a per-user cloud store
//! ([`cloud`]). [`sync::SyncCoordinator`] applies the fallback,
//! reconciliation and optimistic-update policy across the three.

pub mod ai;
pub mod auth;
pub mod cloud;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod news;
pub mod sync;

pub use error::{AppError, Result};
