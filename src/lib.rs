// Library root: re-exports all modules so integration tests and external
// consumers can access the crate's public API.

pub mod api;
pub mod config;
pub mod expense;
pub mod model;
pub mod store;
pub mod watcher;
