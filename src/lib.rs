// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod channels;
pub mod config;
pub mod crawler;
pub mod dedup;
pub mod llm;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod quality;
pub mod service;
pub mod store;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::InfoReceiverConfig;
pub use crate::service::InfoReceiverService;
pub use crate::store::Store;
