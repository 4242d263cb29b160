//! gpushare Extender - kube-scheduler extender HTTP adapter
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Extender protocol endpoints (filter, priorities, bind, status)
//! - Inventory ingestion endpoints for the cluster-state feed
//! - Optional pod binding through the Kubernetes API server

pub mod binding;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod response;
pub mod server;
pub mod state;

// Re-export commonly used types
pub use binding::{ApiServerBinder, BindingError, NoopBinder, PodBinder};
pub use error::{ApiError, Result};
pub use server::{Config, ExtenderServer, API_PREFIX};
pub use state::AppState;
