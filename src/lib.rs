pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod server;
pub mod storage;

// Layered boundaries: ports in app, adapters in infra
pub mod app;
pub mod infra;

pub use error::{ImportError, Result};
