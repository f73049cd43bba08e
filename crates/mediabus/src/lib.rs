//! Top-level wiring crate: environment configuration, the running
//! pipeline (subscriber, router, appender, resilient reader, health
//! registry, outbox forwarder) and the admin HTTP surface.

pub mod admin;
pub mod app;
pub mod config;
pub mod error;
pub mod handler;

pub use app::Pipeline;
pub use config::Config;
pub use error::MediabusError;
pub use handler::AppenderHandler;
