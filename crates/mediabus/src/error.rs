//! Startup and wiring errors: connecting to the broker, creating the
//! stream, and binding the admin HTTP server. Once `Pipeline::bootstrap`
//! returns `Ok`, processing-time errors stay inside their own crate's
//! error type and never reach here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediabusError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[from] eventlog::EventLogError),

    #[error("failed to bind admin server: {0}")]
    Bind(#[source] std::io::Error),

    #[error("admin server error: {0}")]
    Serve(#[source] std::io::Error),
}
