//! Adapter handing router-dispatched events to the batch appender (C9's
//! "forwards to C6" role), so the dedup/breaker/retry/DLQ middleware chain
//! sits in front of the appender rather than being bypassed.

use std::sync::Arc;

use async_trait::async_trait;
use ingest::BatchAppender;
use model::MediaEvent;
use resilience::HandlerError;
use router::{Handler, MessageContext};

pub struct AppenderHandler {
    appender: Arc<BatchAppender>,
}

impl AppenderHandler {
    pub fn new(appender: Arc<BatchAppender>) -> Self {
        Self { appender }
    }
}

#[async_trait]
impl Handler for AppenderHandler {
    async fn handle(&self, event: MediaEvent, _ctx: &MessageContext) -> Result<(), HandlerError> {
        self.appender.append(event);
        Ok(())
    }
}
