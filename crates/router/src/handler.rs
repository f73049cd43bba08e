//! Typed handler contract. The framework unmarshals the payload into a
//! [`MediaEvent`] before dispatch; handlers never see raw bytes.

use async_trait::async_trait;
use model::MediaEvent;
use resilience::HandlerError;

/// Per-message context threaded through the middleware chain.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub correlation_id: String,
    pub topic: String,
    pub attempt: u32,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: MediaEvent, ctx: &MessageContext) -> Result<(), HandlerError>;
}

/// A handler built from an async closure, for wiring simple pipelines
/// without a dedicated type.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(MediaEvent, MessageContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: MediaEvent, ctx: &MessageContext) -> Result<(), HandlerError> {
        (self.0)(event, ctx.clone()).await
    }
}
