use crate::{
    consumers::{
        error::MessageProcessingFailure, handler::MessageHandler,
        transaction::TransactionSettings,
    },
    message::TransportMessage,
};
use futures_util::FutureExt;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

/// Invoked once for every message that was not processed.
pub type ErrorCallback = Arc<dyn Fn(&[u8], &MessageProcessingFailure) + Send + Sync>;

/// The final word on a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    Ack,
    Nack { requeue: bool },
}

/// Settles deliveries with the broker.
#[async_trait::async_trait]
pub(crate) trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), lapin::Error>;
    async fn nack(&self, requeue: bool) -> Result<(), lapin::Error>;
}

#[async_trait::async_trait]
impl Acknowledge for lapin::acker::Acker {
    async fn ack(&self) -> Result<(), lapin::Error> {
        lapin::acker::Acker::ack(self, BasicAckOptions { multiple: false }).await
    }

    async fn nack(&self, requeue: bool) -> Result<(), lapin::Error> {
        lapin::acker::Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await
    }
}

/// The per-message pipeline shared by every consumer of a dequeue strategy.
pub(crate) struct MessageProcessing {
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) on_error: ErrorCallback,
    pub(crate) transactions: TransactionSettings,
}

impl MessageProcessing {
    /// Run the handler, settle the delivery and report failures.
    ///
    /// Never fails: broker errors while settling are logged, the consumer notices the broken
    /// channel on its next read.
    #[tracing::instrument(
        name = "process_message",
        skip_all,
        fields(message_id = %message.id, transaction_scope = %self.transactions.scope()),
        level = tracing::Level::DEBUG
    )]
    pub(crate) async fn process(
        &self,
        message: TransportMessage,
        acker: &dyn Acknowledge,
    ) -> Settlement {
        let body = message.body.clone();
        match self.invoke(message).await {
            Ok(()) => {
                if let Err(e) = acker.ack().await {
                    tracing::error!("Failed to ack message: {}", e);
                }
                Settlement::Ack
            }
            Err(failure) => {
                let requeue = self.transactions.is_transactional;
                tracing::warn!(requeue, "Message was not processed: {}", failure);
                if let Err(e) = acker.nack(requeue).await {
                    tracing::error!("Failed to nack message: {}", e);
                }
                (self.on_error)(&body, &failure);
                Settlement::Nack { requeue }
            }
        }
    }

    async fn invoke(&self, message: TransportMessage) -> Result<(), MessageProcessingFailure> {
        let handler = Arc::clone(&self.handler);
        let handling = AssertUnwindSafe(async move { handler.handle(message).await }).catch_unwind();
        let outcome = match self.transactions.handler_timeout() {
            None => handling.await,
            Some(limit) => tokio::time::timeout(limit, handling)
                .await
                .map_err(|_| MessageProcessingFailure::TimedOut(limit))?,
        };
        match outcome {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(MessageProcessingFailure::Rejected),
            Ok(Err(e)) => Err(MessageProcessingFailure::Failed(e)),
            Err(panic) => Err(MessageProcessingFailure::Panicked(panic_message(panic))),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".into()
    }
}
