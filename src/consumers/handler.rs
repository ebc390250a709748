//! The `MessageHandler` trait mirrors `tide`'s approach to endpoint handlers: implement it for
//! your own type or just pass an async closure.
use crate::message::TransportMessage;
use std::future::Future;

/// Processes the messages pulled from the input queue by a
/// [`DequeueStrategy`](crate::consumers::DequeueStrategy).
///
/// # Scope
///
/// `handle` does not get access to the underlying RabbitMq channel.
/// The dequeue strategy acks or nacks the message with the broker according to the outcome:
///
/// - `Ok(true)`: the message was processed and is removed from the queue;
/// - `Ok(false)`, `Err(_)` or a panic: the message was not processed. It is negatively
///   acknowledged and reported to the error callback.
///
/// # Implementers
///
/// Async functions and closures of the form `Fn(TransportMessage) -> Fut`, where `Fut` resolves
/// to `Result<bool, E>` and `E` converts into `anyhow::Error`, implement `MessageHandler` out of
/// the box.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: TransportMessage) -> Result<bool, anyhow::Error>;
}

#[async_trait::async_trait]
impl<F, Fut, E> MessageHandler for F
where
    F: Fn(TransportMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    E: Into<anyhow::Error> + 'static,
{
    async fn handle(&self, message: TransportMessage) -> Result<bool, anyhow::Error> {
        (self)(message).await.map_err(Into::into)
    }
}
