use crate::{
    amqp::{
        configuration::{ConfigurationError, ConnectionConfiguration},
        ManageConnections,
    },
    consumers::{
        error::{DequeueError, MessageProcessingFailure},
        handler::MessageHandler,
        processing::{ErrorCallback, MessageProcessing},
        secondary::{no_secondary_receive, SecondaryReceivePolicy, SecondaryReceiveSettings},
        slot::{ConsumerSlot, SlotInfo, SlotKind, SlotSettings},
        transaction::{TransactionScope, TransactionSettings},
    },
};
use futures_util::future::join_all;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

/// Pulls messages from an input queue, and optionally from secondary queues, and hands them to
/// a [`MessageHandler`].
///
/// # Lifecycle
///
/// 1. [`init`](DequeueStrategy::init) binds the strategy to a queue, a handler and an error
///    callback. It can only be called once.
/// 2. [`start`](DequeueStrategy::start) opens one channel per consumer and subscribes.
/// 3. [`stop`](DequeueStrategy::stop) cancels the subscriptions, waits for in-flight messages
///    and closes the channels. A stopped strategy can be started again.
///
/// Dropping a running strategy signals its consumers without waiting for them: in the
/// background, each one finishes its in-flight message, cancels its subscription and closes its
/// channel, handing prefetched messages back to the broker. The tokio runtime must outlive them.
///
/// # Concurrency
///
/// Each consumer processes one message at a time on its own channel: the number of messages
/// processed concurrently is the number of consumers. Prefetched messages wait on the channel
/// they were delivered to.
pub struct DequeueStrategy {
    connections: Arc<dyn ManageConnections>,
    slot_settings: SlotSettings,
    secondary_receive: SecondaryReceivePolicy,
    drain_timeout: Option<Duration>,
    state: State,
}

enum State {
    Uninitialized,
    Initialized(Arc<Pipeline>),
    Running {
        pipeline: Arc<Pipeline>,
        slots: Vec<ConsumerSlot>,
        shutdown: watch::Sender<bool>,
    },
    Stopped(Arc<Pipeline>),
}

/// What `init` binds the strategy to.
struct Pipeline {
    queue_name: String,
    processing: Arc<MessageProcessing>,
}

impl DequeueStrategy {
    /// Prefetch count and retry delay are taken from `configuration`.
    pub fn new(
        connections: Arc<dyn ManageConnections>,
        configuration: &ConnectionConfiguration,
    ) -> Self {
        Self {
            connections,
            slot_settings: SlotSettings {
                prefetch_count: configuration.prefetch_count,
                retry_delay: configuration.retry_delay(),
            },
            secondary_receive: no_secondary_receive(),
            drain_timeout: None,
            state: State::Uninitialized,
        }
    }

    /// Decide which secondary queues to consume from, given the input queue.
    ///
    /// The policy is evaluated on every `start`.
    #[must_use]
    pub fn with_secondary_receive(
        mut self,
        policy: impl Fn(&str) -> SecondaryReceiveSettings + Send + Sync + 'static,
    ) -> Self {
        self.secondary_receive = Arc::new(policy);
        self
    }

    /// Bound the time `stop` waits for in-flight messages. Unbounded by default.
    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = Some(drain_timeout);
        self
    }

    /// Bind the strategy to its input queue.
    ///
    /// `on_error` is invoked once, with the message body, for every message that was not
    /// processed. No connection is opened until `start`.
    pub fn init<H, E>(
        &mut self,
        queue_name: impl Into<String>,
        transaction_settings: TransactionSettings,
        handler: H,
        on_error: E,
    ) -> Result<(), DequeueError>
    where
        H: MessageHandler,
        E: Fn(&[u8], &MessageProcessingFailure) + Send + Sync + 'static,
    {
        if !matches!(self.state, State::Uninitialized) {
            return Err(DequeueError::AlreadyInitialized);
        }
        let queue_name = queue_name.into();
        if queue_name.is_empty() {
            return Err(ConfigurationError::EmptyQueueName.into());
        }
        transaction_settings.validate()?;
        if transaction_settings.scope() == TransactionScope::Distributed {
            tracing::warn!(
                %queue_name,
                "RabbitMq cannot enlist in distributed transactions, a local scope will be used"
            );
        }

        let on_error: ErrorCallback = Arc::new(on_error);
        self.state = State::Initialized(Arc::new(Pipeline {
            queue_name,
            processing: Arc::new(MessageProcessing {
                handler: Arc::new(handler),
                on_error,
                transactions: transaction_settings,
            }),
        }));
        Ok(())
    }

    /// Start `maximum_concurrency` consumers on the input queue, plus the ones asked for by the
    /// secondary receive policy.
    ///
    /// Either every consumer starts or none does.
    #[tracing::instrument(name = "dequeue_strategy_start", skip(self))]
    pub async fn start(&mut self, maximum_concurrency: usize) -> Result<(), DequeueError> {
        let pipeline = match &self.state {
            State::Uninitialized => return Err(DequeueError::NotInitialized),
            State::Running { .. } => return Err(DequeueError::AlreadyRunning),
            State::Initialized(pipeline) | State::Stopped(pipeline) => Arc::clone(pipeline),
        };
        if maximum_concurrency == 0 {
            return Err(ConfigurationError::InvalidConcurrency(maximum_concurrency).into());
        }

        let secondary = (self.secondary_receive)(&pipeline.queue_name);
        let queues = std::iter::repeat((pipeline.queue_name.as_str(), SlotKind::Primary))
            .take(maximum_concurrency)
            .chain(
                secondary
                    .consumers()
                    .map(|queue| (queue, SlotKind::Secondary)),
            );

        let (shutdown, shutdown_signal) = watch::channel(false);
        let starts = queues.map(|(queue, kind)| {
            ConsumerSlot::start(
                Arc::clone(&self.connections),
                queue.to_string(),
                kind,
                self.slot_settings,
                Arc::clone(&pipeline.processing),
                shutdown_signal.clone(),
            )
        });
        let results = join_all(starts).await;

        let mut slots = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(slot) => slots.push(slot),
                Err(e) if failure.is_none() => failure = Some(e),
                Err(e) => tracing::debug!("Another consumer failed to start: {}", e),
            }
        }
        if let Some(source) = failure {
            let _ = shutdown.send(true);
            stop_slots(slots, self.drain_timeout).await;
            return Err(DequeueError::Subscription {
                queue: pipeline.queue_name.clone(),
                source,
            });
        }

        tracing::info!(
            queue_name = %pipeline.queue_name,
            consumers = slots.len(),
            "Started consuming"
        );
        self.state = State::Running {
            pipeline,
            slots,
            shutdown,
        };
        Ok(())
    }

    /// Stop every consumer, waiting for in-flight messages up to the drain timeout.
    ///
    /// Does nothing unless running.
    #[tracing::instrument(name = "dequeue_strategy_stop", skip(self))]
    pub async fn stop(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Uninitialized);
        self.state = match state {
            State::Running {
                pipeline,
                slots,
                shutdown,
            } => {
                let _ = shutdown.send(true);
                stop_slots(slots, self.drain_timeout).await;
                tracing::info!(queue_name = %pipeline.queue_name, "Stopped consuming");
                State::Stopped(pipeline)
            }
            other => other,
        };
    }

    /// The consumers currently running. Empty unless running.
    pub fn slots(&self) -> Vec<SlotInfo> {
        match &self.state {
            State::Running { slots, .. } => slots.iter().map(ConsumerSlot::info).collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// The input queue, once initialized.
    pub fn queue_name(&self) -> Option<&str> {
        match &self.state {
            State::Uninitialized => None,
            State::Initialized(pipeline)
            | State::Stopped(pipeline)
            | State::Running { pipeline, .. } => Some(&pipeline.queue_name),
        }
    }
}

async fn stop_slots(slots: Vec<ConsumerSlot>, drain_timeout: Option<Duration>) {
    join_all(slots.into_iter().map(|slot| slot.stop(drain_timeout))).await;
}
