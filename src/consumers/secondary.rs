use std::sync::Arc;

/// Extra queues consumed alongside the main input queue, e.g. to drain a queue being retired.
///
/// Messages received from a secondary queue go through the same handler, with the same
/// transaction settings, as the ones received from the main queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecondaryReceiveSettings {
    pub enabled: bool,
    pub secondary_queues: Vec<String>,
    /// The number of consumers started for each secondary queue.
    pub maximum_concurrency_level: usize,
}

impl SecondaryReceiveSettings {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled<I, S>(secondary_queues: I, maximum_concurrency_level: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            secondary_queues: secondary_queues.into_iter().map(Into::into).collect(),
            maximum_concurrency_level,
        }
    }

    /// One queue name per consumer to start. Empty unless enabled.
    pub(crate) fn consumers(&self) -> impl Iterator<Item = &str> + '_ {
        let per_queue = if self.enabled {
            self.maximum_concurrency_level
        } else {
            0
        };
        self.secondary_queues
            .iter()
            .flat_map(move |queue| std::iter::repeat(queue.as_str()).take(per_queue))
    }
}

/// Given the main input queue, decide which secondary queues to consume from.
pub type SecondaryReceivePolicy = Arc<dyn Fn(&str) -> SecondaryReceiveSettings + Send + Sync>;

/// Never consume from secondary queues.
pub fn no_secondary_receive() -> SecondaryReceivePolicy {
    Arc::new(|_| SecondaryReceiveSettings::disabled())
}
