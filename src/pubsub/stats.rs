use std::sync::atomic::{AtomicU64, Ordering};

/// Счётчики хаба. Разделяются всеми его топиками.
#[derive(Debug, Default)]
pub struct PubSubStats {
    /// Вызовы `publish` на хабе.
    published: AtomicU64,
    /// Сообщения, принятые входными очередями топиков.
    routed: AtomicU64,
    /// Сообщения, отброшенные для переполненного подписчика
    /// (только при `DeliveryPolicy::DropNewest`).
    dropped: AtomicU64,
}

/// Моментальный снимок [`PubSubStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub published: u64,
    pub routed: u64,
    pub dropped: u64,
}

impl PubSubStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routed(
        &self,
        count: u64,
    ) {
        self.routed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
