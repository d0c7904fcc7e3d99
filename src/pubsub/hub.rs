use std::sync::{Arc, Weak};

use ahash::AHashMap;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::{
    subscriber::Release, Message, PatternMatcher, PubSubStats, Scope, StatsSnapshot, Subscription,
    SubscriptionId, SubscriptionKind, Topic,
};
use crate::{HubConfig, PubSubError, PubSubResult};

type TopicMap<T> = AHashMap<Arc<str>, Arc<Topic<T>>>;

/// Хаб Pub/Sub: реестр топиков и маршрутизатор публикаций.
///
/// Поддерживает:
/// - Точные подписки по имени топика
/// - Подписки по шаблонам (glob), шаблон компилируется один раз
/// - Удаление топика, как только у него не остаётся подписчиков
/// - Каскадное закрытие всех топиков через общую область отмены
///
/// Клонирование дешёвое; все клоны разделяют реестр. Когда уходит
/// последний клон, хаб закрывается.
pub struct Hub<T> {
    inner: Arc<HubInner<T>>,
}

struct HubInner<T> {
    config: HubConfig,
    scope: Scope,
    registry: RwLock<Registry<T>>,
    stats: Arc<PubSubStats>,
}

struct Registry<T> {
    /// Точные топики → `Topic`
    exact: TopicMap<T>,
    /// Шаблоны → `Topic`
    patterns: TopicMap<T>,
    /// Шаблоны → скомпилированный matcher; живёт столько же, сколько топик шаблона
    matchers: AHashMap<Arc<str>, PatternMatcher>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            exact: AHashMap::new(),
            patterns: AHashMap::new(),
            matchers: AHashMap::new(),
        }
    }
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Hub<T> {
    /// Создаёт хаб, где `queue_size` ограничивает входную очередь каждого
    /// топика и очередь каждого подписчика.
    pub fn new(queue_size: usize) -> PubSubResult<Self> {
        Self::with_config(HubConfig::new(queue_size))
    }

    pub fn with_config(config: HubConfig) -> PubSubResult<Self> {
        Self::build(config, Scope::new())
    }

    /// Создаёт хаб с областью отмены, дочерней к `parent`.
    pub fn with_parent(
        config: HubConfig,
        parent: &Scope,
    ) -> PubSubResult<Self> {
        Self::build(config, parent.child())
    }

    fn build(
        config: HubConfig,
        scope: Scope,
    ) -> PubSubResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| PubSubError::NoRuntime)?;

        let inner = Arc::new(HubInner {
            config,
            scope,
            registry: RwLock::new(Registry::default()),
            stats: Arc::new(PubSubStats::new()),
        });
        runtime.spawn(cancel_watcher(inner.scope.clone(), Arc::downgrade(&inner)));

        Ok(Self { inner })
    }

    /// Публикация сообщения в топик.
    ///
    /// Сообщение получает точный топик (если есть) и, независимо от него,
    /// каждый топик шаблона, под который подходит `topic`. Возвращает число
    /// топиков, принявших сообщение; `Ok(0)`, если подписчиков нет.
    ///
    /// Ждёт, пока во входной очереди каждого топика не освободится место.
    /// Блокировка реестра при этом не удерживается.
    pub async fn publish(
        &self,
        topic: &str,
        payload: T,
    ) -> PubSubResult<usize> {
        let inner = &self.inner;
        if inner.scope.is_cancelled() {
            return Err(PubSubError::AlreadyClosed);
        }
        inner.stats.record_published();

        let targets = inner.route(topic);
        if targets.is_empty() {
            return Ok(0);
        }

        let channel: Arc<str> = Arc::from(topic);
        let mut accepted = 0;
        for (pattern, target) in targets {
            let mut msg = Message::new(channel.clone(), payload.clone());
            if let Some(pattern) = pattern {
                msg = msg.with_pattern(pattern);
            }
            match target.publish(msg).await {
                Ok(()) => accepted += 1,
                // топик закрывается параллельно, его подписчики уже уходят
                Err(_) => trace!(topic, "skipping closed topic"),
            }
        }

        inner.stats.record_routed(accepted as u64);
        Ok(accepted)
    }

    /// Подписка на конкретный топик (точное совпадение).
    ///
    /// Создаёт топик при первой подписке.
    pub fn subscribe(
        &self,
        topic: &str,
    ) -> PubSubResult<Subscription<T>> {
        let inner = &self.inner;
        let mut registry = inner.registry.write();
        if inner.scope.is_cancelled() {
            return Err(PubSubError::AlreadyClosed);
        }

        let existing = registry
            .exact
            .get_key_value(topic)
            .map(|(key, target)| (key.clone(), target.clone()));
        let (key, sub) = match existing {
            Some((key, target)) => (key, target.subscribe()?),
            None => {
                let target = Arc::new(inner.new_topic()?);
                let sub = target.subscribe()?;
                let key: Arc<str> = Arc::from(topic);
                registry.exact.insert(key.clone(), target);
                debug!(topic, "topic created");
                (key, sub)
            }
        };
        drop(registry);

        Ok(sub.rebind(SubscriptionKind::Exact(key), inner.owner()))
    }

    /// Подписка по шаблону (glob), например `"/a/*"` или `"a?c"`.
    ///
    /// Шаблон компилируется при первой подписке; некорректный шаблон
    /// возвращает `InvalidPattern`, и ничего не регистрируется.
    pub fn psubscribe(
        &self,
        pattern: &str,
    ) -> PubSubResult<Subscription<T>> {
        let inner = &self.inner;
        let mut registry = inner.registry.write();
        if inner.scope.is_cancelled() {
            return Err(PubSubError::AlreadyClosed);
        }

        let existing = registry
            .patterns
            .get_key_value(pattern)
            .map(|(key, target)| (key.clone(), target.clone()));
        let (key, sub) = match existing {
            Some((key, target)) => (key, target.subscribe()?),
            None => {
                let matcher = PatternMatcher::compile(pattern, inner.config.literal_separator)?;
                let target = Arc::new(inner.new_topic()?);
                let sub = target.subscribe()?;
                let key = matcher.pattern().clone();
                registry.patterns.insert(key.clone(), target);
                registry.matchers.insert(key.clone(), matcher);
                debug!(pattern, "pattern topic created");
                (key, sub)
            }
        };
        drop(registry);

        Ok(sub.rebind(SubscriptionKind::Pattern(key), inner.owner()))
    }

    /// Отписка от точного топика. Пустой топик закрывается и удаляется.
    ///
    /// Неизвестный топик или идентификатор игнорируется.
    pub fn unsubscribe(
        &self,
        topic: &str,
        id: SubscriptionId,
    ) {
        self.inner.unsubscribe_exact(topic, id);
    }

    /// Отписка от шаблона. Вместе с пустым топиком удаляется и matcher.
    pub fn punsubscribe(
        &self,
        pattern: &str,
        id: SubscriptionId,
    ) {
        self.inner.unsubscribe_pattern(pattern, id);
    }
}

impl<T> Hub<T> {
    /// Отменяет область хаба: все топики закрываются каскадно,
    /// реестр очищается. Идемпотентно.
    pub fn close(&self) {
        self.inner.scope.cancel();
        self.inner.drain();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.scope.is_cancelled()
    }

    /// Область отмены хаба: родитель области каждого топика.
    pub fn scope(&self) -> Scope {
        self.inner.scope.clone()
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn topic_count(&self) -> usize {
        self.inner.registry.read().exact.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.inner.registry.read().patterns.len()
    }

    pub fn has_topic(
        &self,
        topic: &str,
    ) -> bool {
        self.inner.registry.read().exact.contains_key(topic)
    }

    pub fn has_pattern(
        &self,
        pattern: &str,
    ) -> bool {
        let registry = self.inner.registry.read();
        debug_assert_eq!(
            registry.patterns.contains_key(pattern),
            registry.matchers.contains_key(pattern)
        );
        registry.patterns.contains_key(pattern)
    }

    /// Число подписчиков точного топика (0, если топика нет).
    pub fn subscriber_count(
        &self,
        topic: &str,
    ) -> usize {
        self.inner
            .registry
            .read()
            .exact
            .get(topic)
            .map_or(0, |t| t.subscriber_count())
    }

    pub fn pattern_subscriber_count(
        &self,
        pattern: &str,
    ) -> usize {
        self.inner
            .registry
            .read()
            .patterns
            .get(pattern)
            .map_or(0, |t| t.subscriber_count())
    }
}

impl<T> std::fmt::Debug for Hub<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .field("topics", &self.topic_count())
            .field("patterns", &self.pattern_count())
            .finish()
    }
}

impl<T> HubInner<T> {
    /// Забирает все топики и шаблоны из реестра. Топики закрываются при drop.
    fn drain(&self) {
        let drained = std::mem::take(&mut *self.registry.write());
        if !drained.exact.is_empty() || !drained.patterns.is_empty() {
            debug!(
                topics = drained.exact.len(),
                patterns = drained.patterns.len(),
                "hub closed"
            );
        }
    }
}

/// Очищает реестр, как только область хаба отменена любым путём:
/// `close()`, отмена родителя или уход последнего клона.
async fn cancel_watcher<T>(
    scope: Scope,
    inner: Weak<HubInner<T>>,
) {
    scope.cancelled().await;
    if let Some(inner) = inner.upgrade() {
        inner.drain();
    }
}

impl<T: Clone + Send + 'static> HubInner<T> {
    fn new_topic(&self) -> PubSubResult<Topic<T>> {
        Topic::with_stats(
            &self.scope,
            self.config.queue_size,
            self.config.delivery,
            self.stats.clone(),
        )
    }

    fn owner(self: &Arc<Self>) -> Weak<dyn Release> {
        Arc::downgrade(self) as Weak<dyn Release>
    }

    /// Топики, которые должны получить публикацию в `topic`.
    fn route(
        &self,
        topic: &str,
    ) -> Vec<(Option<Arc<str>>, Arc<Topic<T>>)> {
        let registry = self.registry.read();
        let mut targets = Vec::new();

        // 1) точное совпадение
        if let Some(target) = registry.exact.get(topic) {
            targets.push((None, target.clone()));
        }

        // 2) по шаблону
        for (pattern, target) in &registry.patterns {
            let matched = registry
                .matchers
                .get(pattern)
                .is_some_and(|m| m.is_match(topic));
            if matched {
                targets.push((Some(pattern.clone()), target.clone()));
            }
        }

        targets
    }

    fn unsubscribe_exact(
        &self,
        topic: &str,
        id: SubscriptionId,
    ) {
        let mut registry = self.registry.write();
        if detach(&mut registry.exact, topic, id) {
            debug!(topic, "topic destroyed");
        }
    }

    fn unsubscribe_pattern(
        &self,
        pattern: &str,
        id: SubscriptionId,
    ) {
        let mut registry = self.registry.write();
        if detach(&mut registry.patterns, pattern, id) {
            registry.matchers.remove(pattern);
            debug!(pattern, "pattern topic destroyed");
        }
    }
}

/// Снимает подписку `id` с топика `key`. Если подписчиков не осталось
/// или топик уже закрыт, закрывает его и убирает из карты; тогда
/// возвращает `true`.
fn detach<T: Clone + Send + 'static>(
    map: &mut TopicMap<T>,
    key: &str,
    id: SubscriptionId,
) -> bool {
    let Some(target) = map.get(key) else {
        return false;
    };
    let emptied = match target.unsubscribe(id) {
        Ok(true) => target.subscriber_count() == 0,
        Ok(false) => false,
        // закрытый топик уже отпустил всех подписчиков
        Err(_) => true,
    };
    if !emptied {
        return false;
    }

    if let Some(target) = map.remove(key) {
        target.close();
    }
    true
}

impl<T: Clone + Send + 'static> Release for HubInner<T> {
    fn release(
        &self,
        kind: &SubscriptionKind,
        id: SubscriptionId,
    ) {
        match kind {
            SubscriptionKind::Exact(topic) => self.unsubscribe_exact(topic, id),
            SubscriptionKind::Pattern(pattern) => self.unsubscribe_pattern(pattern, id),
            SubscriptionKind::Direct => {}
        }
    }
}

impl<T> Drop for HubInner<T> {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}
