use std::sync::{Arc, Weak};

use ahash::AHashMap;
use parking_lot::RwLock;
use tokio::{
    runtime::Handle,
    sync::mpsc::{self, error::TrySendError},
};
use tracing::{debug, trace};

use super::{
    subscriber::Release, Message, PubSubStats, Scope, Subscription, SubscriptionId,
    SubscriptionKind,
};
use crate::{DeliveryPolicy, PubSubError, PubSubResult};

/// Топик: группа подписчиков одного ключа (точного имени или шаблона).
///
/// Держит ограниченную входную очередь, общую для всех издателей, и
/// набор выходных очередей подписчиков той же ёмкости. Внутренний
/// широковещательный цикл забирает сообщения из входной очереди и по
/// очереди отправляет каждое всем текущим подписчикам.
///
/// Каждый подписчик получает сообщения топика в порядке публикации.
/// Порядок обхода подписчиков для одного сообщения не определён.
///
/// Создание требует запущенного Tokio runtime: топик порождает две задачи
/// (широковещательный цикл и наблюдатель закрытия). Без runtime
/// возвращается `NoRuntime`.
pub struct Topic<T> {
    shared: Arc<TopicShared<T>>,
    intake: mpsc::Sender<Message<T>>,
}

struct TopicShared<T> {
    scope: Scope,
    queue_size: usize,
    delivery: DeliveryPolicy,
    subscribers: RwLock<Subscribers<T>>,
    stats: Arc<PubSubStats>,
}

/// Набор подписчиков и его снимок для широковещательного цикла.
struct Subscribers<T> {
    by_id: AHashMap<SubscriptionId, Outlet<T>>,
    /// Копия `by_id`, пересобирается при каждом изменении набора.
    snapshot: Arc<[Outlet<T>]>,
    closed: bool,
}

/// Пишущая сторона выходной очереди одного подписчика.
struct Outlet<T> {
    tx: mpsc::Sender<Message<T>>,
    /// Дочерняя область топика; отменяется при отписке.
    scope: Scope,
}

impl<T> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Создаёт топик с областью отмены, дочерней к `parent`.
    pub fn new(
        parent: &Scope,
        queue_size: usize,
        delivery: DeliveryPolicy,
    ) -> PubSubResult<Self> {
        Self::with_stats(parent, queue_size, delivery, Arc::new(PubSubStats::new()))
    }

    pub(crate) fn with_stats(
        parent: &Scope,
        queue_size: usize,
        delivery: DeliveryPolicy,
        stats: Arc<PubSubStats>,
    ) -> PubSubResult<Self> {
        if queue_size == 0 {
            return Err(PubSubError::InvalidQueueSize(queue_size));
        }
        let runtime = Handle::try_current().map_err(|_| PubSubError::NoRuntime)?;

        let (intake, intake_rx) = mpsc::channel(queue_size);
        let shared = Arc::new(TopicShared {
            scope: parent.child(),
            queue_size,
            delivery,
            subscribers: RwLock::new(Subscribers::new()),
            stats,
        });

        runtime.spawn(broadcast_loop(shared.clone(), intake_rx));
        runtime.spawn(close_watcher(shared.clone()));

        Ok(Self { shared, intake })
    }

    /// Ставит сообщение во входную очередь.
    ///
    /// Ждёт, если очередь заполнена. Успех означает, что сообщение
    /// принято, а не доставлено.
    pub async fn publish(
        &self,
        msg: Message<T>,
    ) -> PubSubResult<()> {
        if self.shared.scope.is_cancelled() {
            return Err(PubSubError::AlreadyClosed);
        }

        tokio::select! {
            biased;
            _ = self.shared.scope.cancelled() => Err(PubSubError::AlreadyClosed),
            sent = self.intake.send(msg) => sent.map_err(|_| PubSubError::AlreadyClosed),
        }
    }

    /// Регистрирует нового подписчика с собственной выходной очередью.
    pub fn subscribe(&self) -> PubSubResult<Subscription<T>> {
        if self.shared.scope.is_cancelled() {
            return Err(PubSubError::AlreadyClosed);
        }

        let (tx, rx) = mpsc::channel(self.shared.queue_size);
        let id = SubscriptionId::next();

        let mut subscribers = self.shared.subscribers.write();
        // Наблюдатель закрытия мог успеть очистить набор после проверки выше
        if subscribers.closed {
            return Err(PubSubError::AlreadyClosed);
        }
        let scope = self.shared.scope.child();
        let outlet = Outlet {
            tx,
            scope: scope.clone(),
        };
        subscribers.insert(id, outlet);
        drop(subscribers);

        let owner = Arc::downgrade(&self.shared) as Weak<dyn Release>;
        Ok(Subscription::new(id, SubscriptionKind::Direct, rx, scope, owner))
    }

    /// Снимает подписку и закрывает её очередь.
    ///
    /// `Ok(false)` для неизвестного идентификатора.
    pub fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> PubSubResult<bool> {
        self.shared.unsubscribe(id)
    }
}

impl<T> Topic<T> {
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().by_id.len()
    }

    /// Отменяет область топика. Идемпотентно.
    pub fn close(&self) {
        self.shared.scope.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.scope.is_cancelled()
    }

    pub fn scope(&self) -> &Scope {
        &self.shared.scope
    }
}

impl<T> Drop for Topic<T> {
    fn drop(&mut self) {
        self.shared.scope.cancel();
    }
}

impl<T> TopicShared<T> {
    fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> PubSubResult<bool> {
        if self.scope.is_cancelled() {
            return Err(PubSubError::AlreadyClosed);
        }

        let removed = self.subscribers.write().remove(id);
        match removed {
            Some(outlet) => {
                // Прерывает отправку, на которой мог застрять цикл
                outlet.scope.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn broadcast(
        &self,
        msg: Message<T>,
    ) where
        T: Clone,
    {
        let outlets = self.subscribers.read().snapshot.clone();

        for outlet in outlets.iter() {
            if outlet.scope.is_cancelled() {
                continue;
            }

            match self.delivery {
                DeliveryPolicy::Block => {
                    tokio::select! {
                        biased;
                        _ = outlet.scope.cancelled() => {}
                        sent = outlet.tx.send(msg.clone()) => {
                            if sent.is_err() {
                                trace!(channel = %msg.channel, "subscriber receiver dropped");
                            }
                        }
                    }
                }
                DeliveryPolicy::DropNewest => match outlet.tx.try_send(msg.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.stats.record_dropped();
                        trace!(channel = %msg.channel, "subscriber queue full, message dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        trace!(channel = %msg.channel, "subscriber receiver dropped");
                    }
                },
            }
        }
    }
}

impl<T: Send> Release for TopicShared<T> {
    fn release(
        &self,
        _kind: &SubscriptionKind,
        id: SubscriptionId,
    ) {
        let _ = self.unsubscribe(id);
    }
}

impl<T> Subscribers<T> {
    fn new() -> Self {
        Self {
            by_id: AHashMap::new(),
            snapshot: Arc::from(Vec::new()),
            closed: false,
        }
    }

    fn insert(
        &mut self,
        id: SubscriptionId,
        outlet: Outlet<T>,
    ) {
        self.by_id.insert(id, outlet);
        self.rebuild_snapshot();
    }

    fn remove(
        &mut self,
        id: SubscriptionId,
    ) -> Option<Outlet<T>> {
        let outlet = self.by_id.remove(&id)?;
        self.rebuild_snapshot();
        Some(outlet)
    }

    /// Закрывает все выходные очереди и запрещает новые подписки.
    fn close_all(&mut self) -> usize {
        self.closed = true;
        let count = self.by_id.len();
        for (_, outlet) in self.by_id.drain() {
            outlet.scope.cancel();
        }
        self.snapshot = Arc::from(Vec::new());
        count
    }

    fn rebuild_snapshot(&mut self) {
        self.snapshot = self.by_id.values().cloned().collect();
    }
}

/// Широковещательный цикл: один на топик, живёт до отмены области.
async fn broadcast_loop<T: Clone + Send + 'static>(
    shared: Arc<TopicShared<T>>,
    mut intake: mpsc::Receiver<Message<T>>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shared.scope.cancelled() => break,
            next = intake.recv() => match next {
                Some(msg) => shared.broadcast(msg).await,
                None => break,
            },
        }
    }

    // Новые публикации отклоняются, уже принятые дочитываются.
    // Подписчики к этому моменту могут быть закрыты наблюдателем.
    intake.close();
    while let Some(msg) = intake.recv().await {
        shared.broadcast(msg).await;
    }

    trace!("topic broadcast loop finished");
}

/// Ждёт отмены области и закрывает все выходные очереди ровно один раз.
async fn close_watcher<T>(shared: Arc<TopicShared<T>>) {
    shared.scope.cancelled().await;

    let closed = shared.subscribers.write().close_all();
    debug!(subscribers = closed, "topic closed");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::TryRecvError;

    const WAIT: Duration = Duration::from_secs(1);

    fn topic(queue_size: usize) -> (Scope, Topic<u32>) {
        let root = Scope::new();
        let topic = Topic::new(&root, queue_size, DeliveryPolicy::Block).unwrap();
        (root, topic)
    }

    async fn next(sub: &mut Subscription<u32>) -> Option<u32> {
        timeout(WAIT, sub.recv())
            .await
            .expect("timed out")
            .map(|m| m.payload)
    }

    /// Тест проверяет, что нулевая ёмкость очереди отклоняется.
    #[tokio::test]
    async fn test_zero_queue_size_rejected() {
        let root = Scope::new();
        let res = Topic::<u32>::new(&root, 0, DeliveryPolicy::Block);
        assert!(matches!(res, Err(PubSubError::InvalidQueueSize(0))));
    }

    /// Тест проверяет доставку всем подписчикам в порядке публикации.
    #[tokio::test]
    async fn test_fan_out_in_order() {
        let (_root, topic) = topic(8);
        let mut a = topic.subscribe().unwrap();
        let mut b = topic.subscribe().unwrap();
        assert_eq!(topic.subscriber_count(), 2);

        for i in 0..5 {
            topic.publish(Message::new("t", i)).await.unwrap();
        }

        for i in 0..5 {
            assert_eq!(next(&mut a).await, Some(i));
            assert_eq!(next(&mut b).await, Some(i));
        }
    }

    /// Тест проверяет, что публикация без подписчиков не блокирует.
    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let (_root, topic) = topic(1);
        for i in 0..100 {
            timeout(WAIT, topic.publish(Message::new("t", i)))
                .await
                .expect("publish blocked")
                .unwrap();
        }
    }

    /// Тест проверяет, что отписка закрывает поток после буфера.
    #[tokio::test]
    async fn test_unsubscribe_closes_stream() {
        let (_root, topic) = topic(4);
        let mut sub = topic.subscribe().unwrap();

        topic.publish(Message::new("t", 1)).await.unwrap();
        assert_eq!(next(&mut sub).await, Some(1));

        assert_eq!(topic.unsubscribe(sub.id()), Ok(true));
        assert_eq!(topic.subscriber_count(), 0);
        assert_eq!(next(&mut sub).await, None);

        // повторная отписка не ошибка
        assert_eq!(topic.unsubscribe(sub.id()), Ok(false));
    }

    /// Тест проверяет, что дроп прямой подписки снимает регистрацию.
    #[tokio::test]
    async fn test_drop_releases_direct_subscription() {
        let (_root, topic) = topic(4);
        let sub = topic.subscribe().unwrap();
        assert_eq!(topic.subscriber_count(), 1);
        drop(sub);
        assert_eq!(topic.subscriber_count(), 0);
    }

    /// Тест проверяет обратное давление: медленный подписчик при
    /// политике Block в итоге останавливает издателя.
    #[tokio::test]
    async fn test_backpressure_blocks_publisher() {
        let (_root, topic) = topic(1);
        let mut slow = topic.subscribe().unwrap();

        // 1 в очереди подписчика, 2 в цикле, 3 во входной очереди
        for i in 1..=3 {
            timeout(WAIT, topic.publish(Message::new("t", i)))
                .await
                .expect("publish should be accepted")
                .unwrap();
        }
        let blocked = timeout(Duration::from_millis(100), topic.publish(Message::new("t", 4))).await;
        assert!(blocked.is_err(), "fourth publish should block");

        for i in 1..=3 {
            assert_eq!(next(&mut slow).await, Some(i));
        }
    }

    /// Тест проверяет, что отписка освобождает цикл, застрявший на
    /// переполненной очереди ушедшего подписчика, а ушедший дочитывает
    /// буфер и видит конец потока.
    #[tokio::test]
    async fn test_unsubscribe_unblocks_broadcast() {
        let (_root, topic) = topic(1);
        let mut gone = topic.subscribe().unwrap();
        let mut live = topic.subscribe().unwrap();

        topic.publish(Message::new("t", 1)).await.unwrap();
        assert_eq!(next(&mut live).await, Some(1));
        // очередь `gone` заполнена, следующая отправка в неё блокирует цикл
        topic.publish(Message::new("t", 2)).await.unwrap();

        assert_eq!(topic.unsubscribe(gone.id()), Ok(true));
        assert_eq!(next(&mut gone).await, Some(1));
        assert_eq!(next(&mut gone).await, None);

        for i in 2..10 {
            if i > 2 {
                timeout(WAIT, topic.publish(Message::new("t", i)))
                    .await
                    .expect("publish blocked by departed subscriber")
                    .unwrap();
            }
            assert_eq!(next(&mut live).await, Some(i));
        }
    }

    /// Тест проверяет, что отписанный подписчик видит конец потока, пока
    /// цикл стоит на другом, медленном подписчике.
    #[tokio::test]
    async fn test_unsubscribed_stream_ends_while_other_subscriber_stalls() {
        let (_root, topic) = topic(1);
        let _stalled = topic.subscribe().unwrap();
        let mut leaving = topic.subscribe().unwrap();

        topic.publish(Message::new("t", 1)).await.unwrap();
        topic.publish(Message::new("t", 2)).await.unwrap();
        // дать циклу упереться в переполненную очередь
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(topic.unsubscribe(leaving.id()), Ok(true));
        assert_eq!(next(&mut leaving).await, Some(1));
        assert_eq!(next(&mut leaving).await, None);
        assert!(leaving.is_closed());
    }

    /// Тест проверяет, что без Tokio runtime создание топика возвращает
    /// ошибку, а не паникует.
    #[test]
    fn test_new_without_runtime() {
        let root = Scope::new();
        let res = Topic::<u32>::new(&root, 4, DeliveryPolicy::Block);
        assert!(matches!(res, Err(PubSubError::NoRuntime)));
    }

    /// Тест проверяет политику DropNewest: переполненный подписчик
    /// теряет сообщения, остальные получают всё.
    #[tokio::test]
    async fn test_drop_newest_policy() {
        let root = Scope::new();
        let stats = Arc::new(PubSubStats::new());
        let topic =
            Topic::with_stats(&root, 1, DeliveryPolicy::DropNewest, stats.clone()).unwrap();
        let mut slow = topic.subscribe().unwrap();
        let mut fast = topic.subscribe().unwrap();

        for i in 1..=3 {
            topic.publish(Message::new("t", i)).await.unwrap();
            assert_eq!(next(&mut fast).await, Some(i));
        }
        // подождать, пока цикл закончит обход для последнего сообщения
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(next(&mut slow).await, Some(1));
        assert_eq!(slow.try_recv().map(|m| m.payload), Err(TryRecvError::Empty));
        assert_eq!(stats.snapshot().dropped, 2);
    }

    /// Тест проверяет, что после закрытия все операции возвращают
    /// AlreadyClosed, а потоки подписчиков завершаются.
    #[tokio::test]
    async fn test_close_rejects_and_ends_streams() {
        let (_root, topic) = topic(4);
        let mut a = topic.subscribe().unwrap();
        let mut b = topic.subscribe().unwrap();

        topic.close();
        topic.close();

        assert_eq!(next(&mut a).await, None);
        assert_eq!(next(&mut b).await, None);
        assert!(topic.is_closed());
        assert_eq!(
            topic.publish(Message::new("t", 1)).await,
            Err(PubSubError::AlreadyClosed)
        );
        assert!(matches!(topic.subscribe(), Err(PubSubError::AlreadyClosed)));
        assert_eq!(topic.unsubscribe(a.id()), Err(PubSubError::AlreadyClosed));
    }

    /// Тест проверяет каскад: отмена родительской области закрывает топик.
    #[tokio::test]
    async fn test_parent_cancel_closes_topic() {
        let (root, topic) = topic(4);
        let mut sub = topic.subscribe().unwrap();

        root.cancel();

        assert_eq!(next(&mut sub).await, None);
        assert!(topic.is_closed());
        timeout(WAIT, async {
            while topic.subscriber_count() != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscriber set was not cleared");
    }

    /// Тест проверяет, что закрытие освобождает издателя, ждущего места
    /// во входной очереди.
    #[tokio::test]
    async fn test_close_releases_blocked_publisher() {
        let (_root, topic) = topic(1);
        let _slow = topic.subscribe().unwrap();
        for i in 1..=3 {
            topic.publish(Message::new("t", i)).await.unwrap();
        }

        let topic = Arc::new(topic);
        let publisher = {
            let topic = topic.clone();
            tokio::spawn(async move { topic.publish(Message::new("t", 4)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        topic.close();

        let res = timeout(WAIT, publisher).await.expect("publisher stuck").unwrap();
        assert_eq!(res, Err(PubSubError::AlreadyClosed));
    }
}
