use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use tokio::sync::mpsc;

use super::{Message, Scope};
use crate::{RecvError, TryRecvError};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Непрозрачный идентификатор подписки.
///
/// Уникален в пределах процесса, выдаётся монотонно при подписке.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// К чему привязана подписка.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// Точное совпадение имени топика.
    Exact(Arc<str>),
    /// Glob-шаблон.
    Pattern(Arc<str>),
    /// Подписка напрямую на [`Topic`](super::Topic), вне хаба.
    Direct,
}

/// Владелец регистрации подписки: снимает её при `Drop`.
pub(crate) trait Release: Send + Sync {
    fn release(
        &self,
        kind: &SubscriptionKind,
        id: SubscriptionId,
    );
}

/// Поток сообщений одной подписки.
///
/// Читающая сторона выходной очереди подписчика. После отписки или
/// закрытия топика уже буферизованные сообщения дочитываются, затем
/// `recv()` возвращает `None`. Конец потока определяется отменой области
/// подписчика, а не уходом всех отправителей: широковещательный цикл
/// может ещё держать отправителя, застряв на другом подписчике.
///
/// Отписка происходит автоматически при `Drop`.
pub struct Subscription<T> {
    id: SubscriptionId,
    kind: SubscriptionKind,
    inner: mpsc::Receiver<Message<T>>,
    /// Область выходной очереди; отменяется при отписке и закрытии топика.
    scope: Scope,
    owner: Option<Weak<dyn Release>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        id: SubscriptionId,
        kind: SubscriptionKind,
        inner: mpsc::Receiver<Message<T>>,
        scope: Scope,
        owner: Weak<dyn Release>,
    ) -> Self {
        Self {
            id,
            kind,
            inner,
            scope,
            owner: Some(owner),
        }
    }

    /// Передаёт подписку новому владельцу (хабу) с новым видом привязки.
    pub(crate) fn rebind(
        mut self,
        kind: SubscriptionKind,
        owner: Weak<dyn Release>,
    ) -> Self {
        self.kind = kind;
        self.owner = Some(owner);
        self
    }

    /// Асинхронно ожидает следующее сообщение.
    ///
    /// # Возвращает
    /// - `Some(Message)` при успешном получении
    /// - `None` если подписка закрыта и буфер исчерпан
    pub async fn recv(&mut self) -> Option<Message<T>> {
        if !self.scope.is_cancelled() {
            tokio::select! {
                biased;
                msg = self.inner.recv() => return msg,
                _ = self.scope.cancelled() => {}
            }
        }
        // Закрытая очередь отдаёт буфер, затем `None`
        self.inner.close();
        self.inner.recv().await
    }

    /// Пытается получить сообщение без ожидания.
    ///
    /// # Возвращает
    /// - `Err(TryRecvError::Empty)` если нет доступных сообщений
    /// - `Err(TryRecvError::Closed)` если подписка закрыта и буфер пуст
    pub fn try_recv(&mut self) -> Result<Message<T>, TryRecvError> {
        if self.scope.is_cancelled() {
            self.inner.close();
        }
        self.inner.try_recv().map_err(Into::into)
    }

    /// Ожидает сообщение не дольше `timeout`.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Message<T>, RecvError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(RecvError::Closed),
            Err(_) => Err(RecvError::Timeout),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> &SubscriptionKind {
        &self.kind
    }

    /// Проверяет, закрыт ли поток: отписка, закрытие топика или уход
    /// всех отправителей. Буфер при этом ещё может быть не пуст.
    pub fn is_closed(&self) -> bool {
        self.scope.is_cancelled() || self.inner.is_closed()
    }

    /// Возвращает количество сообщений в очереди на получение.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Проверяет, пуста ли очередь сообщений.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Явно отписаться. Аналогично `drop(self)`.
    pub fn unsubscribe(self) {
        // Регистрацию снимает Drop
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("buffered", &self.inner.len())
            .finish()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take().and_then(|weak| weak.upgrade()) {
            owner.release(&self.kind, self.id);
        }
    }
}
