use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;

/// Иерархическая область отмены.
///
/// Отмена необратима и идемпотентна: после `cancel()` область и все
/// производные от неё (`child()`) навсегда остаются отменёнными.
/// Дочерняя область, созданная от уже отменённой, рождается отменённой.
///
/// Клонирование дешёвое: все клоны разделяют одно состояние.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    state: watch::Sender<bool>,
    /// Дочерние области. Слабые ссылки: потомок живёт, пока жив его владелец.
    children: Mutex<Vec<Weak<ScopeInner>>>,
}

impl Scope {
    /// Создаёт новую корневую область.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner::new()),
        }
    }

    /// Создаёт дочернюю область, которая будет отменена вместе с этой.
    pub fn child(&self) -> Scope {
        let child = Arc::new(ScopeInner::new());

        let mut children = self.inner.children.lock();
        if self.is_cancelled() {
            child.state.send_replace(true);
        } else {
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }
        drop(children);

        Scope { inner: child }
    }

    /// Отменяет область и, транзитивно, всех её потомков.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Проверяет отмену без ожидания.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Завершается, когда область отменена (сразу, если уже отменена).
    pub async fn cancelled(&self) {
        let mut rx = self.inner.state.subscribe();
        // Sender живёт внутри `self.inner`, поэтому ошибки закрытия быть не может.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl ScopeInner {
    fn new() -> Self {
        Self {
            state: watch::channel(false).0,
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) {
        // Флаг выставляется под блокировкой списка: `child()` не может
        // зарегистрировать потомка между проверкой и отменой.
        let children = {
            let mut children = self.children.lock();
            if self.state.send_replace(true) {
                return;
            }
            std::mem::take(&mut *children)
        };

        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}
