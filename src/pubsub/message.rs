use std::sync::Arc;

/// Сообщение, доставляемое подписчику.
///
/// `channel`: топик, под которым сообщение было опубликовано.
/// `pattern` заполнен только для подписок по шаблону и содержит шаблон,
/// через который сообщение пришло.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<T> {
    pub channel: Arc<str>,
    pub pattern: Option<Arc<str>>,
    pub payload: T,
}

impl<T> Message<T> {
    pub fn new(
        channel: impl Into<Arc<str>>,
        payload: T,
    ) -> Self {
        Self {
            channel: channel.into(),
            pattern: None,
            payload,
        }
    }

    /// Помечает сообщение шаблоном, по которому оно было маршрутизировано.
    pub fn with_pattern(
        mut self,
        pattern: Arc<str>,
    ) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Забирает полезную нагрузку.
    pub fn into_payload(self) -> T {
        self.payload
    }
}
