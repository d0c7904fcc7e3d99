use serde::{Deserialize, Serialize};

use config::{Config, Environment};

use crate::{PubSubError, PubSubResult};

/// Поведение широковещательного цикла при переполненной очереди подписчика.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Цикл ждёт, пока подписчик освободит место. Медленный подписчик
    /// задерживает доставку всем остальным подписчикам топика.
    #[default]
    Block,
    /// Сообщение отбрасывается только для переполненного подписчика.
    DropNewest,
}

/// Настройки хаба.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Ёмкость входной очереди топика и очереди каждого подписчика.
    pub queue_size: usize,
    pub delivery: DeliveryPolicy,
    /// `*` и `?` в шаблонах не пересекают `/`.
    pub literal_separator: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_size: 32,
            delivery: DeliveryPolicy::Block,
            literal_separator: false,
        }
    }
}

impl HubConfig {
    pub fn new(queue_size: usize) -> Self {
        Self {
            queue_size,
            ..Default::default()
        }
    }

    pub fn with_delivery(
        mut self,
        delivery: DeliveryPolicy,
    ) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_literal_separator(
        mut self,
        literal_separator: bool,
    ) -> Self {
        self.literal_separator = literal_separator;
        self
    }

    /// Загружает настройки: значения по умолчанию, затем переменные
    /// окружения с префиксом `PUBHUB_` (`PUBHUB_QUEUE_SIZE` и т.д.).
    pub fn load() -> PubSubResult<Self> {
        let defaults = Self::default();
        let cfg = Config::builder()
            .set_default("queue_size", defaults.queue_size as u64)?
            .set_default("delivery", "block")?
            .set_default("literal_separator", defaults.literal_separator)?
            .add_source(Environment::with_prefix("PUBHUB").try_parsing(true))
            .build()?;

        let settings: Self = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> PubSubResult<()> {
        if self.queue_size == 0 {
            return Err(PubSubError::InvalidQueueSize(self.queue_size));
        }
        Ok(())
    }
}
