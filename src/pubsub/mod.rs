//! Подсистема Publish–Subscribe (pub/sub).
//!
//! Внутрипроцессный брокер: издатели публикуют сообщения под строковым
//! топиком, подписчики получают их по точному имени или по glob-шаблону.
//!
//! - `hub`: реестр топиков и шаблонов, маршрутизация публикаций.
//! - `topic`: очереди, широковещательный цикл и закрытие одного топика.
//! - `scope`: иерархическая область отмены, управляющая завершением.
//! - `matcher`: скомпилированные glob-шаблоны.
//! - `message`: конверт доставляемого сообщения.
//! - `subscriber`: поток сообщений подписки и её идентификатор.
//! - `stats`: счётчики хаба.

pub mod hub;
pub mod matcher;
pub mod message;
pub mod scope;
pub mod stats;
pub mod subscriber;
pub mod topic;

pub use hub::*;
pub use matcher::*;
pub use message::*;
pub use scope::*;
pub use stats::*;
pub use subscriber::{Subscription, SubscriptionId, SubscriptionKind};
pub use topic::*;
