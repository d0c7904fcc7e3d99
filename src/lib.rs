/// Hub configuration loading and delivery policy.
pub mod config;
/// Error types: hub/topic operations, receive errors.
pub mod error;
/// Logging setup (filters, formats).
pub mod logging;
/// Pub/Sub: Hub, Topic, Scope, Subscription, Message.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Configuration.
pub use self::config::{DeliveryPolicy, HubConfig};
/// Operation errors and result types.
pub use error::{PubSubError, PubSubResult, RecvError, TryRecvError};
/// Pub/Sub API.
pub use pubsub::{
    Hub, Message, PatternMatcher, PubSubStats, Scope, StatsSnapshot, Subscription, SubscriptionId,
    SubscriptionKind, Topic,
};
