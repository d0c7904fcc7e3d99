pub mod pubsub;

pub use pubsub::{PubSubError, RecvError, TryRecvError};

pub type PubSubResult<T> = Result<T, PubSubError>;
