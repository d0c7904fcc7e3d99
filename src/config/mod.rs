pub mod settings;

pub use settings::{DeliveryPolicy, HubConfig};
