//! Publish/subscribe fabric with a replay cache.

pub mod broker;
pub mod cache;
pub mod publisher;
pub mod subscriber;

pub use broker::PubSubCache;
pub use cache::{CacheLogic, CachePolicy, TopicCache};
pub use publisher::{Publisher, SubscriptionEvent};
pub use subscriber::Subscriber;
