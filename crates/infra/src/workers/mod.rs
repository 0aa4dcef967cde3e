//! Background workers driven by bus subscriptions.

mod subscription_worker;

pub use subscription_worker::{SubscriptionWorker, WorkerHandle, subscribe};
