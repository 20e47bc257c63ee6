//! Request routing, caching strategies, and background sync for stowaway.
//!
//! This crate provides the engine that sits between an application and the
//! network: policy resolution, the four caching strategies, the mutation
//! queue, cache generation lifecycle, and push notification dispatch.

pub mod fetch;
pub mod lifecycle;
pub mod message;
pub mod notification;
pub mod platform;
pub mod policy;
pub mod queue;
pub mod router;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use fetch::{FetchConfig, HttpNetwork, Network};
pub use lifecycle::{ActivateReport, InstallReport, LifecycleManager, LifecycleState};
pub use message::{Broadcast, ClientMessage, MessageReply};
pub use notification::{ClickOutcome, NotificationAction, NotificationDescriptor, NotificationDispatcher};
pub use platform::{Analytics, AnalyticsEvent, ClientInfo, Clients, Notifier};
pub use policy::{CacheNamespace, PolicyRegistry, PolicyRule, RequestMatcher, StrategyKind};
pub use queue::{DrainReport, MutationQueue};
pub use router::{Engine, Platform, RouteOutcome};
pub use strategy::{ResponseSource, StrategyExecutor, StrategyOutcome};
