//! Offline-first caching and sync agent for a single web origin.
//!
//! The agent intercepts HTTP traffic for one configured application origin
//! and keeps it usable without connectivity:
//! - Versioned byte stores hold cached responses (`store`)
//! - Requests are classified into routes (`classify`) and served by
//!   per-route strategies (`strategy`)
//! - Failed writes park in a durable retry queue and replay on reconnect
//!   (`queue`)
//! - Push payloads become notifications (`notify`), connected surfaces are
//!   tracked and messaged (`clients`)
//! - Install/activate/maintenance manage store generations (`lifecycle`)
//!
//! `Agent` wires it all together; hosts drive it with `ControlMessage`s and
//! intercepted `Request`s.

pub mod agent;
pub mod classify;
pub mod clients;
pub mod config;
pub mod control;
pub mod error;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod notify;
pub mod queue;
pub mod store;
pub mod strategy;

#[cfg(test)]
pub mod testutil;

pub use agent::{Agent, FetchOutcome, TeardownReport};
pub use classify::{Classifier, RouteClass};
pub use clients::{ClientHub, ClientId, ClientMessage};
pub use config::AgentConfig;
pub use control::{ControlMessage, ControlReply};
pub use error::{FetchError, StoreError};
pub use fetch::{Fetch, FetchOptions, HttpFetcher};
pub use http::{FetchMode, Method, Request, RequestKey, Response};
pub use lifecycle::{InstallReport, Lifecycle, LifecycleState, MaintenanceReport};
pub use notify::{LogSink, NotificationDispatcher, NotificationRecord, NotificationSink};
pub use queue::{DrainOutcome, QueuedMutation, RetryQueue, MUTATION_STORE};
pub use store::{CachedEntry, DiskBackend, MemoryBackend, StoreBackend, StoreRegistry};
pub use strategy::StrategyExecutor;
