//! Cross-process approval coordination for AI coding assistant tool calls.
//!
//! A worker process that executes tool calls must obtain authorization from a
//! separately-lived coordinator process before performing a sensitive
//! operation. The only channel between the two is a best-effort, unordered,
//! broadcast-style notification bus: messages may be dropped if no listener
//! is registered and may be observed more than once. Everything above the
//! bus -- correlation, timeouts, deduplication, bounded concurrency,
//! multi-instance isolation, and crash recovery -- lives in this crate.
//!
//! The two halves:
//! - [`coordinator::Coordinator`] is the serialized authority that receives
//!   requests, deduplicates, resolves (auto, user decision, or timeout), and
//!   publishes replies.
//! - [`initiator::ApprovalClient`] publishes a request and blocks the calling
//!   tool pipeline until a correlated reply, a timeout, or a cancellation.

pub mod audit;
pub mod bus;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod initiator;
pub mod protocol;

pub use config::ApprovalConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use error::{GatehouseError, Result};
pub use initiator::{ApprovalClient, CancelToken};
pub use protocol::channel::{ChannelNames, InstanceId};
pub use protocol::{ApprovalRequest, ApprovalResponse, Behavior};
