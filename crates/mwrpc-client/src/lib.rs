//! WebSocket JSON-RPC client, job waiter, subscriptions, fallback transports
//!
//! This crate provides [`WsClient`], the management API client, along with
//! the [`Transport`] contract it shares with the filesystem-only and
//! unsupported variants.

mod client;
pub mod config;
mod connection;
mod correlator;
mod fallback;
mod filesystem;
mod jobs;
pub mod local_fs;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod secret;
mod subscriptions;
#[cfg(test)]
mod testing;
mod transport;
mod unsupported;

pub use client::WsClient;
pub use config::{ClientConfig, ConfigError, Credentials, TransportKind};
pub use fallback::Fallback;
pub use filesystem::FilesystemTransport;
pub use local_fs::LocalFileSystem;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;
pub use subscriptions::{Subscription, SubscriptionCloser, SubscriptionRegistry};
pub use transport::{Transport, build_transport};
pub use unsupported::UnsupportedTransport;

pub use mwrpc_core::{ClientError, ClientResult, FileSystem, JobError, Ownership, Version};
pub use mwrpc_protocol::{JobState, RpcError, methods};
pub use tokio_util::sync::CancellationToken;
