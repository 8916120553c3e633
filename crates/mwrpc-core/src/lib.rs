//! Core types: client errors, server version, filesystem contract, tracing.

pub mod error;
pub mod fs;
pub mod tracing;
pub mod version;

use std::future::Future;
use std::pin::Pin;

pub use error::{ClientError, ClientResult, JobError};
pub use fs::{FileSystem, Ownership};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
pub use version::Version;

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
