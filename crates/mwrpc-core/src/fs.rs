//! Filesystem-style operations served by an alternate transport.
//!
//! The RPC surface cannot manipulate raw files, so these operations are
//! delegated to an implementation of [`FileSystem`] injected at construction
//! time (for example an SSH- or local-disk-backed one). Transports without
//! one fail every operation with [`ClientError::Unsupported`].
//!
//! [`ClientError::Unsupported`]: crate::ClientError::Unsupported

use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::error::ClientResult;

/// Numeric owner of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ownership {
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
}

impl Ownership {
    /// Creates an ownership pair.
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// The alternate-transport contract for filesystem-style operations.
///
/// Paths are absolute paths on the managed host. Modes are Unix permission
/// bits (for example `0o644`).
///
/// # Example Implementation
///
/// ```ignore
/// struct SshFileSystem { session: ssh::Session }
///
/// impl FileSystem for SshFileSystem {
///     fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<Vec<u8>>> {
///         Box::pin(async move { self.session.sftp_read(path).await })
///     }
///     // ... other methods
/// }
/// ```
pub trait FileSystem: Send + Sync {
    /// Creates or replaces a file with `contents` and sets its mode.
    fn write_file<'a>(
        &'a self,
        path: &'a str,
        contents: &'a [u8],
        mode: u32,
    ) -> BoxFuture<'a, ClientResult<()>>;

    /// Reads a whole file.
    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<Vec<u8>>>;

    /// Deletes a single file.
    fn delete_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>>;

    /// Removes a directory and everything below it. Empty directories are
    /// removed as well.
    fn remove_dir_all<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<()>>;

    /// Returns whether the path exists.
    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, ClientResult<bool>>;

    /// Changes the owner of a single path.
    fn chown<'a>(&'a self, path: &'a str, owner: Ownership) -> BoxFuture<'a, ClientResult<()>>;

    /// Sets `mode` on a path and, for directories, everything below it.
    fn chmod_recursive<'a>(&'a self, path: &'a str, mode: u32)
    -> BoxFuture<'a, ClientResult<()>>;

    /// Creates a directory and any missing parents.
    fn mkdir_all<'a>(&'a self, path: &'a str, mode: u32) -> BoxFuture<'a, ClientResult<()>>;
}
