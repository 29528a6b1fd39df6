//! Remote File Service Module
//!
//! The boundary between the client core and the CloudShare REST API. The
//! upload queue and the file collection only ever see the `FileService`
//! trait, so the HTTP client can be swapped for an in-memory service in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   ┌─────────────────────┐
//! │ UploadQueueManager │   │ FileCollectionStore │
//! └─────────┬──────────┘   └──────────┬──────────┘
//!           └───────────┬─────────────┘
//!                       ▼
//!          ┌─────────────────────────┐
//!          │    FileService Trait    │
//!          │ list, upload, delete,   │
//!          │ toggle_public, rename   │
//!          └────────────┬────────────┘
//!                       ▼
//!          ┌─────────────────────────┐     ┌───────────────────┐
//!          │      CloudShareApi      │────▶│ AuthTokenProvider │
//!          └─────────────────────────┘     └───────────────────┘
//! ```

pub mod types;
pub mod http;

pub use types::*;
pub use http::CloudShareApi;

use async_trait::async_trait;

/// Byte-level progress callback: `(bytes_sent, total_bytes)`
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// The five operations the server exposes for a user's files.
///
/// Implementations must not cache or retry: every call is one request, and
/// every call looks up the bearer credential afresh.
#[async_trait]
pub trait FileService: Send + Sync {
    /// List the session's files, optionally filtered by a name substring
    async fn list(&self, name_filter: Option<&str>) -> Result<Vec<FileRecord>, ServiceError>;

    /// Upload one file, reporting byte progress while the body is sent
    async fn upload(
        &self,
        source: &UploadSource,
        on_progress: Option<ProgressCallback>,
    ) -> Result<FileRecord, ServiceError>;

    /// Delete a file
    async fn delete(&self, id: &str) -> Result<(), ServiceError>;

    /// Flip the public flag; returns the record as the server now holds it
    async fn toggle_public(&self, id: &str) -> Result<FileRecord, ServiceError>;

    /// Rename a file; returns the record as the server now holds it
    async fn rename(&self, id: &str, new_name: &str) -> Result<FileRecord, ServiceError>;
}
