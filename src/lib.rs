// CloudShare - Personal cloud file storage client
// Upload batching and a local mirror of the remote file set

//! Client core for a CloudShare server.
//!
//! - [`upload_queue`]: batch uploads, one transfer at a time, with per-item
//!   status and a single completion signal when everything succeeded.
//! - [`file_collection`]: the locally held file set, refreshed from the server
//!   and projected through sort and search.
//! - [`remote`]: the `FileService` boundary and its REST implementation.

pub mod auth;
pub mod client_config;
pub mod file_collection;
pub mod logging;
pub mod remote;
pub mod upload_queue;

#[cfg(test)]
mod testing;

pub use auth::{AuthTokenProvider, EnvTokenProvider, StaticTokenProvider};
pub use client_config::ClientConfig;
pub use file_collection::{FileCollectionStore, Operation, SortKey, StoreError};
pub use remote::{
    CloudShareApi, ErrorKind, FileRecord, FileService, MediaKind, ServiceError, UploadSource,
};
pub use upload_queue::{
    FileItem, ItemId, QueueError, UploadObserver, UploadQueueConfig, UploadQueueManager,
    UploadStatus, UploadSummary,
};
