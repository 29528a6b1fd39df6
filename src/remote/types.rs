//! Shared types for the remote file service
//!
//! This module contains the records mirrored from the server, the upload
//! source handle consumed by the transfer path, and the error taxonomy shared
//! by every component that talks to the service.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Server-confirmed metadata for one stored file.
///
/// Field names on the wire follow the server (`size`, `type`, `isPublic`,
/// `createdAt`). Unknown fields such as `ownerId` are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Stable unique identifier assigned by the server
    pub id: String,
    /// Display name (original filename unless renamed)
    pub name: String,
    /// File size in bytes
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// MIME type as reported at upload time (the server may not know it)
    #[serde(rename = "type", default)]
    pub media_type: Option<String>,
    /// Creation time, server local time without zone
    pub created_at: NaiveDateTime,
    /// Whether the file is reachable without a session
    #[serde(default)]
    pub is_public: bool,
    /// Viewable URL; derived by the server, never by the client
    pub url: String,
}

impl FileRecord {
    /// Broad category used for icons and filtering
    pub fn media_kind(&self) -> MediaKind {
        self.media_type
            .as_deref()
            .map(MediaKind::from_media_type)
            .unwrap_or(MediaKind::Other)
    }

    /// URL that forces a download instead of inline display
    pub fn download_url(&self) -> String {
        format!("{}?download=true", self.url)
    }

    /// Public link, only available once the server has confirmed the file is public
    pub fn share_link(&self) -> Option<&str> {
        self.is_public.then_some(self.url.as_str())
    }
}

/// Broad media category derived from a MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Pdf,
    Other,
}

impl MediaKind {
    pub fn from_media_type(media_type: &str) -> Self {
        let media_type = media_type.trim().to_ascii_lowercase();
        if media_type.starts_with("image/") {
            MediaKind::Image
        } else if media_type.starts_with("video/") {
            MediaKind::Video
        } else if media_type.starts_with("audio/") {
            MediaKind::Audio
        } else if media_type == "application/pdf" {
            MediaKind::Pdf
        } else {
            MediaKind::Other
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Pdf => write!(f, "pdf"),
            MediaKind::Other => write!(f, "other"),
        }
    }
}

impl FromStr for MediaKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            "pdf" => Ok(MediaKind::Pdf),
            "other" => Ok(MediaKind::Other),
            other => Err(ServiceError::Validation(format!(
                "Unknown media kind '{}' (expected image, video, audio, pdf or other)",
                other
            ))),
        }
    }
}

/// Opaque handle to one selected file: name, size, media type and bytes.
///
/// The payload is shared, so cloning a source (duplicates in a batch, retries)
/// never copies the bytes.
#[derive(Clone)]
pub struct UploadSource {
    name: String,
    media_type: String,
    bytes: Arc<[u8]>,
}

impl UploadSource {
    /// Build a source from in-memory bytes. The media type is guessed from the
    /// name when not given.
    pub fn from_bytes(
        name: impl Into<String>,
        media_type: Option<&str>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        let name = name.into();
        let media_type = media_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_media_type(&name));
        Self {
            name,
            media_type,
            bytes: Arc::from(bytes.into()),
        }
    }

    /// Read a local file into a source.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ServiceError::Validation(format!("Not a file path: {}", path.display())))?
            .to_string();
        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(name, None, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSource")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Guess MIME type from filename extension.
pub fn guess_media_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .to_string()
}

/// Coarse error category, used where callers only need to branch on the class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    Network,
    ServerRejection,
    Parse,
    Io,
}

/// Remote file service error type
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Rejected on the client before any request was sent
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Server rejected request ({status}): {message}")]
    ServerRejection { status: u16, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::AuthenticationFailed(_) => ErrorKind::Auth,
            ServiceError::NetworkError(_) => ErrorKind::Network,
            ServiceError::ServerRejection { .. } => ErrorKind::ServerRejection,
            ServiceError::ParseError(_) => ErrorKind::Parse,
            ServiceError::IoError(_) => ErrorKind::Io,
        }
    }

    /// HTTP status for server rejections
    pub fn status(&self) -> Option<u16> {
        match self {
            ServiceError::ServerRejection { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Trim and collapse an error body so it is safe to embed in a message.
pub fn sanitize_api_error(body: &str) -> String {
    const MAX_LEN: usize = 200;
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "(empty response body)".to_string();
    }
    if collapsed.chars().count() > MAX_LEN {
        let truncated: String = collapsed.chars().take(MAX_LEN).collect();
        format!("{}...", truncated)
    } else {
        collapsed
    }
}

/// Transfer progress for one item
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TransferProgress {
    /// Bytes transferred so far
    pub bytes_transferred: u64,
    /// Total bytes to transfer
    pub total_bytes: u64,
    /// Progress percentage (0-100)
    pub percentage: f64,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        let percentage = if total_bytes > 0 {
            ((bytes_transferred as f64 / total_bytes as f64) * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        Self {
            bytes_transferred,
            total_bytes,
            percentage,
        }
    }
}

/// Human readable size, binary units
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}
