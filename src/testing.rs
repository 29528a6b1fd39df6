//! In-memory `FileService` used by the unit tests.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::remote::{FileRecord, FileService, ProgressCallback, ServiceError, UploadSource};

pub(crate) fn at(secs: i64) -> NaiveDateTime {
    chrono::DateTime::from_timestamp(1_700_000_000 + secs, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

pub(crate) fn record(id: &str, name: &str, size: u64, created_secs: i64) -> FileRecord {
    FileRecord {
        id: id.to_string(),
        name: name.to_string(),
        size_bytes: size,
        media_type: Some(crate::remote::guess_media_type(name)),
        created_at: at(created_secs),
        is_public: false,
        url: format!("http://localhost:8085/api/files/{}/view", id),
    }
}

#[derive(Default)]
struct FakeState {
    records: Vec<FileRecord>,
    next_id: u64,
    calls: Vec<&'static str>,
    rejected_names: HashSet<String>,
    offline: bool,
}

/// Holds requests open until the test releases them
pub(crate) struct RequestGate {
    pub started: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub(crate) struct FakeFileService {
    state: Mutex<FakeState>,
    gate: Mutex<Option<Arc<RequestGate>>>,
    list_gate: Mutex<Option<Arc<RequestGate>>>,
}

impl FakeFileService {
    pub fn with_records(records: Vec<FileRecord>) -> Self {
        let service = Self::default();
        service.state.lock().records = records;
        service
    }

    /// Server-side change the client has not seen yet
    pub fn set_server_records(&self, records: Vec<FileRecord>) {
        self.state.lock().records = records;
    }

    pub fn reject_uploads_named(&self, name: &str) {
        self.state.lock().rejected_names.insert(name.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    pub fn gate_uploads(&self) -> Arc<RequestGate> {
        let gate = Arc::new(RequestGate {
            started: Notify::new(),
            release: Notify::new(),
        });
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Hold listings open after the server has taken its snapshot
    pub fn gate_lists(&self) -> Arc<RequestGate> {
        let gate = Arc::new(RequestGate {
            started: Notify::new(),
            release: Notify::new(),
        });
        *self.list_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn calls_of(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == op).count()
    }

    fn begin(&self, op: &'static str) -> Result<(), ServiceError> {
        let mut state = self.state.lock();
        state.calls.push(op);
        if state.offline {
            return Err(ServiceError::NetworkError(format!("{} failed: connection refused", op)));
        }
        Ok(())
    }

    fn not_found(id: &str) -> ServiceError {
        ServiceError::ServerRejection {
            status: 404,
            message: format!("File not found {}", id),
        }
    }
}

#[async_trait]
impl FileService for FakeFileService {
    async fn list(&self, name_filter: Option<&str>) -> Result<Vec<FileRecord>, ServiceError> {
        self.begin("list")?;
        let needle = name_filter.map(|f| f.to_lowercase());
        let snapshot: Vec<FileRecord> = self
            .state
            .lock()
            .records
            .iter()
            .filter(|r| match &needle {
                Some(n) => r.name.to_lowercase().contains(n),
                None => true,
            })
            .cloned()
            .collect();

        let gate = self.list_gate.lock().clone();
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }
        Ok(snapshot)
    }

    async fn upload(
        &self,
        source: &UploadSource,
        on_progress: Option<ProgressCallback>,
    ) -> Result<FileRecord, ServiceError> {
        self.begin("upload")?;
        let total = source.size();
        if let Some(ref cb) = on_progress {
            cb(total / 2, total);
        }

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }

        let mut state = self.state.lock();
        if state.rejected_names.contains(source.name()) {
            return Err(ServiceError::ServerRejection {
                status: 413,
                message: "Maximum upload size exceeded".to_string(),
            });
        }
        if let Some(ref cb) = on_progress {
            cb(total, total);
        }
        state.next_id += 1;
        let id = format!("up{}", state.next_id);
        let mut created = record(&id, source.name(), total, 1000 + state.next_id as i64);
        created.media_type = Some(source.media_type().to_string());
        state.records.push(created.clone());
        Ok(created)
    }

    async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.begin("delete")?;
        let mut state = self.state.lock();
        let before = state.records.len();
        state.records.retain(|r| r.id != id);
        if state.records.len() == before {
            return Err(Self::not_found(id));
        }
        Ok(())
    }

    async fn toggle_public(&self, id: &str) -> Result<FileRecord, ServiceError> {
        self.begin("toggle_public")?;
        let mut state = self.state.lock();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        record.is_public = !record.is_public;
        Ok(record.clone())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<FileRecord, ServiceError> {
        self.begin("rename")?;
        let mut state = self.state.lock();
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Self::not_found(id))?;
        record.name = new_name.to_string();
        Ok(record.clone())
    }
}
