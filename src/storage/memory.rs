//! In-memory archive store for tests, with optional fault injection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{ArchiveStore, ObjectUpload, StorageError, StorageResult, validate_key};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl StoredObject {
    pub fn lines(&self) -> Vec<serde_json::Value> {
        std::str::from_utf8(&self.body)
            .expect("archive objects are UTF-8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line is a JSON object"))
            .collect()
    }
}

#[derive(Default)]
struct State {
    objects: HashMap<String, StoredObject>,
    aborted: usize,
    container_created: bool,
}

/// Keeps completed objects in a map. Writes fail once an upload has
/// received more than `fail_after_bytes`, when set.
#[derive(Default, Clone)]
pub struct MemoryArchiveStore {
    state: Arc<Mutex<State>>,
    fail_after_bytes: Option<usize>,
    fail_container: bool,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(bytes: usize) -> Self {
        Self {
            fail_after_bytes: Some(bytes),
            ..Self::default()
        }
    }

    pub fn failing_container() -> Self {
        Self {
            fail_container: true,
            ..Self::default()
        }
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn aborted_uploads(&self) -> usize {
        self.state.lock().unwrap().aborted
    }

    pub fn container_created(&self) -> bool {
        self.state.lock().unwrap().container_created
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn ensure_container(&self) -> StorageResult<()> {
        if self.fail_container {
            return Err(StorageError::S3("access denied".into()));
        }
        self.state.lock().unwrap().container_created = true;
        Ok(())
    }

    async fn start_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<Box<dyn ObjectUpload>> {
        validate_key(key)?;
        if self.state.lock().unwrap().objects.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        Ok(Box::new(MemoryUpload {
            state: self.state.clone(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            body: Vec::new(),
            fail_after_bytes: self.fail_after_bytes,
        }))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.state.lock().unwrap().objects.contains_key(key))
    }

    fn url(&self, key: &str) -> String {
        format!("memory://{key}")
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryUpload {
    state: Arc<Mutex<State>>,
    key: String,
    content_type: String,
    body: Vec<u8>,
    fail_after_bytes: Option<usize>,
}

#[async_trait]
impl ObjectUpload for MemoryUpload {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.body.extend_from_slice(&chunk);
        if self.fail_after_bytes.is_some_and(|limit| self.body.len() > limit) {
            return Err(StorageError::Io(std::io::Error::other("injected write failure")));
        }
        Ok(())
    }

    async fn complete(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        this.state.lock().unwrap().objects.insert(
            this.key,
            StoredObject {
                content_type: this.content_type,
                body: this.body,
            },
        );
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.state.lock().unwrap().aborted += 1;
        Ok(())
    }
}
