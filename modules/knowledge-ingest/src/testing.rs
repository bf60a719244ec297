// Test mocks for the ingest layer.
//
// - ScriptedModel (ModelBackend): replays queued replies, records prompts
// - InMemoryStore (ArticleStore): keeps saved records in a Vec
// - FailingStore (ArticleStore): every save fails

use std::collections::VecDeque;
use std::sync::Mutex;

use ai_client::AiError;
use async_trait::async_trait;
use knowledge_common::ArticleRecord;

use crate::classifier::ModelBackend;
use crate::store::{ArticleStore, StoreError};

/// Reply body that passes validation for the default taxonomy.
pub fn valid_reply(category: &str) -> String {
    serde_json::json!({
        "category": category,
        "summary": "An in-depth walk through how async runtimes schedule tasks, \
                    covering work stealing, wakers and cooperative budgeting.",
        "keywords": "rust, tokio, async, scheduling",
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, AiError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.into()));
        self
    }

    pub fn fail(self, error: AiError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AiError::Empty("ScriptedModel: no reply queued".into())))
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<ArticleRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ArticleRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArticleStore for InMemoryStore {
    async fn save(&self, record: &ArticleRecord) -> Result<(), StoreError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub struct FailingStore;

#[async_trait]
impl ArticleStore for FailingStore {
    async fn save(&self, _record: &ArticleRecord) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "FailingStore: read-only data directory",
        )))
    }
}
