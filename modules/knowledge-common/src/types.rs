use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// Outbound request characteristics rotated between fetch attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_agent: String,
    pub viewport: Viewport,
    pub accept_language: String,
}

// ---------------------------------------------------------------------------
// ExtractedDocument
// ---------------------------------------------------------------------------

/// Title used when a document has no discoverable title.
pub const UNTITLED: &str = "untitled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Normalized text with script/style content removed.
    pub body: String,
    /// Image URLs in first-seen order, without exact duplicates.
    pub images: Vec<String>,
}

/// Optional field an extraction could not fill. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    Untitled,
    MissingTimestamp,
    NoImages,
    EmptyBody,
}

impl ExtractedDocument {
    pub fn degradations(&self) -> Vec<Degradation> {
        let mut missing = Vec::new();
        if self.title == UNTITLED {
            missing.push(Degradation::Untitled);
        }
        if self.published_at.is_none() {
            missing.push(Degradation::MissingTimestamp);
        }
        if self.images.is_empty() {
            missing.push(Degradation::NoImages);
        }
        if self.body.trim().is_empty() {
            missing.push(Degradation::EmptyBody);
        }
        missing
    }
}

// ---------------------------------------------------------------------------
// ClassificationResult
// ---------------------------------------------------------------------------

/// Category assigned when the model's answer is outside the taxonomy.
pub const OTHER_CATEGORY: &str = "other";

/// Soft-constraint notes attached to a classification that was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationWarning {
    CategoryCoerced { original: String },
    SummaryTruncated { original_chars: usize },
    KeywordCount { count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    pub summary: String,
    /// Comma-joined keywords.
    pub keywords: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ClassificationWarning>,
}

// ---------------------------------------------------------------------------
// ArticleRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleOrigin {
    /// Acquired from the web by the fetch pipeline.
    Fetched,
    /// Submitted by hand after a verification block.
    Manual,
}

impl ArticleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleOrigin::Fetched => "fetched",
            ArticleOrigin::Manual => "manual",
        }
    }
}

/// Finished ingest result handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: Uuid,
    pub origin: ArticleOrigin,
    pub source_url: Option<String>,
    pub final_url: Option<String>,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub body: String,
    pub images: Vec<String>,
    pub category: String,
    pub summary: String,
    pub keywords: String,
    /// Repairs applied while validating the model's answer.
    pub warnings: Vec<ClassificationWarning>,
    pub ingested_at: DateTime<Utc>,
}

impl ArticleRecord {
    pub fn new(
        origin: ArticleOrigin,
        source_url: Option<String>,
        final_url: Option<String>,
        document: ExtractedDocument,
        classification: ClassificationResult,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            source_url,
            final_url,
            title: document.title,
            published_at: document.published_at,
            body: document.body,
            images: document.images,
            category: classification.category,
            summary: classification.summary,
            keywords: classification.keywords,
            warnings: classification.warnings,
            ingested_at: Utc::now(),
        }
    }
}
