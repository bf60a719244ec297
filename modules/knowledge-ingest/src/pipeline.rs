// Ingest pipeline: acquire -> extract -> classify -> save, strictly in order.
//
// Retries live only inside the fetch stage. Extraction and classification are
// deterministic for their input, so their failures surface unchanged. A
// verification block becomes a remediation message naming how to submit the
// article by hand; `ingest_text` is that manual path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use knowledge_archive::{
    extract, session_pool, BrowserFetchStrategy, BrowserlessRenderer, ChromiumRenderer,
    DirectFetchStrategy, FetchErrorKind, FetchOrchestrator, FetchStrategy, IdentityPool,
    IdentitySource, Renderer, VerificationDetector,
};
use knowledge_common::{
    profile_for, ArticleOrigin, ArticleRecord, ClassificationResult, ExtractedDocument,
    IngestError, RenderBackend, Settings, UNTITLED,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use crate::classifier::{ClassificationClient, ModelBackend};
use crate::store::{ArticleStore, SqliteStore};

#[derive(TypedBuilder)]
pub struct Pipeline {
    fetcher: FetchOrchestrator,
    classifier: ClassificationClient,
    store: Arc<dyn ArticleStore>,
}

impl Pipeline {
    /// Wire the production pipeline from settings.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let renderer: Arc<dyn Renderer> = match &settings.render_backend {
            RenderBackend::Chromium { executable } => Arc::new(ChromiumRenderer::new(executable.as_str())),
            RenderBackend::Browserless { base_url, token } => {
                Arc::new(BrowserlessRenderer::new(base_url, token.as_deref())?)
            }
        };
        info!(renderer = renderer.name(), sessions = settings.max_browser_sessions, "Browser strategy ready");

        let detector = match &settings.verification_rules_path {
            Some(path) => VerificationDetector::from_file(path)?,
            None => VerificationDetector::default(),
        };

        let fetcher = FetchOrchestrator::builder()
            .direct(Arc::new(DirectFetchStrategy::new()?) as Arc<dyn FetchStrategy>)
            .browser(Arc::new(BrowserFetchStrategy::new(
                renderer,
                session_pool(settings.max_browser_sessions),
            )) as Arc<dyn FetchStrategy>)
            .identities(Arc::new(IdentityPool::default()) as Arc<dyn IdentitySource>)
            .detector(Arc::new(detector))
            .build();

        let model = ai_client::OpenAi::new(settings.model_token.clone(), settings.model.clone())
            .with_base_url(settings.model_base_url.clone());
        let classifier =
            ClassificationClient::new(Arc::new(model) as Arc<dyn ModelBackend>, settings.taxonomy.clone());

        let store = SqliteStore::connect(&settings.db_path, &settings.data_dir)
            .await
            .context("Failed to open article store")?;

        Ok(Self {
            fetcher,
            classifier,
            store: Arc::new(store),
        })
    }

    pub async fn ingest(&self, url: &str) -> Result<ArticleRecord, IngestError> {
        self.ingest_with_cancel(url, &CancellationToken::new()).await
    }

    /// Run with a wall-clock deadline. On expiry the in-flight stage is
    /// dropped, which tears down any rendering session it holds.
    pub async fn ingest_with_deadline(
        &self,
        url: &str,
        deadline: Duration,
    ) -> Result<ArticleRecord, IngestError> {
        match tokio::time::timeout(deadline, self.ingest(url)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(url, deadline_secs = deadline.as_secs(), "Ingest deadline exceeded");
                Err(IngestError::Timeout(format!(
                    "deadline of {}s exceeded",
                    deadline.as_secs()
                )))
            }
        }
    }

    pub async fn ingest_with_cancel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<ArticleRecord, IngestError> {
        info!(url, "Ingest started");

        let fetched = self.fetcher.acquire_with_cancel(url, cancel).await;
        if let Some(error) = fetched.error {
            let error = fetch_error(url, error);
            warn!(url, kind = ?error.kind(), error = %error, "Ingest failed at fetch stage");
            return Err(error);
        }
        let Some(raw) = fetched.raw_document else {
            return Err(IngestError::Navigation("no document delivered".into()));
        };

        let document = extract(&raw, &fetched.final_url);
        for degradation in document.degradations() {
            warn!(url, ?degradation, "Extraction degraded");
        }
        info!(
            url,
            strategy = %fetched.strategy,
            title = %document.title,
            body_chars = document.body.chars().count(),
            images = document.images.len(),
            "Extracted document"
        );

        let classification = self.classify(&document, cancel).await?;

        let record = ArticleRecord::new(
            ArticleOrigin::Fetched,
            Some(url.to_string()),
            Some(fetched.final_url),
            document,
            classification,
        );
        self.save(record).await
    }

    /// Manual submission: classify and save text the user supplied, for pages
    /// that could not be fetched automatically.
    pub async fn ingest_text(
        &self,
        title: &str,
        body: &str,
        source_url: Option<&str>,
    ) -> Result<ArticleRecord, IngestError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(IngestError::Validation("submitted content is empty".into()));
        }
        info!(title, source_url, chars = body.chars().count(), "Manual submission");

        let title = match title.trim() {
            "" => UNTITLED,
            t => t,
        };
        let document = ExtractedDocument {
            title: title.to_string(),
            published_at: None,
            body: body.to_string(),
            images: Vec::new(),
        };
        let classification = self.classify(&document, &CancellationToken::new()).await?;

        let record = ArticleRecord::new(
            ArticleOrigin::Manual,
            source_url.map(String::from),
            None,
            document,
            classification,
        );
        self.save(record).await
    }

    async fn classify(
        &self,
        document: &ExtractedDocument,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, IngestError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IngestError::Cancelled),
            result = self.classifier.classify(&document.body, &document.title) => result,
        }
    }

    async fn save(&self, record: ArticleRecord) -> Result<ArticleRecord, IngestError> {
        self.store.save(&record).await.map_err(|e| {
            warn!(id = %record.id, error = %e, "Failed to save article");
            IngestError::Storage(e.to_string())
        })?;
        info!(id = %record.id, origin = record.origin.as_str(), "Ingest complete");
        Ok(record)
    }
}

/// Map the fetch stage's terminal failure onto the ingest error taxonomy.
pub fn fetch_error(url: &str, error: FetchErrorKind) -> IngestError {
    match error {
        FetchErrorKind::Timeout => IngestError::Timeout(format!("fetching {url}")),
        FetchErrorKind::Network { message } => IngestError::Network(message),
        FetchErrorKind::Http { status } => IngestError::Http { status },
        FetchErrorKind::Navigation { message } => IngestError::Navigation(message),
        FetchErrorKind::VerificationBlocked { signature } => {
            let profile = profile_for(url);
            IngestError::VerificationBlocked {
                platform: profile.platform,
                signature,
                remediation: profile.remediation_message(),
            }
        }
        FetchErrorKind::Cancelled => IngestError::Cancelled,
    }
}
