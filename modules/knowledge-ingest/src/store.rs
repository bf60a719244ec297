// Article persistence: one SQLite row per article plus the body as a
// Markdown file under `<data_dir>/articles/<id>.md`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use knowledge_common::{ArticleRecord, ClassificationWarning};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence collaborator for finished ingest runs.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn save(&self, record: &ArticleRecord) -> Result<(), StoreError>;
}

/// Row shape of the `articles` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredArticle {
    pub id: String,
    pub kind: String,
    pub url: Option<String>,
    pub title: String,
    pub summary: String,
    pub category: String,
    pub keywords: String,
    pub content_path: String,
    /// JSON array of image URLs.
    pub image_urls: String,
    /// JSON array of classification warnings.
    pub warnings: String,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoredArticle {
    pub fn images(&self) -> Result<Vec<String>, StoreError> {
        Ok(serde_json::from_str(&self.image_urls)?)
    }

    pub fn warnings(&self) -> Result<Vec<ClassificationWarning>, StoreError> {
        Ok(serde_json::from_str(&self.warnings)?)
    }
}

const CREATE_ARTICLES: &str = r#"
    CREATE TABLE IF NOT EXISTS articles (
        id           TEXT PRIMARY KEY,
        kind         TEXT NOT NULL,
        url          TEXT,
        title        TEXT NOT NULL,
        summary      TEXT NOT NULL,
        category     TEXT NOT NULL,
        keywords     TEXT NOT NULL,
        content_path TEXT NOT NULL,
        image_urls   TEXT NOT NULL,
        warnings     TEXT NOT NULL DEFAULT '[]',
        published_at TEXT,
        created_at   TEXT NOT NULL
    )
"#;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    articles_dir: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and the articles directory.
    pub async fn connect(db_path: &Path, data_dir: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool, data_dir).await?;
        info!(db = %db_path.display(), data_dir = %data_dir.display(), "Article store ready");
        Ok(store)
    }

    /// Wrap an existing pool. The schema is created if missing.
    pub async fn from_pool(pool: SqlitePool, data_dir: &Path) -> Result<Self, StoreError> {
        sqlx::query(CREATE_ARTICLES).execute(&pool).await?;
        let articles_dir = data_dir.join("articles");
        tokio::fs::create_dir_all(&articles_dir).await?;
        Ok(Self { pool, articles_dir })
    }

    /// In-memory database, for tests and dry runs. Bodies still go to `data_dir`.
    pub async fn in_memory(data_dir: &Path) -> Result<Self, StoreError> {
        // Each connection to `sqlite::memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool, data_dir).await
    }

    pub fn content_path(&self, id: &uuid::Uuid) -> PathBuf {
        self.articles_dir.join(format!("{id}.md"))
    }

    pub async fn get(&self, id: &uuid::Uuid) -> Result<Option<StoredArticle>, StoreError> {
        let row = sqlx::query_as::<_, StoredArticle>(
            r#"
            SELECT id, kind, url, title, summary, category, keywords, content_path,
                   image_urls, warnings, published_at, created_at
            FROM articles WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let (n,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn save(&self, record: &ArticleRecord) -> Result<(), StoreError> {
        let content_path = self.content_path(&record.id);
        let images = serde_json::to_string(&record.images)?;
        let warnings = serde_json::to_string(&record.warnings)?;

        // Body is staged beside its final path and removed on drop, so an
        // interrupted save leaves neither a row nor a `<id>.md`.
        let staged = tempfile::Builder::new()
            .prefix(".staged-")
            .suffix(".md")
            .tempfile_in(&self.articles_dir)?;
        tokio::fs::write(staged.path(), render_markdown(record)).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO articles (id, kind, url, title, summary, category, keywords,
                                  content_path, image_urls, warnings, published_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.origin.as_str())
        .bind(record.source_url.as_deref())
        .bind(&record.title)
        .bind(&record.summary)
        .bind(&record.category)
        .bind(&record.keywords)
        .bind(content_path.to_string_lossy().into_owned())
        .bind(images)
        .bind(warnings)
        .bind(record.published_at)
        .bind(record.ingested_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if let Err(e) = staged.persist(&content_path) {
            warn!(id = %record.id, path = %content_path.display(), error = %e.error, "Failed to place article body, removing row");
            sqlx::query("DELETE FROM articles WHERE id = ?1")
                .bind(record.id.to_string())
                .execute(&self.pool)
                .await?;
            return Err(e.error.into());
        }

        info!(id = %record.id, title = %record.title, category = %record.category, "Article saved");
        Ok(())
    }
}

fn render_markdown(record: &ArticleRecord) -> String {
    let mut out = format!("# {}\n\n", record.title);
    if let Some(url) = &record.source_url {
        out.push_str(&format!("Source: {url}\n\n"));
    }
    out.push_str(&record.body);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use knowledge_common::{ArticleOrigin, ClassificationResult, ExtractedDocument};

    use super::*;

    #[test]
    fn markdown_carries_title_source_and_body() {
        let record = ArticleRecord::new(
            ArticleOrigin::Fetched,
            Some("https://example.com/a".into()),
            None,
            ExtractedDocument {
                title: "Pinning".into(),
                published_at: None,
                body: "Body text.".into(),
                images: vec![],
            },
            ClassificationResult {
                category: "backend".into(),
                summary: "s".into(),
                keywords: "a,b,c".into(),
                warnings: vec![],
            },
        );
        let md = render_markdown(&record);
        assert!(md.starts_with("# Pinning\n\n"));
        assert!(md.contains("Source: https://example.com/a"));
        assert!(md.ends_with("Body text.\n"));
    }
}
