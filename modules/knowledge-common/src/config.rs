use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;

const DEFAULT_MODEL_BASE_URL: &str = "http://localhost:18324/v1";
const DEFAULT_MODEL: &str = "alibaba-cloud/qwen3-max";
const DEFAULT_DATA_DIR: &str = "./knowledge";
const DEFAULT_CATEGORIES: &str =
    "frontend,backend,big-data,AI,autonomous-driving,data-loop,simulation-evaluation,product,design,life";
const DEFAULT_MAX_BROWSER_SESSIONS: usize = 2;

/// Where rendering sessions for the browser strategy come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderBackend {
    /// A fresh local headless Chromium per attempt.
    Chromium { executable: String },
    /// A remote Browserless service.
    Browserless {
        base_url: String,
        token: Option<String>,
    },
}

/// Immutable settings, resolved once before any pipeline run.
#[derive(Debug, Clone)]
pub struct Settings {
    // Model gateway
    pub model_base_url: String,
    pub model_token: Option<String>,
    pub model: String,

    // Classification
    pub taxonomy: Vec<String>,

    // Storage
    pub data_dir: PathBuf,
    pub db_path: PathBuf,

    // Fetching
    pub render_backend: RenderBackend,
    pub max_browser_sessions: usize,
    pub verification_rules_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = PathBuf::from(get("KNOWLEDGE_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.into()));
        let db_path = get("KNOWLEDGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("knowledge.db"));

        let taxonomy = parse_taxonomy(&get("DEFAULT_CATEGORIES").unwrap_or_else(|| DEFAULT_CATEGORIES.into()));
        if taxonomy.is_empty() {
            bail!("DEFAULT_CATEGORIES must name at least one category");
        }

        let render_backend = match get("BROWSERLESS_URL") {
            Some(base_url) => RenderBackend::Browserless {
                base_url,
                token: get("BROWSERLESS_TOKEN"),
            },
            None => RenderBackend::Chromium {
                executable: get("CHROME_BIN").unwrap_or_else(|| "chromium".to_string()),
            },
        };

        let max_browser_sessions = match get("MAX_BROWSER_SESSIONS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("MAX_BROWSER_SESSIONS must be a number, got {raw:?}"))?,
            None => DEFAULT_MAX_BROWSER_SESSIONS,
        };
        if max_browser_sessions == 0 {
            bail!("MAX_BROWSER_SESSIONS must be at least 1");
        }

        Ok(Self {
            model_base_url: get("KNOWLEDGE_MODEL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MODEL_BASE_URL.to_string()),
            model_token: get("KNOWLEDGE_MODEL_TOKEN"),
            model: get("KNOWLEDGE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            taxonomy,
            data_dir,
            db_path,
            render_backend,
            max_browser_sessions,
            verification_rules_path: get("VERIFICATION_RULES_PATH").map(PathBuf::from),
        })
    }

    /// Log the effective settings with the credentials masked.
    pub fn log_redacted(&self) {
        let backend = match &self.render_backend {
            RenderBackend::Chromium { executable } => format!("chromium ({executable})"),
            RenderBackend::Browserless { base_url, token } => format!(
                "browserless ({base_url}, token {})",
                if token.is_some() { "set" } else { "unset" }
            ),
        };
        info!(
            model_base_url = %self.model_base_url,
            model = %self.model,
            model_token = if self.model_token.is_some() { "set" } else { "unset" },
            taxonomy = %self.taxonomy.join(","),
            data_dir = %self.data_dir.display(),
            db_path = %self.db_path.display(),
            render_backend = %backend,
            max_browser_sessions = self.max_browser_sessions,
            "Settings loaded"
        );
    }
}

fn parse_taxonomy(raw: &str) -> Vec<String> {
    let mut categories: Vec<String> = Vec::new();
    for category in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if !categories.iter().any(|c| c == category) {
            categories.push(category.to_string());
        }
    }
    categories
}
