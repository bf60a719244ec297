// Article classification through an OpenAI-compatible model gateway.
//
// One bounded call per article. The reply is decoded as an untyped JSON map
// and validated field by field: unknown categories are coerced, long summaries
// trimmed, odd keyword counts flagged. Short summaries and missing keywords
// cannot be repaired and fail the run.

use std::sync::Arc;
use std::time::Duration;

use ai_client::{strip_code_blocks, Agent, AiError, OpenAi, PromptBuilder};
use async_trait::async_trait;
use knowledge_common::{ClassificationResult, ClassificationWarning, IngestError, OTHER_CATEGORY};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Body budget for the prompt, in characters.
pub const BODY_BUDGET: usize = 8000;
pub const MODEL_TIMEOUT: Duration = Duration::from_secs(30);
pub const TEMPERATURE: f32 = 0.3;
pub const MAX_TOKENS: u32 = 500;

pub const SUMMARY_MIN_CHARS: usize = 50;
pub const SUMMARY_MAX_CHARS: usize = 150;
/// Length an over-long summary is cut to, before the ellipsis.
const SUMMARY_CUT_CHARS: usize = 147;
const ELLIPSIS: &str = "...";

const KEYWORD_RANGE: std::ops::RangeInclusive<usize> = 3..=5;
const KEYWORD_SEPARATORS: [char; 3] = [',', '，', '、'];
const SENTENCE_ENDERS: [char; 6] = ['.', '。', '!', '！', '?', '？'];

// ---------------------------------------------------------------------------
// Model seam
// ---------------------------------------------------------------------------

/// A single prompt-in, text-out model call.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AiError>;
}

#[async_trait]
impl ModelBackend for OpenAi {
    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        self.prompt(prompt)
            .temperature(TEMPERATURE)
            .max_tokens(MAX_TOKENS)
            .timeout(MODEL_TIMEOUT)
            .json_object()
            .send()
            .await
    }
}

// ---------------------------------------------------------------------------
// ClassificationClient
// ---------------------------------------------------------------------------

pub struct ClassificationClient {
    model: Arc<dyn ModelBackend>,
    taxonomy: Vec<String>,
}

impl ClassificationClient {
    pub fn new(model: Arc<dyn ModelBackend>, taxonomy: Vec<String>) -> Self {
        Self { model, taxonomy }
    }

    pub fn taxonomy(&self) -> &[String] {
        &self.taxonomy
    }

    pub async fn classify(&self, body: &str, title: &str) -> Result<ClassificationResult, IngestError> {
        let prompt = build_prompt(title, body, &self.taxonomy);

        let reply = self
            .model
            .complete(&prompt)
            .await
            .map_err(|e| IngestError::Model(e.to_string()))?;

        let fields = parse_response(&reply)?;
        let result = validate(&fields, &self.taxonomy)?;

        info!(
            title,
            category = %result.category,
            keywords = %result.keywords,
            warnings = result.warnings.len(),
            "Classified article"
        );
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

pub fn build_prompt(title: &str, body: &str, taxonomy: &[String]) -> String {
    let categories = taxonomy.join(", ");
    let body = truncate_body(body, BODY_BUDGET);
    format!(
        "You are a knowledge-management assistant. Analyse the article below.\n\n\
         Title: {title}\n\n\
         Content:\n{body}\n\n\
         Reply with exactly one JSON object and nothing else:\n\
         {{\n  \
           \"category\": \"the single best fit from: {categories}\",\n  \
           \"summary\": \"a {SUMMARY_MIN_CHARS}-{SUMMARY_MAX_CHARS} character summary of the core content\",\n  \
           \"keywords\": \"3-5 keywords, comma separated\"\n\
         }}"
    )
}

/// Cut `body` to at most `budget` characters. When a sentence ender falls in
/// the last 20% of the window, cut right after the last one.
pub fn truncate_body(body: &str, budget: usize) -> &str {
    let Some((window_end, _)) = body.char_indices().nth(budget) else {
        return body;
    };
    let window = &body[..window_end];
    let threshold = budget * 4 / 5;

    let sentence_end = window
        .char_indices()
        .enumerate()
        .filter(|(char_idx, (_, c))| *char_idx >= threshold && SENTENCE_ENDERS.contains(c))
        .last()
        .map(|(_, (byte_idx, c))| byte_idx + c.len_utf8());

    match sentence_end {
        Some(end) => &window[..end],
        None => window,
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Decode the model reply into an untyped map. Code fences are tolerated.
pub fn parse_response(reply: &str) -> Result<Map<String, Value>, IngestError> {
    let json = strip_code_blocks(reply);
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(IngestError::Parse(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
        Err(e) => {
            warn!(error = %e, reply = %truncate_body(reply, 200), "Unparseable model reply");
            Err(IngestError::Parse(e.to_string()))
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Validate and repair the decoded fields into a `ClassificationResult`.
pub fn validate(
    fields: &Map<String, Value>,
    taxonomy: &[String],
) -> Result<ClassificationResult, IngestError> {
    let mut warnings = Vec::new();

    let raw_category = fields
        .get("category")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    let category = match taxonomy
        .iter()
        .find(|c| c.eq_ignore_ascii_case(raw_category))
    {
        Some(known) => known.clone(),
        None => {
            warn!(category = raw_category, "Category outside taxonomy, using {OTHER_CATEGORY}");
            warnings.push(ClassificationWarning::CategoryCoerced {
                original: raw_category.to_string(),
            });
            OTHER_CATEGORY.to_string()
        }
    };

    let summary = fields
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    let summary_chars = summary.chars().count();
    if summary_chars < SUMMARY_MIN_CHARS {
        return Err(IngestError::Validation(format!(
            "summary has {summary_chars} characters, minimum is {SUMMARY_MIN_CHARS}"
        )));
    }
    let summary = if summary_chars > SUMMARY_MAX_CHARS {
        warn!(chars = summary_chars, "Summary too long, truncating");
        warnings.push(ClassificationWarning::SummaryTruncated {
            original_chars: summary_chars,
        });
        let mut cut: String = summary.chars().take(SUMMARY_CUT_CHARS).collect();
        cut.push_str(ELLIPSIS);
        cut
    } else {
        summary.to_string()
    };

    let keywords = keyword_list(fields.get("keywords"));
    if keywords.is_empty() {
        return Err(IngestError::Validation("no keywords in model reply".into()));
    }
    if !KEYWORD_RANGE.contains(&keywords.len()) {
        warn!(count = keywords.len(), "Keyword count outside 3-5");
        warnings.push(ClassificationWarning::KeywordCount {
            count: keywords.len(),
        });
    }

    Ok(ClassificationResult {
        category,
        summary,
        keywords: keywords.join(","),
        warnings,
    })
}

/// Keywords arrive either as one separated string or as an array of strings.
fn keyword_list(value: Option<&Value>) -> Vec<String> {
    let pieces: Vec<&str> = match value {
        Some(Value::String(s)) => s.split(KEYWORD_SEPARATORS).collect(),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}
