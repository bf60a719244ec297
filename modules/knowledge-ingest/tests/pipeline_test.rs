//! End-to-end pipeline scenarios with scripted fetchers, a scripted model and
//! an in-memory store. No network, browser or model gateway.

use std::sync::Arc;
use std::time::Duration;

use ai_client::AiError;
use knowledge_archive::testing::{FixedIdentities, HangingStrategy, ScriptedStrategy};
use knowledge_archive::{
    Backoff, FetchErrorKind, FetchOrchestrator, FetchStrategy, IdentitySource, NoDelay,
    StrategyTag,
};
use knowledge_common::{
    ArticleOrigin, ClassificationWarning, ErrorKind, Platform, OTHER_CATEGORY, UNTITLED,
};
use knowledge_ingest::testing::{valid_reply, FailingStore, InMemoryStore, ScriptedModel};
use knowledge_ingest::{ArticleStore, ClassificationClient, ModelBackend, Pipeline};
use tokio_util::sync::CancellationToken;

const WECHAT_URL: &str = "https://mp.weixin.qq.com/s/R8sTq2";
const BLOG_URL: &str = "https://blog.example.com/posts/work-stealing";

const ARTICLE: &str = r#"<html><head>
<title>Work stealing in Tokio - Blog</title>
<meta property="article:published_time" content="2025-03-01T10:00:00Z">
</head><body><article>
<p>Tokio's multi-threaded scheduler keeps a local run queue per worker and steals from
siblings when idle. This post walks through the scheduling loop step by step.</p>
<img src="https://cdn.example.com/diagrams/scheduler.png">
</article></body></html>"#;

const WECHAT_CHALLENGE: &str =
    "<html><body><p>当前环境异常，完成验证后即可继续访问。</p></body></html>";

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    direct: Arc<ScriptedStrategy>,
    browser: Arc<ScriptedStrategy>,
    model: Arc<ScriptedModel>,
    store: Arc<InMemoryStore>,
    pipeline: Pipeline,
}

fn taxonomy() -> Vec<String> {
    ["frontend", "backend", "AI"].iter().map(|s| s.to_string()).collect()
}

fn orchestrator(direct: Arc<dyn FetchStrategy>, browser: Arc<dyn FetchStrategy>) -> FetchOrchestrator {
    FetchOrchestrator::builder()
        .direct(direct)
        .browser(browser)
        .identities(Arc::new(FixedIdentities::numbered(3)) as Arc<dyn IdentitySource>)
        .backoff(Arc::new(NoDelay) as Arc<dyn Backoff>)
        .build()
}

fn harness(direct: ScriptedStrategy, browser: ScriptedStrategy, model: ScriptedModel) -> Harness {
    let direct = Arc::new(direct);
    let browser = Arc::new(browser);
    let model = Arc::new(model);
    let store = Arc::new(InMemoryStore::new());

    let pipeline = Pipeline::builder()
        .fetcher(orchestrator(direct.clone(), browser.clone()))
        .classifier(ClassificationClient::new(
            model.clone() as Arc<dyn ModelBackend>,
            taxonomy(),
        ))
        .store(store.clone() as Arc<dyn ArticleStore>)
        .build();

    Harness {
        direct,
        browser,
        model,
        store,
        pipeline,
    }
}

fn direct() -> ScriptedStrategy {
    ScriptedStrategy::new(StrategyTag::Direct)
}

fn browser() -> ScriptedStrategy {
    ScriptedStrategy::new(StrategyTag::Browser)
}

// ---------------------------------------------------------------------------
// Success paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn direct_fetch_flows_through_to_saved_record() {
    let h = harness(
        direct().then_html(BLOG_URL, ARTICLE),
        browser(),
        ScriptedModel::new().reply(valid_reply("backend")),
    );

    let record = h.pipeline.ingest(BLOG_URL).await.unwrap();

    assert_eq!(record.origin, ArticleOrigin::Fetched);
    assert_eq!(record.title, "Work stealing in Tokio");
    assert_eq!(record.category, "backend");
    assert_eq!(record.keywords, "rust,tokio,async,scheduling");
    assert_eq!(record.source_url.as_deref(), Some(BLOG_URL));
    assert_eq!(record.images, vec!["https://cdn.example.com/diagrams/scheduler.png"]);
    assert!(record.published_at.is_some());
    assert_eq!(h.browser.calls(), 0);
    assert_eq!(h.store.records(), vec![record]);
}

#[tokio::test]
async fn challenge_on_direct_then_clean_browser_render_succeeds() {
    let h = harness(
        direct().then_html(WECHAT_URL, WECHAT_CHALLENGE),
        browser().then_html(WECHAT_URL, ARTICLE),
        ScriptedModel::new().reply(valid_reply("backend")),
    );

    let record = h.pipeline.ingest(WECHAT_URL).await.unwrap();

    assert_eq!(record.title, "Work stealing in Tokio");
    assert_eq!(h.direct.calls(), 1);
    assert_eq!(h.browser.calls(), 1);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn prompt_carries_extracted_title_and_body() {
    let h = harness(
        direct().then_html(BLOG_URL, ARTICLE),
        browser(),
        ScriptedModel::new().reply(valid_reply("backend")),
    );

    h.pipeline.ingest(BLOG_URL).await.unwrap();

    let prompts = h.model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Title: Work stealing in Tokio"));
    assert!(prompts[0].contains("local run queue"));
}

#[tokio::test]
async fn fenced_model_reply_is_accepted() {
    let h = harness(
        direct().then_html(BLOG_URL, ARTICLE),
        browser(),
        ScriptedModel::new().reply(format!("```json\n{}\n```", valid_reply("AI"))),
    );

    let record = h.pipeline.ingest(BLOG_URL).await.unwrap();
    assert_eq!(record.category, "AI");
}

#[tokio::test]
async fn off_taxonomy_category_is_saved_as_other() {
    let h = harness(
        direct().then_html(BLOG_URL, ARTICLE),
        browser(),
        ScriptedModel::new().reply(valid_reply("gardening")),
    );

    let record = h.pipeline.ingest(BLOG_URL).await.unwrap();
    assert_eq!(record.category, OTHER_CATEGORY);
}

#[tokio::test]
async fn repair_warnings_travel_with_the_saved_record() {
    let reply = serde_json::json!({
        "category": "cooking",
        "summary": "Tokio's scheduler steals work from sibling run queues so idle worker threads pick up tasks without a global lock.",
        "keywords": "a,b,c,d,e,f,g",
    })
    .to_string();
    let h = harness(
        direct().then_html(BLOG_URL, ARTICLE),
        browser(),
        ScriptedModel::new().reply(reply),
    );

    let record = h.pipeline.ingest(BLOG_URL).await.unwrap();

    assert_eq!(
        record.warnings,
        vec![
            ClassificationWarning::CategoryCoerced {
                original: "cooking".into()
            },
            ClassificationWarning::KeywordCount { count: 7 },
        ]
    );
    assert_eq!(h.store.records()[0].warnings, record.warnings);
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["warnings"][1]["kind"], "keyword_count");
}

// ---------------------------------------------------------------------------
// Fetch-stage failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn all_browser_timeouts_end_in_timeout_without_saving() {
    let h = harness(
        direct().then_fail(BLOG_URL, FetchErrorKind::Timeout),
        browser()
            .then_fail(BLOG_URL, FetchErrorKind::Timeout)
            .then_fail(BLOG_URL, FetchErrorKind::Timeout)
            .then_fail(BLOG_URL, FetchErrorKind::Timeout),
        ScriptedModel::new().reply(valid_reply("backend")),
    );

    let err = h.pipeline.ingest(BLOG_URL).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(h.browser.calls(), 3);
    assert_eq!(h.model.calls(), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn persistent_block_returns_platform_remediation() {
    let h = harness(
        direct().then_html(WECHAT_URL, WECHAT_CHALLENGE),
        browser()
            .then_html(WECHAT_URL, WECHAT_CHALLENGE)
            .then_html(WECHAT_URL, WECHAT_CHALLENGE)
            .then_html(WECHAT_URL, WECHAT_CHALLENGE),
        ScriptedModel::new(),
    );

    let err = h.pipeline.ingest(WECHAT_URL).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::VerificationBlocked);
    match &err {
        knowledge_common::IngestError::VerificationBlocked {
            platform,
            signature,
            remediation,
        } => {
            assert_eq!(*platform, Platform::WeChat);
            assert_eq!(signature, "环境异常");
            assert!(remediation.contains("WeChat"));
            assert!(remediation.contains("manually"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.model.calls(), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn missing_page_surfaces_http_error() {
    let h = harness(
        direct().then_fail(BLOG_URL, FetchErrorKind::Http { status: 404 }),
        browser().then_fail(BLOG_URL, FetchErrorKind::Http { status: 404 }),
        ScriptedModel::new(),
    );

    let err = h.pipeline.ingest(BLOG_URL).await.unwrap_err();

    assert!(matches!(
        err,
        knowledge_common::IngestError::Http { status: 404 }
    ));
    assert_eq!(h.browser.calls(), 1);
}

// ---------------------------------------------------------------------------
// Classification and storage failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn short_summary_fails_validation_without_refetching() {
    let reply = r#"{"category":"backend","summary":"Too short.","keywords":"a,b,c"}"#;
    let h = harness(
        direct().then_html(BLOG_URL, ARTICLE),
        browser(),
        ScriptedModel::new().reply(reply),
    );

    let err = h.pipeline.ingest(BLOG_URL).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(h.direct.calls(), 1);
    assert_eq!(h.browser.calls(), 0);
    assert_eq!(h.model.calls(), 1);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn unparseable_reply_is_parse_error() {
    let h = harness(
        direct().then_html(BLOG_URL, ARTICLE),
        browser(),
        ScriptedModel::new().reply("I think this article is about backend work."),
    );

    let err = h.pipeline.ingest(BLOG_URL).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParseError);
}

#[tokio::test]
async fn model_transport_failure_is_model_error() {
    let h = harness(
        direct().then_html(BLOG_URL, ARTICLE),
        browser(),
        ScriptedModel::new().fail(AiError::Api {
            status: 502,
            message: "bad gateway".into(),
        }),
    );

    let err = h.pipeline.ingest(BLOG_URL).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelError);
    assert_eq!(h.model.calls(), 1);
}

#[tokio::test]
async fn storage_failure_is_propagated() {
    let pipeline = Pipeline::builder()
        .fetcher(orchestrator(
            Arc::new(direct().then_html(BLOG_URL, ARTICLE)),
            Arc::new(browser()),
        ))
        .classifier(ClassificationClient::new(
            Arc::new(ScriptedModel::new().reply(valid_reply("backend"))),
            taxonomy(),
        ))
        .store(Arc::new(FailingStore) as Arc<dyn ArticleStore>)
        .build();

    let err = pipeline.ingest(BLOG_URL).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageError);
}

// ---------------------------------------------------------------------------
// Manual submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_submission_skips_fetch_and_is_marked_manual() {
    let h = harness(direct(), browser(), ScriptedModel::new().reply(valid_reply("AI")));

    let record = h
        .pipeline
        .ingest_text(
            "  Scheduling notes ",
            "Copied article text about executors and wakers.",
            Some(WECHAT_URL),
        )
        .await
        .unwrap();

    assert_eq!(record.origin, ArticleOrigin::Manual);
    assert_eq!(record.title, "Scheduling notes");
    assert_eq!(record.source_url.as_deref(), Some(WECHAT_URL));
    assert!(record.final_url.is_none());
    assert_eq!(h.direct.calls(), 0);
    assert_eq!(h.browser.calls(), 0);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn blank_manual_title_falls_back_to_untitled() {
    let h = harness(direct(), browser(), ScriptedModel::new().reply(valid_reply("AI")));

    let record = h
        .pipeline
        .ingest_text("   ", "Some article body text.", None)
        .await
        .unwrap();

    assert_eq!(record.title, UNTITLED);
    assert_eq!(h.store.records()[0].title, UNTITLED);
}

#[tokio::test]
async fn empty_manual_submission_is_rejected() {
    let h = harness(direct(), browser(), ScriptedModel::new());

    let err = h.pipeline.ingest_text("Title", "   \n ", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(h.model.calls(), 0);
}

// ---------------------------------------------------------------------------
// Cancellation and deadlines
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn deadline_tears_down_hanging_render() {
    let hanging = Arc::new(HangingStrategy::new(StrategyTag::Browser));
    let store = Arc::new(InMemoryStore::new());
    let pipeline = Pipeline::builder()
        .fetcher(orchestrator(
            Arc::new(direct().then_fail(BLOG_URL, FetchErrorKind::Timeout)),
            hanging.clone(),
        ))
        .classifier(ClassificationClient::new(
            Arc::new(ScriptedModel::new()),
            taxonomy(),
        ))
        .store(store.clone() as Arc<dyn ArticleStore>)
        .build();

    let err = pipeline
        .ingest_with_deadline(BLOG_URL, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(hanging.calls(), 1);
    assert_eq!(hanging.dropped(), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn cancelled_run_reports_cancelled() {
    let h = harness(
        direct().then_html(BLOG_URL, ARTICLE),
        browser(),
        ScriptedModel::new().reply(valid_reply("backend")),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .pipeline
        .ingest_with_cancel(BLOG_URL, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(h.direct.calls(), 0);
    assert!(h.store.is_empty());
}
