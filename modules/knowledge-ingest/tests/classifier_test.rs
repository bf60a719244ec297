//! ClassificationClient against a scripted model.

use std::sync::Arc;

use ai_client::AiError;
use knowledge_common::{ClassificationWarning, ErrorKind};
use knowledge_ingest::classifier::{truncate_body, BODY_BUDGET};
use knowledge_ingest::testing::{valid_reply, ScriptedModel};
use knowledge_ingest::ClassificationClient;

fn client(model: Arc<ScriptedModel>) -> ClassificationClient {
    ClassificationClient::new(
        model,
        vec!["frontend".into(), "backend".into(), "AI".into()],
    )
}

#[tokio::test]
async fn fenced_and_bare_replies_classify_identically() {
    let bare = Arc::new(ScriptedModel::new().reply(valid_reply("backend")));
    let fenced = Arc::new(
        ScriptedModel::new().reply(format!("```json\n{}\n```", valid_reply("backend"))),
    );

    let a = client(bare).classify("Body.", "Title").await.unwrap();
    let b = client(fenced).classify("Body.", "Title").await.unwrap();

    assert_eq!(a, b);
}

#[tokio::test]
async fn long_bodies_are_cut_before_prompting() {
    let model = Arc::new(ScriptedModel::new().reply(valid_reply("AI")));
    let sentence = "Wakers tell the executor a future can make progress. ";
    let body = sentence.repeat(400);

    client(model.clone()).classify(&body, "Wakers").await.unwrap();

    let prompt = &model.prompts()[0];
    let kept = truncate_body(&body, BODY_BUDGET);
    assert!(kept.chars().count() <= BODY_BUDGET);
    assert!(kept.ends_with('.'));
    assert!(prompt.contains(kept));
    assert!(!prompt.contains(&body));
}

#[tokio::test]
async fn repairs_are_reported_as_warnings() {
    let reply = serde_json::json!({
        "category": "cooking",
        "summary": "x".repeat(180),
        "keywords": ["rust", "tokio"],
    })
    .to_string();
    let model = Arc::new(ScriptedModel::new().reply(reply));

    let result = client(model).classify("Body.", "Title").await.unwrap();

    assert_eq!(result.category, "other");
    assert_eq!(result.summary.chars().count(), 150);
    assert_eq!(
        result.warnings,
        vec![
            ClassificationWarning::CategoryCoerced {
                original: "cooking".into()
            },
            ClassificationWarning::SummaryTruncated { original_chars: 180 },
            ClassificationWarning::KeywordCount { count: 2 },
        ]
    );
}

#[tokio::test]
async fn error_kinds_follow_the_failing_step() {
    let cases = [
        (
            ScriptedModel::new().fail(AiError::Timeout(30)),
            ErrorKind::ModelError,
        ),
        (ScriptedModel::new().reply("not json"), ErrorKind::ParseError),
        (
            ScriptedModel::new().reply(r#"{"category":"AI","summary":"short","keywords":"a,b,c"}"#),
            ErrorKind::ValidationError,
        ),
        (
            ScriptedModel::new()
                .reply(format!(r#"{{"category":"AI","summary":"{}"}}"#, "s".repeat(80))),
            ErrorKind::ValidationError,
        ),
    ];

    for (model, expected) in cases {
        let err = client(Arc::new(model))
            .classify("Body.", "Title")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), expected, "{err}");
    }
}
