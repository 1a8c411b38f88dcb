//! Integration tests for the validation lifecycle.
//!
//! These drive a session through editor events (open, change, save, close,
//! configuration changes) and check what gets published to the client:
//! 1. Documents are linted against the workspace ruleset
//! 2. Fragment problems are published on the fragment, owned by the root
//! 3. Diagnostics are cleared when they no longer apply

use serde_json::json;
use url::Url;
use vigil::documents::TextDocument;
use vigil::queue::QueueMessage;

mod common;

use common::{RecordingHost, create_session, create_temp_workspace, file_uri, open_document};

#[tokio::test]
async fn test_empty_document_without_ruleset_has_no_diagnostics() {
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));
    let uri = Url::parse("untitled:Untitled-1").unwrap();

    queue
        .handler()
        .did_open(
            &queue,
            TextDocument {
                uri: uri.clone(),
                text: String::new(),
                version: 1,
                language_id: "yaml".to_string(),
            },
        )
        .await;
    queue.wait_idle().await;

    let published = host.published_for(&uri);
    assert_eq!(published.len(), 1, "the root is always published");
    assert!(published[0].diagnostics.is_empty());
    assert!(host.errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_violating_document_gets_one_diagnostic_per_violation() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));

    queue
        .handler()
        .did_open(&queue, open_document(workspace.path(), "violating.yaml", 1))
        .await;
    queue.wait_idle().await;

    let uri = file_uri(workspace.path(), "violating.yaml");
    assert_eq!(host.latest_codes(&uri), vec!["info-title", "info-version"]);

    let latest = host.latest();
    let title = latest[&uri]
        .diagnostics
        .iter()
        .find(|d| d.message == "Info object must have a title.")
        .expect("info-title message uses the rule description");
    assert_eq!(title.source.as_deref(), Some("vigil"));
    assert_eq!(
        *host.watched.lock().unwrap(),
        vec![workspace.path().join(".vigil.yaml")],
        "the ruleset file should be watched"
    );
}

#[tokio::test]
async fn test_negative_glob_skips_validation() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(
        json!({ "validateFiles": ["!violating.yaml"] }),
    ));

    queue
        .handler()
        .did_open(&queue, open_document(workspace.path(), "violating.yaml", 1))
        .await;
    queue.wait_idle().await;

    assert!(host.published.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fragment_problems_are_published_on_the_fragment() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));

    queue
        .handler()
        .did_open(&queue, open_document(workspace.path(), "openapi.yaml", 1))
        .await;
    queue.wait_idle().await;

    let root = file_uri(workspace.path(), "openapi.yaml");
    let info = file_uri(workspace.path(), "info.yaml");
    assert_eq!(host.latest_codes(&info), vec!["info-title", "info-version"]);
    assert!(host.latest_codes(&root).is_empty());
    assert_eq!(queue.handler().find_root(&info), root);
}

#[tokio::test]
async fn test_editing_a_fragment_relints_its_root() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));
    let session = queue.handler().clone();
    let root = file_uri(workspace.path(), "openapi.yaml");
    let info = file_uri(workspace.path(), "info.yaml");

    session
        .did_open(&queue, open_document(workspace.path(), "openapi.yaml", 1))
        .await;
    session
        .did_open(&queue, open_document(workspace.path(), "info.yaml", 1))
        .await;
    queue.wait_idle().await;
    let root_publishes = host.published_for(&root).len();

    // fix the fragment without saving it
    session
        .did_change(
            &queue,
            &info,
            "title: Pet store\nversion: 1.0.0\n".to_string(),
            2,
        )
        .await;
    queue.wait_idle().await;

    assert!(
        host.published_for(&root).len() > root_publishes,
        "the root should be linted again"
    );
    assert!(
        host.latest_codes(&info).is_empty(),
        "unsaved fragment content should be linted: {:?}",
        host.latest_codes(&info)
    );
    assert!(host.latest_codes(&root).is_empty());
}

#[tokio::test]
async fn test_close_clears_diagnostics() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));
    let uri = file_uri(workspace.path(), "violating.yaml");

    queue
        .handler()
        .did_open(&queue, open_document(workspace.path(), "violating.yaml", 1))
        .await;
    queue.wait_idle().await;
    assert_eq!(host.latest_codes(&uri).len(), 2);

    queue.handler().did_close(&queue, &uri).await;
    queue.wait_idle().await;

    assert!(host.latest()[&uri].diagnostics.is_empty());
    assert!(!queue.handler().documents().contains(&uri));
}

#[tokio::test]
async fn test_on_save_mode_ignores_edits() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({ "run": "onSave" })));
    let session = queue.handler().clone();
    let uri = file_uri(workspace.path(), "violating.yaml");

    session
        .did_open(&queue, open_document(workspace.path(), "violating.yaml", 1))
        .await;
    queue.wait_idle().await;
    assert_eq!(host.published_for(&uri).len(), 1, "open always validates");

    let fixed = "openapi: 3.0.0\ninfo:\n  title: Fixed\n  version: 1.0.0\npaths: {}\n";
    session.did_change(&queue, &uri, fixed.to_string(), 2).await;
    queue.wait_idle().await;
    assert_eq!(host.published_for(&uri).len(), 1, "edits do not validate on save mode");

    session.did_save(&queue, &uri).await;
    queue.wait_idle().await;
    assert_eq!(host.published_for(&uri).len(), 2);
    assert!(host.latest_codes(&uri).is_empty());
}

#[tokio::test]
async fn test_configuration_change_revalidates_open_documents() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));
    let uri = file_uri(workspace.path(), "violating.yaml");

    queue
        .handler()
        .did_open(&queue, open_document(workspace.path(), "violating.yaml", 1))
        .await;
    queue.wait_idle().await;
    assert_eq!(host.latest_codes(&uri).len(), 2);

    host.set_settings(json!({ "enable": false }));
    queue.enqueue(QueueMessage::ConfigurationChanged, None);
    queue.wait_idle().await;

    assert!(
        host.latest()[&uri].diagnostics.is_empty(),
        "disabling validation should clear diagnostics"
    );
}

#[tokio::test]
async fn test_stale_validation_is_skipped() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));
    let session = queue.handler().clone();
    let uri = file_uri(workspace.path(), "violating.yaml");

    session
        .did_open(&queue, open_document(workspace.path(), "violating.yaml", 1))
        .await;
    queue.wait_idle().await;
    let before = host.published_for(&uri).len();

    // both validations are queued, but only the latest version is current
    queue.enqueue(QueueMessage::Validate(uri.clone()), Some(1));
    session
        .did_change(&queue, &uri, "openapi: 3.0.0\npaths: {}\n".to_string(), 2)
        .await;
    queue.wait_idle().await;

    assert!(host.published_for(&uri).len() <= before + 1);
    assert!(host.latest_codes(&uri).is_empty());
}

/// A document whose local references fan out to more nodes than the linter
/// will resolve
fn exploding_document() -> String {
    let mut text = "openapi: 3.0.0\ninfo:\n  title: Wide\n  version: 1.0.0\ncomponents:\n".to_string();
    for level in 0..5 {
        let reference = format!("{{$ref: '#/components/l{}'}}", level + 1);
        text.push_str(&format!("  l{level}: [{}]\n", vec![reference; 10].join(", ")));
    }
    text.push_str(&format!("  l5: [{}]\n", vec!["0"; 10].join(", ")));
    text
}

#[tokio::test]
async fn test_lint_failure_is_reported_and_queue_keeps_going() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));
    let session = queue.handler().clone();
    let wide = file_uri(workspace.path(), "wide.yaml");

    session
        .did_open(
            &queue,
            TextDocument {
                uri: wide.clone(),
                text: exploding_document(),
                version: 1,
                language_id: "yaml".to_string(),
            },
        )
        .await;
    session
        .did_open(&queue, open_document(workspace.path(), "violating.yaml", 1))
        .await;
    queue.wait_idle().await;

    let errors = host.errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1, "one failure shown: {errors:?}");
    assert!(errors[0].contains("wide.yaml"), "{}", errors[0]);
    assert!(errors[0].contains("exceeds"), "{}", errors[0]);
    assert!(host.published_for(&wide).is_empty());

    let violating = file_uri(workspace.path(), "violating.yaml");
    assert_eq!(
        host.latest_codes(&violating),
        vec!["info-title", "info-version"],
        "later documents are still validated"
    );
}

#[tokio::test]
async fn test_closing_a_root_clears_its_fragments() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));
    let session = queue.handler().clone();
    let root = file_uri(workspace.path(), "openapi.yaml");
    let info = file_uri(workspace.path(), "info.yaml");

    session
        .did_open(&queue, open_document(workspace.path(), "openapi.yaml", 1))
        .await;
    queue.wait_idle().await;
    assert_eq!(host.latest_codes(&info).len(), 2);

    session.did_close(&queue, &root).await;
    queue.wait_idle().await;

    assert!(host.latest()[&info].diagnostics.is_empty());
    assert_eq!(session.find_root(&info), info);
}

#[tokio::test]
async fn test_open_fragment_is_revalidated_when_its_root_closes() {
    let workspace = create_temp_workspace();
    let (host, queue) = create_session(RecordingHost::with_settings(json!({})));
    let session = queue.handler().clone();
    let root = file_uri(workspace.path(), "openapi.yaml");
    let info = file_uri(workspace.path(), "info.yaml");

    session
        .did_open(&queue, open_document(workspace.path(), "openapi.yaml", 1))
        .await;
    session
        .did_open(&queue, open_document(workspace.path(), "info.yaml", 1))
        .await;
    queue.wait_idle().await;
    assert_eq!(session.find_root(&info), root);
    let before = host.published_for(&info).len();

    session.did_close(&queue, &root).await;
    queue.wait_idle().await;

    // cleared, then linted on its own
    let published = host.published_for(&info);
    assert!(published.len() >= before + 2, "{published:?}");
    assert!(published[before].diagnostics.is_empty());
    assert_eq!(session.find_root(&info), info);
}
