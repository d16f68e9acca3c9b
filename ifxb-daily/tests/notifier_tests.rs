//! Webhook notifier tests against an in-process endpoint

mod helpers;

use axum::http::StatusCode;
use helpers::WebhookServer;
use ifxb_daily::notify::{AlertMessage, Notifier, NotifyError, WebhookNotifier};
use ifxb_daily::pipeline::StageFailure;
use ifxb_daily::{BackupError, Stage};
use serde_json::json;
use std::time::Duration;

fn download_failure() -> AlertMessage {
    let failure = StageFailure::new(
        Stage::Download,
        BackupError::Transfer("connection reset by peer".to_string()),
    );
    AlertMessage::failure("InfluxDB daily backup failed", "2025-09-04 01:12:44", &failure)
}

fn notifier(url: &str) -> WebhookNotifier {
    WebhookNotifier::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_payload_is_posted_as_text_message() {
    let server = WebhookServer::start(StatusCode::OK, json!({"errcode": 0, "errmsg": "ok"})).await;
    let message = download_failure();

    notifier(&server.url).send(&message).await.unwrap();

    let received = server.received();
    assert_eq!(received.len(), 1);
    assert_eq!(
        received[0],
        json!({
            "msgtype": "text",
            "text": { "content": message.content() }
        })
    );
    let content = received[0]["text"]["content"].as_str().unwrap();
    assert!(content.contains("\nTime: 2025-09-04 01:12:44\n"));
    assert!(content.contains("\nStage: DOWNLOAD\n"));
    assert!(content.ends_with("Error: Transfer error: connection reset by peer"));
}

#[tokio::test]
async fn test_nonzero_errcode_is_rejected() {
    let server = WebhookServer::start(
        StatusCode::OK,
        json!({"errcode": 93000, "errmsg": "invalid webhook url"}),
    )
    .await;

    let err = notifier(&server.url).send(&download_failure()).await.unwrap_err();

    match err {
        NotifyError::Rejected { errcode, body } => {
            assert_eq!(errcode, Some(93000));
            assert!(body.contains("invalid webhook url"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_errcode_is_rejected() {
    let server = WebhookServer::start(StatusCode::OK, json!({"errmsg": "ok"})).await;

    let err = notifier(&server.url).send(&download_failure()).await.unwrap_err();
    assert!(matches!(err, NotifyError::Rejected { errcode: None, .. }));
}

#[tokio::test]
async fn test_http_error_status_is_reported() {
    let server = WebhookServer::start(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"errcode": 0}),
    )
    .await;

    let err = notifier(&server.url).send(&download_failure()).await.unwrap_err();
    assert!(matches!(err, NotifyError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    // Bind and drop to get a port with nothing listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = notifier(&format!("http://{}/cgi-bin/webhook/send", addr))
        .send(&download_failure())
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::Http(_)));
}
