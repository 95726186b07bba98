//! OpenAI-compatible provider tests, exercised against a local mock server.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use zulu::providers::openai::OpenAiProvider;
use zulu::providers::{Message, ModelProvider};

/// Spin up a one-shot HTTP server that replies with `body` to the next
/// request it receives, and return the base URL to hit it at.
async fn serve_once(body: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener should expose local addr");

    let body_owned = body.to_owned();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut read_buf = [0_u8; 4096];
            let _ = socket.read(&mut read_buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body_owned}",
                body_owned.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn complete_extracts_assistant_text() {
    let body = serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": "Hello world"}}],
    })
    .to_string();
    let base_url = serve_once(&body).await;

    let provider = OpenAiProvider::new("test-key".to_owned(), Some(base_url));
    let messages = vec![Message::user("hi")];
    let text = provider
        .complete(&messages, "gpt-5", None, 0.0, 64)
        .await
        .expect("completion should succeed");
    assert_eq!(text, "Hello world");
}

#[tokio::test]
async fn complete_json_recovers_a_fenced_object() {
    let body = serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": "```json\n{\"city\": \"Paris\"}\n```"}}],
    })
    .to_string();
    let base_url = serve_once(&body).await;

    let provider = OpenAiProvider::new("test-key".to_owned(), Some(base_url));
    let messages = vec![Message::user("where")];
    let result = provider
        .complete_json(&messages, "gpt-5", None, None, 0.0, 64)
        .await
        .expect("completion should succeed");
    assert_eq!(result.get("city").and_then(|v| v.as_str()), Some("Paris"));
}

#[tokio::test]
async fn complete_surfaces_non_success_status_as_provider_error() {
    let base_url = serve_http_status(500, "internal error").await;
    let provider = OpenAiProvider::new("test-key".to_owned(), Some(base_url));
    let messages = vec![Message::user("hi")];
    let err = provider
        .complete(&messages, "gpt-5", None, 0.0, 64)
        .await
        .expect_err("should fail on non-success status");
    assert!(matches!(err, zulu::providers::ProviderError::HttpStatus { status: 500, .. }));
}

async fn serve_http_status(status: u16, body: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener should expose local addr");

    let body_owned = body.to_owned();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut read_buf = [0_u8; 4096];
            let _ = socket.read(&mut read_buf).await;
            let response = format!(
                "HTTP/1.1 {status} Error\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body_owned}",
                body_owned.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });

    format!("http://{addr}")
}

#[test]
fn provider_name_is_openai() {
    let provider = OpenAiProvider::new("test-key".to_owned(), None);
    assert_eq!(provider.name(), "openai");
}
