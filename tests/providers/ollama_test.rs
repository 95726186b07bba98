//! Ollama provider tests, exercised against a local mock server.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use zulu::providers::ollama::OllamaProvider;
use zulu::providers::{Message, ModelProvider};

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
        "message": {"role": "assistant", "content": "Hello!"},
        "model": "qwen3:8b",
    })
    .to_string();
    let base_url = serve_once(&body).await;

    let provider = OllamaProvider::new(Some(base_url));
    let messages = vec![Message::user("hi")];
    let text = provider
        .complete(&messages, "qwen3:8b", None, 0.0, 64)
        .await
        .expect("completion should succeed");
    assert_eq!(text, "Hello!");
}

#[tokio::test]
async fn complete_json_recovers_a_bare_object() {
    let body = serde_json::json!({
        "message": {"role": "assistant", "content": "sure: {\"query\": \"rust\"}"},
        "model": "qwen3:8b",
    })
    .to_string();
    let base_url = serve_once(&body).await;

    let provider = OllamaProvider::new(Some(base_url));
    let messages = vec![Message::user("search")];
    let result = provider
        .complete_json(&messages, "qwen3:8b", None, None, 0.0, 64)
        .await
        .expect("completion should succeed");
    assert_eq!(result.get("query").and_then(|v| v.as_str()), Some("rust"));
}

#[test]
fn provider_name_is_ollama() {
    let provider = OllamaProvider::new(None);
    assert_eq!(provider.name(), "ollama");
}
