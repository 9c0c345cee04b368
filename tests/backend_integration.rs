use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::post,
};
use chat_widget::chat::{
    Backend, ChatCompletionsSession, ChatSession, ChatSettings, FragmentStream, GeminiSession,
};
use chat_widget::error::ChatError;
use futures::StreamExt;
use serde_json::{Value, json};

/// What the fake upstream saw, and what it answers with.
#[derive(Clone)]
struct Upstream {
    requests: Arc<Mutex<Vec<(String, HeaderMap, Value)>>>,
    status: StatusCode,
    body: Arc<String>,
}

impl Upstream {
    fn sse(frames: &[&str]) -> Self {
        let body = frames
            .iter()
            .map(|data| format!("data: {data}\r\n\r\n"))
            .collect::<String>();
        Self::new(StatusCode::OK, body)
    }

    fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            status,
            body: Arc::new(body.into()),
        }
    }

    fn requests(&self) -> Vec<(String, HeaderMap, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn upstream_handler(
    State(upstream): State<Upstream>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    upstream
        .requests
        .lock()
        .unwrap()
        .push((uri.to_string(), headers, body));

    let content_type = if upstream.status.is_success() {
        "text/event-stream"
    } else {
        "application/json"
    };
    (
        upstream.status,
        [(header::CONTENT_TYPE, content_type)],
        upstream.body.as_str().to_owned(),
    )
        .into_response()
}

/// Serve `upstream` on an ephemeral port and return its base URL.
async fn serve(upstream: Upstream) -> String {
    let app = Router::new()
        .route("/v1beta/models/{*rest}", post(upstream_handler))
        .route("/v1/chat/completions", post(upstream_handler))
        .with_state(upstream);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn settings(backend: Backend, base_url: String) -> ChatSettings {
    ChatSettings {
        backend,
        base_url,
        api_key: Some("test-key".to_string()),
        model: "test-model".to_string(),
        system_instruction: None,
    }
}

/// Drain a reply, returning the fragments and the fault that ended it, if any.
async fn drain(mut stream: FragmentStream) -> (Vec<String>, Option<ChatError>) {
    let mut fragments = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => fragments.push(fragment),
            Err(e) => return (fragments, Some(e)),
        }
    }
    (fragments, None)
}

async fn open(session: &dyn ChatSession, message: &str) -> FragmentStream {
    match session.send_message_stream(message).await {
        Ok(stream) => stream,
        Err(e) => panic!("stream did not open: {e}"),
    }
}

fn gemini_chunk(text: &str) -> String {
    json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }] })
        .to_string()
}

fn completion_chunk(text: &str) -> String {
    json!({ "choices": [{ "index": 0, "delta": { "content": text } }] }).to_string()
}

#[tokio::test]
async fn test_gemini_streams_fragments_and_carries_history() {
    let (hel, lo) = (gemini_chunk("Hel"), gemini_chunk("lo"));
    let upstream = Upstream::sse(&[hel.as_str(), lo.as_str()]);
    let base = serve(upstream.clone()).await;
    let session = GeminiSession::new(reqwest::Client::new(), settings(Backend::Gemini, base));

    let (fragments, fault) = drain(open(&session, "hi").await).await;
    assert!(fault.is_none());
    assert_eq!(fragments, ["Hel", "lo"]);
    assert_eq!(session.history().len().await, 1);

    let (_, fault) = drain(open(&session, "again").await).await;
    assert!(fault.is_none());

    let requests = upstream.requests();
    assert_eq!(requests.len(), 2);

    let (uri, headers, first) = &requests[0];
    assert_eq!(
        uri,
        "/v1beta/models/test-model:streamGenerateContent?alt=sse"
    );
    assert_eq!(headers["x-goog-api-key"], "test-key");
    assert_eq!(first["contents"].as_array().unwrap().len(), 1);

    let contents = requests[1].2["contents"].as_array().unwrap();
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[0]["parts"][0]["text"], "hi");
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[1]["parts"][0]["text"], "Hello");
    assert_eq!(contents[2]["parts"][0]["text"], "again");
}

#[tokio::test]
async fn test_gemini_error_status_is_api_error() {
    let upstream = Upstream::new(
        StatusCode::BAD_REQUEST,
        json!({ "error": { "code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT" } })
            .to_string(),
    );
    let base = serve(upstream).await;
    let session = GeminiSession::new(reqwest::Client::new(), settings(Backend::Gemini, base));

    match session.send_message_stream("hi").await {
        Err(ChatError::Api { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "API key not valid.");
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("stream opened despite error status"),
    }
    assert!(session.history().is_empty().await);
}

#[tokio::test]
async fn test_chat_completions_stops_at_done() {
    let (hi, there, late) = (
        completion_chunk("Hi"),
        completion_chunk(" there"),
        completion_chunk("ignored"),
    );
    let upstream = Upstream::sse(&[hi.as_str(), there.as_str(), "[DONE]", late.as_str()]);
    let base = serve(upstream.clone()).await;
    let session =
        ChatCompletionsSession::new(reqwest::Client::new(), settings(Backend::Chat, base));

    let (fragments, fault) = drain(open(&session, "hello").await).await;
    assert!(fault.is_none());
    assert_eq!(fragments, ["Hi", " there"]);

    let history = session.history().snapshot().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].model, "Hi there");

    let requests = upstream.requests();
    let (_, headers, body) = &requests[0];
    assert_eq!(headers[header::AUTHORIZATION], "Bearer test-key");
    assert_eq!(body["stream"], true);
    assert_eq!(body["model"], "test-model");
}

#[tokio::test]
async fn test_chat_completions_error_payload_ends_stream() {
    let part = completion_chunk("partial");
    let error = json!({ "error": { "code": 503, "message": "The model is overloaded." } }).to_string();
    let upstream = Upstream::sse(&[part.as_str(), error.as_str(), "[DONE]"]);
    let base = serve(upstream).await;
    let session =
        ChatCompletionsSession::new(reqwest::Client::new(), settings(Backend::Chat, base));

    let (fragments, fault) = drain(open(&session, "hello").await).await;
    assert_eq!(fragments, ["partial"]);
    match fault {
        Some(ChatError::Api { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "The model is overloaded.");
        }
        other => panic!("unexpected fault {other:?}"),
    }
    assert!(session.history().is_empty().await);
}
