//! HTTP surface: page, submit endpoint, SSE view events and static assets.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Form, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::chat::{ChatClient, SessionFactory};
use crate::config::{API_KEY_VAR, AppConfig};
use crate::events::{ViewEvent, sse_event};
use crate::render::unavailable_notice;
use crate::ui::chat_page;
use crate::widget::{ChatWidget, SubmitOutcome, WidgetStore};

/// How often idle widgets are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Build the widget store from configuration.
///
/// A missing API key is not fatal to the process: the store hands out
/// disabled widgets that only show the static notice.
pub fn build_store(config: &AppConfig) -> WidgetStore {
    match config.chat_settings() {
        Ok(settings) => {
            info!(
                name: "chat.config.loaded",
                backend = ?settings.backend,
                base_url = %settings.base_url,
                model = %settings.model,
                "Chat configuration loaded"
            );
            let factory: Arc<dyn SessionFactory> = Arc::new(ChatClient::new(settings));
            WidgetStore::new(factory)
        }
        Err(e) => {
            tracing::warn!(
                name: "chat.config.missing_key",
                variable = e.variable,
                "{e} The chat form is disabled."
            );
            WidgetStore::unavailable(unavailable_notice(API_KEY_VAR))
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let static_dir = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/widgets/{id}/messages", post(api_submit))
        .route("/api/widgets/{id}/events", get(api_events))
        .route("/api/widgets/{id}/transcript", get(api_transcript))
        .nest_service("/static", static_dir)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let widgets = build_store(&config);

    let sweeper = widgets.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = sweeper.cleanup_expired();
            if removed > 0 {
                tracing::debug!(removed, remaining = sweeper.len(), "Expired widgets removed");
            }
        }
    });

    let state = AppState {
        widgets,
        config: Arc::clone(&config),
    };
    let app = router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %format!("http://{addr}"),
        "Server started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET / - Create a widget and render its page.
async fn index_handler(State(state): State<AppState>) -> impl IntoResponse {
    let widget = state.widgets.create();
    tracing::debug!(
        widget_id = %widget.id(),
        available = state.widgets.is_available(),
        "Widget created"
    );
    Html(chat_page(&widget, ""))
}

/// GET /health - Liveness probe.
async fn health_handler() -> &'static str {
    "ok"
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Form body of a submission.
#[derive(Debug, Deserialize)]
struct SubmitForm {
    /// Text typed into the input.
    #[serde(default)]
    message: String,
}

/// POST /api/widgets/{id}/messages - Submit the form.
async fn api_submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Form(form): Form<SubmitForm>,
) -> StatusCode {
    let Some(widget) = state.widgets.get(&id) else {
        tracing::warn!(widget_id = %id, "Submit for unknown widget");
        return StatusCode::NOT_FOUND;
    };

    match widget.submit(&form.message).await {
        SubmitOutcome::Accepted(_turn) => {
            tracing::info!(
                widget_id = %id,
                message_length = form.message.trim().len(),
                "Submission accepted"
            );
            StatusCode::ACCEPTED
        }
        SubmitOutcome::Ignored => StatusCode::NO_CONTENT,
        SubmitOutcome::Busy => StatusCode::CONFLICT,
        SubmitOutcome::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /api/widgets/{id}/events - SSE stream of view events.
async fn api_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(widget) = state.widgets.get(&id) else {
        return (StatusCode::NOT_FOUND, "Widget not found").into_response();
    };

    tracing::info!(widget_id = %id, "Starting SSE stream");

    // Subscribe before the snapshot is taken so nothing falls between them.
    let events = widget.subscribe();
    let body = axum::body::Body::from_stream(widget_event_stream(widget, events));
    build_sse_response(body)
}

/// SSE frames for one subscriber: a snapshot, then every event in order.
///
/// A subscriber that falls behind the channel gets a fresh snapshot in place
/// of the events it missed.
pub fn widget_event_stream(
    widget: Arc<ChatWidget>,
    events: broadcast::Receiver<ViewEvent>,
) -> impl Stream<Item = Result<String, Infallible>> + Send {
    async_stream::stream! {
        let mut events = BroadcastStream::new(events);
        yield Ok::<String, Infallible>(sse_event(&widget.snapshot().await));

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => yield Ok(sse_event(&event)),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(widget_id = %widget.id(), skipped, "SSE subscriber lagged, resending snapshot");
                    yield Ok(sse_event(&widget.snapshot().await));
                }
            }
        }
    }
}

/// GET /api/widgets/{id}/transcript - Transcript HTML fragment.
async fn api_transcript(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, StatusCode> {
    match state.widgets.get(&id) {
        Some(widget) => Ok(Html(widget.transcript_html().await)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_sse_response(body: axum::body::Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("text/event-stream"),
    );
    h.insert(
        axum::http::header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("no-cache"),
    );
    h.insert(
        "X-Accel-Buffering",
        axum::http::HeaderValue::from_static("no"),
    );
    resp
}
