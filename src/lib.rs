//! Streaming Chat Widget
//!
//! A minimal chat widget: it collects user text, forwards it to a hosted
//! conversational-AI API, and streams the reply into the page as rendered
//! markdown.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server; view changes reach the page over SSE
//! - **Chat Session**: streaming send against Gemini or an OpenAI-compatible API
//! - **Widget**: per-page context tying session, transcript and input together
//!
//! # Modules
//!
//! - [`chat`]: chat session trait and backends
//! - [`controller`]: input state machine
//! - [`events`]: view events pushed to the page
//! - [`render`]: markdown and inert-text rendering
//! - [`transcript`]: append-only turn list
//! - [`widget`]: widget context and store

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::unused_async)]

pub mod chat;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod render;
pub mod server;
pub mod transcript;
pub mod ui;
pub mod widget;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::widget::WidgetStore;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live widgets, one per page load.
    pub widgets: WidgetStore,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}
