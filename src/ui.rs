//! Page markup.
//!
//! The page is an HTML shell around one widget: a transcript container and a
//! form with one text input and one submit button. `static/widget.js` wires
//! the form to the submit endpoint and applies the widget's view events.

use crate::render::escape_text;
use crate::widget::ChatWidget;

/// Generate the HTML shell for the application.
fn html_shell(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="Streaming chat widget">
    <title>{title}</title>
    <link rel="stylesheet" href="/static/widget.css">
    <script defer src="/static/widget.js"></script>
</head>
<body>
    <main class="chat-app">
        {content}
    </main>
</body>
</html>"#,
        title = escape_text(title),
    )
}

/// Render the chat page for `widget`.
///
/// A disabled widget gets its static notice in place of the transcript and a
/// hidden form whose controls are disabled, so there is nothing to submit.
pub fn chat_page(widget: &ChatWidget, transcript_html: &str) -> String {
    let id = escape_text(widget.id());

    let content = match widget.notice() {
        Some(notice) => format!(
            r#"<div id="chat-container" class="chat-container" data-widget-id="{id}" data-available="false">{notice}</div>
        <form id="chat-form" class="chat-form" hidden>
            <input id="chat-input" name="message" type="text" placeholder="Type your message..." autocomplete="off" disabled>
            <button type="submit" disabled>Send</button>
        </form>"#
        ),
        None => format!(
            r#"<div id="chat-container" class="chat-container" data-widget-id="{id}" data-available="true" aria-live="polite">{transcript_html}</div>
        <form id="chat-form" class="chat-form" method="post" action="/api/widgets/{id}/messages">
            <input id="chat-input" name="message" type="text" placeholder="Type your message..." autocomplete="off" autofocus>
            <button type="submit">Send</button>
        </form>"#
        ),
    };

    html_shell("Chat", &content)
}
