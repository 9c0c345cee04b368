//! Message rendering.
//!
//! Model replies are markdown and are rendered to HTML with `pulldown-cmark`
//! using the GitHub-flavoured extensions (tables, strikethrough, task lists).
//! User-authored text is never interpreted as markup: it goes through
//! [`escape_text`] and is displayed inert.
//!
//! Rendering is pure. During streaming the whole accumulated reply is
//! re-rendered on every fragment, so a construct split across fragments
//! (an unterminated code fence, half a table) is always rendered from the
//! complete text seen so far.

use pulldown_cmark::{Event, Options, Parser, html};

/// Markup shown in a model turn until its first fragment arrives.
pub const LOADING_PLACEHOLDER: &str =
    r#"<div class="loading"><span></span><span></span><span></span></div>"#;

/// Render markdown text to HTML.
#[must_use]
pub fn render_markdown(markdown: &str) -> String {
    let options =
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    let parser = Parser::new_ext(markdown, options);
    let mut html_output = String::with_capacity(markdown.len() + markdown.len() / 2);
    html::push_html(&mut html_output, parser);
    html_output
}

/// Escape plain text so it displays literally inside HTML.
#[must_use]
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    html::push_html(&mut out, std::iter::once(Event::Text(text.into())));
    out
}

/// Inline error block written into a model turn when its stream faults.
#[must_use]
pub fn error_block(description: &str) -> String {
    format!(
        r#"<p class="error">Sorry, something went wrong: {}</p>"#,
        escape_text(description)
    )
}

/// Static notice shown in place of the transcript when no API key is configured.
#[must_use]
pub fn unavailable_notice(variable: &str) -> String {
    format!(
        r#"<p class="error"><strong>Error:</strong> API key not found. Please set the {} environment variable.</p>"#,
        escape_text(variable)
    )
}
