//! Markdown to sanitized HTML, plus plain-text extraction for search.

use ammonia::Builder as AmmoniaBuilder;
use comrak::nodes::{AstNode, NodeValue};
use comrak::options::Options;
use comrak::{Arena, format_html, parse_document};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to render markdown: {message}")]
    Markdown { message: String },
}

/// Comrak renderer with an ammonia sanitizer tuned for post bodies.
pub struct MarkdownRenderer {
    options: Options<'static>,
    sanitizer: AmmoniaBuilder<'static>,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        Self {
            options: default_options(),
            sanitizer: build_sanitizer(),
        }
    }

    pub fn render_html(&self, markdown: &str) -> Result<String, RenderError> {
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &self.options);
        let mut html = String::new();
        format_html(root, &self.options, &mut html).map_err(|err| RenderError::Markdown {
            message: err.to_string(),
        })?;
        Ok(self.sanitizer.clean(&html).to_string())
    }

    /// Visible text of the document with block boundaries collapsed to spaces.
    pub fn plain_text(&self, markdown: &str) -> String {
        let arena = Arena::new();
        let root = parse_document(&arena, markdown, &self.options);
        let mut text = String::new();
        collect_text(root, &mut text);
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn collect_text<'a>(node: &'a AstNode<'a>, buffer: &mut String) {
    {
        let data = node.data.borrow();
        match &data.value {
            NodeValue::Text(text) => buffer.push_str(text),
            NodeValue::Code(code) => buffer.push_str(&code.literal),
            NodeValue::CodeBlock(block) => {
                buffer.push(' ');
                buffer.push_str(&block.literal);
            }
            NodeValue::LineBreak | NodeValue::SoftBreak => buffer.push(' '),
            NodeValue::Paragraph | NodeValue::Heading(_) | NodeValue::Item(_) => buffer.push(' '),
            _ => {}
        }
    }
    let mut child = node.first_child();
    while let Some(next) = child {
        collect_text(next, buffer);
        child = next.next_sibling();
    }
}

fn default_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.footnotes = true;
    ext.math_dollars = true;
    ext.front_matter_delimiter = Some("---".to_string());

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.tasklist_classes = true;
    render.r#unsafe = true;
    render.figure_with_caption = true;

    options
}

fn build_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    builder.add_tags(&["details", "summary", "figure", "figcaption", "input", "section"]);
    builder.add_generic_attributes(&["class", "id", "data-math-style", "data-footnotes"]);
    builder.add_tag_attributes("a", &["target"]);
    builder.add_tag_attributes(
        "img",
        &["title", "width", "height", "alt", "loading", "decoding"],
    );
    builder.add_tag_attributes("code", &["class", "data-language", "data-math-style"]);
    builder.add_tag_attributes("pre", &["class", "lang"]);
    builder.add_tag_attributes("input", &["type", "checked", "disabled"]);
    builder.add_tag_attributes("details", &["open"]);
    builder.add_url_schemes(["http", "https", "mailto", "tel"].iter().copied());

    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_gfm_and_strips_script() {
        let renderer = MarkdownRenderer::new();
        let html = renderer
            .render_html("# Title\n\n- [x] done\n\n~~gone~~\n\n<script>alert(1)</script>")
            .expect("render");
        assert!(html.contains("<h1"));
        assert!(html.contains("<del>gone</del>"));
        assert!(html.contains("checkbox"));
        assert!(!html.contains("<script"));
    }

    #[test]
    fn keeps_details_from_toggles() {
        let html = MarkdownRenderer::new()
            .render_html("<details>\n<summary>More</summary>\n\nHidden\n\n</details>")
            .expect("render");
        assert!(html.contains("<details>"));
        assert!(html.contains("<summary>More</summary>"));
    }

    #[test]
    fn plain_text_drops_markup() {
        let text = MarkdownRenderer::new()
            .plain_text("## Async *Rust*\n\nUse `tokio` for [runtimes](https://tokio.rs).");
        assert_eq!(text, "Async Rust Use tokio for runtimes.");
    }
}
