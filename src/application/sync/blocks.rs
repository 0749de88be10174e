//! Notion block trees to markdown.
//!
//! Fetching ([`fetch_tree`]) and rendering ([`render_blocks`]) are separate so the
//! conversion can be tested on plain data.

use std::collections::HashMap;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::infra::notion::NotionError;
use crate::infra::notion::types::{Block, BlockKind, Icon, RichText, plain_text};

use super::source::ContentSource;

/// Nesting deeper than this is flattened away.
const MAX_DEPTH: usize = 6;

#[derive(Debug, Clone)]
pub struct BlockNode {
    pub block: Block,
    pub children: Vec<BlockNode>,
}

/// Fetch the children of `parent_id`, recursing into blocks that have children.
pub fn fetch_tree<'a>(
    source: &'a dyn ContentSource,
    parent_id: &'a str,
) -> BoxFuture<'a, Result<Vec<BlockNode>, NotionError>> {
    fetch_level(source, parent_id, 0)
}

fn fetch_level<'a>(
    source: &'a dyn ContentSource,
    parent_id: &'a str,
    depth: usize,
) -> BoxFuture<'a, Result<Vec<BlockNode>, NotionError>> {
    async move {
        let blocks = source.block_children(parent_id).await?;
        let mut nodes = Vec::with_capacity(blocks.len());
        for block in blocks {
            let children = if block.has_children && depth + 1 < MAX_DEPTH {
                fetch_level(source, &block.id, depth + 1).await?
            } else {
                Vec::new()
            };
            nodes.push(BlockNode { block, children });
        }
        Ok(nodes)
    }
    .boxed()
}

/// Every image URL referenced by the tree, in document order.
pub fn image_urls(nodes: &[BlockNode]) -> Vec<String> {
    let mut urls = Vec::new();
    collect_image_urls(nodes, &mut urls);
    urls
}

fn collect_image_urls(nodes: &[BlockNode], urls: &mut Vec<String>) {
    for node in nodes {
        if let BlockKind::Image { image } = &node.block.kind {
            urls.push(image.file.url().to_string());
        }
        collect_image_urls(&node.children, urls);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    Bulleted,
    Numbered,
    Other,
}

/// Render a block tree to markdown. `images` maps source URLs to local paths.
pub fn render_blocks(nodes: &[BlockNode], images: &HashMap<String, String>) -> String {
    let mut out = String::new();
    let mut previous: Option<ChunkKind> = None;
    let mut number = 0usize;

    for node in nodes {
        let kind = match node.block.kind {
            BlockKind::BulletedListItem { .. } | BlockKind::ToDo { .. } => ChunkKind::Bulleted,
            BlockKind::NumberedListItem { .. } => ChunkKind::Numbered,
            _ => ChunkKind::Other,
        };
        number = if kind == ChunkKind::Numbered && previous == Some(ChunkKind::Numbered) {
            number + 1
        } else {
            1
        };

        let Some(chunk) = render_block(node, images, number) else {
            continue;
        };

        if let Some(prev) = previous {
            let tight = prev == kind && kind != ChunkKind::Other;
            out.push_str(if tight { "\n" } else { "\n\n" });
        }
        out.push_str(&chunk);
        previous = Some(kind);
    }
    out
}

fn render_block(node: &BlockNode, images: &HashMap<String, String>, number: usize) -> Option<String> {
    let children = || render_blocks(&node.children, images);

    let chunk = match &node.block.kind {
        BlockKind::Paragraph { paragraph } => {
            let text = rich_text_to_markdown(&paragraph.rich_text);
            let nested = children();
            match (text.is_empty(), nested.is_empty()) {
                (true, true) => return None,
                (_, true) => text,
                (true, false) => nested,
                (false, false) => format!("{text}\n\n{}", indent(&nested, "  ")),
            }
        }
        BlockKind::Heading1 { heading_1 } => heading(1, &heading_1.rich_text)?,
        BlockKind::Heading2 { heading_2 } => heading(2, &heading_2.rich_text)?,
        BlockKind::Heading3 { heading_3 } => heading(3, &heading_3.rich_text)?,
        BlockKind::BulletedListItem { bulleted_list_item } => {
            list_item("- ", &bulleted_list_item.rich_text, &children())
        }
        BlockKind::NumberedListItem { numbered_list_item } => {
            list_item(&format!("{number}. "), &numbered_list_item.rich_text, &children())
        }
        BlockKind::ToDo { to_do } => {
            let marker = if to_do.checked { "- [x] " } else { "- [ ] " };
            list_item(marker, &to_do.rich_text, &children())
        }
        BlockKind::Quote { quote } => {
            quoted(&join_paragraphs(rich_text_to_markdown(&quote.rich_text), children()))
        }
        BlockKind::Callout { callout } => {
            let mut text = rich_text_to_markdown(&callout.rich_text);
            if let Some(Icon::Emoji { emoji }) = &callout.icon {
                text = format!("{emoji} {text}");
            }
            quoted(&join_paragraphs(text, children()))
        }
        BlockKind::Toggle { toggle } => {
            let summary = rich_text_to_markdown(&toggle.rich_text);
            let body = children();
            if body.is_empty() {
                format!("<details>\n<summary>{summary}</summary>\n</details>")
            } else {
                format!("<details>\n<summary>{summary}</summary>\n\n{body}\n\n</details>")
            }
        }
        BlockKind::Code { code } => {
            let language = code_language(code.language.as_deref());
            let source = plain_text(&code.rich_text);
            let fence = fence_for(&source);
            format!("{fence}{language}\n{}\n{fence}", source.trim_end_matches('\n'))
        }
        BlockKind::Equation { equation } => {
            format!("$$\n{}\n$$", equation.expression.trim())
        }
        BlockKind::Divider => "---".to_string(),
        BlockKind::Bookmark { bookmark: link }
        | BlockKind::Embed { embed: link }
        | BlockKind::LinkPreview { link_preview: link } => {
            let caption = rich_text_to_markdown(&link.caption);
            let label = if caption.is_empty() { link.url.as_str() } else { caption.as_str() };
            format!("[{label}]({})", link.url)
        }
        BlockKind::Image { image } => {
            let source = image.file.url();
            let src = images.get(source).map(String::as_str).unwrap_or(source);
            let alt = plain_text(&image.caption).replace(['[', ']'], "");
            format!("![{}]({src})", alt.trim())
        }
        BlockKind::ColumnList | BlockKind::Column | BlockKind::SyncedBlock => {
            let nested = children();
            if nested.is_empty() {
                return None;
            }
            nested
        }
        BlockKind::Unsupported => return None,
    };
    Some(chunk)
}

fn heading(level: usize, text: &[RichText]) -> Option<String> {
    let text = rich_text_to_markdown(text);
    if text.is_empty() {
        None
    } else {
        Some(format!("{} {text}", "#".repeat(level)))
    }
}

fn list_item(marker: &str, text: &[RichText], children: &str) -> String {
    let mut item = format!("{marker}{}", rich_text_to_markdown(text));
    if !children.is_empty() {
        item.push('\n');
        item.push_str(&indent(children, &" ".repeat(marker.len().min(4))));
    }
    item
}

fn join_paragraphs(text: String, children: String) -> String {
    match (text.is_empty(), children.is_empty()) {
        (_, true) => text,
        (true, false) => children,
        (false, false) => format!("{text}\n\n{children}"),
    }
}

fn quoted(text: &str) -> String {
    text.lines()
        .map(|line| if line.is_empty() { ">".to_string() } else { format!("> {line}") })
        .collect::<Vec<_>>()
        .join("\n")
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| if line.is_empty() { String::new() } else { format!("{prefix}{line}") })
        .collect::<Vec<_>>()
        .join("\n")
}

fn code_language(language: Option<&str>) -> String {
    match language.map(|lang| lang.trim().to_ascii_lowercase()) {
        None => String::new(),
        Some(lang) if lang.is_empty() || lang == "plain text" => "text".to_string(),
        Some(lang) => lang.replace(' ', "-"),
    }
}

/// A backtick fence longer than any backtick run inside the code.
fn fence_for(source: &str) -> String {
    let mut longest = 0;
    let mut current = 0;
    for ch in source.chars() {
        if ch == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

/// Inline rich text with annotations mapped to markdown emphasis.
pub fn rich_text_to_markdown(parts: &[RichText]) -> String {
    let mut out = String::new();
    for part in parts {
        let text = part.plain_text.as_str();
        if text.is_empty() {
            continue;
        }
        if part.is_equation() {
            out.push('$');
            out.push_str(text.trim());
            out.push('$');
            continue;
        }

        // Emphasis markers must hug non-whitespace, so padding moves outside.
        let leading = &text[..text.len() - text.trim_start().len()];
        let trailing = &text[text.trim_end().len()..];
        let core = text.trim();
        if core.is_empty() {
            out.push_str(text);
            continue;
        }

        let annotations = &part.annotations;
        let mut styled = if annotations.code {
            format!("`{core}`")
        } else {
            core.to_string()
        };
        if annotations.strikethrough {
            styled = format!("~~{styled}~~");
        }
        if annotations.italic {
            styled = format!("_{styled}_");
        }
        if annotations.bold {
            styled = format!("**{styled}**");
        }
        if let Some(href) = &part.href {
            styled = format!("[{styled}]({href})");
        }

        out.push_str(leading);
        out.push_str(&styled);
        out.push_str(trailing);
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn text(content: &str) -> Value {
        json!({"type": "text", "plain_text": content})
    }

    fn node(id: &str, kind: &str, body: Value, children: Vec<BlockNode>) -> BlockNode {
        let mut raw = json!({"id": id, "has_children": !children.is_empty(), "type": kind});
        raw[kind] = body;
        BlockNode {
            block: serde_json::from_value(raw).expect("block"),
            children,
        }
    }

    fn rich(parts: Vec<Value>) -> Vec<RichText> {
        serde_json::from_value(Value::Array(parts)).expect("rich text")
    }

    #[test]
    fn annotations_map_to_markdown() {
        let parts = rich(vec![
            text("Use "),
            json!({"type": "text", "plain_text": "tokio ", "annotations": {"bold": true}}),
            json!({"type": "text", "plain_text": "spawn", "annotations": {"code": true}}),
            text(" and "),
            json!({"type": "text", "plain_text": "docs", "href": "https://docs.rs"}),
            text(", "),
            json!({"type": "equation", "plain_text": "x^2"}),
        ]);
        assert_eq!(
            rich_text_to_markdown(&parts),
            "Use **tokio** `spawn` and [docs](https://docs.rs), $x^2$"
        );
    }

    #[test]
    fn document_renders_to_markdown() {
        let nodes = vec![
            node("h", "heading_2", json!({"rich_text": [text("Intro")]}), vec![]),
            node("p", "paragraph", json!({"rich_text": [text("Hello world.")]}), vec![]),
            node("e", "paragraph", json!({"rich_text": []}), vec![]),
            node(
                "b1",
                "bulleted_list_item",
                json!({"rich_text": [text("one")]}),
                vec![node("b1a", "bulleted_list_item", json!({"rich_text": [text("nested")]}), vec![])],
            ),
            node("b2", "bulleted_list_item", json!({"rich_text": [text("two")]}), vec![]),
            node("n1", "numbered_list_item", json!({"rich_text": [text("first")]}), vec![]),
            node("n2", "numbered_list_item", json!({"rich_text": [text("second")]}), vec![]),
            node("t", "to_do", json!({"rich_text": [text("ship")], "checked": true}), vec![]),
            node(
                "c",
                "code",
                json!({"rich_text": [text("fn main() {}\n")], "language": "rust"}),
                vec![],
            ),
            node(
                "q",
                "callout",
                json!({"rich_text": [text("Heads up")], "icon": {"type": "emoji", "emoji": "💡"}}),
                vec![],
            ),
            node(
                "tg",
                "toggle",
                json!({"rich_text": [text("More")]}),
                vec![node("tp", "paragraph", json!({"rich_text": [text("Hidden")]}), vec![])],
            ),
            node("d", "divider", json!({}), vec![]),
            node(
                "i",
                "image",
                json!({"type": "file", "file": {"url": "https://s3/x.png?sig=1"}, "caption": [text("A chart")]}),
                vec![],
            ),
            node("u", "table", json!({"table_width": 2}), vec![]),
        ];

        let images = HashMap::from([(
            "https://s3/x.png?sig=1".to_string(),
            "/images/posts/abcd1234.png".to_string(),
        )]);

        insta::assert_snapshot!(render_blocks(&nodes, &images), @r"
        ## Intro

        Hello world.

        - one
          - nested
        - two

        1. first
        2. second

        - [x] ship

        ```rust
        fn main() {}
        ```

        > 💡 Heads up

        <details>
        <summary>More</summary>

        Hidden

        </details>

        ---

        ![A chart](/images/posts/abcd1234.png)
        ");
    }

    #[test]
    fn image_urls_are_collected_depth_first() {
        let nodes = vec![node(
            "t",
            "toggle",
            json!({"rich_text": [text("More")]}),
            vec![node(
                "i",
                "image",
                json!({"type": "external", "external": {"url": "https://img/a.png"}}),
                vec![],
            )],
        )];
        assert_eq!(image_urls(&nodes), ["https://img/a.png"]);
    }

    #[test]
    fn fences_outgrow_embedded_backticks() {
        assert_eq!(fence_for("let s = \"```\";"), "````");
        assert_eq!(fence_for("plain"), "```");
    }
}
