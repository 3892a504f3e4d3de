//! HTML content and metadata extraction shared by the web-facing adapters

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};

/// Elements whose text never belongs in extracted content
const EXCLUDED_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "iframe",
];

fn selector(css: &str) -> Selector {
    // The selectors used here are static and known-valid.
    Selector::parse(css).expect("static selector")
}

/// Collect the text of `element`, skipping excluded subtrees, into `out`.
fn collect_text(element: ElementRef<'_>, out: &mut Vec<String>) {
    for node in element.children() {
        if let Some(child) = ElementRef::wrap(node) {
            if EXCLUDED_TAGS.contains(&child.value().name()) {
                continue;
            }
            collect_text(child, out);
        } else if let Some(text) = node.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    collect_text(element, &mut parts);
    parts.join("\n")
}

/// Extract the main content of a page.
///
/// Priority: `<article>`, then `<main>`/`role="main"`, then the first element
/// carrying one of the well-known content classes, then `<body>` with
/// navigation chrome removed.
pub fn extract_content(document: &Html) -> String {
    let candidates = [
        "article",
        "main, [role=\"main\"]",
        ".content, .main-content, .post-content, .article-body",
        "body",
    ];

    for css in candidates {
        if let Some(element) = document.select(&selector(css)).next() {
            let text = element_text(element);
            if !text.is_empty() {
                return text;
            }
        }
    }

    element_text(document.root_element())
}

/// Flatten page metadata into a JSON map.
///
/// Pulls the `<title>`, the common named `<meta>` tags, and every Open Graph
/// and Twitter card tag, each under its own key.
pub fn extract_metadata(document: &Html) -> Map<String, Value> {
    let mut metadata = Map::new();

    if let Some(title) = document.select(&selector("title")).next() {
        let text = title.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            metadata.insert("title".into(), Value::String(text));
        }
    }

    for meta in document.select(&selector("meta")) {
        let Some(content) = meta.value().attr("content") else {
            continue;
        };
        let name = meta
            .value()
            .attr("name")
            .or_else(|| meta.value().attr("property"))
            .unwrap_or("");

        let key = match name {
            "description" | "author" | "keywords" | "published" => name.to_string(),
            "published_time" | "article:published_time" => "published".to_string(),
            n if n.starts_with("og:") || n.starts_with("twitter:") => n.to_string(),
            _ => continue,
        };

        metadata
            .entry(key)
            .or_insert_with(|| Value::String(content.to_string()));
    }

    metadata
}

/// Strip a whole HTML document to plain text, dropping script/style/chrome.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body = document
        .select(&selector("body"))
        .next()
        .unwrap_or_else(|| document.root_element());
    element_text(body)
}
