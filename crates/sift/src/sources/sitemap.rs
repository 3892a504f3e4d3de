//! Sitemaps-protocol parsing
//!
//! Handles both `<urlset>` and `<sitemapindex>` documents. Anything beyond
//! the `<loc>` entries (lastmod, priority, unknown elements) is tolerated
//! and ignored.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, Result};

/// A parsed sitemap document
#[derive(Debug, Clone, PartialEq)]
pub enum Sitemap {
    /// Leaf sitemap: page URLs
    UrlSet(Vec<String>),
    /// Sitemap index: child sitemap URLs
    Index(Vec<String>),
}

fn local_name(name: &[u8]) -> Vec<u8> {
    match name.iter().rposition(|&b| b == b':') {
        Some(pos) => name[pos + 1..].to_vec(),
        None => name.to_vec(),
    }
}

/// Parse sitemap XML, returning the collected `<loc>` values.
pub fn parse(xml: &str) -> Result<Sitemap> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut is_index: Option<bool> = None;
    let mut in_loc = false;
    let mut urls: Vec<String> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                match name.as_slice() {
                    b"urlset" => {
                        is_index.get_or_insert(false);
                    }
                    b"sitemapindex" => {
                        is_index.get_or_insert(true);
                    }
                    b"loc" => in_loc = true,
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if local_name(e.name().as_ref()).as_slice() == b"loc" {
                    in_loc = false;
                }
            }
            Ok(Event::Text(text)) => {
                if in_loc {
                    let value = text
                        .unescape()
                        .map_err(|e| Error::validation(format!("bad sitemap text: {e}")))?
                        .trim()
                        .to_string();
                    if !value.is_empty() {
                        urls.push(value);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::validation(format!("invalid sitemap XML: {e}")));
            }
        }
        buf.clear();
    }

    match is_index {
        Some(true) => Ok(Sitemap::Index(urls)),
        Some(false) => Ok(Sitemap::UrlSet(urls)),
        None => Err(Error::validation(
            "document is neither a urlset nor a sitemapindex",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>https://example.test/a</loc><lastmod>2024-01-01</lastmod></url>
              <url><loc>https://example.test/b</loc></url>
              <url><loc>https://example.test/c</loc><priority>0.8</priority></url>
            </urlset>"#;

        match parse(xml).unwrap() {
            Sitemap::UrlSet(urls) => assert_eq!(
                urls,
                vec![
                    "https://example.test/a",
                    "https://example.test/b",
                    "https://example.test/c"
                ]
            ),
            other => panic!("expected urlset, got {other:?}"),
        }
    }

    #[test]
    fn parses_sitemap_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sitemap><loc>https://example.test/sitemap-1.xml</loc></sitemap>
              <sitemap><loc>https://example.test/sitemap-2.xml</loc></sitemap>
            </sitemapindex>"#;

        match parse(xml).unwrap() {
            Sitemap::Index(urls) => assert_eq!(urls.len(), 2),
            other => panic!("expected index, got {other:?}"),
        }
    }

    #[test]
    fn tolerates_schema_drift() {
        // Missing lastmod, unknown elements, namespace prefixes.
        let xml = r#"<sm:urlset xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sm:url><sm:loc> https://example.test/a </sm:loc><sm:extra>x</sm:extra></sm:url>
            </sm:urlset>"#;

        match parse(xml).unwrap() {
            Sitemap::UrlSet(urls) => assert_eq!(urls, vec!["https://example.test/a"]),
            other => panic!("expected urlset, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_sitemap_documents() {
        assert!(parse("<html><body>not a sitemap</body></html>").is_err());
        assert!(parse("definitely not xml <<<").is_err());
    }
}
