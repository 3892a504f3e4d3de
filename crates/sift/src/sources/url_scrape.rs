//! URL scraping source adapter
//!
//! Fetches single pages or whole sitemaps, honoring robots.txt and spacing
//! requests per host. One `RawDocument` per page.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::Html;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::UrlScrapeConfig;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::types::document::content_hash_id;
use crate::types::{DocumentSource, RawDocument, SourceParams, UrlScrapeParams};

use super::robots::RobotsTxt;
use super::sitemap::{self, Sitemap};
use super::{html, SourceAdapter};

/// How deep a sitemap index may nest before expansion stops
const MAX_SITEMAP_DEPTH: usize = 5;

pub struct UrlScrapeAdapter {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    cfg: UrlScrapeConfig,
    rate_delay: Duration,
}

impl UrlScrapeAdapter {
    pub fn new(
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        cfg: UrlScrapeConfig,
        rate_delay: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Config(format!("failed to build scrape client: {e}")))?;

        Ok(Self {
            client,
            limiter,
            retry,
            cfg,
            rate_delay,
        })
    }

    fn params<'a>(&self, params: &'a SourceParams) -> Result<&'a UrlScrapeParams> {
        match params {
            SourceParams::UrlScrape(p) => Ok(p),
            _ => Err(Error::validation("expected url_scrape parameters")),
        }
    }

    fn parse_url(raw: &str) -> Result<Url> {
        let url = Url::parse(raw)
            .map_err(|e| Error::validation(format!("invalid URL '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation(format!(
                "URL must use http or https: {raw}"
            )));
        }
        Ok(url)
    }

    async fn throttled_get(
        &self,
        cancel: &CancellationToken,
        url: &Url,
    ) -> Result<reqwest::Response> {
        let host = url.host_str().unwrap_or_default().to_string();
        self.retry
            .run(cancel, || {
                let client = self.client.clone();
                let limiter = self.limiter.clone();
                let url = url.clone();
                let host = host.clone();
                let delay = self.rate_delay;
                async move {
                    limiter.acquire(&host, delay).await;
                    let response = client.get(url.clone()).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(Error::from_status(status, url.as_str()));
                    }
                    Ok(response)
                }
            })
            .await
    }

    /// Whether robots.txt for the URL's host permits fetching it.
    ///
    /// The per-host policy is fetched once per job; a missing or unreadable
    /// robots.txt means "allow all".
    async fn robots_allows(
        &self,
        cancel: &CancellationToken,
        cache: &mut HashMap<String, Option<RobotsTxt>>,
        url: &Url,
    ) -> Result<bool> {
        if !self.cfg.respect_robots {
            return Ok(true);
        }

        let host = url.host_str().unwrap_or_default().to_string();
        if !cache.contains_key(&host) {
            let robots_url = Self::parse_url(&format!(
                "{}://{}/robots.txt",
                url.scheme(),
                url.authority()
            ))?;

            let policy = match self.throttled_get(cancel, &robots_url).await {
                Ok(response) => match response.text().await {
                    Ok(body) => Some(RobotsTxt::parse(&body)),
                    Err(_) => None,
                },
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::debug!(host = %host, error = %err, "robots.txt unavailable, allowing");
                    None
                }
            };
            cache.insert(host.clone(), policy);
        }

        Ok(match cache.get(&host).and_then(|p| p.as_ref()) {
            Some(robots) => robots.is_allowed(&self.cfg.user_agent, url.path()),
            None => true,
        })
    }

    /// Expand a sitemap (or sitemap index, recursively) into page URLs,
    /// deduplicated and capped at `max_pages` across all children.
    async fn expand_sitemap(
        &self,
        cancel: &CancellationToken,
        sitemap_url: &Url,
        max_pages: usize,
    ) -> Result<Vec<String>> {
        let mut queue: VecDeque<(Url, usize)> = VecDeque::new();
        let mut visited_sitemaps: HashSet<String> = HashSet::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut pages: Vec<String> = Vec::new();

        queue.push_back((sitemap_url.clone(), 0));
        visited_sitemaps.insert(sitemap_url.to_string());

        while let Some((current, depth)) = queue.pop_front() {
            if pages.len() >= max_pages {
                break;
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let response = self.throttled_get(cancel, &current).await?;
            let body = response.text().await.map_err(Error::from)?;

            match sitemap::parse(&body)? {
                Sitemap::UrlSet(urls) => {
                    for url in urls {
                        if pages.len() >= max_pages {
                            break;
                        }
                        if seen.insert(url.clone()) {
                            pages.push(url);
                        }
                    }
                }
                Sitemap::Index(children) => {
                    if depth >= MAX_SITEMAP_DEPTH {
                        tracing::warn!(sitemap = %current, "sitemap index too deep, skipping children");
                        continue;
                    }
                    for child in children {
                        if visited_sitemaps.insert(child.clone()) {
                            queue.push_back((Self::parse_url(&child)?, depth + 1));
                        }
                    }
                }
            }
        }

        tracing::info!(
            sitemap = %sitemap_url,
            page_count = pages.len(),
            "expanded sitemap"
        );
        Ok(pages)
    }

    /// Fetch one page and extract its content and metadata.
    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        url: &Url,
    ) -> Result<(String, serde_json::Map<String, Value>)> {
        let response = self.throttled_get(cancel, url).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty()
            && !content_type.contains("html")
            && !content_type.starts_with("text/")
        {
            return Err(Error::validation(format!(
                "non-HTML content type '{content_type}' at {url}"
            )));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.cfg.max_content_size {
                return Err(Error::SizeExceeded(format!(
                    "page is {length} bytes (max: {})",
                    self.cfg.max_content_size
                )));
            }
        }

        let body = response.text().await.map_err(Error::from)?;
        if body.len() > self.cfg.max_content_size {
            return Err(Error::SizeExceeded(format!(
                "page is {} bytes (max: {})",
                body.len(),
                self.cfg.max_content_size
            )));
        }

        let document = Html::parse_document(&body);
        let content = html::extract_content(&document);
        let mut metadata = html::extract_metadata(&document);
        metadata.insert("url".into(), Value::String(url.to_string()));
        metadata.insert("content_type".into(), Value::String(content_type));
        metadata.insert("content_length".into(), Value::Number(body.len().into()));

        tracing::info!(url = %url, chars = content.len(), "fetched page");
        Ok((content, metadata))
    }
}

#[async_trait]
impl SourceAdapter for UrlScrapeAdapter {
    fn source(&self) -> DocumentSource {
        DocumentSource::UrlScrape
    }

    fn validate(&self, params: &SourceParams) -> Result<()> {
        let p = self.params(params)?;
        match (&p.url, &p.sitemap_url) {
            (None, None) => {
                return Err(Error::validation(
                    "must provide either 'url' or 'sitemap_url'",
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::validation(
                    "provide only one of 'url' or 'sitemap_url'",
                ))
            }
            _ => {}
        }
        if let Some(url) = &p.url {
            Self::parse_url(url)?;
        }
        if let Some(url) = &p.sitemap_url {
            Self::parse_url(url)?;
            if p.max_pages == 0 || p.max_pages > 100 {
                return Err(Error::validation(format!(
                    "max_pages must be within 1..=100, got {}",
                    p.max_pages
                )));
            }
        }
        Ok(())
    }

    async fn fetch(
        &self,
        cancel: &CancellationToken,
        params: &SourceParams,
        tenant_id: Option<&str>,
    ) -> Result<Vec<RawDocument>> {
        self.validate(params)?;
        let p = self.params(params)?;
        let mut robots_cache: HashMap<String, Option<RobotsTxt>> = HashMap::new();
        let mut documents = Vec::new();

        if let Some(raw) = &p.sitemap_url {
            let sitemap_url = Self::parse_url(raw)?;
            let pages = self
                .expand_sitemap(cancel, &sitemap_url, p.max_pages as usize)
                .await?;

            for page in pages {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let url = match Self::parse_url(&page) {
                    Ok(url) => url,
                    Err(err) => {
                        tracing::warn!(url = %page, error = %err, "skipping invalid sitemap URL");
                        continue;
                    }
                };

                if !self.robots_allows(cancel, &mut robots_cache, &url).await? {
                    tracing::warn!(url = %url, "skipping URL disallowed by robots.txt");
                    continue;
                }

                match self.fetch_page(cancel, &url).await {
                    Ok((content, mut metadata)) => {
                        metadata.insert("from_sitemap".into(), Value::Bool(true));
                        metadata.insert("sitemap_url".into(), Value::String(raw.clone()));
                        documents.push(RawDocument::new(
                            content_hash_id("page", url.as_str()),
                            DocumentSource::UrlScrape,
                            content,
                            metadata,
                            tenant_id.map(str::to_string),
                        ));
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(err) => {
                        tracing::warn!(url = %url, error = %err, "failed to fetch page, continuing");
                    }
                }
            }
        } else if let Some(raw) = &p.url {
            let url = Self::parse_url(raw)?;
            if !self.robots_allows(cancel, &mut robots_cache, &url).await? {
                return Err(Error::forbidden(format!(
                    "URL disallowed by robots.txt: {url}"
                )));
            }
            let (content, metadata) = self.fetch_page(cancel, &url).await?;
            documents.push(RawDocument::new(
                content_hash_id("page", url.as_str()),
                DocumentSource::UrlScrape,
                content,
                metadata,
                tenant_id.map(str::to_string),
            ));
        }

        if documents.is_empty() {
            return Err(Error::not_found("no documents were successfully fetched"));
        }

        Ok(documents)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn supported_formats(&self) -> &[&str] {
        &["html", "xhtml"]
    }
}
