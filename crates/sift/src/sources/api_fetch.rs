//! API fetch source adapter
//!
//! Pulls items out of external REST/HTTP APIs: authenticated requests,
//! JSON/XML item extraction, and three pagination strategies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ApiFetchConfig;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::types::document::content_hash_id;
use crate::types::{
    ApiFetchParams, ApiPagination, AuthSpec, DocumentSource, RawDocument, SourceParams,
};

use super::SourceAdapter;

/// Fallback fields probed for item content, in order
const CONTENT_FALLBACKS: &[&str] = &["body", "text", "description", "summary"];

pub struct ApiFetchAdapter {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    cfg: ApiFetchConfig,
    rate_delay: Duration,
}

impl ApiFetchAdapter {
    pub fn new(
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        cfg: ApiFetchConfig,
        rate_delay: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .danger_accept_invalid_certs(!cfg.verify_ssl)
            .build()
            .map_err(|e| Error::Config(format!("failed to build API client: {e}")))?;

        Ok(Self {
            client,
            limiter,
            retry,
            cfg,
            rate_delay,
        })
    }

    fn params<'a>(&self, params: &'a SourceParams) -> Result<&'a ApiFetchParams> {
        match params {
            SourceParams::ApiFetch(p) => Ok(p),
            _ => Err(Error::validation("expected api_fetch parameters")),
        }
    }

    fn build_request(
        &self,
        p: &ApiFetchParams,
        auth: &AuthSpec,
        url: &Url,
    ) -> Result<reqwest::RequestBuilder> {
        let method: reqwest::Method = p
            .method
            .to_ascii_uppercase()
            .parse()
            .map_err(|_| Error::validation(format!("unsupported HTTP method: {}", p.method)))?;

        let mut request = self.client.request(method, url.clone());

        if let Some(query) = &p.query_params {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| (k.clone(), json_scalar_to_string(v)))
                .collect();
            request = request.query(&pairs);
        }

        match auth {
            AuthSpec::None => {}
            AuthSpec::ApiKeyHeader { name, key } => {
                request = request.header(name, key);
            }
            AuthSpec::ApiKeyQuery { name, key } => {
                request = request.query(&[(name.as_str(), key.as_str())]);
            }
            AuthSpec::Bearer(token) => {
                request = request.bearer_auth(token);
            }
            AuthSpec::Basic { username, password } => {
                let raw = format!("{username}:{password}");
                let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
                request = request.header(reqwest::header::AUTHORIZATION, format!("Basic {encoded}"));
            }
            AuthSpec::CustomHeaders(headers) => {
                for (name, value) in headers {
                    request = request.header(name, value);
                }
            }
        }

        if let Some(body) = &p.body {
            request = request.json(body);
        }

        Ok(request)
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        host: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        self.retry
            .run(cancel, || {
                let limiter = self.limiter.clone();
                let host = host.to_string();
                let delay = self.rate_delay;
                let request = request.try_clone();
                async move {
                    let request = request
                        .ok_or_else(|| Error::internal("request body is not cloneable"))?;
                    limiter.acquire(&host, delay).await;
                    let response = request.send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(Error::from_status(status, "API request"));
                    }
                    Ok(response)
                }
            })
            .await
    }

    fn items_from_json(&self, body: &Value, data_path: Option<&str>) -> Result<Vec<Value>> {
        let mut data = body;
        if let Some(path) = data_path {
            for key in path.split('.') {
                data = data.get(key).ok_or_else(|| {
                    Error::validation(format!("data_path segment '{key}' not found in response"))
                })?;
            }
        }

        match data {
            Value::Array(items) => Ok(items.clone()),
            Value::Object(_) => Ok(vec![data.clone()]),
            other => Err(Error::validation(format!(
                "data_path does not resolve to an array (found {})",
                value_kind(other)
            ))),
        }
    }

    fn items_from_xml(&self, body: &str, item_tag: &str) -> Result<Vec<Value>> {
        let mut reader = Reader::from_str(body);
        reader.config_mut().trim_text(true);

        let mut items: Vec<Value> = Vec::new();
        let mut current: Option<Map<String, Value>> = None;
        let mut field: Option<String> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    if name == item_tag && current.is_none() {
                        current = Some(Map::new());
                    } else if current.is_some() {
                        field = Some(name);
                    }
                }
                Ok(Event::Text(text)) => {
                    if let (Some(item), Some(name)) = (current.as_mut(), field.as_ref()) {
                        let value = text
                            .unescape()
                            .map_err(|e| Error::validation(format!("bad XML text: {e}")))?
                            .trim()
                            .to_string();
                        item.insert(name.clone(), Value::String(value));
                    }
                }
                Ok(Event::End(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                    if name == item_tag {
                        if let Some(item) = current.take() {
                            items.push(Value::Object(item));
                        }
                    } else {
                        field = None;
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(Error::validation(format!("invalid XML response: {e}"))),
            }
            buf.clear();
        }

        Ok(items)
    }

    fn item_to_document(
        &self,
        item: &Value,
        p: &ApiFetchParams,
        page_number: usize,
        index: usize,
        tenant_id: Option<&str>,
    ) -> RawDocument {
        let object = item.as_object().cloned().unwrap_or_else(|| {
            let mut map = Map::new();
            map.insert("value".into(), item.clone());
            map
        });

        let content = object
            .get(&p.content_field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                CONTENT_FALLBACKS.iter().find_map(|f| {
                    object.get(*f).and_then(Value::as_str).map(str::to_string)
                })
            })
            .unwrap_or_else(|| {
                serde_json::to_string_pretty(&object).unwrap_or_default()
            });

        let mut metadata = Map::new();
        for (key, value) in &object {
            if key != &p.content_field {
                metadata.insert(key.clone(), value.clone());
            }
        }
        if let Some(title) = object.get(&p.title_field) {
            metadata.insert("title".into(), title.clone());
        }
        metadata.insert("api_url".into(), Value::String(p.api_url.clone()));
        metadata.insert("page_number".into(), Value::Number(page_number.into()));

        let id = object
            .get("id")
            .map(json_scalar_to_string)
            .filter(|s| !s.is_empty())
            .map(|raw| format!("api-{raw}"))
            .unwrap_or_else(|| {
                content_hash_id("api", &format!("{}:{page_number}:{index}:{content}", p.api_url))
            });

        RawDocument::new(
            id,
            DocumentSource::ApiFetch,
            content,
            metadata,
            tenant_id.map(str::to_string),
        )
    }

    /// Derive the next page URL per the configured strategy.
    fn next_page(
        &self,
        pagination: &ApiPagination,
        headers: &reqwest::header::HeaderMap,
        body: Option<&Value>,
        current: &Url,
        page_number: usize,
    ) -> Result<Option<Url>> {
        match pagination {
            ApiPagination::None => Ok(None),
            ApiPagination::LinkHeader => {
                let link = headers
                    .get(reqwest::header::LINK)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                Ok(parse_link_next(link)
                    .map(|next| current.join(&next))
                    .transpose()
                    .map_err(|e| Error::validation(format!("bad Link header URL: {e}")))?)
            }
            ApiPagination::JsonPath(path) => {
                let Some(mut data) = body else {
                    return Ok(None);
                };
                for key in path.split('.') {
                    match data.get(key) {
                        Some(next) => data = next,
                        None => return Ok(None),
                    }
                }
                match data.as_str() {
                    Some(next) if !next.is_empty() => current
                        .join(next)
                        .map(Some)
                        .map_err(|e| Error::validation(format!("bad next-page URL: {e}"))),
                    _ => Ok(None),
                }
            }
            ApiPagination::Offset { limit } => {
                let mut next = current.clone();
                let offset = (page_number * *limit as usize).to_string();
                let pairs: Vec<(String, String)> = next
                    .query_pairs()
                    .filter(|(k, _)| k != "offset" && k != "limit")
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                next.query_pairs_mut()
                    .clear()
                    .extend_pairs(pairs)
                    .append_pair("offset", &offset)
                    .append_pair("limit", &limit.to_string());
                Ok(Some(next))
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for ApiFetchAdapter {
    fn source(&self) -> DocumentSource {
        DocumentSource::ApiFetch
    }

    fn validate(&self, params: &SourceParams) -> Result<()> {
        let p = self.params(params)?;

        let url = Url::parse(&p.api_url)
            .map_err(|e| Error::validation(format!("invalid api_url '{}': {e}", p.api_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation("api_url must use http or https"));
        }

        p.auth()?;
        p.pagination()?;

        if !matches!(p.response_format.as_str(), "json" | "xml") {
            return Err(Error::validation(format!(
                "response_format must be 'json' or 'xml', got '{}'",
                p.response_format
            )));
        }
        if p.max_pages == 0 {
            return Err(Error::validation("max_pages must be at least 1"));
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
        let auth = p.auth()?;
        let pagination = p.pagination()?;

        let mut first_url = Url::parse(&p.api_url)
            .map_err(|e| Error::validation(format!("invalid api_url '{}': {e}", p.api_url)))?;
        // Offset pagination needs its parameters on the very first request.
        if let ApiPagination::Offset { limit } = &pagination {
            first_url
                .query_pairs_mut()
                .append_pair("offset", "0")
                .append_pair("limit", &limit.to_string());
        }
        let mut current = Some(first_url);

        let mut documents: Vec<RawDocument> = Vec::new();
        let mut page_number = 0usize;

        while let Some(url) = current.take() {
            if page_number >= p.max_pages as usize {
                break;
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            page_number += 1;

            let host = url.host_str().unwrap_or_default().to_string();
            let request = self.build_request(p, &auth, &url)?;
            let response = self.execute(cancel, &host, request).await?;
            let headers = response.headers().clone();

            let (items, body_json) = match p.response_format.as_str() {
                "json" => {
                    let body: Value = response.json().await.map_err(|e| {
                        Error::validation(format!("invalid JSON response: {e}"))
                    })?;
                    let items = self.items_from_json(&body, p.data_path.as_deref())?;
                    (items, Some(body))
                }
                _ => {
                    let body = response.text().await.map_err(Error::from)?;
                    (self.items_from_xml(&body, &p.xml_item_tag)?, None)
                }
            };

            tracing::info!(url = %url, page = page_number, items = items.len(), "fetched API page");

            let page_item_count = items.len();
            for (index, item) in items.iter().enumerate() {
                if documents.len() >= self.cfg.max_items {
                    tracing::warn!(
                        max_items = self.cfg.max_items,
                        "item cap reached, stopping pagination"
                    );
                    return Ok(documents);
                }
                documents.push(self.item_to_document(item, p, page_number, index, tenant_id));
            }

            // A short offset page means the collection is exhausted.
            if let ApiPagination::Offset { limit } = &pagination {
                if page_item_count < *limit as usize {
                    break;
                }
            }

            current = self.next_page(
                &pagination,
                &headers,
                body_json.as_ref(),
                &url,
                page_number,
            )?;
        }

        Ok(documents)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn supported_formats(&self) -> &[&str] {
        &["json", "xml"]
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Extract the `rel="next"` target from an RFC 5988 `Link` header.
fn parse_link_next(header: &str) -> Option<String> {
    for part in header.split(',') {
        let mut segments = part.split(';');
        let target = segments.next()?.trim();
        let is_next = segments.any(|s| {
            let s = s.trim();
            s == "rel=\"next\"" || s == "rel=next"
        });
        if is_next {
            return Some(target.trim_start_matches('<').trim_end_matches('>').to_string());
        }
    }
    None
}
