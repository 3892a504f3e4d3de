//! Typed source parameters
//!
//! Submission payloads carry an opaque parameter map; it is parsed into one
//! of these variants before any I/O happens. The raw JSON is what gets
//! persisted on the job record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

use super::document::DocumentSource;

/// Source-specific job parameters, one variant per source tag
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceParams {
    FileUpload(FileUploadParams),
    SecEdgar(SecEdgarParams),
    UrlScrape(UrlScrapeParams),
    ApiFetch(ApiFetchParams),
    DatabaseQuery(DatabaseQueryParams),
}

impl SourceParams {
    pub fn source(&self) -> DocumentSource {
        match self {
            Self::FileUpload(_) => DocumentSource::FileUpload,
            Self::SecEdgar(_) => DocumentSource::SecEdgar,
            Self::UrlScrape(_) => DocumentSource::UrlScrape,
            Self::ApiFetch(_) => DocumentSource::ApiFetch,
            Self::DatabaseQuery(_) => DocumentSource::DatabaseQuery,
        }
    }

    /// Parse a submission's `source` tag plus its flattened parameter fields.
    pub fn from_submission(source: &str, params: &Map<String, Value>) -> Result<Self> {
        let mut tagged = params.clone();
        tagged.insert("source".into(), Value::String(source.to_string()));
        serde_json::from_value(Value::Object(tagged))
            .map_err(|e| Error::validation(format!("invalid parameters for '{source}': {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadParams {
    pub file_path: String,
}

fn default_filing_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecEdgarParams {
    /// Exactly one of `ticker` or `cik` must be set
    pub ticker: Option<String>,
    pub cik: Option<String>,
    pub form_type: Option<String>,
    /// Number of filings to fetch, 1..10
    #[serde(default = "default_filing_count")]
    pub count: u32,
}

fn default_max_pages() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlScrapeParams {
    /// Exactly one of `url` or `sitemap_url` must be set
    pub url: Option<String>,
    pub sitemap_url: Option<String>,
    /// Page cap when expanding a sitemap, 1..100
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

/// Validated authentication descriptor derived from [`ApiFetchParams`]
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AuthSpec {
    #[default]
    None,
    ApiKeyHeader {
        name: String,
        key: String,
    },
    ApiKeyQuery {
        name: String,
        key: String,
    },
    Bearer(String),
    Basic {
        username: String,
        password: String,
    },
    CustomHeaders(BTreeMap<String, String>),
}

/// Validated pagination strategy derived from [`ApiFetchParams`]
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ApiPagination {
    #[default]
    None,
    /// RFC 5988 `Link` header with `rel="next"`
    LinkHeader,
    /// Dotted path into the JSON body yielding the next page URL
    JsonPath(String),
    /// `offset`/`limit` query parameters incremented per page
    Offset { limit: u32 },
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_response_format() -> String {
    "json".to_string()
}

fn default_xml_item_tag() -> String {
    "item".to_string()
}

fn default_content_field() -> String {
    "content".to_string()
}

fn default_title_field() -> String {
    "title".to_string()
}

fn default_auth_type() -> String {
    "none".to_string()
}

fn default_auth_location() -> String {
    "header".to_string()
}

fn default_api_key_name() -> String {
    "X-API-Key".to_string()
}

fn default_pagination_type() -> String {
    "none".to_string()
}

fn default_page_limit() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFetchParams {
    pub api_url: String,
    #[serde(default = "default_method")]
    pub method: String,

    /// `none`, `api_key`, `bearer`, `basic`, or `custom_headers`
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_name")]
    pub api_key_name: String,
    /// `header` or `query`, for api_key auth
    #[serde(default = "default_auth_location")]
    pub auth_location: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub custom_headers: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub query_params: Option<Map<String, Value>>,
    #[serde(default)]
    pub body: Option<Value>,

    /// `json` or `xml`
    #[serde(default = "default_response_format")]
    pub response_format: String,
    /// Dotted path to the item array in a JSON response, e.g. `data.items`
    #[serde(default)]
    pub data_path: Option<String>,
    #[serde(default = "default_xml_item_tag")]
    pub xml_item_tag: String,
    #[serde(default = "default_content_field")]
    pub content_field: String,
    #[serde(default = "default_title_field")]
    pub title_field: String,

    /// `none`, `link_header`, `json_path`, or `offset`
    #[serde(default = "default_pagination_type")]
    pub pagination_type: String,
    #[serde(default)]
    pub next_page_path: Option<String>,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl ApiFetchParams {
    /// Resolve and validate the authentication descriptor.
    pub fn auth(&self) -> Result<AuthSpec> {
        match self.auth_type.as_str() {
            "none" => Ok(AuthSpec::None),
            "api_key" => {
                let key = self
                    .api_key
                    .clone()
                    .ok_or_else(|| Error::validation("api_key is required for api_key auth"))?;
                match self.auth_location.as_str() {
                    "header" => Ok(AuthSpec::ApiKeyHeader {
                        name: self.api_key_name.clone(),
                        key,
                    }),
                    "query" => Ok(AuthSpec::ApiKeyQuery {
                        name: self.api_key_name.clone(),
                        key,
                    }),
                    other => Err(Error::validation(format!(
                        "auth_location must be 'header' or 'query', got '{other}'"
                    ))),
                }
            }
            "bearer" => self
                .bearer_token
                .clone()
                .map(AuthSpec::Bearer)
                .ok_or_else(|| Error::validation("bearer_token is required for bearer auth")),
            "basic" => match (&self.username, &self.password) {
                (Some(u), Some(p)) => Ok(AuthSpec::Basic {
                    username: u.clone(),
                    password: p.clone(),
                }),
                _ => Err(Error::validation(
                    "username and password are required for basic auth",
                )),
            },
            "custom_headers" => self
                .custom_headers
                .clone()
                .map(AuthSpec::CustomHeaders)
                .ok_or_else(|| {
                    Error::validation("custom_headers is required for custom_headers auth")
                }),
            other => Err(Error::validation(format!(
                "unknown auth_type '{other}' (expected none, api_key, bearer, basic, custom_headers)"
            ))),
        }
    }

    /// Resolve and validate the pagination strategy.
    pub fn pagination(&self) -> Result<ApiPagination> {
        match self.pagination_type.as_str() {
            "none" => Ok(ApiPagination::None),
            "link_header" => Ok(ApiPagination::LinkHeader),
            "json_path" => self
                .next_page_path
                .clone()
                .map(ApiPagination::JsonPath)
                .ok_or_else(|| {
                    Error::validation("next_page_path is required for json_path pagination")
                }),
            "offset" => Ok(ApiPagination::Offset {
                limit: self.page_limit,
            }),
            other => Err(Error::validation(format!(
                "unknown pagination_type '{other}' (expected none, link_header, json_path, offset)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseQueryParams {
    pub connection_string: String,
    pub query: String,
    #[serde(default)]
    pub params: Option<Map<String, Value>>,
    #[serde(default = "default_content_field")]
    pub content_column: String,
    #[serde(default = "default_title_field")]
    pub title_column: String,
    #[serde(default)]
    pub id_column: Option<String>,
    #[serde(default)]
    pub max_rows: Option<usize>,
}
