//! SEC EDGAR source adapter
//!
//! Resolves companies by ticker or CIK, walks the submissions index, and
//! fetches primary filing documents. The SEC requires a User-Agent carrying
//! contact information and caps fair access at 10 requests per second; all
//! outbound requests go through the limiter keyed on `sec.gov`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::SecEdgarConfig;
use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::types::{DocumentSource, RawDocument, SecEdgarParams, SourceParams};

use super::{html, SourceAdapter};

const EDGAR_BASE_URL: &str = "https://www.sec.gov";
const EDGAR_DATA_URL: &str = "https://data.sec.gov";
const RATE_LIMIT_KEY: &str = "sec.gov";

const SUPPORTED_FORMS: &[&str] = &[
    "10-K", "10-Q", "8-K", "DEF 14A", "S-1", "S-3", "13F-HR", "13D", "13G", "4", "3", "5",
    "20-F", "6-K",
];

#[derive(Debug, Clone)]
struct Filing {
    company_name: String,
    cik: String,
    form_type: String,
    filing_date: String,
    accession_number: String,
    primary_document: String,
}

impl Filing {
    /// Archive URL of the filing's primary document.
    fn document_url(&self) -> String {
        let cik_short = self.cik.trim_start_matches('0');
        let accession = self.accession_number.replace('-', "");
        format!(
            "{EDGAR_BASE_URL}/Archives/edgar/data/{cik_short}/{accession}/{}",
            self.primary_document
        )
    }
}

pub struct SecEdgarAdapter {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    cfg: SecEdgarConfig,
    rate_delay: Duration,
}

impl SecEdgarAdapter {
    pub fn new(
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        cfg: SecEdgarConfig,
        rate_delay: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .gzip(true)
            .build()
            .map_err(|e| Error::Config(format!("failed to build SEC client: {e}")))?;

        Ok(Self {
            client,
            limiter,
            retry,
            cfg,
            rate_delay,
        })
    }

    /// The SEC requires the User-Agent to carry contact info: an email
    /// address or a website.
    fn user_agent_has_contact(user_agent: &str) -> bool {
        user_agent.contains('@') || user_agent.contains("://")
    }

    /// Normalize a CIK to its canonical 10-digit zero-padded form.
    fn normalize_cik(raw: &str) -> Result<String> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() || digits.len() > 10 {
            return Err(Error::validation(format!("invalid CIK: '{raw}'")));
        }
        Ok(format!("{digits:0>10}"))
    }

    fn params<'a>(&self, params: &'a SourceParams) -> Result<&'a SecEdgarParams> {
        match params {
            SourceParams::SecEdgar(p) => Ok(p),
            _ => Err(Error::validation("expected sec_edgar parameters")),
        }
    }

    async fn get_json(&self, cancel: &CancellationToken, url: &str) -> Result<Value> {
        let response = self.get(cancel, url).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| Error::internal(format!("failed to parse JSON from {url}: {e}")))
    }

    async fn get(&self, cancel: &CancellationToken, url: &str) -> Result<reqwest::Response> {
        self.retry
            .run(cancel, || {
                let client = self.client.clone();
                let limiter = self.limiter.clone();
                let url = url.to_string();
                let delay = self.rate_delay;
                async move {
                    limiter.acquire(RATE_LIMIT_KEY, delay).await;
                    let response = client.get(&url).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(Error::from_status(status, &url));
                    }
                    Ok(response)
                }
            })
            .await
    }

    /// Resolve a ticker symbol through the published ticker-to-CIK mapping.
    async fn cik_from_ticker(&self, cancel: &CancellationToken, ticker: &str) -> Result<String> {
        let url = format!("{EDGAR_BASE_URL}/files/company_tickers.json");
        let mapping = self.get_json(cancel, &url).await?;

        let wanted = ticker.to_ascii_uppercase();
        let entries = mapping
            .as_object()
            .ok_or_else(|| Error::internal("unexpected ticker mapping shape"))?;

        for entry in entries.values() {
            let symbol = entry
                .get("ticker")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if symbol.eq_ignore_ascii_case(&wanted) {
                let cik = entry
                    .get("cik_str")
                    .map(|v| match v {
                        Value::Number(n) => n.to_string(),
                        Value::String(s) => s.clone(),
                        _ => String::new(),
                    })
                    .unwrap_or_default();
                let cik = Self::normalize_cik(&cik)?;
                tracing::info!(ticker = %ticker, cik = %cik, "resolved ticker");
                return Ok(cik);
            }
        }

        Err(Error::not_found(format!(
            "ticker '{ticker}' not found in the SEC mapping"
        )))
    }

    /// Read the company submissions index and select recent filings.
    async fn recent_filings(
        &self,
        cancel: &CancellationToken,
        cik: &str,
        form_type: Option<&str>,
        count: usize,
    ) -> Result<Vec<Filing>> {
        let url = format!("{EDGAR_DATA_URL}/submissions/CIK{cik}.json");
        let submissions = self.get_json(cancel, &url).await?;

        let company_name = submissions
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string();
        let recent = submissions
            .pointer("/filings/recent")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::internal("submissions index missing recent filings"))?;

        let column = |name: &str| -> Vec<String> {
            recent
                .get(name)
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .map(|v| v.as_str().unwrap_or_default().to_string())
                        .collect()
                })
                .unwrap_or_default()
        };

        let forms = column("form");
        let dates = column("filingDate");
        let accessions = column("accessionNumber");
        let primaries = column("primaryDocument");

        let mut filings = Vec::new();
        for i in 0..forms.len() {
            if filings.len() >= count {
                break;
            }
            if let Some(wanted) = form_type {
                if !forms[i].eq_ignore_ascii_case(wanted) {
                    continue;
                }
            }
            let accession = accessions.get(i).cloned().unwrap_or_default();
            let primary = primaries.get(i).cloned().unwrap_or_default();
            if accession.is_empty() || primary.is_empty() {
                continue;
            }
            filings.push(Filing {
                company_name: company_name.clone(),
                cik: cik.to_string(),
                form_type: forms[i].clone(),
                filing_date: dates.get(i).cloned().unwrap_or_default(),
                accession_number: accession,
                primary_document: primary,
            });
        }

        if filings.is_empty() {
            return Err(Error::not_found(format!(
                "no filings found for CIK {cik}{}",
                form_type.map(|f| format!(" with form {f}")).unwrap_or_default()
            )));
        }

        Ok(filings)
    }

    /// Download one filing's primary document and strip it to text.
    async fn filing_content(&self, cancel: &CancellationToken, filing: &Filing) -> Result<String> {
        let url = filing.document_url();
        let response = self.get(cancel, &url).await?;

        if let Some(length) = response.content_length() {
            if length as usize > self.cfg.max_filing_size {
                return Err(Error::SizeExceeded(format!(
                    "filing is {length} bytes (max: {})",
                    self.cfg.max_filing_size
                )));
            }
        }

        let body = response.text().await.map_err(Error::from)?;
        if body.len() > self.cfg.max_filing_size {
            return Err(Error::SizeExceeded(format!(
                "filing is {} bytes (max: {})",
                body.len(),
                self.cfg.max_filing_size
            )));
        }

        Ok(html::html_to_text(&body))
    }
}

#[async_trait]
impl SourceAdapter for SecEdgarAdapter {
    fn source(&self) -> DocumentSource {
        DocumentSource::SecEdgar
    }

    fn validate(&self, params: &SourceParams) -> Result<()> {
        let p = self.params(params)?;

        if !Self::user_agent_has_contact(&self.cfg.user_agent) {
            return Err(Error::validation(
                "SEC EDGAR User-Agent must include contact information \
                 (an email address or a website URL)",
            ));
        }

        match (&p.ticker, &p.cik) {
            (None, None) => {
                return Err(Error::validation("must provide either 'ticker' or 'cik'"))
            }
            (Some(_), Some(_)) => {
                return Err(Error::validation("provide only one of 'ticker' or 'cik'"))
            }
            _ => {}
        }

        if let Some(cik) = &p.cik {
            Self::normalize_cik(cik)?;
        }
        if p.count == 0 || p.count > 10 {
            return Err(Error::validation(format!(
                "count must be within 1..=10, got {}",
                p.count
            )));
        }
        if let Some(form) = &p.form_type {
            if !SUPPORTED_FORMS.iter().any(|f| f.eq_ignore_ascii_case(form)) {
                tracing::warn!(form_type = %form, "form type not in the common list, proceeding");
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

        let cik = match (&p.ticker, &p.cik) {
            (Some(ticker), None) => self.cik_from_ticker(cancel, ticker).await?,
            (None, Some(cik)) => Self::normalize_cik(cik)?,
            _ => unreachable!("validated above"),
        };

        let filings = self
            .recent_filings(cancel, &cik, p.form_type.as_deref(), p.count as usize)
            .await?;

        let mut documents = Vec::with_capacity(filings.len());
        for filing in &filings {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let content = self.filing_content(cancel, filing).await?;
            let mut metadata = Map::new();
            metadata.insert(
                "company_name".into(),
                Value::String(filing.company_name.clone()),
            );
            metadata.insert("cik".into(), Value::String(filing.cik.clone()));
            metadata.insert("form_type".into(), Value::String(filing.form_type.clone()));
            metadata.insert(
                "filing_date".into(),
                Value::String(filing.filing_date.clone()),
            );
            metadata.insert(
                "accession_number".into(),
                Value::String(filing.accession_number.clone()),
            );
            metadata.insert("filing_url".into(), Value::String(filing.document_url()));
            if let Some(ticker) = &p.ticker {
                metadata.insert("ticker".into(), Value::String(ticker.to_ascii_uppercase()));
            }

            tracing::info!(
                cik = %filing.cik,
                form_type = %filing.form_type,
                filing_date = %filing.filing_date,
                chars = content.len(),
                "fetched filing"
            );

            documents.push(RawDocument::new(
                filing.accession_number.clone(),
                DocumentSource::SecEdgar,
                content,
                metadata,
                tenant_id.map(str::to_string),
            ));
        }

        Ok(documents)
    }

    async fn health_check(&self) -> bool {
        self.limiter
            .acquire(RATE_LIMIT_KEY, self.rate_delay)
            .await;
        matches!(
            self.client.get(EDGAR_BASE_URL).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    fn supported_formats(&self) -> &[&str] {
        SUPPORTED_FORMS
    }
}
