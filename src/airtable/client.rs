use crate::archive::config::ApiConfig;
use crate::archive::store::SourceRecord;
use crate::archive::util::{progress, truncate_with_ellipsis};
use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::cell::Cell;
use std::thread;
use std::time::{Duration, Instant};

pub const PAGE_SIZE: usize = 100;
const BACKOFF_STEP_MS: u64 = 250;
const ERROR_BODY_CHARS: usize = 300;

/// 429 and 5xx are worth another attempt; other non-2xx are final.
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// How far a failed call may be repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Reads, updates and record copies: repeat on any transient failure.
    Transient,
    /// Creations: repeat only when the server cannot have acted on the
    /// request (connection refused, or an explicit 429). A timeout or a 5xx
    /// may have created the resource already.
    Unsent,
}

impl Retry {
    fn after_transport_error(self, err: &reqwest::Error) -> bool {
        match self {
            Retry::Transient => true,
            Retry::Unsent => err.is_connect(),
        }
    }

    fn after_status(self, status: StatusCode) -> bool {
        match self {
            Retry::Transient => is_retryable(status),
            Retry::Unsent => status == StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordPage {
    #[serde(default)]
    pub records: Vec<SourceRecord>,
    #[serde(default)]
    pub offset: Option<String>,
}

pub struct ApiClient {
    http: Client,
    base_url: Url,
    api_key: String,
    retries: u64,
    min_interval: Duration,
    last_request: Cell<Option<Instant>>,
}

impl ApiClient {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(api.base_url.trim())
            .with_context(|| format!("invalid api base url `{}`", api.base_url))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs.max(1)))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url,
            api_key: api.api_key.trim().to_string(),
            retries: api.retries,
            min_interval: Duration::from_millis(api.min_interval_ms),
            last_request: Cell::new(None),
        })
    }

    /// `segments` are appended percent-encoded, so table names with spaces
    /// are safe to pass as-is.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| anyhow!("api base url `{}` cannot take a path", self.base_url))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    pub fn get_json(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Value> {
        self.send(Method::GET, segments, query, None, Retry::Transient)
    }

    pub fn post_json(&self, segments: &[&str], body: &Value) -> Result<Value> {
        self.send(Method::POST, segments, &[], Some(body), Retry::Transient)
    }

    /// POST for calls that create something (bases, tables, fields). Never
    /// repeated once the request may have reached the server.
    pub fn create_json(&self, segments: &[&str], body: &Value) -> Result<Value> {
        self.send(Method::POST, segments, &[], Some(body), Retry::Unsent)
    }

    pub fn patch_json(&self, segments: &[&str], body: &Value) -> Result<Value> {
        self.send(Method::PATCH, segments, &[], Some(body), Retry::Transient)
    }

    /// Every record of `table`, following `offset` until the last page.
    pub fn list_all_records(&self, base_id: &str, table: &str) -> Result<Vec<SourceRecord>> {
        let mut out = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
            if let Some(token) = offset.take() {
                query.push(("offset", token));
            }
            let raw = self.get_json(&["v0", base_id, table], &query)?;
            let page: RecordPage = serde_json::from_value(raw)
                .with_context(|| format!("unexpected record page from {base_id}/{table}"))?;
            out.extend(page.records);
            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }

    fn throttle(&self) {
        if let Some(last) = self.last_request.get() {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last_request.set(Some(Instant::now()));
    }

    fn request(
        &self,
        method: &Method,
        url: &Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> RequestBuilder {
        let mut req = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(&self.api_key);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        req
    }

    fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&Value>,
        retry: Retry,
    ) -> Result<Value> {
        let url = self.endpoint(segments)?;
        let label = format!("{method} {}", url.path());

        for attempt in 0..=self.retries {
            self.throttle();
            let last_attempt = attempt == self.retries;
            let delay = Duration::from_millis(BACKOFF_STEP_MS * (attempt + 1));

            let response = match self.request(&method, &url, query, body).send() {
                Ok(response) => response,
                Err(err) if !last_attempt && retry.after_transport_error(&err) => {
                    progress(&format!("{label} transport error, retrying: {err}"));
                    thread::sleep(delay);
                    continue;
                }
                Err(err) => {
                    let attempts = attempt + 1;
                    return Err(err)
                        .with_context(|| format!("{label} failed after {attempts} attempts"));
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<Value>()
                    .with_context(|| format!("{label} returned an unreadable body"));
            }
            if retry.after_status(status) && !last_attempt {
                progress(&format!("{label} returned {status}, retrying"));
                thread::sleep(delay);
                continue;
            }
            let text = response.text().unwrap_or_default();
            bail!(
                "{label} failed with status {status}: {}",
                truncate_with_ellipsis(&text, ERROR_BODY_CHARS)
            );
        }
        bail!("{label} was never attempted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::fake_http::{FakeHttp, Reply};
    use serde_json::json;

    fn client(base_url: &str) -> ApiClient {
        let api = ApiConfig {
            base_url: base_url.to_string(),
            api_key: "patTest".into(),
            ..ApiConfig::default()
        };
        ApiClient::new(&api).expect("client")
    }

    #[test]
    fn endpoint_encodes_table_names() {
        let c = client("https://api.airtable.com");
        let url = c.endpoint(&["v0", "appSrc", "Archive Base Tracking"]).expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.airtable.com/v0/appSrc/Archive%20Base%20Tracking"
        );
    }

    #[test]
    fn endpoint_keeps_a_base_path_prefix() {
        let c = client("http://127.0.0.1:8080/proxy/");
        let url = c.endpoint(&["v0", "meta", "bases"]).expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/proxy/v0/meta/bases");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let api = ApiConfig {
            base_url: "not a url".into(),
            ..ApiConfig::default()
        };
        assert!(ApiClient::new(&api).is_err());
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn record_page_parses_offset_and_missing_fields() {
        let page: RecordPage = serde_json::from_value(json!({
            "records": [
                {"id": "rec1", "createdTime": "2024-01-01T00:00:00.000Z", "fields": {"Name": "a"}},
                {"id": "rec2"}
            ],
            "offset": "itrNext/rec2"
        }))
        .expect("page");
        assert_eq!(page.records.len(), 2);
        assert!(page.records[1].fields.is_empty());
        assert_eq!(page.offset.as_deref(), Some("itrNext/rec2"));
    }

    #[test]
    fn unreachable_host_fails_after_retries() {
        let api = ApiConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 1,
            retries: 1,
            min_interval_ms: 0,
            ..ApiConfig::default()
        };
        let c = ApiClient::new(&api).expect("client");
        let err = c.get_json(&["v0", "appX", "T"], &[]).expect_err("must fail");
        assert!(format!("{err:#}").contains("failed after 2 attempts"));
    }

    #[test]
    fn create_is_not_repeated_after_a_timeout() {
        let server = FakeHttp::start(|_, _, seen| {
            if seen == 0 {
                Reply::ok(json!({"id": "appLate"})).after_millis(2500)
            } else {
                Reply::ok(json!({"id": "appSecond"}))
            }
        });
        let c = server.client(1, 2);
        let err = c
            .create_json(&["v0", "meta", "bases"], &json!({"name": "Archive 2024_01"}))
            .expect_err("timed out create must fail");
        assert!(format!("{err:#}").contains("failed after 1 attempts"));
        assert_eq!(server.count("POST", "/v0/meta/bases"), 1);
    }

    #[test]
    fn create_is_not_repeated_after_a_server_error() {
        let server = FakeHttp::start(|_, _, seen| {
            if seen == 0 {
                Reply::status(502)
            } else {
                Reply::ok(json!({"id": "appSecond"}))
            }
        });
        let c = server.client(5, 2);
        let err = c
            .create_json(&["v0", "meta", "bases"], &json!({"name": "Archive 2024_01"}))
            .expect_err("502 create must fail");
        assert!(format!("{err:#}").contains("502"));
        assert_eq!(server.count("POST", "/v0/meta/bases"), 1);
    }

    #[test]
    fn create_is_repeated_after_too_many_requests() {
        let server = FakeHttp::start(|_, _, seen| {
            if seen == 0 {
                Reply::status(429)
            } else {
                Reply::ok(json!({"id": "appQ1"}))
            }
        });
        let c = server.client(5, 2);
        let created = c
            .create_json(&["v0", "meta", "bases"], &json!({"name": "Archive 2024_Q1"}))
            .expect("second attempt succeeds");
        assert_eq!(created["id"], "appQ1");
        assert_eq!(server.count("POST", "/v0/meta/bases"), 2);
    }

    #[test]
    fn reads_are_repeated_after_a_timeout() {
        let server = FakeHttp::start(|_, _, seen| {
            let reply = Reply::ok(json!({"records": []}));
            if seen == 0 {
                reply.after_millis(2500)
            } else {
                reply
            }
        });
        let c = server.client(1, 2);
        c.get_json(&["v0", "appSrc", "Orders"], &[]).expect("retry succeeds");
        assert_eq!(server.count("GET", "/v0/appSrc/Orders"), 2);
    }
}
