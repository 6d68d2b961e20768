//! Remote collection client: CRUD calls against one backend resource.
use async_trait::async_trait;
use reqwest::{Client, Method, Request, RequestBuilder, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::auth::AuthSession;
use crate::error::{ApiError, FieldError};
use crate::model::{ListQuery, Record};
use crate::resource::{BodyEncoding, NarrowField, ResourceSpec};
use crate::session::Draft;

pub mod envelope;
pub mod payload;

pub use envelope::{normalize_list, normalize_one};
pub use payload::encode_payload;

#[async_trait]
pub trait RemoteCollection: Send + Sync {
    fn spec(&self) -> &ResourceSpec;

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>, ApiError>;

    /// `list` with every failure logged and reduced to an empty collection.
    async fn list_or_empty(&self, query: &ListQuery) -> Vec<Record> {
        match self.list(query).await {
            Ok(records) => records,
            Err(err) => {
                warn!(%err, resource = %self.spec().kind, "list failed; showing empty collection");
                Vec::new()
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Record, ApiError>;

    async fn create(&self, draft: &Draft) -> Result<Record, ApiError>;

    async fn update(&self, id: &str, draft: &Draft) -> Result<Record, ApiError>;

    async fn update_narrow(
        &self,
        id: &str,
        field: &NarrowField,
        value: &Value,
    ) -> Result<(), ApiError>;

    async fn remove(&self, id: &str) -> Result<(), ApiError>;
}

/// `RemoteCollection` over HTTP for one configured resource.
#[derive(Clone)]
pub struct HttpCollection {
    http: Client,
    base_url: Url,
    spec: ResourceSpec,
    auth: AuthSession,
}

impl fmt::Debug for HttpCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpCollection")
            .field("base_url", &self.base_url)
            .field("path", &self.spec.path)
            .finish_non_exhaustive()
    }
}

/// Shared HTTP client for every collection of one process.
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<Client, ApiError> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {}", e)))
}

/// Absolute URL of a stored asset: absolute inputs pass through, bare file
/// names resolve under `<base>/uploads/`.
pub fn resolve_asset_url(base_url: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Url::parse(raw).ok();
    }
    base_url
        .join("uploads/")
        .and_then(|uploads| uploads.join(raw.trim_start_matches('/')))
        .ok()
}

impl HttpCollection {
    pub fn new(http: Client, base_url: Url, spec: ResourceSpec, auth: AuthSession) -> Self {
        Self {
            http,
            base_url,
            spec,
            auth,
        }
    }

    fn endpoint(&self, extra: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::Network(format!("invalid base URL {}", self.base_url)))?;
            segments.pop_if_empty();
            for part in self.spec.path.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
            for part in extra {
                segments.push(part);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, extra: &[&str]) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(extra)?;
        let builder = self.http.request(method, url);
        Ok(match self.auth.current_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    pub fn build_list_request(&self, query: &ListQuery) -> Result<Request, ApiError> {
        let mut builder = self.request(Method::GET, &[])?;
        if !query.is_empty() {
            builder = builder.query(query.pairs());
        }
        Ok(builder.build()?)
    }

    /// Create/update request: multipart for attachment-capable resources,
    /// JSON otherwise.
    pub fn build_write_request(
        &self,
        method: Method,
        extra: &[&str],
        draft: &Draft,
    ) -> Result<Request, ApiError> {
        let payload = encode_payload(&self.spec, draft.fields());
        let builder = self.request(method, extra)?;
        let builder = match self.spec.encoding {
            BodyEncoding::Multipart => {
                builder.multipart(payload::multipart_form(&payload, draft.attachment())?)
            }
            BodyEncoding::Json => builder.json(&payload),
        };
        Ok(builder.build()?)
    }

    async fn execute(&self, request: Request) -> Result<String, ApiError> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, authorized = request.headers().contains_key("Authorization"), "sending request");
        let res = self.http.execute(request).await.map_err(|err| {
            warn!(%method, %url, %err, "request failed to reach backend");
            ApiError::Network(err.to_string())
        })?;

        let status = res.status();
        let body = res.text().await.map_err(|err| {
            warn!(%method, %url, %err, "failed to read response body");
            ApiError::Network(err.to_string())
        })?;
        if status == StatusCode::NOT_FOUND {
            debug!(%method, %url, "backend returned 404");
            return Err(ApiError::NotFound(url.path().to_string()));
        }
        if !status.is_success() {
            warn!(%method, %url, %status, "backend rejected request");
            return Err(ApiError::Server {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }
        Ok(body)
    }

    async fn write(&self, method: Method, extra: &[&str], draft: &Draft) -> Result<Record, ApiError> {
        let request = self.build_write_request(method, extra, draft)?;
        let body = self.execute(request).await?;
        let parsed = serde_json::from_str::<Value>(&body).unwrap_or(Value::Null);
        Ok(normalize_one(parsed, &self.spec.id_key).unwrap_or_else(|| {
            let mut echoed = draft.fields().clone();
            echoed.retain(|k, _| !self.spec.is_transient(k));
            echoed
        }))
    }
}

fn error_message(body: &str, status: StatusCode) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        ["message", "error"]
            .iter()
            .find_map(|k| v.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    });
    match from_json {
        Some(message) => message,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

#[async_trait]
impl RemoteCollection for HttpCollection {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    #[instrument(skip_all, fields(resource = %self.spec.kind))]
    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>, ApiError> {
        let request = self.build_list_request(query)?;
        let body = self.execute(request).await?;
        let parsed: Value = serde_json::from_str(&body)?;
        let records = normalize_list(parsed, &self.spec.envelope_key);
        debug!(count = records.len(), "listed records");
        Ok(records)
    }

    #[instrument(skip_all, fields(resource = %self.spec.kind, id = %id))]
    async fn get(&self, id: &str) -> Result<Record, ApiError> {
        let request = self.request(Method::GET, &[id])?.build()?;
        let body = self.execute(request).await?;
        let parsed: Value = serde_json::from_str(&body)?;
        normalize_one(parsed, &self.spec.id_key)
            .ok_or_else(|| ApiError::Decode(format!("{} {} is not an object", self.spec.kind, id)))
    }

    #[instrument(skip_all, fields(resource = %self.spec.kind))]
    async fn create(&self, draft: &Draft) -> Result<Record, ApiError> {
        if draft.identity(&self.spec.id_key).is_some() {
            return Err(ApiError::Validation(vec![FieldError {
                field: self.spec.id_key.clone(),
                message: format!("{} must not be set when creating", self.spec.id_key),
            }]));
        }
        self.write(Method::POST, &[], draft).await
    }

    #[instrument(skip_all, fields(resource = %self.spec.kind, id = %id))]
    async fn update(&self, id: &str, draft: &Draft) -> Result<Record, ApiError> {
        self.write(Method::PUT, &[id], draft).await
    }

    #[instrument(skip_all, fields(resource = %self.spec.kind, id = %id, field = %field.field))]
    async fn update_narrow(
        &self,
        id: &str,
        field: &NarrowField,
        value: &Value,
    ) -> Result<(), ApiError> {
        let mut body = Record::new();
        body.insert(field.body_key.clone(), value.clone());
        let request = self
            .request(Method::PUT, &[id, field.endpoint.as_str()])?
            .json(&body)
            .build()?;
        self.execute(request).await.map(|_| ())
    }

    #[instrument(skip_all, fields(resource = %self.spec.kind, id = %id))]
    async fn remove(&self, id: &str) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, &[id])?.build()?;
        self.execute(request).await.map(|_| ())
    }
}
