//! Supabase implementation of [`RemoteGateway`].
//!
//! Talks to two REST surfaces of one project with the service-role key:
//!
//! | Operation | Request |
//! |---|---|
//! | list approved | `GET /rest/v1/<table>?status=eq.approved&order=created_at.asc` (paged) |
//! | download | `GET /storage/v1/object/<bucket>/<key>` |
//! | delete objects | `DELETE /storage/v1/object/<bucket>` with `{"prefixes": [...]}` |
//! | delete rows | `DELETE /rest/v1/<table>?id=in.(...)` |
//!
//! The storage API reports a missing object as a 400 whose body carries
//! `"statusCode":"404"`, so not-found detection looks at the body as well as
//! the status line.

use super::{RemoteError, RemoteGateway};
use crate::config::RemoteConfig;
use crate::types::SourceRecord;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{StatusCode, Url};
use tracing::{debug, info, instrument, warn};

/// Columns read from the submissions table.
const SELECT_COLUMNS: &str =
    "id,image_path,uploader_name,taken_at,people,category,year,status,created_at";

/// Rows per listing request. PostgREST caps responses at 1000 by default.
const PAGE_SIZE: usize = 1000;

/// Gateway for one Supabase project.
pub struct SupabaseGateway {
    client: Client,
    base_url: Url,
    key: String,
    bucket: String,
    table: String,
}

impl SupabaseGateway {
    /// Build a gateway from validated remote settings.
    #[instrument(level = "debug", skip_all, fields(url = %config.url, timeout_secs = config.timeout_secs))]
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let base_url = Url::parse(config.url.trim().trim_end_matches('/'))
            .map_err(|e| RemoteError::Http(format!("invalid remote url: {e}")))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                warn!(error = %e, "Failed to create HTTP client");
                RemoteError::Http(format!("failed to create HTTP client: {e}"))
            })?;

        info!(
            bucket = %config.bucket,
            table = %config.table,
            key_len = config.service_key.len(),
            "remote gateway ready"
        );
        Ok(Self {
            client,
            base_url,
            key: config.service_key.trim().to_string(),
            bucket: config.bucket.clone(),
            table: config.table.clone(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", &self.key).bearer_auth(&self.key)
    }

    fn table_url(&self) -> Result<Url, RemoteError> {
        endpoint(&self.base_url, &["rest", "v1", &self.table], "")
    }

    fn bucket_url(&self) -> Result<Url, RemoteError> {
        endpoint(&self.base_url, &["storage", "v1", "object", &self.bucket], "")
    }

    fn object_url(&self, object_path: &str) -> Result<Url, RemoteError> {
        endpoint(
            &self.base_url,
            &["storage", "v1", "object", &self.bucket],
            object_path,
        )
    }

    fn fetch_page(&self, offset: usize) -> Result<Vec<SourceRecord>, RemoteError> {
        let request = self.client.get(self.table_url()?).query(&[
            ("select", SELECT_COLUMNS.to_string()),
            ("status", "eq.approved".to_string()),
            ("order", "created_at.asc,id.asc".to_string()),
            ("limit", PAGE_SIZE.to_string()),
            ("offset", offset.to_string()),
        ]);
        let response = self.authorized(request).send().map_err(transport_error)?;
        let response = check_status(response).map_err(|(status, body)| {
            RemoteError::Query(format!("listing returned {status}: {body}"))
        })?;
        response
            .json::<Vec<SourceRecord>>()
            .map_err(|e| RemoteError::Query(format!("unexpected listing payload: {e}")))
    }
}

impl RemoteGateway for SupabaseGateway {
    #[instrument(level = "debug", skip(self), fields(table = %self.table))]
    fn list_approved(&self) -> Result<Vec<SourceRecord>, RemoteError> {
        let mut records = Vec::new();
        loop {
            let page = self.fetch_page(records.len())?;
            let page_len = page.len();
            debug!(offset = records.len(), rows = page_len, "fetched listing page");
            records.extend(page);
            if page_len < PAGE_SIZE {
                break;
            }
        }
        Ok(records)
    }

    #[instrument(level = "debug", skip(self))]
    fn download_object(&self, object_path: &str) -> Result<Vec<u8>, RemoteError> {
        let request = self.client.get(self.object_url(object_path)?);
        let response = self.authorized(request).send().map_err(transport_error)?;
        let response = check_status(response).map_err(|(status, body)| {
            if looks_not_found(status, &body) {
                RemoteError::NotFound(object_path.to_string())
            } else {
                RemoteError::Download {
                    path: object_path.to_string(),
                    message: format!("{status}: {body}"),
                }
            }
        })?;
        let bytes = response.bytes().map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(e.to_string())
            } else {
                RemoteError::Download {
                    path: object_path.to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        Ok(bytes.to_vec())
    }

    #[instrument(level = "debug", skip_all, fields(count = object_paths.len()))]
    fn delete_objects(&self, object_paths: &[String]) -> Result<(), RemoteError> {
        let request = self
            .client
            .delete(self.bucket_url()?)
            .json(&serde_json::json!({ "prefixes": object_paths }));
        let response = self.authorized(request).send().map_err(transport_error)?;
        check_status(response).map_err(|(status, body)| {
            if looks_not_found(status, &body) {
                RemoteError::NotFound(object_paths.join(", "))
            } else {
                RemoteError::Delete(format!("storage delete returned {status}: {body}"))
            }
        })?;
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(count = ids.len()))]
    fn delete_records(&self, ids: &[String]) -> Result<(), RemoteError> {
        let request = self
            .client
            .delete(self.table_url()?)
            .query(&[("id", in_filter(ids))])
            .header("Prefer", "return=minimal");
        let response = self.authorized(request).send().map_err(transport_error)?;
        check_status(response).map_err(|(status, body)| {
            if looks_not_found(status, &body) {
                RemoteError::NotFound(ids.join(", "))
            } else {
                RemoteError::Delete(format!("row delete returned {status}: {body}"))
            }
        })?;
        Ok(())
    }
}

/// Append path segments (and an object key, split on `/`) to the base URL.
///
/// Segments are percent-encoded by `Url`, so keys with spaces or non-ASCII
/// characters survive intact.
fn endpoint(base: &Url, segments: &[&str], object_key: &str) -> Result<Url, RemoteError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| RemoteError::Http(format!("remote url cannot be a base: {base}")))?;
        path.pop_if_empty();
        path.extend(segments);
        path.extend(object_key.split('/').filter(|s| !s.is_empty()));
    }
    Ok(url)
}

/// PostgREST `in.(...)` filter with every id double-quoted.
fn in_filter(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

/// Pass successful responses through; return status and body otherwise.
fn check_status(response: Response) -> Result<Response, (StatusCode, String)> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err((status, body.chars().take(300).collect()))
}

fn looks_not_found(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }
    if !status.is_client_error() {
        return false;
    }
    let body = body.to_ascii_lowercase();
    body.contains("not_found")
        || body.contains("not found")
        || body.contains("\"statuscode\":\"404\"")
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout(e.to_string())
    } else {
        RemoteError::Http(e.to_string())
    }
}
