//! File upload endpoint
//!
//! The request body is streamed straight into the upload store. When the
//! client passes `uploadId`, the whole raw body is observed by the progress
//! correlator on the way, and the matching notification channel receives
//! percentages.
//!
//! Browser clients post `multipart/form-data` with a `file` part and an
//! optional `comment` field. Multipart parsing happens downstream of the
//! correlator, so percentages cover boundaries and headers too. Any other
//! content type is stored as-is, named by the `name` query parameter.

use axum::{
    body::Body,
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{header, request::Parts, HeaderMap},
    Json,
};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use fileshare_core::models::SubjectId;
use fileshare_core::progress::TransferCompletion;
use fileshare_core::storage::{limit_body, StoredUpload};

use crate::http::middleware::AuthUser;
use crate::http::{AppError, AppResult, AppState};

/// Multipart part carrying the file content
const FILE_FIELD: &str = "file";
/// Free-text multipart field sent alongside the file
const COMMENT_FIELD: &str = "comment";

/// Query parameters for an upload
#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    /// Correlation id shared with the notification channel
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    /// Original file name for raw bodies; multipart uploads use the part's filename
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub message: String,
}

/// What one request left in the store
struct Received {
    stored: StoredUpload,
    name: Option<String>,
    comment: Option<String>,
}

/// Declared body length, if the client sent a usable `Content-Length`
fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
}

pub async fn upload_file(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<UploadQuery>,
    request: Request,
) -> AppResult<Json<UploadResponse>> {
    let limit = state.settings.max_upload_bytes;
    let (parts, body) = request.into_parts();
    let total_length = declared_length(&parts.headers);
    if total_length.is_some_and(|len| len > limit) {
        return Err(AppError::payload_too_large(format!(
            "Upload exceeds {limit} bytes"
        )));
    }

    let body = limit_body(body.into_data_stream().map_err(std::io::Error::other), limit);
    let watch = body.watch();
    let correlation_id = query.upload_id.filter(|id| !id.is_empty());
    let fallback_name = query.name;

    let result = match &correlation_id {
        Some(id) => {
            let observed = state.correlator.attach(id.as_str(), body, total_length);
            let completion = observed.completion();
            receive(&state, &auth.subject, parts, observed, fallback_name, Some(&completion)).await
        }
        None => receive(&state, &auth.subject, parts, body, fallback_name, None).await,
    };

    let received = match result {
        Ok(received) => received,
        Err(_) if watch.exceeded().is_some() => {
            return Err(AppError::payload_too_large(format!(
                "Upload exceeds {limit} bytes"
            )));
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        upload_id = %received.stored.id,
        subject = %auth.subject,
        correlation_id = correlation_id.as_deref().unwrap_or_default(),
        original_name = received.name.as_deref().unwrap_or_default(),
        size = received.stored.size,
        "Upload completed"
    );

    Ok(Json(UploadResponse {
        id: received.stored.id.to_string(),
        size: received.stored.size,
        name: received.name,
        comment: received.comment,
        message: "Upload successful".to_string(),
    }))
}

/// Store the body and, on success, mark the transfer complete while the body
/// is still alive so the channel ends with a final percentage.
async fn receive<S>(
    state: &AppState,
    owner: &SubjectId,
    parts: Parts,
    body: S,
    fallback_name: Option<String>,
    completion: Option<&TransferCompletion>,
) -> fileshare_core::Result<Received>
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static,
{
    if !is_multipart(&parts.headers) {
        let mut reader = StreamReader::new(body);
        let stored = state
            .store
            .store(owner, fallback_name.as_deref(), &mut reader)
            .await?;
        if let Some(completion) = completion {
            completion.complete();
        }
        return Ok(Received {
            stored,
            name: fallback_name,
            comment: None,
        });
    }

    // the request keeps its extensions, so the route's body limit settings apply
    let request = Request::from_parts(parts, Body::from_stream(body));
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| fileshare_core::Error::InvalidInput(rejection.body_text()))?;

    let mut stored = None;
    let mut name = None;
    let mut comment = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some(FILE_FIELD) if stored.is_none() => {
                name = field.file_name().map(str::to_owned).or_else(|| fallback_name.clone());
                let mut reader =
                    StreamReader::new(Box::pin(field.map_err(std::io::Error::other)));
                stored = Some(state.store.store(owner, name.as_deref(), &mut reader).await?);
            }
            Some(COMMENT_FIELD) => {
                comment = Some(field.text().await.map_err(multipart_error)?);
            }
            other => {
                debug!(field = other.unwrap_or_default(), "Ignoring multipart field");
            }
        }
    }

    let stored = stored.ok_or_else(|| {
        fileshare_core::Error::InvalidInput(format!("multipart body has no {FILE_FIELD:?} part"))
    })?;
    if let Some(completion) = completion {
        completion.complete();
    }

    Ok(Received {
        stored,
        name,
        comment,
    })
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> fileshare_core::Error {
    fileshare_core::Error::InvalidInput(err.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_declared_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_length(&headers), None);

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1000"));
        assert_eq!(declared_length(&headers), Some(1000));

        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(declared_length(&headers), None);
    }

    #[test]
    fn test_is_multipart() {
        let mut headers = HeaderMap::new();
        assert!(!is_multipart(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=xyz"),
        );
        assert!(is_multipart(&headers));

        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        assert!(!is_multipart(&headers));
    }
}
