//! Storage operation handlers.
//!
//! The gateway entry point resolves a storage request against the storage
//! route table and hands the result to [`serve`].  Each handler extracts and
//! coerces its parameters from the [`OperationRequest`], calls the
//! [`StorageEngine`](crate::engine::StorageEngine) on the blocking pool, and
//! renders the S3 response.

pub mod bucket;
pub mod multipart;
pub mod object;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::auth::Identity;
use crate::context::RequestContext;
use crate::engine::{EngineResult, StorageEngine};
use crate::errors::S3Error;
use crate::routes::{decode_query, Operation, RouteMatch};
use crate::AppState;

/// Largest page any listing returns.
pub const MAX_LIST_ENTRIES: usize = 1000;

/// Highest part number S3 accepts.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Everything a handler needs, detached from the HTTP request.
#[derive(Debug)]
pub struct OperationRequest {
    pub operation: Operation,
    /// Path captures and captured query values.
    pub vars: BTreeMap<String, String>,
    /// Decoded query pairs in request order.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub identity: Identity,
}

impl OperationRequest {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The bucket capture, checked against the S3 naming rules.
    pub fn bucket(&self) -> Result<&str, S3Error> {
        let bucket = self.vars.get("bucket").map(String::as_str).unwrap_or("");
        validate_bucket_name(bucket)?;
        Ok(bucket)
    }

    /// The object capture, checked against the object naming rules.
    pub fn key(&self) -> Result<&str, S3Error> {
        let key = self.vars.get("object").map(String::as_str).unwrap_or("");
        validate_object_name(key)?;
        Ok(key)
    }

    pub fn upload_id(&self) -> &str {
        self.vars
            .get("uploadId")
            .map(String::as_str)
            .unwrap_or("")
    }

    /// `partNumber` as an integer in `1..=10000`.
    pub fn part_number(&self) -> Result<u32, S3Error> {
        let raw = self.query_value("partNumber").unwrap_or("");
        raw.parse::<u32>()
            .ok()
            .filter(|n| (1..=MAX_PART_NUMBER).contains(n))
            .ok_or_else(|| S3Error::InvalidArgument {
                message: format!("Part number must be an integer between 1 and {MAX_PART_NUMBER}, inclusive"),
            })
    }

    /// A listing bound such as `max-keys`, in `0..=1000`, defaulting to 1000.
    pub fn page_size(&self, key: &str) -> Result<usize, S3Error> {
        match self.query_value(key) {
            None | Some("") => Ok(MAX_LIST_ENTRIES),
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|n| *n >= 0)
                .map(|n| (n as usize).min(MAX_LIST_ENTRIES))
                .ok_or_else(|| S3Error::InvalidArgument {
                    message: format!("Argument {key} must be a non-negative integer"),
                }),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

// -- Name validation ----------------------------------------------------------

/// Validate that a bucket name conforms to S3 naming rules.
///
/// Rules:
/// - 3-63 characters long
/// - Only lowercase letters, numbers, hyphens, and periods
/// - Must begin and end with a letter or number
/// - No adjacent periods
/// - Cannot be formatted as an IP address (e.g., 192.168.5.4)
pub fn validate_bucket_name(name: &str) -> Result<(), S3Error> {
    let invalid = || S3Error::InvalidBucketName {
        name: name.to_string(),
    };

    if !(3..=63).contains(&name.len()) {
        return Err(invalid());
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return Err(invalid());
    }

    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let bytes = name.as_bytes();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return Err(invalid());
    }
    if name.contains("..") || looks_like_ip(name) {
        return Err(invalid());
    }
    Ok(())
}

/// Check whether a string looks like an IPv4 address (e.g., "192.168.5.4").
fn looks_like_ip(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| p.parse::<u8>().is_ok())
}

/// Object names are non-empty and at most 1024 bytes.
pub fn validate_object_name(key: &str) -> Result<(), S3Error> {
    if key.is_empty() || key.len() > 1024 {
        return Err(S3Error::InvalidObjectName {
            key: key.to_string(),
        });
    }
    Ok(())
}

// -- Dispatch -----------------------------------------------------------------

/// Run the handler for a resolved storage request.
///
/// The pipeline has already authenticated the request; a missing identity
/// here means the request bypassed it and is refused.
pub async fn serve(
    state: Arc<AppState>,
    route: RouteMatch,
    req: Request<Bytes>,
    ctx: &RequestContext,
) -> Result<Response, S3Error> {
    let identity = ctx.identity().cloned().ok_or_else(|| S3Error::AccessDenied {
        message: "Access Denied.".to_string(),
    })?;

    let (parts, body) = req.into_parts();
    let op = OperationRequest {
        operation: route.operation,
        vars: route.vars,
        query: decode_query(parts.uri.query()),
        headers: parts.headers,
        body,
        identity,
    };
    dispatch(state, op).await
}

/// Run the handler for `op.operation`.
pub async fn dispatch(state: Arc<AppState>, op: OperationRequest) -> Result<Response, S3Error> {
    match op.operation {
        Operation::ListBuckets => bucket::list_buckets(state, &op).await,
        Operation::PutBucket => bucket::put_bucket(state, &op).await,
        Operation::HeadBucket => bucket::head_bucket(state, &op).await,
        Operation::DeleteBucket => bucket::delete_bucket(state, &op).await,
        Operation::GetBucketLocation => bucket::get_bucket_location(state, &op).await,
        Operation::GetBucketPolicy => bucket::get_bucket_policy(state, &op).await,
        Operation::PutBucketPolicy => bucket::put_bucket_policy(state, &op).await,
        Operation::DeleteBucketPolicy => bucket::delete_bucket_policy(state, &op).await,
        Operation::ListObjects => bucket::list_objects(state, &op).await,
        Operation::DeleteMultipleObjects => bucket::delete_multiple_objects(state, &op).await,
        Operation::PostPolicy => Err(S3Error::NotImplemented),

        Operation::PutObject => object::put_object(state, &op).await,
        Operation::GetObject => object::get_object(state, &op).await,
        Operation::HeadObject => object::head_object(state, &op).await,
        Operation::CopyObject => object::copy_object(state, &op).await,
        Operation::DeleteObject => object::delete_object(state, &op).await,

        Operation::NewMultipartUpload => multipart::new_multipart_upload(state, &op).await,
        Operation::UploadPart => multipart::upload_part(state, &op).await,
        Operation::ListObjectParts => multipart::list_object_parts(state, &op).await,
        Operation::CompleteMultipartUpload => multipart::complete_multipart_upload(state, &op).await,
        Operation::AbortMultipartUpload => multipart::abort_multipart_upload(state, &op).await,
        Operation::ListMultipartUploads => multipart::list_multipart_uploads(state, &op).await,

        Operation::ConsoleRpc | Operation::ConsoleAsset | Operation::ConsoleIndex => {
            Err(S3Error::NoSuchRoute)
        }
    }
}

// -- Shared helpers -----------------------------------------------------------

/// Run `f` against the engine on the blocking pool.
pub(crate) async fn with_engine<T, F>(state: &AppState, f: F) -> Result<T, S3Error>
where
    F: FnOnce(&dyn StorageEngine) -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || f(engine.as_ref()))
        .await
        .map_err(|e| S3Error::InternalError(anyhow::anyhow!("storage task failed: {e}")))?
        .map_err(S3Error::from)
}

pub(crate) fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [("content-type", "application/xml")], body).into_response()
}

pub(crate) fn quoted_etag(etag: &str) -> String {
    format!("\"{etag}\"")
}
